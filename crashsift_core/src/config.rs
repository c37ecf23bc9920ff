use crate::report::ClassificationReport;
use crate::runner::{CommandRunnerConfig, RunnerError, TIMEOUT_MARKER, locate_target};
use crate::taxonomy::{Category, Taxonomy, TaxonomyError, UNCLASSIFIED};
use crate::triage::TriageDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// `[target]`: the executable every sample is run against.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TargetSettings {
    /// Tried in order; the first existing file is the target.
    #[serde(default = "default_candidates")]
    pub candidates: Vec<PathBuf>,
    #[serde(default = "default_extra_args")]
    pub extra_args: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub working_dir: Option<PathBuf>,
}

fn default_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("cmake-build-debug/arkscript"),
        PathBuf::from("build/arkscript"),
    ]
}

fn default_extra_args() -> Vec<String> {
    vec!["-L".to_string(), "./lib".to_string()]
}

fn default_timeout_ms() -> u64 {
    2000
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            extra_args: default_extra_args(),
            timeout_ms: default_timeout_ms(),
            working_dir: None,
        }
    }
}

impl TargetSettings {
    /// Resolves the target and builds a runner configuration. A missing
    /// target is the one fatal configuration error.
    pub fn runner_config(
        &self,
        timeout: Option<Duration>,
    ) -> Result<CommandRunnerConfig, RunnerError> {
        Ok(CommandRunnerConfig {
            target: locate_target(&self.candidates)?,
            extra_args: self.extra_args.clone(),
            timeout,
            working_dir: self.working_dir.clone(),
        })
    }

    /// Per-sample timeout for classification.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// One `[[classify.categories]]` entry.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CategorySettings {
    pub name: String,
    pub pattern: String,
}

/// `[classify]`: what to classify and where lists go.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ClassifySettings {
    #[serde(default = "default_corpus_glob")]
    pub corpus_glob: String,
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Categories that get a `.list` file after each run.
    #[serde(default = "default_interesting")]
    pub interesting: Vec<String>,
    /// Replaces the reference taxonomy when present. Order is priority.
    #[serde(default)]
    pub categories: Option<Vec<CategorySettings>>,
}

/// AFL-style layout: one directory per worker under `fuzzing/output`.
pub fn default_corpus_glob() -> String {
    "fuzzing/output/*/crashes/id*".to_string()
}

pub fn default_output_root() -> PathBuf {
    PathBuf::from("fuzzing/output")
}

fn default_interesting() -> Vec<String> {
    [
        "std::bad_alloc",
        "unknown instruction",
        "parseerror:",
        "compilationerror",
        TIMEOUT_MARKER,
        UNCLASSIFIED,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ClassifySettings {
    fn default() -> Self {
        Self {
            corpus_glob: default_corpus_glob(),
            output_root: default_output_root(),
            interesting: default_interesting(),
            categories: None,
        }
    }
}

impl ClassifySettings {
    /// The configured taxonomy, or the reference one when none is configured.
    pub fn taxonomy(&self) -> Result<Taxonomy, TaxonomyError> {
        match &self.categories {
            Some(categories) => Taxonomy::new(
                categories
                    .iter()
                    .map(|c| Category::new(c.name.clone(), &c.pattern))
                    .collect(),
            ),
            None => Ok(Taxonomy::reference()),
        }
    }

    /// Writes the `interesting` lists under `output_root`.
    pub fn write_lists(
        &self,
        report: &ClassificationReport,
    ) -> Result<Vec<PathBuf>, crate::report::ReportError> {
        report.write_lists(&self.output_root, &self.interesting)
    }
}

/// `[triage]`: destinations and filtering for interactive review.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TriageSettings {
    #[serde(default = "default_confirmed_dir")]
    pub confirmed_dir: PathBuf,
    #[serde(default = "default_rejected_dir")]
    pub rejected_dir: PathBuf,
    /// Arguments containing this text are treated as seeds and dropped.
    #[serde(default = "default_exclude_substring")]
    pub exclude_substring: Option<String>,
    /// Triage runs unbounded unless set; an operator is watching.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_confirmed_dir() -> PathBuf {
    TriageDirs::default().confirmed
}

fn default_rejected_dir() -> PathBuf {
    TriageDirs::default().rejected
}

fn default_exclude_substring() -> Option<String> {
    Some("__arkscript__".to_string())
}

impl Default for TriageSettings {
    fn default() -> Self {
        Self {
            confirmed_dir: default_confirmed_dir(),
            rejected_dir: default_rejected_dir(),
            exclude_substring: default_exclude_substring(),
            timeout_ms: None,
        }
    }
}

impl TriageSettings {
    /// Destination directories for confirmed and rejected files.
    pub fn dirs(&self) -> TriageDirs {
        TriageDirs {
            confirmed: self.confirmed_dir.clone(),
            rejected: self.rejected_dir.clone(),
        }
    }

    /// `None` lets the target run as long as it likes.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// The whole configuration file. Every section and key is optional.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CrashsiftConfig {
    #[serde(default)]
    pub target: TargetSettings,
    #[serde(default)]
    pub classify: ClassifySettings,
    #[serde(default)]
    pub triage: TriageSettings,
}

/// Looked up in the working directory when no config file is given.
pub const DEFAULT_CONFIG_FILE: &str = "crashsift.toml";

impl CrashsiftConfig {
    /// Reads and parses a TOML file.
    ///
    /// # Errors
    /// The error names `path` for unreadable files, malformed TOML, unknown
    /// keys and invalid taxonomies.
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;
        Self::from_toml(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file {:?}: {}", path, e))
    }

    /// Parses a TOML document and validates its taxonomy.
    pub fn from_toml(content: &str) -> Result<Self, anyhow::Error> {
        let config: CrashsiftConfig = toml::from_str(content)?;
        // Surface taxonomy mistakes at load time rather than mid-run.
        config.classify.taxonomy()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn empty_document_gives_defaults() {
        let config = CrashsiftConfig::from_toml("").unwrap();
        assert_eq!(config.target.candidates, default_candidates());
        assert_eq!(config.target.extra_args, vec!["-L", "./lib"]);
        assert_eq!(config.target.timeout(), Duration::from_secs(2));
        assert_eq!(config.classify.corpus_glob, "fuzzing/output/*/crashes/id*");
        assert_eq!(config.classify.interesting.len(), 6);
        assert_eq!(config.classify.taxonomy().unwrap(), Taxonomy::reference());
        assert_eq!(config.triage.confirmed_dir, PathBuf::from("fct-bad"));
        assert_eq!(config.triage.rejected_dir, PathBuf::from("fct-ok"));
        assert_eq!(config.triage.timeout(), None);
    }

    #[test]
    fn parses_full_document() {
        let config = CrashsiftConfig::from_toml(
            r#"
            [target]
            candidates = ["bin/interp"]
            extra-args = []
            timeout-ms = 500

            [classify]
            corpus-glob = "out/*/crashes/id*"
            output-root = "out"
            interesting = ["segv"]

            [[classify.categories]]
            name = "segv"
            pattern = "Segmentation fault"

            [[classify.categories]]
            name = "abort"
            pattern = "Aborted"

            [triage]
            confirmed-dir = "confirmed"
            rejected-dir = "rejected"
            timeout-ms = 10000
            "#,
        )
        .unwrap();

        assert_eq!(config.target.candidates, vec![PathBuf::from("bin/interp")]);
        assert!(config.target.extra_args.is_empty());
        assert_eq!(config.target.timeout(), Duration::from_millis(500));
        let taxonomy = config.classify.taxonomy().unwrap();
        assert_eq!(taxonomy.classify("SEGMENTATION FAULT"), "segv");
        assert_eq!(
            taxonomy.bucket_names().collect::<Vec<_>>(),
            ["segv", "abort", TIMEOUT_MARKER, UNCLASSIFIED, crate::taxonomy::SPAWN_ERROR]
        );
        assert_eq!(config.triage.dirs().confirmed, PathBuf::from("confirmed"));
        assert_eq!(config.triage.timeout(), Some(Duration::from_secs(10)));
        assert_eq!(
            config.triage.exclude_substring.as_deref(),
            Some("__arkscript__")
        );
    }

    #[test]
    fn custom_taxonomy_still_writes_timeout_list() {
        let dir = TempDir::new().unwrap();
        let settings = ClassifySettings {
            output_root: dir.path().to_path_buf(),
            categories: Some(vec![CategorySettings {
                name: "segv".to_string(),
                pattern: "Segmentation fault".to_string(),
            }]),
            ..ClassifySettings::default()
        };
        let mut report = ClassificationReport::new(&settings.taxonomy().unwrap());
        report.record(TIMEOUT_MARKER, PathBuf::from("out/w1/crashes/id2"));

        let written = settings.write_lists(&report).unwrap();
        let timeout_list = dir.path().join("timeout.list");
        assert!(written.contains(&timeout_list));
        assert_eq!(
            fs::read_to_string(timeout_list).unwrap(),
            "out/w1/crashes/id2\n"
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(CrashsiftConfig::from_toml("[target]\ntimeout = 3\n").is_err());
        assert!(CrashsiftConfig::from_toml("[nonsense]\n").is_err());
    }

    #[test]
    fn bad_taxonomy_fails_at_load() {
        let err = CrashsiftConfig::from_toml(
            r#"
            [[classify.categories]]
            name = "unclassified"
            pattern = "x"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("reserved"), "{err}");
    }

    #[test]
    fn load_from_file_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crashsift.toml");
        fs::write(&path, "[triage]\nconfirmed-dir = \"bad\"\n").unwrap();
        let config = CrashsiftConfig::load_from_file(&path).unwrap();
        assert_eq!(config.triage.confirmed_dir, PathBuf::from("bad"));

        let missing = dir.path().join("missing.toml");
        let err = CrashsiftConfig::load_from_file(&missing).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn missing_target_is_a_runner_error() {
        let settings = TargetSettings {
            candidates: vec![PathBuf::from("./no/such/target")],
            ..TargetSettings::default()
        };
        assert!(matches!(
            settings.runner_config(None),
            Err(RunnerError::TargetNotFound { .. })
        ));
    }
}
