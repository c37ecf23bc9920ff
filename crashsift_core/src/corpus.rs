use globset::{GlobBuilder, GlobMatcher};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Defines errors that can arise while enumerating a crash corpus.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// The corpus glob could not be compiled.
    #[error("invalid corpus pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// A directory under the pattern's base could not be read.
    #[error("failed to walk corpus directory: {0}")]
    Walk(#[from] walkdir::Error),
}

const GLOB_META: &[char] = &['*', '?', '[', '{'];

/// Splits a `/`-separated pattern into the directory that holds every
/// possible match and the number of components left to match below it.
/// `None` for the depth means the pattern contains `**`.
fn split_pattern(pattern: &str) -> (PathBuf, Option<usize>) {
    let components: Vec<&str> = pattern.split('/').collect();
    let literal = components
        .iter()
        .take_while(|c| !c.contains(GLOB_META))
        .count();
    let depth = if pattern.contains("**") {
        None
    } else {
        Some(components.len() - literal)
    };

    let base = if literal == 0 {
        PathBuf::new()
    } else if components[..literal] == [""] {
        PathBuf::from("/")
    } else {
        PathBuf::from(components[..literal].join("/"))
    };
    (base, depth)
}

fn compile(pattern: &str) -> Result<GlobMatcher, CorpusError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|source| CorpusError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Returns every regular file matched by `pattern`, sorted by path.
///
/// `*` and `?` never cross a `/`; use `**` to match any number of
/// directories. Symlinked directories and files are followed, and a link
/// that loops back to an ancestor is skipped. A pattern without wildcards
/// names a single file. A base directory that does not exist yields an
/// empty corpus.
pub fn enumerate(pattern: &str) -> Result<Vec<PathBuf>, CorpusError> {
    let matcher = compile(pattern)?;
    let (base, depth) = split_pattern(pattern);

    if depth == Some(0) {
        return Ok(if base.is_file() { vec![base] } else { Vec::new() });
    }

    let relative = base.as_os_str().is_empty();
    let root: &Path = if relative { Path::new(".") } else { &base };
    if !root.is_dir() {
        debug!(root = ?root, "corpus root does not exist");
        return Ok(Vec::new());
    }

    let mut walker = WalkDir::new(root).follow_links(true).sort_by_file_name();
    if let Some(depth) = depth {
        walker = walker.max_depth(depth);
    }

    let mut samples = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.loop_ancestor().is_some() => {
                warn!(path = ?e.path(), "skipping symlink loop in corpus");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = if relative {
            entry.path().strip_prefix(".").unwrap_or(entry.path())
        } else {
            entry.path()
        };
        if matcher.is_match(path) {
            samples.push(path.to_path_buf());
        }
    }
    debug!(pattern = %pattern, samples = samples.len(), "enumerated corpus");
    Ok(samples)
}

/// Drops paths containing `marker`, such as the seed files a fuzzing
/// campaign copies next to its findings.
pub fn exclude_marked(paths: Vec<PathBuf>, marker: Option<&str>) -> Vec<PathBuf> {
    match marker {
        Some(marker) if !marker.is_empty() => paths
            .into_iter()
            .filter(|p| !p.to_string_lossy().contains(marker))
            .collect(),
        _ => paths,
    }
}
