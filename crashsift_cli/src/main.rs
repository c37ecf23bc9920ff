use crashsift_core::classifier::classify_corpus;
use crashsift_core::config::{CrashsiftConfig, DEFAULT_CONFIG_FILE};
use crashsift_core::corpus::exclude_marked;
use crashsift_core::logging::init_tracing;
use crashsift_core::runner::{CommandRunner, TIMEOUT_MARKER};
use crashsift_core::taxonomy::UNCLASSIFIED;
use crashsift_core::triage::TriageSession;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Re-run and sort fuzzer crashes", long_about = None)]
struct Cli {
    /// Configuration file; `crashsift.toml` in the working directory if omitted.
    #[clap(short, long, value_parser, global = true)]
    config: Option<PathBuf>,
    /// Emit diagnostics as JSON lines on stderr.
    #[clap(long, global = true)]
    log_json: bool,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Re-run every saved crash and count it per failure category.
    Classify(ClassifyArgs),
    /// Confirm or reject crashes one at a time.
    Triage(TriageArgs),
}

#[derive(Args, Debug)]
struct ClassifyArgs {
    #[clap(long)]
    corpus_glob: Option<String>,
    /// Target executable; overrides the configured candidates.
    #[clap(long)]
    target: Option<PathBuf>,
    #[clap(long)]
    timeout_ms: Option<u64>,
    #[clap(long)]
    output_root: Option<PathBuf>,
    /// Print the summary as JSON instead of `category: count` lines.
    #[clap(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct TriageArgs {
    #[clap(long)]
    target: Option<PathBuf>,
    /// Crash files to review, in order.
    files: Vec<PathBuf>,
}

fn load_config(path: Option<PathBuf>) -> Result<CrashsiftConfig, anyhow::Error> {
    match path {
        Some(config_path) => {
            info!(path = ?config_path, "loading configuration");
            CrashsiftConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                info!(path = ?default_config_path, "loading default configuration");
                CrashsiftConfig::load_from_file(&default_config_path)
            } else {
                info!("no configuration file, using built-in defaults");
                Ok(CrashsiftConfig::default())
            }
        }
    }
}

fn classify(mut config: CrashsiftConfig, args: ClassifyArgs) -> Result<(), anyhow::Error> {
    if let Some(target) = args.target {
        config.target.candidates = vec![target];
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.target.timeout_ms = timeout_ms;
    }
    if let Some(glob) = args.corpus_glob {
        config.classify.corpus_glob = glob;
    }
    if let Some(root) = args.output_root {
        config.classify.output_root = root;
    }

    let taxonomy = config.classify.taxonomy()?;
    let runner_config = config
        .target
        .runner_config(Some(config.target.timeout()))?;
    let mut runner = CommandRunner::new(runner_config)?;
    info!(
        target = ?runner.config().target,
        timeout_ms = config.target.timeout_ms,
        "classifying"
    );

    let start_time = Instant::now();
    let report = classify_corpus(&config.classify.corpus_glob, &mut runner, &taxonomy)?;

    let mut stdout = io::stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut stdout, &report.summary())?;
        writeln!(stdout)?;
    } else {
        write!(stdout, "{report}")?;
    }
    stdout.flush()?;

    for path in config.classify.write_lists(&report)? {
        info!(path = ?path, "list written");
    }
    info!(
        samples = report.total(),
        timeouts = report.samples(TIMEOUT_MARKER).len(),
        unclassified = report.samples(UNCLASSIFIED).len(),
        elapsed = ?start_time.elapsed(),
        "done"
    );
    Ok(())
}

fn triage(mut config: CrashsiftConfig, args: TriageArgs) -> Result<(), anyhow::Error> {
    if let Some(target) = args.target {
        config.target.candidates = vec![target];
    }

    let runner_config = config.target.runner_config(config.triage.timeout())?;
    let mut runner = CommandRunner::new(runner_config)?;

    let queue = exclude_marked(args.files, config.triage.exclude_substring.as_deref());
    info!(files = queue.len(), "starting triage");

    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    let summary = TriageSession::new(&mut runner, config.triage.dirs(), stdin, stdout)
        .run(&queue)
        .context("triage session aborted")?;

    if summary.quit {
        info!(unprocessed = summary.unprocessed, "triage quit early");
    }
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(cli.config)?;
    match cli.command {
        Command::Classify(args) => classify(config, args),
        Command::Triage(args) => triage(config, args),
    }
}
