pub mod classifier;
pub mod config;
pub mod corpus;
pub mod logging;
pub mod report;
pub mod runner;
pub mod taxonomy;
pub mod triage;

pub use classifier::{classify_corpus, classify_samples};
pub use config::CrashsiftConfig;
pub use corpus::{CorpusError, enumerate, exclude_marked};
pub use report::{ClassificationReport, ReportError, read_list};
pub use runner::{CommandRunner, CommandRunnerConfig, ExecutionResult, Runner, RunnerError};
pub use taxonomy::{Category, SPAWN_ERROR, Taxonomy, TaxonomyError, UNCLASSIFIED};
pub use triage::{Decision, TriageDirs, TriageError, TriageSession, TriageSummary};
