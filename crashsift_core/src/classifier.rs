use crate::corpus::{self, CorpusError};
use crate::report::ClassificationReport;
use crate::runner::Runner;
use crate::taxonomy::{SPAWN_ERROR, Taxonomy};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Runs every sample through `runner` and files it under the category its
/// output matches.
///
/// Samples are processed one at a time in the given order. A run that hit
/// its deadline is filed under `timeout`. A sample whose
/// target cannot be run is recorded under [`SPAWN_ERROR`] and the run
/// carries on, so each input lands in exactly one bucket.
pub fn classify_samples<R>(
    runner: &mut R,
    taxonomy: &Taxonomy,
    samples: Vec<PathBuf>,
) -> ClassificationReport
where
    R: Runner + ?Sized,
{
    let mut report = ClassificationReport::new(taxonomy);
    let count = samples.len();

    for (i, sample) in samples.into_iter().enumerate() {
        let category = match runner.run(&sample) {
            Ok(result) => taxonomy.classify_result(&result),
            Err(e) => {
                warn!(sample = ?sample, error = %e, "could not run target on sample");
                SPAWN_ERROR
            }
        };
        debug!(sample = ?sample, category = %category, progress = i + 1, count, "classified");
        report.record(category, sample);
    }

    info!(samples = count, "classification finished");
    report
}

/// Enumerates `corpus_glob` and classifies every file it matches.
///
/// The corpus is only read, never moved or modified.
pub fn classify_corpus<R>(
    corpus_glob: &str,
    runner: &mut R,
    taxonomy: &Taxonomy,
) -> Result<ClassificationReport, CorpusError>
where
    R: Runner + ?Sized,
{
    let samples = corpus::enumerate(corpus_glob)?;
    info!(pattern = %corpus_glob, samples = samples.len(), "classifying corpus");
    Ok(classify_samples(runner, taxonomy, samples))
}
