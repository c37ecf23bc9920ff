use crate::taxonomy::Taxonomy;
use serde::Serialize;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

/// Extension of persisted per-category sample lists.
pub const LIST_EXTENSION: &str = "list";

/// Errors from writing or reading list files.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move finished list into place at {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ReportError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bucket {
    name: String,
    samples: Vec<PathBuf>,
}

/// Samples grouped by category, in the order they were recorded.
///
/// Buckets are kept in taxonomy order followed by `unclassified` and
/// `spawn_error`, so that summaries list every category, including empty ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationReport {
    buckets: Vec<Bucket>,
}

/// Serializable per-category counts.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Summary<'a> {
    pub total: usize,
    pub categories: Vec<CategoryCount<'a>>,
}

/// One entry of a [`Summary`].
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CategoryCount<'a> {
    pub name: &'a str,
    pub count: usize,
}

impl ClassificationReport {
    /// Creates an empty report with one bucket per name in
    /// [`Taxonomy::bucket_names`].
    pub fn new(taxonomy: &Taxonomy) -> Self {
        Self {
            buckets: taxonomy
                .bucket_names()
                .map(|name| Bucket {
                    name: name.to_string(),
                    samples: Vec::new(),
                })
                .collect(),
        }
    }

    /// Appends `sample` to `category`. Unknown categories get a new bucket at the end.
    pub fn record(&mut self, category: &str, sample: PathBuf) {
        match self.buckets.iter_mut().find(|b| b.name == category) {
            Some(bucket) => bucket.samples.push(sample),
            None => self.buckets.push(Bucket {
                name: category.to_string(),
                samples: vec![sample],
            }),
        }
    }

    /// Samples assigned to `category`; empty for unknown categories.
    pub fn samples(&self, category: &str) -> &[PathBuf] {
        self.buckets
            .iter()
            .find(|b| b.name == category)
            .map(|b| b.samples.as_slice())
            .unwrap_or(&[])
    }

    /// `(category, count)` pairs in bucket order, zero counts included.
    pub fn counts(&self) -> impl Iterator<Item = (&str, usize)> {
        self.buckets
            .iter()
            .map(|b| (b.name.as_str(), b.samples.len()))
    }

    /// Number of samples recorded across all buckets.
    pub fn total(&self) -> usize {
        self.buckets.iter().map(|b| b.samples.len()).sum()
    }

    /// Counts in a form that serializes to JSON.
    pub fn summary(&self) -> Summary<'_> {
        Summary {
            total: self.total(),
            categories: self
                .counts()
                .map(|(name, count)| CategoryCount { name, count })
                .collect(),
        }
    }

    /// Writes one list file per requested category into `output_root`,
    /// replacing any list from a previous run.
    ///
    /// Each file is written to a temporary file in the same directory and
    /// renamed into place, so an interrupted run never leaves a truncated list.
    pub fn write_lists(
        &self,
        output_root: &Path,
        categories: &[String],
    ) -> Result<Vec<PathBuf>, ReportError> {
        fs::create_dir_all(output_root).map_err(ReportError::io(output_root))?;

        let mut written = Vec::with_capacity(categories.len());
        for category in categories {
            let Some(bucket) = self.buckets.iter().find(|b| &b.name == category) else {
                warn!(category = %category, "no such category, list not written");
                continue;
            };
            let path = output_root.join(list_file_name(category));
            write_list_atomically(&path, output_root, &bucket.samples)?;
            info!(category = %category, path = ?path, samples = bucket.samples.len(), "wrote sample list");
            written.push(path);
        }
        Ok(written)
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, count) in self.counts() {
            writeln!(f, "{name}: {count}")?;
        }
        Ok(())
    }
}

/// File name for a category's list: `:` dropped, spaces turned into `_`.
///
/// `"parseerror:"` becomes `parseerror.list`, `"unknown instruction"`
/// becomes `unknown_instruction.list`.
pub fn list_file_name(category: &str) -> String {
    let stem: String = category
        .chars()
        .filter(|c| *c != ':')
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();
    format!("{stem}.{LIST_EXTENSION}")
}

fn write_list_atomically(
    path: &Path,
    dir: &Path,
    samples: &[PathBuf],
) -> Result<(), ReportError> {
    let tmp = NamedTempFile::new_in(dir).map_err(ReportError::io(dir))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        for sample in samples {
            writeln!(writer, "{}", sample.display()).map_err(ReportError::io(tmp.path()))?;
        }
        writer.flush().map_err(ReportError::io(tmp.path()))?;
    }
    tmp.persist(path).map_err(|e| ReportError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Reads a list file back into sample paths, skipping blank lines.
pub fn read_list(path: &Path) -> Result<Vec<PathBuf>, ReportError> {
    let file = File::open(path).map_err(ReportError::io(path))?;
    let mut samples = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(ReportError::io(path))?;
        if !line.trim().is_empty() {
            samples.push(PathBuf::from(line));
        }
    }
    Ok(samples)
}
