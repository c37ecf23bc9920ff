//! Interactive confirmation of recorded crashes.
//!
//! Each queued file is re-run through a [`Runner`], its output is shown to
//! the operator, and a single command decides whether the file is moved to
//! the confirmed-crash directory, moved to the not-a-crash directory, left
//! alone, or whether the session ends.

use crate::runner::Runner;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Command letters shown in the prompt.
pub const PROMPT_COMMANDS: &str = "o,c,s,q,?";

/// Printed for `?`.
pub const HELP_TEXT: &str = "\to: ok, not a crash\n\tc: crash\n\ts: skip\n\tq: quit\n\t?: this help message";

/// One parsed operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Genuine crash: move to the confirmed directory.
    Confirm,
    /// Not a crash: move to the rejected directory.
    Reject,
    /// Leave the file where it is and move on.
    Skip,
    /// End the session; remaining files are untouched.
    Quit,
    Help,
    /// Anything else. The operator is asked again.
    Invalid,
}

impl Decision {
    /// Parses one input line, ignoring case and surrounding whitespace.
    pub fn parse(line: &str) -> Self {
        match line.trim().to_lowercase().as_str() {
            "c" => Decision::Confirm,
            "o" | "confirm-ok" => Decision::Reject,
            "s" => Decision::Skip,
            "q" => Decision::Quit,
            "?" | "h" | "help" => Decision::Help,
            _ => Decision::Invalid,
        }
    }
}

/// Why a file could not be moved. The source is left in place in every case.
#[derive(Error, Debug)]
pub enum RelocateError {
    #[error("{0:?} has no file name")]
    NoFileName(PathBuf),

    #[error("I/O error relocating to {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("copy of {source_path:?} at {destination:?} does not match the original")]
    VerificationFailed {
        source_path: PathBuf,
        destination: PathBuf,
    },
}

impl RelocateError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| RelocateError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum TriageError {
    /// Reading commands or writing to the operator failed.
    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Where decided files are moved to.
#[derive(Debug, Clone)]
pub struct TriageDirs {
    /// Genuine crashes (`c`). Defaults to `fct-bad`.
    pub confirmed: PathBuf,
    /// Not crashes (`o`). Defaults to `fct-ok`.
    pub rejected: PathBuf,
}

impl Default for TriageDirs {
    fn default() -> Self {
        Self {
            confirmed: PathBuf::from("fct-bad"),
            rejected: PathBuf::from("fct-ok"),
        }
    }
}

/// Tally of one session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TriageSummary {
    pub confirmed: usize,
    pub rejected: usize,
    pub skipped: usize,
    /// Queue entries that were gone (or not regular files) when their turn came.
    pub missing: usize,
    /// Files never decided on because the session was quit.
    pub unprocessed: usize,
    pub quit: bool,
}

/// Outcome of prompting for one file.
enum Step {
    Next,
    Stop,
}

/// Drives one triage pass over a queue of files.
///
/// Commands are read one line at a time from `input`; everything meant for
/// the operator, including the target's output, goes to `output`.
pub struct TriageSession<'a, R: Runner + ?Sized, In: BufRead, Out: Write> {
    runner: &'a mut R,
    dirs: TriageDirs,
    input: In,
    output: Out,
}

impl<'a, R: Runner + ?Sized, In: BufRead, Out: Write> TriageSession<'a, R, In, Out> {
    /// Creates a session. Nothing is run until [`TriageSession::run`].
    pub fn new(runner: &'a mut R, dirs: TriageDirs, input: In, output: Out) -> Self {
        Self {
            runner,
            dirs,
            input,
            output,
        }
    }

    /// Presents every file in `queue` in order until the queue is exhausted
    /// or the operator quits. End of input counts as quitting.
    pub fn run(&mut self, queue: &[PathBuf]) -> Result<TriageSummary, TriageError> {
        let mut summary = TriageSummary::default();
        let count = queue.len();

        for (index, file) in queue.iter().enumerate() {
            if !file.is_file() {
                info!(file = ?file, "skipping missing queue entry");
                summary.missing += 1;
                continue;
            }

            self.present(file)?;
            match self.decide(index + 1, count, file, &mut summary)? {
                Step::Next => writeln!(self.output)?,
                Step::Stop => {
                    summary.quit = true;
                    summary.unprocessed = count - index;
                    break;
                }
            }
        }

        info!(
            confirmed = summary.confirmed,
            rejected = summary.rejected,
            skipped = summary.skipped,
            missing = summary.missing,
            unprocessed = summary.unprocessed,
            "triage finished"
        );
        Ok(summary)
    }

    fn present(&mut self, file: &Path) -> Result<(), TriageError> {
        let title = file.display().to_string();
        writeln!(self.output, "{title}\n{}", "-".repeat(title.chars().count()))?;
        match self.runner.run(file) {
            Ok(result) => {
                write!(self.output, "{}", result.output)?;
                if result.timed_out {
                    writeln!(self.output, "\n(target timed out)")?;
                }
            }
            Err(e) => {
                warn!(file = ?file, error = %e, "could not run target");
                writeln!(self.output, "Could not run target: {e}")?;
            }
        }
        write!(self.output, "\n\n")?;
        Ok(())
    }

    fn decide(
        &mut self,
        position: usize,
        count: usize,
        file: &Path,
        summary: &mut TriageSummary,
    ) -> Result<Step, TriageError> {
        loop {
            write!(self.output, "[{position}/{count}] {PROMPT_COMMANDS} > ")?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                writeln!(self.output)?;
                return Ok(Step::Stop);
            }

            let decision = Decision::parse(&line);
            let destination = match decision {
                Decision::Confirm => &self.dirs.confirmed,
                Decision::Reject => &self.dirs.rejected,
                Decision::Skip => {
                    summary.skipped += 1;
                    return Ok(Step::Next);
                }
                Decision::Quit => return Ok(Step::Stop),
                Decision::Help => {
                    writeln!(self.output, "{HELP_TEXT}")?;
                    continue;
                }
                Decision::Invalid => {
                    writeln!(self.output, "Unknown command.")?;
                    continue;
                }
            };

            match relocate(file, destination) {
                Ok(moved_to) => {
                    info!(file = ?file, destination = ?moved_to, "relocated");
                    if decision == Decision::Confirm {
                        summary.confirmed += 1;
                    } else {
                        summary.rejected += 1;
                    }
                    return Ok(Step::Next);
                }
                Err(e) => {
                    // The file is still at its source; let the operator choose again.
                    warn!(file = ?file, error = %e, "relocation failed");
                    writeln!(self.output, "Could not move {}: {e}", file.display())?;
                }
            }
        }
    }
}

/// Moves `file` into `dir`, creating `dir` if needed, and returns the new path.
///
/// An existing entry at the destination is never replaced: the name gets a
/// numeric suffix instead (`id:0001` becomes `id:0001.1`). The new name is
/// claimed with a hard link, which fails rather than overwrite, and the
/// source is unlinked afterwards. Where a link is impossible (another
/// filesystem) the file is copied into a freshly created destination, the
/// copy is checked against the source's md5 digest, and only then is the
/// source removed.
pub fn relocate(file: &Path, dir: &Path) -> Result<PathBuf, RelocateError> {
    let name = file
        .file_name()
        .ok_or_else(|| RelocateError::NoFileName(file.to_path_buf()))?;
    fs::create_dir_all(dir).map_err(RelocateError::io(dir))?;

    let mut suffix = 0u32;
    loop {
        let destination = if suffix == 0 {
            dir.join(name)
        } else {
            let mut candidate = name.to_os_string();
            candidate.push(format!(".{suffix}"));
            dir.join(candidate)
        };

        let placed = match fs::hard_link(file, &destination) {
            Ok(()) => fs::remove_file(file).map_err(RelocateError::io(file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                suffix += 1;
                continue;
            }
            Err(e) => {
                debug!(file = ?file, error = %e, "hard link failed, copying instead");
                copy_then_remove(file, &destination)
            }
        };

        match placed {
            Ok(()) => return Ok(destination),
            Err(RelocateError::Io { ref source, .. })
                if source.kind() == io::ErrorKind::AlreadyExists =>
            {
                suffix += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn copy_then_remove(file: &Path, destination: &Path) -> Result<(), RelocateError> {
    {
        let mut src = File::open(file).map_err(RelocateError::io(file))?;
        let mut dst = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)
            .map_err(RelocateError::io(destination))?;
        io::copy(&mut src, &mut dst).map_err(RelocateError::io(destination))?;
        dst.sync_all().map_err(RelocateError::io(destination))?;
    }

    let original = md5::compute(fs::read(file).map_err(RelocateError::io(file))?);
    let copied = md5::compute(fs::read(destination).map_err(RelocateError::io(destination))?);
    if original.0 != copied.0 {
        let _ = fs::remove_file(destination);
        return Err(RelocateError::VerificationFailed {
            source_path: file.to_path_buf(),
            destination: destination.to_path_buf(),
        });
    }

    fs::remove_file(file).map_err(RelocateError::io(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{ExecutionResult, RunnerError};
    use std::io::Cursor;
    use tempfile::TempDir;

    struct EchoRunner {
        runs: Vec<PathBuf>,
    }

    impl Runner for EchoRunner {
        fn run(&mut self, input: &Path) -> Result<ExecutionResult, RunnerError> {
            self.runs.push(input.to_path_buf());
            Ok(ExecutionResult {
                exit_code: Some(1),
                signal: None,
                output: format!("ran {}", input.display()),
                timed_out: false,
            })
        }
    }

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        dirs: TriageDirs,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path().to_path_buf();
            let dirs = TriageDirs {
                confirmed: root.join("fct-bad"),
                rejected: root.join("fct-ok"),
            };
            Self {
                _dir: dir,
                root,
                dirs,
            }
        }

        fn sample(&self, name: &str, contents: &[u8]) -> PathBuf {
            let crashes = self.root.join("crashes");
            fs::create_dir_all(&crashes).unwrap();
            let path = crashes.join(name);
            fs::write(&path, contents).unwrap();
            path
        }

        fn triage(&self, queue: &[PathBuf], commands: &str) -> (TriageSummary, String, Vec<PathBuf>) {
            let mut runner = EchoRunner { runs: Vec::new() };
            let mut out = Vec::new();
            let summary = TriageSession::new(
                &mut runner,
                self.dirs.clone(),
                Cursor::new(commands.as_bytes().to_vec()),
                &mut out,
            )
            .run(queue)
            .unwrap();
            (summary, String::from_utf8(out).unwrap(), runner.runs)
        }
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Decision::parse("c\n"), Decision::Confirm);
        assert_eq!(Decision::parse(" O "), Decision::Reject);
        assert_eq!(Decision::parse("confirm-ok"), Decision::Reject);
        assert_eq!(Decision::parse("s"), Decision::Skip);
        assert_eq!(Decision::parse("q"), Decision::Quit);
        assert_eq!(Decision::parse("?"), Decision::Help);
        assert_eq!(Decision::parse("x"), Decision::Invalid);
        assert_eq!(Decision::parse(""), Decision::Invalid);
    }

    #[test]
    fn invalid_command_reprompts_then_confirms() {
        let fx = Fixture::new();
        let id1 = fx.sample("id1", b"\x00crash bytes\xff");

        let (summary, out, runs) = fx.triage(&[id1.clone()], "x\nc\n");

        assert_eq!(out.matches("Unknown command.").count(), 1);
        assert_eq!(out.matches("[1/1] o,c,s,q,? > ").count(), 2);
        assert_eq!(runs, vec![id1.clone()]);
        assert_eq!(summary.confirmed, 1);
        assert!(!id1.exists());
        assert_eq!(
            fs::read(fx.dirs.confirmed.join("id1")).unwrap(),
            b"\x00crash bytes\xff"
        );
        assert!(!fx.dirs.rejected.join("id1").exists());
    }

    #[test]
    fn reject_moves_to_not_a_crash_dir() {
        let fx = Fixture::new();
        let id1 = fx.sample("id1", b"fine");

        let (summary, _, _) = fx.triage(&[id1.clone()], "o\n");

        assert_eq!(summary.rejected, 1);
        assert!(!id1.exists());
        assert_eq!(fs::read(fx.dirs.rejected.join("id1")).unwrap(), b"fine");
        assert!(!fx.dirs.confirmed.exists());
    }

    #[test]
    fn skip_leaves_file_and_advances() {
        let fx = Fixture::new();
        let a = fx.sample("a", b"a");
        let b = fx.sample("b", b"b");

        let (summary, out, runs) = fx.triage(&[a.clone(), b.clone()], "s\nc\n");

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.confirmed, 1);
        assert!(a.exists());
        assert!(!b.exists());
        assert_eq!(runs, vec![a, b]);
        assert!(out.contains("[2/2] o,c,s,q,? > "));
    }

    #[test]
    fn quit_stops_before_next_file() {
        let fx = Fixture::new();
        let a = fx.sample("a", b"a");
        let b = fx.sample("b", b"b");

        let (summary, _, runs) = fx.triage(&[a.clone(), b.clone()], "q\nc\n");

        assert!(summary.quit);
        assert_eq!(summary.unprocessed, 2);
        assert_eq!(runs, vec![a.clone()]);
        assert!(a.exists());
        assert!(b.exists());
        assert!(!fx.dirs.confirmed.exists());
    }

    #[test]
    fn end_of_input_quits() {
        let fx = Fixture::new();
        let a = fx.sample("a", b"a");

        let (summary, _, _) = fx.triage(&[a.clone()], "");

        assert!(summary.quit);
        assert!(a.exists());
    }

    #[test]
    fn help_does_not_advance() {
        let fx = Fixture::new();
        let a = fx.sample("a", b"a");

        let (summary, out, _) = fx.triage(&[a], "?\ns\n");

        assert!(out.contains(HELP_TEXT));
        assert_eq!(out.matches("[1/1]").count(), 2);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn missing_entries_are_skipped_without_prompting() {
        let fx = Fixture::new();
        let gone = fx.root.join("crashes").join("gone");
        let dir_entry = fx.root.join("a-directory");
        fs::create_dir_all(&dir_entry).unwrap();
        let a = fx.sample("a", b"a");

        let (summary, out, runs) = fx.triage(&[gone, dir_entry, a.clone()], "c\n");

        assert_eq!(summary.missing, 2);
        assert_eq!(summary.confirmed, 1);
        assert_eq!(runs, vec![a]);
        assert_eq!(out.matches(" > ").count(), 1);
        assert!(out.contains("[3/3]"));
    }

    #[test]
    fn output_shows_underlined_name_and_target_output() {
        let fx = Fixture::new();
        let a = fx.sample("a", b"a");
        let title = a.display().to_string();

        let (_, out, _) = fx.triage(&[a.clone()], "s\n");

        assert!(out.starts_with(&format!("{title}\n{}\n", "-".repeat(title.len()))));
        assert!(out.contains(&format!("ran {title}")));
    }

    #[test]
    fn relocate_never_overwrites() {
        let fx = Fixture::new();
        fs::create_dir_all(&fx.dirs.confirmed).unwrap();
        fs::write(fx.dirs.confirmed.join("id1"), b"older").unwrap();
        fs::write(fx.dirs.confirmed.join("id1.1"), b"old").unwrap();
        let id1 = fx.sample("id1", b"new");

        let moved = relocate(&id1, &fx.dirs.confirmed).unwrap();

        assert_eq!(moved, fx.dirs.confirmed.join("id1.2"));
        assert_eq!(fs::read(&moved).unwrap(), b"new");
        assert_eq!(fs::read(fx.dirs.confirmed.join("id1")).unwrap(), b"older");
        assert!(!id1.exists());
    }

    #[cfg(unix)]
    #[test]
    fn relocate_does_not_replace_a_dangling_link() {
        // `exists()` reports false for a dangling link, so only an atomic
        // claim on the name keeps it intact.
        let fx = Fixture::new();
        fs::create_dir_all(&fx.dirs.rejected).unwrap();
        let link = fx.dirs.rejected.join("id1");
        std::os::unix::fs::symlink(fx.root.join("nowhere"), &link).unwrap();
        let id1 = fx.sample("id1", b"new");

        let moved = relocate(&id1, &fx.dirs.rejected).unwrap();

        assert_eq!(moved, fx.dirs.rejected.join("id1.1"));
        assert_eq!(fs::read(&moved).unwrap(), b"new");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert!(!id1.exists());
    }

    #[test]
    fn relocate_skips_names_taken_by_directories() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.dirs.confirmed.join("id1")).unwrap();
        let id1 = fx.sample("id1", b"new");

        let moved = relocate(&id1, &fx.dirs.confirmed).unwrap();

        assert_eq!(moved, fx.dirs.confirmed.join("id1.1"));
        assert!(fx.dirs.confirmed.join("id1").is_dir());
        assert!(!id1.exists());
    }

    #[test]
    fn copy_fallback_verifies_and_removes_source() {
        let fx = Fixture::new();
        let id1 = fx.sample("id1", b"payload");
        let destination = fx.root.join("copy");

        copy_then_remove(&id1, &destination).unwrap();

        assert!(!id1.exists());
        assert_eq!(fs::read(&destination).unwrap(), b"payload");
    }

    #[test]
    fn copy_fallback_refuses_existing_destination() {
        let fx = Fixture::new();
        let id1 = fx.sample("id1", b"payload");
        let destination = fx.root.join("taken");
        fs::write(&destination, b"keep").unwrap();

        assert!(copy_then_remove(&id1, &destination).is_err());
        assert!(id1.exists());
        assert_eq!(fs::read(&destination).unwrap(), b"keep");
    }
}
