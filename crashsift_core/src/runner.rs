use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Captured text reported for a run that exceeded its time budget.
pub const TIMEOUT_MARKER: &str = "timeout";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of one target invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code, absent when the process was killed (by us or by a signal).
    pub exit_code: Option<i32>,
    /// Terminating signal on unix, if any.
    pub signal: Option<i32>,
    /// Stderr followed by stdout, lossily decoded. `TIMEOUT_MARKER` on timeout.
    pub output: String,
    /// Set when the run was killed at its deadline.
    pub timed_out: bool,
}

impl ExecutionResult {
    fn after_timeout() -> Self {
        Self {
            exit_code: None,
            signal: None,
            output: TIMEOUT_MARKER.to_string(),
            timed_out: true,
        }
    }
}

/// Failures to run the target at all, as opposed to the target failing.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// None of the configured target paths points at a file.
    #[error("no target executable found (tried {candidates:?})")]
    TargetNotFound { candidates: Vec<PathBuf> },

    #[error("failed to spawn target {target:?} for input {input:?}: {source}")]
    Spawn {
        target: PathBuf,
        input: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error waiting for target process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("failed to kill timed-out target process: {0}")]
    Kill(#[source] std::io::Error),
}

/// Runs the target against a single input file.
///
/// Implementations spawn at most one process per call and keep no state
/// between calls that could influence a later result.
pub trait Runner {
    /// Runs the target once against `input`.
    ///
    /// # Returns
    /// The captured result, including runs that exited non-zero or timed
    /// out. `Err` only when the target could not be run or reaped.
    fn run(&mut self, input: &Path) -> Result<ExecutionResult, RunnerError>;
}

/// Returns the first candidate that exists as a regular file.
pub fn locate_target(candidates: &[PathBuf]) -> Result<PathBuf, RunnerError> {
    candidates
        .iter()
        .find(|candidate| candidate.is_file())
        .cloned()
        .ok_or_else(|| RunnerError::TargetNotFound {
            candidates: candidates.to_vec(),
        })
}

/// How [`CommandRunner`] invokes the target.
#[derive(Debug, Clone)]
pub struct CommandRunnerConfig {
    /// Executable run once per input.
    pub target: PathBuf,
    /// Appended after the input path, e.g. `-L ./lib`.
    pub extra_args: Vec<String>,
    /// `None` waits for the target indefinitely.
    pub timeout: Option<Duration>,
    /// Directory the target runs in; the caller's when `None`.
    pub working_dir: Option<PathBuf>,
}

/// Invokes `target input extra_args...` as a child process.
#[derive(Debug)]
pub struct CommandRunner {
    config: CommandRunnerConfig,
}

impl CommandRunner {
    /// Fails with [`RunnerError::TargetNotFound`] if the target is not a file,
    /// so a misconfigured target is caught before any sample is processed.
    pub fn new(config: CommandRunnerConfig) -> Result<Self, RunnerError> {
        if !config.target.is_file() {
            return Err(RunnerError::TargetNotFound {
                candidates: vec![config.target.clone()],
            });
        }
        Ok(Self { config })
    }

    /// The configuration this runner was built with.
    pub fn config(&self) -> &CommandRunnerConfig {
        &self.config
    }

    fn command(&self, input: &Path) -> Command {
        let mut cmd = Command::new(&self.config.target);
        cmd.arg(input).args(&self.config.extra_args);
        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        // A bounded run gets its own process group so that everything the
        // target forked can be killed together on timeout.
        #[cfg(unix)]
        if self.config.timeout.is_some() {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }

    fn wait_with_deadline(
        &self,
        child: &mut Child,
        deadline: Option<Instant>,
    ) -> Result<Option<ExitStatus>, RunnerError> {
        let Some(deadline) = deadline else {
            return child.wait().map(Some).map_err(RunnerError::Wait);
        };
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(Some(status)),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(RunnerError::Wait(e)),
            }
        }
    }
}

impl Runner for CommandRunner {
    fn run(&mut self, input: &Path) -> Result<ExecutionResult, RunnerError> {
        let deadline = self.config.timeout.map(|t| Instant::now() + t);

        let mut child = self
            .command(input)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                target: self.config.target.clone(),
                input: input.to_path_buf(),
                source,
            })?;

        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let status = match self.wait_with_deadline(&mut child, deadline) {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!(input = ?input, timeout = ?self.config.timeout, "target timed out, killing");
                terminate_after_deadline(&mut child, input);
                // Readers are detached: they finish once the last pipe writer is gone.
                return Ok(ExecutionResult::after_timeout());
            }
            Err(e) => {
                let _ = terminate(&mut child);
                return Err(e);
            }
        };

        // A forked grandchild may still hold the pipes open after the target
        // exits; that counts against the same time budget.
        if let Some(deadline) = deadline {
            while !(stdout_reader.is_finished() && stderr_reader.is_finished()) {
                if Instant::now() >= deadline {
                    warn!(input = ?input, "target output still open at deadline, killing process group");
                    terminate_after_deadline(&mut child, input);
                    return Ok(ExecutionResult::after_timeout());
                }
                thread::sleep(POLL_INTERVAL);
            }
        }

        let stdout = collect(stdout_reader);
        let stderr = collect(stderr_reader);
        let mut output = String::from_utf8_lossy(&stderr).into_owned();
        output.push_str(&String::from_utf8_lossy(&stdout));

        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        debug!(input = ?input, exit_code = ?status.code(), signal = ?signal, "target finished");
        Ok(ExecutionResult {
            exit_code: status.code(),
            signal,
            output,
            timed_out: false,
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn collect(reader: JoinHandle<Vec<u8>>) -> Vec<u8> {
    reader.join().unwrap_or_default()
}

/// Kills the child (and its process group on unix) and reaps it.
fn terminate(child: &mut Child) -> Result<(), RunnerError> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
            // ESRCH: already gone, or spawned without its own group.
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(errno) => return Err(RunnerError::Kill(std::io::Error::from(errno))),
        }
    }
    if let Err(e) = child.kill() {
        if e.kind() != std::io::ErrorKind::InvalidInput {
            return Err(RunnerError::Kill(e));
        }
    }
    child.wait().map_err(RunnerError::Wait)?;
    Ok(())
}

/// The run is a timeout either way; a failed kill is only worth a log line.
fn terminate_after_deadline(child: &mut Child, input: &Path) {
    if let Err(e) = terminate(child) {
        error!(input = ?input, pid = child.id(), error = %e, "could not kill timed-out target");
    }
}
