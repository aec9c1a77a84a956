//! Process launching and the child handle.
//!
//! Everything strategy-specific lives behind private enums here; callers
//! only ever see [`InputPipe`], [`OutputPipe`] and [`ProcessHandle`].

use std::fmt;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStderr, ChildStdout};

use super::{Chunk, OutputSource};
use super::config::{IoStrategy, LaunchConfig};
use super::pipes::MergedReader;
use super::threaded::ThreadedReader;
use crate::error::LaunchError;

/// Poll interval when waiting on a `std::process::Child`.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal exit with a status code.
    Code(i32),

    /// Terminated by a signal the harness did not send.
    Signal(i32),

    /// Forcibly terminated by the harness.
    Killed,
}

impl ExitOutcome {
    /// The exit code, if the process exited on its own.
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitOutcome::Code(code) => Some(*code),
            _ => None,
        }
    }

    /// True for a clean `exit(0)`.
    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Code(0))
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitOutcome::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitOutcome::Signal(signal);
            }
        }
        ExitOutcome::Code(-1)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Code(code) => write!(f, "exit code {code}"),
            ExitOutcome::Signal(signal) => write!(f, "signal {signal}"),
            ExitOutcome::Killed => f.write_str("killed by harness"),
        }
    }
}

/// A live child process with both pipes connected.
pub struct LaunchedProcess {
    /// Writer for the child's stdin.
    pub input: InputPipe,

    /// Reader for the child's stdout (and stderr when merged).
    pub output: OutputPipe,

    /// Handle for waiting on and killing the child.
    pub process: ProcessHandle,
}

/// Start the configured program with redirected stdio.
///
/// Either returns a live process with every requested pipe attached, or an
/// error with no process left running. Must be called from within a tokio
/// runtime.
pub fn launch(config: &LaunchConfig) -> Result<LaunchedProcess, LaunchError> {
    let program = resolve_program(&config.program, config.cwd.as_deref())?;
    let command = build_command(config, &program);
    let strategy = config.strategy.resolve();

    debug!("launching {} ({:?} I/O)", config.command_line(), strategy);

    let launched = match strategy {
        IoStrategy::Async => launch_async(command, &program, config.merge_stderr)?,
        IoStrategy::Threaded | IoStrategy::Auto => {
            launch_threaded(command, &program, config.merge_stderr)?
        }
    };

    debug!("launched pid {:?}", launched.process.id());
    Ok(launched)
}

/// Resolve the program to a runnable file before spawning.
fn resolve_program(program: &Path, cwd: Option<&Path>) -> Result<PathBuf, LaunchError> {
    if let Some(dir) = cwd {
        if !dir.is_dir() {
            return Err(LaunchError::LaunchFailed {
                program: program.to_path_buf(),
                source: io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("working directory {} does not exist", dir.display()),
                ),
            });
        }
    }

    let not_found = || LaunchError::ExecutableNotFound {
        program: program.to_path_buf(),
    };

    // Bare names go through PATH, anything with a separator is a path.
    if program.components().count() == 1 && !program.is_absolute() {
        return which::which(program).map_err(|_| not_found());
    }

    let candidate = match cwd {
        Some(dir) if program.is_relative() => dir.join(program),
        _ => program.to_path_buf(),
    };
    if candidate.is_file() {
        return Ok(candidate);
    }
    #[cfg(windows)]
    {
        let exe = candidate.with_extension("exe");
        if exe.is_file() {
            return Ok(exe);
        }
    }
    Err(not_found())
}

fn build_command(config: &LaunchConfig, program: &Path) -> std::process::Command {
    let mut command = std::process::Command::new(program);
    command
        .args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(if config.merge_stderr {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
    if let Some(dir) = &config.cwd {
        command.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own group, so descendants holding the pipes can be killed with it.
        command.process_group(0);
    }
    command
}

fn spawn_error(program: &Path, source: io::Error) -> LaunchError {
    if source.kind() == io::ErrorKind::NotFound {
        LaunchError::ExecutableNotFound {
            program: program.to_path_buf(),
        }
    } else {
        LaunchError::LaunchFailed {
            program: program.to_path_buf(),
            source,
        }
    }
}

fn launch_async(
    command: std::process::Command,
    program: &Path,
    merge_stderr: bool,
) -> Result<LaunchedProcess, LaunchError> {
    let mut command = tokio::process::Command::from(command);
    command.kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| spawn_error(program, e))?;
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // From here on an early return drops the handle, which kills the child.
    let process = ProcessHandle::new(ChildInner::Async(child));

    let stdin = stdin.ok_or(LaunchError::MissingPipe("stdin"))?;
    let stdout = stdout.ok_or(LaunchError::MissingPipe("stdout"))?;
    if merge_stderr && stderr.is_none() {
        return Err(LaunchError::MissingPipe("stderr"));
    }

    Ok(LaunchedProcess {
        input: InputPipe(Some(InputInner::Async(stdin))),
        output: OutputPipe(OutputInner::Async(MergedReader::new(stdout, stderr))),
        process,
    })
}

fn launch_threaded(
    mut command: std::process::Command,
    program: &Path,
    merge_stderr: bool,
) -> Result<LaunchedProcess, LaunchError> {
    let mut child = command.spawn().map_err(|e| spawn_error(program, e))?;
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let process = ProcessHandle::new(ChildInner::Threaded(child));

    let stdin = stdin.ok_or(LaunchError::MissingPipe("stdin"))?;
    let stdout = stdout.ok_or(LaunchError::MissingPipe("stdout"))?;
    if merge_stderr && stderr.is_none() {
        return Err(LaunchError::MissingPipe("stderr"));
    }

    let reader = ThreadedReader::spawn(stdout, stderr).map_err(|source| {
        LaunchError::LaunchFailed {
            program: program.to_path_buf(),
            source,
        }
    })?;

    Ok(LaunchedProcess {
        input: InputPipe(Some(InputInner::Threaded(Some(stdin)))),
        output: OutputPipe(OutputInner::Threaded(reader)),
        process,
    })
}

enum InputInner {
    Async(tokio::process::ChildStdin),
    // Taken out while a blocking write is in flight.
    Threaded(Option<std::process::ChildStdin>),
}

/// Writer half of the child's stdin.
pub struct InputPipe(Option<InputInner>);

impl InputPipe {
    /// Write all bytes and flush.
    ///
    /// Fails with `BrokenPipe` once the pipe has been closed.
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.0 {
            None => Err(closed_input()),
            Some(InputInner::Async(stdin)) => {
                stdin.write_all(data).await?;
                stdin.flush().await
            }
            Some(InputInner::Threaded(slot)) => {
                let mut stdin = slot.take().ok_or_else(closed_input)?;
                let data = data.to_vec();
                let (stdin, result) = tokio::task::spawn_blocking(move || {
                    let result = stdin.write_all(&data).and_then(|()| stdin.flush());
                    (stdin, result)
                })
                .await
                .map_err(io::Error::other)?;
                *slot = Some(stdin);
                result
            }
        }
    }

    /// Close stdin, signalling EOF to the child. Idempotent.
    pub fn close(&mut self) {
        if self.0.take().is_some() {
            debug!("closed process input");
        }
    }

    /// Whether the pipe has been closed.
    pub fn is_closed(&self) -> bool {
        self.0.is_none()
    }
}

fn closed_input() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "process input already closed")
}

enum OutputInner {
    Async(MergedReader<ChildStdout, ChildStderr>),
    Threaded(ThreadedReader),
}

/// Reader half of the child's output.
pub struct OutputPipe(OutputInner);

impl OutputSource for OutputPipe {
    async fn read_chunk(&mut self) -> io::Result<Option<Chunk>> {
        match &mut self.0 {
            OutputInner::Async(reader) => reader.read_chunk().await,
            OutputInner::Threaded(reader) => reader.read_chunk().await,
        }
    }
}

enum ChildInner {
    Async(tokio::process::Child),
    Threaded(std::process::Child),
}

/// Owned handle to the child process.
///
/// Dropping a handle whose process has not been reaped kills it.
pub struct ProcessHandle {
    inner: ChildInner,
    pid: Option<u32>,
    status: Option<ExitStatus>,
}

impl ProcessHandle {
    fn new(inner: ChildInner) -> Self {
        let pid = match &inner {
            ChildInner::Async(child) => child.id(),
            ChildInner::Threaded(child) => Some(child.id()),
        };
        Self {
            inner,
            pid,
            status: None,
        }
    }

    /// OS process id.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Check for exit without blocking.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_some() {
            return Ok(self.status);
        }
        let status = match &mut self.inner {
            ChildInner::Async(child) => child.try_wait()?,
            ChildInner::Threaded(child) => child.try_wait()?,
        };
        self.status = status;
        Ok(status)
    }

    /// Wait for the process to exit. Cancel safe.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = match &mut self.inner {
            ChildInner::Async(child) => child.wait().await?,
            ChildInner::Threaded(child) => loop {
                if let Some(status) = child.try_wait()? {
                    break status;
                }
                tokio::time::sleep(WAIT_POLL_INTERVAL).await;
            },
        };
        self.status = Some(status);
        Ok(status)
    }

    /// Force-terminate the process and reap it.
    ///
    /// Returns the natural outcome if it had already exited, otherwise
    /// [`ExitOutcome::Killed`].
    ///
    /// On unix the whole process group is killed, so descendants that still
    /// hold the output pipes go down with it.
    pub async fn kill(&mut self) -> io::Result<ExitOutcome> {
        if let Some(status) = self.status {
            return Ok(status.into());
        }
        let natural = self.try_wait()?;
        self.kill_group();
        if let Some(status) = natural {
            return Ok(status.into());
        }

        warn!("force-terminating pid {:?}", self.pid);
        let sent = match &mut self.inner {
            ChildInner::Async(child) => child.start_kill(),
            ChildInner::Threaded(child) => child.kill(),
        };
        match sent {
            Ok(()) => {}
            // Exited between try_wait and kill.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }

        self.wait().await?;
        Ok(ExitOutcome::Killed)
    }

    /// Whether the process has been reaped.
    pub fn has_exited(&self) -> bool {
        self.status.is_some()
    }

    #[cfg(unix)]
    fn kill_group(&self) {
        let Some(pgid) = self.pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
            return;
        };
        // SAFETY: killpg takes no pointers; the group was created for this child.
        if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
            debug!("killpg({pgid}): {}", io::Error::last_os_error());
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&self) {}
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.status.is_some() {
            return;
        }
        self.kill_group();
        match &mut self.inner {
            // kill_on_drop is set and tokio reaps the orphan.
            ChildInner::Async(child) => {
                let _ = child.start_kill();
            }
            ChildInner::Threaded(child) => {
                if let Ok(None) = child.try_wait() {
                    warn!("killing pid {} on drop", child.id());
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
    }
}
