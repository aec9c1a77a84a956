//! Error types for consolebot.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for consolebot operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Process launch errors
    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    /// Output channel errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Session-level failures (timeouts, EOF, exit status)
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Script file could not be loaded
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
}

impl Error {
    /// Classify this error into the harness failure taxonomy.
    ///
    /// Returns `None` for errors that are caller mistakes rather than
    /// outcomes of a session (bad script files, misuse of a finished session).
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Error::Launch(LaunchError::ExecutableNotFound { .. }) => {
                Some(FailureKind::ExecutableNotFound)
            }
            Error::Launch(_) => Some(FailureKind::LaunchFailed),
            Error::Channel(ChannelError::StreamFailed(_)) => Some(FailureKind::UnexpectedEof),
            Error::Session(e) => e.failure_kind(),
            Error::Script(_) => None,
        }
    }
}

/// Process launch errors.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The program path does not resolve to a runnable file
    #[error("Executable not found: {}", program.display())]
    ExecutableNotFound { program: PathBuf },

    /// The OS refused to create the process
    #[error("Failed to launch {}: {source}", program.display())]
    LaunchFailed {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The process started but a redirected pipe was not handed back
    #[error("Process started without its {0} pipe")]
    MissingPipe(&'static str),
}

/// Channel layer errors.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Reading the child's output failed
    #[error("Output stream failed: {0}")]
    StreamFailed(#[source] io::Error),
}

/// Session errors: the failure outcomes of a scripted run.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A step did not complete before its deadline
    #[error("Timed out after {timeout:?} waiting for {waiting_for}")]
    StepTimeout {
        waiting_for: String,
        timeout: Duration,
    },

    /// The process did not exit within the session deadline
    #[error("Process did not exit within {0:?}")]
    SessionTimeout(Duration),

    /// Output ended before a pending pattern matched
    #[error("Output closed before {pattern} was seen")]
    UnexpectedEof { pattern: String },

    /// Script completed but the process reported failure
    #[error("Process exited with {0}")]
    ProcessExitNonZero(crate::transport::ExitOutcome),

    /// The session has already finished or was aborted
    #[error("Session is not running - it has already finished")]
    NotRunning,
}

impl SessionError {
    fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            SessionError::StepTimeout { .. } => Some(FailureKind::StepTimeout),
            SessionError::SessionTimeout(_) => Some(FailureKind::SessionTimeout),
            SessionError::UnexpectedEof { .. } => Some(FailureKind::UnexpectedEof),
            SessionError::ProcessExitNonZero(_) => Some(FailureKind::ProcessExitNonZero),
            SessionError::NotRunning => None,
        }
    }
}

/// Script file errors.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// The file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file is not a valid script
    #[error("Invalid script {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A step is malformed
    #[error("Invalid step {step}: {message}")]
    InvalidStep { step: usize, message: String },

    /// A regex step failed to compile
    #[error("Invalid pattern in step {step}: {source}")]
    Pattern {
        step: usize,
        #[source]
        source: regex::Error,
    },
}

/// Failure taxonomy reported by a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    ExecutableNotFound,
    LaunchFailed,
    StepTimeout,
    SessionTimeout,
    UnexpectedEof,
    ProcessExitNonZero,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::ExecutableNotFound => "executable not found",
            FailureKind::LaunchFailed => "launch failed",
            FailureKind::StepTimeout => "step timeout",
            FailureKind::SessionTimeout => "session timeout",
            FailureKind::UnexpectedEof => "unexpected EOF",
            FailureKind::ProcessExitNonZero => "non-zero exit",
        };
        f.write_str(name)
    }
}

/// Result type alias using consolebot's Error.
pub type Result<T> = std::result::Result<T, Error>;
