//! Session verdict and step records.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, FailureKind};
use crate::transport::ExitOutcome;

/// Trailing output shown by a failed report's `Display`.
const TRANSCRIPT_TAIL: usize = 4096;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The process is being launched.
    Starting,

    /// Script steps are executing.
    Running,

    /// Input is closed; waiting for the process to exit.
    Draining,

    /// The process exited on its own with this code.
    Exited(i32),

    /// The harness terminated the process after the session deadline.
    Killed,

    /// A step or the launch failed.
    Failed(FailureKind),
}

impl SessionState {
    /// Whether no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Exited(_) | SessionState::Killed | SessionState::Failed(_)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Starting => f.write_str("starting"),
            SessionState::Running => f.write_str("running"),
            SessionState::Draining => f.write_str("draining"),
            SessionState::Exited(code) => write!(f, "exited({code})"),
            SessionState::Killed => f.write_str("killed"),
            SessionState::Failed(kind) => write!(f, "failed({kind})"),
        }
    }
}

/// Record of one executed step.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// Zero-based position in the script.
    pub index: usize,

    /// The step as displayed (hidden input masked).
    pub description: String,

    /// Output consumed by this step, up to and including the match.
    pub output: String,

    /// Time taken by the step.
    pub elapsed: Duration,

    /// Failure message if the step failed.
    pub failure_message: Option<String>,
}

impl StepRecord {
    /// Create a record for a completed step.
    pub fn new(
        index: usize,
        description: impl Into<String>,
        output: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            index,
            description: description.into(),
            output: output.into(),
            elapsed,
            failure_message: None,
        }
    }

    /// Create a record for a failed step.
    pub fn failed(
        index: usize,
        description: impl Into<String>,
        elapsed: Duration,
        failure_message: impl Into<String>,
    ) -> Self {
        Self {
            index,
            description: description.into(),
            output: String::new(),
            elapsed,
            failure_message: Some(failure_message.into()),
        }
    }

    /// Check if the step succeeded.
    pub fn is_success(&self) -> bool {
        self.failure_message.is_none()
    }
}

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Failure category.
    pub kind: FailureKind,

    /// Zero-based index of the failing step, if a step failed.
    pub step: Option<usize>,

    /// The pattern that was pending, if any.
    pub pattern: Option<String>,

    /// Human-readable cause.
    pub message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(step) = self.step {
            write!(f, " at step {}", step + 1)?;
        }
        if let Some(pattern) = &self.pattern {
            write!(f, " (expected {pattern})")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Terminal record of the child process.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    /// How the process ended.
    pub exit: ExitOutcome,

    /// OS process id.
    pub pid: Option<u32>,

    /// Full output captured during the session.
    pub transcript: String,
}

/// Verdict of a scripted session.
#[derive(Debug, Clone)]
pub struct Report {
    /// Terminal state.
    pub state: SessionState,

    /// Failure details; `None` on pass.
    pub failure: Option<Failure>,

    /// Process record; `None` if the process never started.
    pub process: Option<ProcessResult>,

    /// Executed steps in order.
    pub steps: Vec<StepRecord>,

    /// Wall-clock time from launch to verdict.
    pub elapsed: Duration,
}

impl Report {
    /// Build the report for a session that never got a process.
    pub fn launch_failed(error: &Error) -> Self {
        let kind = error.failure_kind().unwrap_or(FailureKind::LaunchFailed);
        Self {
            state: SessionState::Failed(kind),
            failure: Some(Failure {
                kind,
                step: None,
                pattern: None,
                message: error.to_string(),
            }),
            process: None,
            steps: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// True iff the process exited with code 0 after every step passed.
    pub fn passed(&self) -> bool {
        self.state == SessionState::Exited(0) && self.failure.is_none()
    }

    /// Process exit code for the harness itself: 0 on pass, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.passed() { 0 } else { 1 }
    }

    /// Captured output, empty if the process never started.
    pub fn transcript(&self) -> &str {
        self.process
            .as_ref()
            .map(|p| p.transcript.as_str())
            .unwrap_or("")
    }

    /// Exit outcome of the process, if it started.
    pub fn exit(&self) -> Option<ExitOutcome> {
        self.process.as_ref().map(|p| p.exit)
    }

    /// Failure category, if the session failed.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            return write!(
                f,
                "PASSED: {} steps in {:.2?}",
                self.steps.len(),
                self.elapsed
            );
        }

        write!(f, "FAILED [{}]", self.state)?;
        if let Some(failure) = &self.failure {
            write!(f, ": {failure}")?;
        }
        if let Some(process) = &self.process {
            write!(f, "\nprocess: {}", process.exit)?;
            let (omitted, tail) = transcript_tail(&process.transcript);
            f.write_str("\ntranscript:")?;
            if omitted > 0 {
                write!(f, " ({omitted} earlier bytes omitted)")?;
            }
            write!(f, "\n{tail}")?;
        }
        Ok(())
    }
}

/// The last `TRANSCRIPT_TAIL` bytes, cut on a char boundary, and how much was dropped.
fn transcript_tail(transcript: &str) -> (usize, &str) {
    let mut start = transcript.len().saturating_sub(TRANSCRIPT_TAIL);
    while !transcript.is_char_boundary(start) {
        start += 1;
    }
    (start, &transcript[start..])
}
