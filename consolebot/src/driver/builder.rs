//! Builder for scripted sessions.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use super::report::Report;
use super::script::Script;
use super::session::{Session, run_script};
use crate::channel::{ChannelConfig, LineEnding};
use crate::error::Result;
use crate::transport::{IoStrategy, LaunchConfig};

/// Everything needed to run one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How to start the process.
    pub launch: LaunchConfig,

    /// How to decode and match its output.
    pub channel: ChannelConfig,

    /// Default deadline for a single step.
    pub step_timeout: Duration,

    /// Deadline for the whole session, measured from launch.
    pub session_timeout: Duration,

    /// How long trailing output is still collected after the process ends.
    pub drain_grace: Duration,
}

impl SessionConfig {
    /// Create a configuration for `program` with default timeouts.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            launch: LaunchConfig::new(program),
            channel: ChannelConfig::default(),
            step_timeout: Duration::from_secs(10),
            session_timeout: Duration::from_secs(60),
            drain_grace: Duration::from_millis(500),
        }
    }
}

/// Builder for constructing sessions.
///
/// # Example
///
/// ```rust,no_run
/// use consolebot::{ScriptBuilder, SessionBuilder};
/// use std::time::Duration;
///
/// # async fn example() {
/// let script = ScriptBuilder::new()
///     .expect("> ")
///     .send("shutdown")
///     .expect("Shutting down...")
///     .build();
///
/// let report = SessionBuilder::new("neolith")
///     .args(["-f", "m3.local.conf", "-c"])
///     .step_timeout(Duration::from_secs(5))
///     .run(&script)
///     .await;
/// assert!(report.passed(), "{report}");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    /// Create a new builder for the specified program.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            config: SessionConfig::new(program),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.config.launch.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.config
            .launch
            .args
            .extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.launch.cwd = Some(dir.into());
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.launch.env.insert(key.into(), value.into());
        self
    }

    /// Merge stderr into the captured output (default: true).
    pub fn merge_stderr(mut self, merge: bool) -> Self {
        self.config.launch.merge_stderr = merge;
        self
    }

    /// Select the pipe I/O strategy.
    pub fn strategy(mut self, strategy: IoStrategy) -> Self {
        self.config.launch.strategy = strategy;
        self
    }

    /// Set the default per-step timeout (default: 10s).
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.config.step_timeout = timeout;
        self
    }

    /// Set the overall session timeout (default: 60s).
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    /// Set how long to keep collecting output after exit (default: 500ms).
    pub fn drain_grace(mut self, grace: Duration) -> Self {
        self.config.drain_grace = grace;
        self
    }

    /// Strip ANSI escape codes before matching.
    pub fn strip_ansi(mut self, strip: bool) -> Self {
        self.config.channel.strip_ansi = strip;
        self
    }

    /// Set the terminator appended to sent lines.
    pub fn line_ending(mut self, ending: LineEnding) -> Self {
        self.config.channel.line_ending = ending;
        self
    }

    /// Finish building without starting anything.
    pub fn build(self) -> SessionConfig {
        self.config
    }

    /// Launch the process and return a running session.
    pub async fn start(self) -> Result<Session> {
        Session::start(self.config).await
    }

    /// Launch the process, run `script` to completion and return the verdict.
    pub async fn run(self, script: &Script) -> Report {
        run_script(self.config, script).await
    }
}
