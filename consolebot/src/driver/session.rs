//! Session controller.
//!
//! A [`Session`] owns one child process for its whole life: the input pipe,
//! the process handle and the consuming end of the output pump. Steps run one
//! at a time on the caller's task while the pump drains output in the
//! background, so an expectation can time out even when no output arrives.
//!
//! State machine: `Starting -> Running -> Draining -> Exited | Killed`, with
//! `Failed` reachable from `Starting` (launch errors) and `Running` (step
//! errors). Every path out of `Running` other than a clean exit kills the
//! child before the verdict is built.

use std::io;
use std::time::Duration;

use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};
use tokio::time::Instant;

use super::builder::SessionConfig;
use super::report::{Failure, ProcessResult, Report, SessionState, StepRecord};
use super::script::{HIDDEN_INPUT, Script, Step};
use crate::channel::{Match, MatchResult, OutputChannel, OutputPump, Pattern};
use crate::error::{ChannelError, Error, FailureKind, Result, SessionError};
use crate::transport::{self, ExitOutcome, InputPipe, LaunchedProcess, ProcessHandle};

/// A running scripted session.
///
/// Dropping a session that has not finished kills its process.
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    input: InputPipe,
    output: OutputChannel,
    process: ProcessHandle,
    _pump: OutputPump,
    started: Instant,
    deadline: Instant,
    exit: Option<ExitOutcome>,
    steps: Vec<StepRecord>,
    failure: Option<Failure>,
}

impl Session {
    /// Launch the configured process and start draining its output.
    pub async fn start(config: SessionConfig) -> Result<Self> {
        let started = Instant::now();
        debug!("session starting: {}", config.launch.command_line());

        let LaunchedProcess {
            input,
            output,
            process,
        } = transport::launch(&config.launch)?;
        let (output, pump) = OutputChannel::attach(output, &config.channel);

        info!(
            "launched {} (pid {:?})",
            config.launch.program.display(),
            process.id()
        );

        let mut session = Self {
            deadline: deadline_after(started, config.session_timeout),
            config,
            state: SessionState::Starting,
            input,
            output,
            process,
            _pump: pump,
            started,
            exit: None,
            steps: Vec::new(),
            failure: None,
        };
        session.transition(SessionState::Running);
        Ok(session)
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// OS process id of the child.
    pub fn id(&self) -> Option<u32> {
        self.process.id()
    }

    /// Output received so far.
    pub fn transcript(&self) -> &str {
        self.output.transcript()
    }

    /// Time since launch.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Records of the steps executed so far.
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state == SessionState::Running {
            Ok(())
        } else {
            Err(SessionError::NotRunning.into())
        }
    }

    /// Deadline for a step starting now: the earlier of the step and session deadlines.
    fn step_deadline(&self, timeout: Duration) -> Instant {
        deadline_after(Instant::now(), timeout).min(self.deadline)
    }

    /// Run every step of `script` in order, stopping at the first failure.
    pub async fn run(&mut self, script: &Script) -> Result<()> {
        debug!("running script of {} steps", script.len());
        for step in script {
            self.run_step(step).await?;
        }
        Ok(())
    }

    /// Execute a single step.
    pub async fn run_step(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Send(line) => self.send_line(line).await,
            Step::SendHidden(secret) => self.send_hidden(secret).await,
            Step::Expect { pattern, timeout } => {
                let timeout = timeout.unwrap_or(self.config.step_timeout);
                self.expect_within(pattern, timeout).await.map(drop)
            }
        }
    }

    /// Write `line` plus the line terminator to the child's input.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.ensure_running()?;
        let description = format!("send {line:?}");
        self.write_line(line, description).await
    }

    /// Like [`send_line`](Self::send_line) but the line never appears in logs or reports.
    pub async fn send_hidden(&mut self, secret: &SecretString) -> Result<()> {
        self.ensure_running()?;
        let description = format!("send {HIDDEN_INPUT}");
        self.write_line(secret.expose_secret(), description).await
    }

    /// A child that stopped reading input is not a step failure: the send
    /// succeeds, input is closed and the next expectation sees the exit as
    /// an unexpected EOF.
    async fn write_line(&mut self, line: &str, description: String) -> Result<()> {
        let index = self.steps.len();
        let started = Instant::now();
        let timeout = self.config.step_timeout;
        debug!("step {}: {description}", index + 1);

        let mut data = String::with_capacity(line.len() + 2);
        data.push_str(line);
        data.push_str(self.config.channel.line_ending.as_str());

        let deadline = self.step_deadline(timeout);
        let write = self.input.write_all(data.as_bytes());
        let Ok(result) = tokio::time::timeout_at(deadline, write).await else {
            let error = SessionError::StepTimeout {
                waiting_for: "input to be accepted".to_string(),
                timeout: deadline.saturating_duration_since(started),
            };
            return Err(self
                .fail_step(index, description, started, None, error.into())
                .await);
        };

        if let Err(e) = result {
            if e.kind() == io::ErrorKind::BrokenPipe {
                debug!("step {}: process no longer reads input", index + 1);
            } else {
                warn!("step {}: writing input failed: {e}", index + 1);
            }
            self.input.close();
        }
        self.steps
            .push(StepRecord::new(index, description, "", started.elapsed()));
        Ok(())
    }

    /// Wait for `pattern` using the configured step timeout.
    pub async fn expect(&mut self, pattern: &Pattern) -> Result<Match> {
        self.expect_within(pattern, self.config.step_timeout).await
    }

    /// Wait for `pattern` in unconsumed output for at most `timeout`.
    ///
    /// The wait is also cut short by the session deadline; either way the
    /// failure is a step timeout.
    pub async fn expect_within(&mut self, pattern: &Pattern, timeout: Duration) -> Result<Match> {
        self.ensure_running()?;
        let index = self.steps.len();
        let started = Instant::now();
        let description = format!("expect {pattern}");
        debug!("step {}: {description}", index + 1);

        let deadline = self.step_deadline(timeout);
        let error: Error = match self.output.expect(pattern, deadline).await {
            MatchResult::Matched(found) => {
                debug!("step {}: matched {:?}", index + 1, found.matched);
                let output = format!("{}{}", found.before, found.matched);
                self.steps
                    .push(StepRecord::new(index, description, output, started.elapsed()));
                return Ok(found);
            }
            MatchResult::TimedOut => SessionError::StepTimeout {
                waiting_for: pattern.to_string(),
                timeout: deadline.saturating_duration_since(started),
            }
            .into(),
            MatchResult::StreamClosed => match self.output.take_stream_error() {
                Some(e) => ChannelError::StreamFailed(e).into(),
                None => SessionError::UnexpectedEof {
                    pattern: pattern.to_string(),
                }
                .into(),
            },
        };

        Err(self
            .fail_step(index, description, started, Some(pattern.to_string()), error)
            .await)
    }

    /// Record a failed step, terminate the child and hand the error back.
    async fn fail_step(
        &mut self,
        index: usize,
        description: String,
        started: Instant,
        pattern: Option<String>,
        error: Error,
    ) -> Error {
        let kind = error.failure_kind().unwrap_or(FailureKind::UnexpectedEof);
        let message = error.to_string();
        warn!("step {} failed: {message}", index + 1);

        self.steps.push(StepRecord::failed(
            index,
            description,
            started.elapsed(),
            message.clone(),
        ));
        self.failure = Some(Failure {
            kind,
            step: Some(index),
            pattern,
            message,
        });
        self.transition(SessionState::Failed(kind));
        self.terminate().await;
        error
    }

    fn transition(&mut self, next: SessionState) {
        debug!("session state: {} -> {next}", self.state);
        self.state = next;
    }

    /// Close input and make sure the child is gone.
    async fn terminate(&mut self) {
        self.input.close();
        if self.exit.is_some() {
            return;
        }
        match self.process.kill().await {
            Ok(outcome) => self.exit = Some(outcome),
            Err(e) => warn!("failed to terminate pid {:?}: {e}", self.process.id()),
        }
    }

    /// Close input, wait for the process to exit and return the verdict.
    ///
    /// The process gets until the session deadline to exit on its own and is
    /// killed after that. A session that already failed only collects its
    /// remaining output.
    pub async fn finish(mut self) -> Report {
        if self.state == SessionState::Running {
            self.input.close();
            self.transition(SessionState::Draining);

            match tokio::time::timeout_at(self.deadline, self.process.wait()).await {
                Ok(Ok(status)) => self.exited(status.into()),
                Ok(Err(e)) => {
                    warn!("lost track of pid {:?}: {e}", self.process.id());
                    self.terminate().await;
                    self.transition(SessionState::Killed);
                }
                Err(_) => {
                    let timeout = self.config.session_timeout;
                    warn!("process still running after {timeout:?}");
                    self.terminate().await;
                    self.failure = Some(Failure {
                        kind: FailureKind::SessionTimeout,
                        step: None,
                        pattern: None,
                        message: SessionError::SessionTimeout(timeout).to_string(),
                    });
                    self.transition(SessionState::Killed);
                }
            }
        }

        self.into_report().await
    }

    /// Stop immediately: close input and kill the child.
    pub async fn abort(mut self) -> Report {
        if !self.state.is_terminal() {
            info!("aborting session (pid {:?})", self.process.id());
            self.terminate().await;
            self.transition(SessionState::Killed);
        }
        self.into_report().await
    }

    fn exited(&mut self, outcome: ExitOutcome) {
        info!("process exited: {outcome}");
        self.exit = Some(outcome);
        match outcome {
            ExitOutcome::Code(code) => {
                if code != 0 {
                    self.failure = Some(Failure {
                        kind: FailureKind::ProcessExitNonZero,
                        step: None,
                        pattern: None,
                        message: SessionError::ProcessExitNonZero(outcome).to_string(),
                    });
                }
                self.transition(SessionState::Exited(code));
            }
            ExitOutcome::Signal(_) | ExitOutcome::Killed => {
                self.failure = Some(Failure {
                    kind: FailureKind::ProcessExitNonZero,
                    step: None,
                    pattern: None,
                    message: SessionError::ProcessExitNonZero(outcome).to_string(),
                });
                self.transition(SessionState::Failed(FailureKind::ProcessExitNonZero));
            }
        }
    }

    async fn into_report(mut self) -> Report {
        let grace = deadline_after(Instant::now(), self.config.drain_grace);
        if !self.output.wait_closed(grace).await {
            debug!("output still open after {:?}", self.config.drain_grace);
        }

        let report = Report {
            state: self.state,
            failure: self.failure.take(),
            process: Some(ProcessResult {
                exit: self.exit.unwrap_or(ExitOutcome::Killed),
                pid: self.process.id(),
                transcript: self.output.transcript().to_string(),
            }),
            steps: std::mem::take(&mut self.steps),
            elapsed: self.started.elapsed(),
        };
        debug!("session finished: {}", report.state);
        report
    }
}

/// `start + timeout`, saturating far in the future instead of overflowing.
fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

// Roughly 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Launch a session, run `script` and return the verdict.
///
/// Never fails: launch errors become a failed [`Report`].
pub async fn run_script(config: SessionConfig, script: &Script) -> Report {
    let mut session = match Session::start(config).await {
        Ok(session) => session,
        Err(e) => {
            warn!("{e}");
            return Report::launch_failed(&e);
        }
    };

    if let Err(e) = session.run(script).await {
        debug!("script stopped: {e}");
    }
    session.finish().await
}
