//! JSON script files.
//!
//! ```json
//! {
//!   "step_timeout_ms": 5000,
//!   "steps": [
//!     {"expect": "Welcome to M3"},
//!     {"send": "say Hello"},
//!     {"expect": {"regex": "You say: \\w+", "timeout_ms": 2000}},
//!     {"send_hidden": "hunter2"},
//!     {"send": "shutdown"},
//!     {"expect": "Shutting down..."}
//!   ]
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::script::{Script, Step};
use crate::channel::Pattern;
use crate::error::ScriptError;

/// A script as stored on disk.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptFile {
    /// Default per-step timeout.
    #[serde(default)]
    pub step_timeout_ms: Option<u64>,

    /// Overall session timeout.
    #[serde(default)]
    pub session_timeout_ms: Option<u64>,

    /// Steps in order.
    pub steps: Vec<StepEntry>,
}

/// One step as stored on disk.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum StepEntry {
    Send(String),
    SendHidden(String),
    Expect(ExpectEntry),
}

/// An expectation: a bare string is a literal.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ExpectEntry {
    Literal(String),
    Detailed {
        #[serde(default)]
        literal: Option<String>,
        #[serde(default)]
        regex: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

impl ScriptFile {
    /// Parse a script from JSON text.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Read and parse a script file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ScriptError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ScriptError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default per-step timeout, if the file sets one.
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_ms.map(Duration::from_millis)
    }

    /// Session timeout, if the file sets one.
    pub fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout_ms.map(Duration::from_millis)
    }

    /// Compile the steps into a runnable script.
    pub fn into_script(self) -> Result<Script, ScriptError> {
        self.steps
            .into_iter()
            .enumerate()
            .map(|(index, entry)| entry.into_step(index + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(Script::new)
    }
}

impl StepEntry {
    fn into_step(self, step: usize) -> Result<Step, ScriptError> {
        match self {
            StepEntry::Send(line) => Ok(Step::send(line)),
            StepEntry::SendHidden(line) => Ok(Step::send_hidden(line)),
            StepEntry::Expect(ExpectEntry::Literal(text)) => Ok(Step::expect(text)),
            StepEntry::Expect(ExpectEntry::Detailed {
                literal,
                regex,
                timeout_ms,
            }) => {
                let pattern = match (literal, regex) {
                    (Some(text), None) => Pattern::literal(text),
                    (None, Some(re)) => Pattern::regex(&re)
                        .map_err(|source| ScriptError::Pattern { step, source })?,
                    _ => {
                        return Err(ScriptError::InvalidStep {
                            step,
                            message: "expect needs exactly one of `literal` or `regex`".into(),
                        });
                    }
                };
                Ok(Step::Expect {
                    pattern,
                    timeout: timeout_ms.map(Duration::from_millis),
                })
            }
        }
    }
}
