//! Scripted interaction steps.
//!
//! A script is an ordered list of steps: lines to send to the program and
//! patterns to wait for in its output. Steps run strictly in order.

use std::fmt;
use std::time::Duration;

use log::warn;
use secrecy::SecretString;

use crate::channel::Pattern;

/// Placeholder shown instead of hidden input.
pub(crate) const HIDDEN_INPUT: &str = "********";

/// One unit of scripted interaction.
#[derive(Debug)]
pub enum Step {
    /// Write a line to the program's input.
    Send(String),

    /// Write a line that must not appear in logs or reports (e.g. a password).
    SendHidden(SecretString),

    /// Wait for a pattern in the program's output.
    Expect {
        /// The pattern to wait for.
        pattern: Pattern,

        /// Per-step timeout; the session's step timeout when `None`.
        timeout: Option<Duration>,
    },
}

impl Step {
    /// Create a send step.
    pub fn send(input: impl Into<String>) -> Self {
        Step::Send(input.into())
    }

    /// Create a hidden send step.
    pub fn send_hidden(input: impl Into<String>) -> Self {
        Step::SendHidden(SecretString::from(input.into()))
    }

    /// Create an expect step using the session's step timeout.
    pub fn expect(pattern: impl Into<Pattern>) -> Self {
        Step::Expect {
            pattern: pattern.into(),
            timeout: None,
        }
    }

    /// Create an expect step with its own timeout.
    pub fn expect_within(pattern: impl Into<Pattern>, timeout: Duration) -> Self {
        Step::Expect {
            pattern: pattern.into(),
            timeout: Some(timeout),
        }
    }

    /// Whether this step waits on output.
    pub fn is_expect(&self) -> bool {
        matches!(self, Step::Expect { .. })
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Send(input) => write!(f, "send {input:?}"),
            Step::SendHidden(_) => write!(f, "send {HIDDEN_INPUT}"),
            Step::Expect {
                pattern,
                timeout: None,
            } => write!(f, "expect {pattern}"),
            Step::Expect {
                pattern,
                timeout: Some(timeout),
            } => write!(f, "expect {pattern} within {timeout:?}"),
        }
    }
}

/// An ordered sequence of steps.
#[derive(Debug, Default)]
pub struct Script {
    steps: Vec<Step>,
}

impl Script {
    /// Create a script from steps.
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Iterate over the steps in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.steps.iter()
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the script has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl From<Vec<Step>> for Script {
    fn from(steps: Vec<Step>) -> Self {
        Self::new(steps)
    }
}

impl<'a> IntoIterator for &'a Script {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

/// Builder for scripts.
///
/// # Example
///
/// ```rust
/// use consolebot::ScriptBuilder;
/// use std::time::Duration;
///
/// let script = ScriptBuilder::new()
///     .expect("Welcome to M3")
///     .send("say Hello")
///     .expect("You say: Hello")
///     .send("shutdown")
///     .expect("Shutting down...")
///     .within(Duration::from_secs(5))
///     .build();
/// assert_eq!(script.len(), 5);
/// ```
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    steps: Vec<Step>,
    default_timeout: Option<Duration>,
}

impl ScriptBuilder {
    /// Create a new script builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a line to send.
    pub fn send(mut self, input: impl Into<String>) -> Self {
        self.steps.push(Step::send(input));
        self
    }

    /// Add a hidden line (like a password).
    pub fn send_hidden(mut self, input: impl Into<String>) -> Self {
        self.steps.push(Step::send_hidden(input));
        self
    }

    /// Add a literal expectation.
    pub fn expect(mut self, pattern: impl Into<Pattern>) -> Self {
        self.steps.push(Step::expect(pattern));
        self
    }

    /// Add a regex expectation.
    pub fn expect_regex(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.steps.push(Step::expect(Pattern::regex(pattern)?));
        Ok(self)
    }

    /// Set the timeout of the most recently added expectation.
    pub fn within(mut self, timeout: Duration) -> Self {
        match self.steps.last_mut() {
            Some(Step::Expect { timeout: slot, .. }) => *slot = Some(timeout),
            _ => warn!("within({timeout:?}) ignored: last step is not an expect"),
        }
        self
    }

    /// Set the timeout for every expectation without its own.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Build the script.
    pub fn build(mut self) -> Script {
        if let Some(default) = self.default_timeout {
            for step in &mut self.steps {
                if let Step::Expect { timeout, .. } = step {
                    timeout.get_or_insert(default);
                }
            }
        }
        Script::new(self.steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_order() {
        let script = ScriptBuilder::new()
            .expect("ready")
            .send("shutdown")
            .expect("bye")
            .build();

        let rendered: Vec<String> = script.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["expect \"ready\"", "send \"shutdown\"", "expect \"bye\""]
        );
    }

    #[test]
    fn test_hidden_input_is_masked() {
        let script = ScriptBuilder::new()
            .expect("Password:")
            .send_hidden("wizard")
            .build();

        let step = script.iter().nth(1).unwrap();
        assert_eq!(step.to_string(), "send ********");
        assert!(!format!("{step:?}").contains("wizard"));
    }

    #[test]
    fn test_timeouts() {
        let script = ScriptBuilder::new()
            .expect("a")
            .within(Duration::from_millis(250))
            .send("x")
            .within(Duration::from_secs(9))
            .expect("b")
            .with_timeout(Duration::from_secs(2))
            .build();

        let timeouts: Vec<Option<Duration>> = script
            .iter()
            .filter_map(|s| match s {
                Step::Expect { timeout, .. } => Some(*timeout),
                _ => None,
            })
            .collect();
        assert_eq!(
            timeouts,
            vec![Some(Duration::from_millis(250)), Some(Duration::from_secs(2))]
        );
    }

    #[test]
    fn test_expect_regex() {
        let script = ScriptBuilder::new()
            .expect_regex(r"\d+ players")
            .unwrap()
            .build();
        assert!(script.iter().all(Step::is_expect));
        assert!(ScriptBuilder::new().expect_regex("(").is_err());
    }
}
