//! Process launch configuration.

use std::ffi::OsString;
use std::path::PathBuf;

use indexmap::IndexMap;

/// How the child's pipes are serviced.
///
/// Both strategies expose the same capabilities to the layers above;
/// the choice only changes how reads and writes reach the OS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IoStrategy {
    /// Pick the platform's native model: threaded blocking reads on
    /// unix-like systems, handle-based async I/O elsewhere.
    #[default]
    Auto,

    /// Tokio child process with async pipe handles.
    Async,

    /// `std::process` pipes drained by dedicated blocking reader threads.
    Threaded,
}

impl IoStrategy {
    /// Resolve `Auto` to a concrete strategy for this platform.
    pub fn resolve(self) -> IoStrategy {
        match self {
            IoStrategy::Auto if cfg!(unix) => IoStrategy::Threaded,
            IoStrategy::Auto => IoStrategy::Async,
            other => other,
        }
    }
}

/// Configuration for launching the target process.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Program to run (a path, or a bare name looked up on `PATH`).
    pub program: PathBuf,

    /// Arguments passed verbatim.
    pub args: Vec<OsString>,

    /// Working directory for the child.
    pub cwd: Option<PathBuf>,

    /// Environment overrides, applied in insertion order.
    pub env: IndexMap<String, String>,

    /// Drain stderr into the same output buffer as stdout.
    /// When false, stderr is inherited from the harness.
    pub merge_stderr: bool,

    /// Pipe servicing strategy.
    pub strategy: IoStrategy,
}

impl LaunchConfig {
    /// Create a configuration for `program` with default settings.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: IndexMap::new(),
            merge_stderr: true,
            strategy: IoStrategy::Auto,
        }
    }

    /// Render the command line for log output.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_resolves_to_concrete_strategy() {
        let resolved = IoStrategy::Auto.resolve();
        assert_ne!(resolved, IoStrategy::Auto);
        assert_eq!(IoStrategy::Async.resolve(), IoStrategy::Async);
        assert_eq!(IoStrategy::Threaded.resolve(), IoStrategy::Threaded);
    }

    #[test]
    fn test_command_line() {
        let mut config = LaunchConfig::new("neolith");
        config.args = vec!["-f".into(), "m3.conf".into(), "-c".into()];
        assert_eq!(config.command_line(), "neolith -f m3.conf -c");
        assert!(config.merge_stderr);
    }
}
