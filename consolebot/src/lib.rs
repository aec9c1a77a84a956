//! # Consolebot
//!
//! Scripted send/expect harness for interactive console programs.
//!
//! Consolebot launches a program with redirected stdio, writes lines to its
//! input, waits for literal or regex patterns in its output under per-step
//! and per-session deadlines, and reports a pass/fail verdict together with
//! the full transcript.
//!
//! ## Features
//!
//! - Two pipe I/O strategies (tokio async handles, blocking reader threads)
//!   behind one interface
//! - Background output pump, so no output is lost between expectations
//! - Forward-only matching with incremental rescans
//! - Lossy UTF-8 decoding and optional ANSI stripping
//! - Hung children are always killed
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use consolebot::{ScriptBuilder, SessionBuilder};
//!
//! #[tokio::main]
//! async fn main() {
//!     let script = ScriptBuilder::new()
//!         .expect("Welcome to M3")
//!         .send("say Hello")
//!         .expect("You say: Hello")
//!         .send("shutdown")
//!         .expect("Shutting down...")
//!         .build();
//!
//!     let report = SessionBuilder::new("neolith")
//!         .args(["-f", "m3.local.conf", "-c"])
//!         .run(&script)
//!         .await;
//!
//!     println!("{report}");
//!     std::process::exit(report.exit_code().into());
//! }
//! ```

pub mod channel;
pub mod driver;
pub mod error;
pub mod transport;

// Re-export main types for convenience
pub use channel::{LineEnding, Match, MatchResult, Pattern};
pub use driver::{
    Report, Script, ScriptBuilder, ScriptFile, Session, SessionBuilder, SessionConfig,
    SessionState, Step, run_script,
};
pub use error::{Error, FailureKind, Result};
pub use transport::{ExitOutcome, IoStrategy, LaunchConfig};
