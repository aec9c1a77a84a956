//! High-level driver for scripted console sessions.
//!
//! The driver layer sequences send/expect steps against a launched process,
//! enforces step and session deadlines, and produces the final [`Report`].

mod builder;
mod report;
mod script;
pub mod script_file;
mod session;

pub use builder::{SessionBuilder, SessionConfig};
pub use report::{Failure, ProcessResult, Report, SessionState, StepRecord};
pub use script::{Script, ScriptBuilder, Step};
pub use script_file::ScriptFile;
pub use session::{Session, run_script};
