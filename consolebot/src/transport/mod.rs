//! Process transport layer.
//!
//! Starts the target program with redirected stdio and hides the two
//! pipe-servicing models behind one capability set: write to input, close
//! input, read output chunks, kill and wait. Which model is in use is decided
//! once at launch by [`IoStrategy`] and never leaks past this module.

pub mod config;
mod pipes;
mod process;
mod threaded;

use std::future::Future;
use std::io;

use bytes::Bytes;

pub use config::{IoStrategy, LaunchConfig};
pub use pipes::MergedReader;
pub use process::{ExitOutcome, InputPipe, LaunchedProcess, OutputPipe, ProcessHandle, launch};
pub use threaded::ThreadedReader;

/// Which of the child's output streams a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Raw bytes read from one output stream.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub stream: OutputStream,
    pub data: Bytes,
}

impl Chunk {
    pub fn new(stream: OutputStream, data: Bytes) -> Self {
        Self { stream, data }
    }
}

/// A source of raw output chunks from a child process.
///
/// Implementations must tolerate being polled from a single background task
/// for the whole life of the process.
pub trait OutputSource: Send + 'static {
    /// Read the next available chunk.
    ///
    /// Returns `Ok(None)` once every underlying stream has reached EOF.
    fn read_chunk(&mut self) -> impl Future<Output = io::Result<Option<Chunk>>> + Send;
}
