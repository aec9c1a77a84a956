//! Async pipe strategy: stdout and stderr polled as async handles.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{Chunk, OutputSource, OutputStream};

/// Read size reserved before each poll.
const READ_CHUNK: usize = 4096;

/// Merges two async readers into one chunk stream.
///
/// Chunks are delivered in the order the reads complete. The stream ends
/// only after both readers have reached EOF.
pub struct MergedReader<O, E> {
    stdout: Option<O>,
    stderr: Option<E>,
    out_buf: BytesMut,
    err_buf: BytesMut,
}

enum Ready {
    Stdout(io::Result<usize>),
    Stderr(io::Result<usize>),
}

impl<O, E> MergedReader<O, E>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    /// Create a reader over stdout and an optional stderr.
    pub fn new(stdout: O, stderr: Option<E>) -> Self {
        Self {
            stdout: Some(stdout),
            stderr,
            out_buf: BytesMut::with_capacity(READ_CHUNK),
            err_buf: BytesMut::new(),
        }
    }

    async fn next_ready(&mut self) -> Option<Ready> {
        match (self.stdout.as_mut(), self.stderr.as_mut()) {
            (None, None) => None,
            (Some(out), None) => {
                self.out_buf.reserve(READ_CHUNK);
                Some(Ready::Stdout(out.read_buf(&mut self.out_buf).await))
            }
            (None, Some(err)) => {
                self.err_buf.reserve(READ_CHUNK);
                Some(Ready::Stderr(err.read_buf(&mut self.err_buf).await))
            }
            (Some(out), Some(err)) => {
                self.out_buf.reserve(READ_CHUNK);
                self.err_buf.reserve(READ_CHUNK);
                // read_buf is cancel safe: the losing branch has read nothing.
                let ready = tokio::select! {
                    n = out.read_buf(&mut self.out_buf) => Ready::Stdout(n),
                    n = err.read_buf(&mut self.err_buf) => Ready::Stderr(n),
                };
                Some(ready)
            }
        }
    }
}

impl<O, E> OutputSource for MergedReader<O, E>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    async fn read_chunk(&mut self) -> io::Result<Option<Chunk>> {
        loop {
            match self.next_ready().await {
                None => return Ok(None),
                Some(Ready::Stdout(n)) => {
                    if n? == 0 {
                        self.stdout = None;
                        continue;
                    }
                    return Ok(Some(Chunk::new(
                        OutputStream::Stdout,
                        self.out_buf.split().freeze(),
                    )));
                }
                Some(Ready::Stderr(n)) => {
                    if n? == 0 {
                        self.stderr = None;
                        continue;
                    }
                    return Ok(Some(Chunk::new(
                        OutputStream::Stderr,
                        self.err_buf.split().freeze(),
                    )));
                }
            }
        }
    }
}
