//! Threaded strategy: blocking pipe reads on dedicated OS threads.
//!
//! A blocking `read()` can't be abandoned once issued, so each stream gets
//! its own reader thread that forwards chunks over a channel. The async side
//! only ever awaits the channel, which keeps every deadline enforceable.

use std::io::{self, Read};
use std::thread;

use bytes::Bytes;
use log::trace;
use tokio::sync::mpsc;

use super::{Chunk, OutputSource, OutputStream};

const READ_CHUNK: usize = 4096;

type ChunkResult = io::Result<Chunk>;

/// Chunk stream fed by one reader thread per output pipe.
pub struct ThreadedReader {
    rx: mpsc::UnboundedReceiver<ChunkResult>,
}

impl ThreadedReader {
    /// Spawn reader threads for stdout and an optional stderr.
    ///
    /// The stream ends once every reader thread has hit EOF or an error.
    pub fn spawn<O, E>(stdout: O, stderr: Option<E>) -> io::Result<Self>
    where
        O: Read + Send + 'static,
        E: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_reader(OutputStream::Stdout, stdout, tx.clone())?;
        if let Some(stderr) = stderr {
            spawn_reader(OutputStream::Stderr, stderr, tx)?;
        }
        Ok(Self { rx })
    }
}

fn spawn_reader<R>(
    stream: OutputStream,
    mut reader: R,
    tx: mpsc::UnboundedSender<ChunkResult>,
) -> io::Result<()>
where
    R: Read + Send + 'static,
{
    let label = match stream {
        OutputStream::Stdout => "stdout",
        OutputStream::Stderr => "stderr",
    };
    thread::Builder::new()
        .name(format!("consolebot-{label}"))
        .spawn(move || {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        trace!("{label}: EOF");
                        break;
                    }
                    Ok(n) => {
                        let chunk = Chunk::new(stream, Bytes::copy_from_slice(&buf[..n]));
                        if tx.send(Ok(chunk)).is_err() {
                            // Receiver gone, nobody is listening any more.
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        })?;
    Ok(())
}

impl OutputSource for ThreadedReader {
    async fn read_chunk(&mut self) -> io::Result<Option<Chunk>> {
        match self.rx.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}
