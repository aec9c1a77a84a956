//! Background drain of the child's output.
//!
//! One pump task per session reads the output source from launch until EOF,
//! decodes each stream with its own decoder and forwards the text over an
//! unbounded channel. The channel is the only link between the pump and the
//! session: the pump is its single producer, the session its single
//! consumer, and the sender being dropped is the closed flag. Because the channel is unbounded the pump never waits on
//! the session.

use std::io;

use log::{debug, trace, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::decode::TextDecoder;
use crate::transport::{OutputSource, OutputStream};

/// Message from the pump to the session.
#[derive(Debug)]
pub enum PumpEvent {
    /// Newly decoded output text.
    Output(String),

    /// Reading failed; the stream ends after this event.
    Failed(io::Error),
}

/// Handle to a running drain task. Dropping it aborts the task.
#[derive(Debug)]
pub struct OutputPump {
    handle: JoinHandle<u64>,
}

impl OutputPump {
    /// Start draining `source` in a background task.
    ///
    /// Returns the pump handle and the receiving end of its channel.
    pub fn spawn<S: OutputSource>(
        source: S,
        strip_ansi: bool,
    ) -> (Self, mpsc::UnboundedReceiver<PumpEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(drain(source, Decoders::new(strip_ansi), tx));
        (Self { handle }, rx)
    }

    /// Whether the drain loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for OutputPump {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Separate decoders so a character split on one stream survives a chunk
/// from the other arriving in between.
struct Decoders {
    stdout: TextDecoder,
    stderr: TextDecoder,
}

impl Decoders {
    fn new(strip_ansi: bool) -> Self {
        Self {
            stdout: TextDecoder::new(strip_ansi),
            stderr: TextDecoder::new(strip_ansi),
        }
    }

    fn decode(&mut self, stream: OutputStream, data: &[u8]) -> String {
        match stream {
            OutputStream::Stdout => self.stdout.decode(data),
            OutputStream::Stderr => self.stderr.decode(data),
        }
    }

    fn finish(&mut self) -> String {
        let mut tail = self.stdout.finish();
        tail.push_str(&self.stderr.finish());
        tail
    }
}

/// Drain loop. Returns the number of raw bytes read.
async fn drain<S: OutputSource>(
    mut source: S,
    mut decoder: Decoders,
    tx: mpsc::UnboundedSender<PumpEvent>,
) -> u64 {
    let mut total = 0u64;
    loop {
        match source.read_chunk().await {
            Ok(Some(chunk)) => {
                total += chunk.data.len() as u64;
                trace!("pump: read {} bytes from {:?}", chunk.data.len(), chunk.stream);
                let text = decoder.decode(chunk.stream, &chunk.data);
                if !text.is_empty() && tx.send(PumpEvent::Output(text)).is_err() {
                    debug!("pump: session gone after {total} bytes");
                    return total;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("pump: output read failed: {e}");
                let tail = decoder.finish();
                if !tail.is_empty() {
                    let _ = tx.send(PumpEvent::Output(tail));
                }
                let _ = tx.send(PumpEvent::Failed(e));
                return total;
            }
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        let _ = tx.send(PumpEvent::Output(tail));
    }
    debug!("pump: output closed after {total} bytes");
    total
}
