//! Output channel: the consumer side of the pump.

use std::io;

use log::trace;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::Instant;

use super::buffer::{Match, OutputBuffer, PendingMatch};
use super::patterns::Matcher;
use super::pump::{OutputPump, PumpEvent};
use crate::transport::OutputSource;

/// Line terminator appended to sent lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// Configuration for output handling.
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    /// Remove ANSI escape codes before matching.
    pub strip_ansi: bool,

    /// Terminator for sent lines.
    pub line_ending: LineEnding,
}

/// Outcome of waiting for a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// The pattern matched; the cursor moved past it.
    Matched(Match),

    /// The deadline passed first; the cursor did not move.
    TimedOut,

    /// Output ended with no match.
    StreamClosed,
}

/// Receives pump output into the buffer and answers expectations.
#[derive(Debug)]
pub struct OutputChannel {
    rx: mpsc::UnboundedReceiver<PumpEvent>,
    buffer: OutputBuffer,
    closed: bool,
    stream_error: Option<io::Error>,
}

impl OutputChannel {
    /// Create a channel over a pump's receiver.
    pub fn new(rx: mpsc::UnboundedReceiver<PumpEvent>) -> Self {
        Self {
            rx,
            buffer: OutputBuffer::new(),
            closed: false,
            stream_error: None,
        }
    }

    /// Start a pump over `source` and return the channel reading from it.
    pub fn attach<S: OutputSource>(source: S, config: &ChannelConfig) -> (Self, OutputPump) {
        let (pump, rx) = OutputPump::spawn(source, config.strip_ansi);
        (Self::new(rx), pump)
    }

    fn absorb(&mut self, event: Option<PumpEvent>) {
        match event {
            Some(PumpEvent::Output(text)) => {
                trace!("channel: +{} bytes", text.len());
                self.buffer.push_str(&text);
            }
            Some(PumpEvent::Failed(e)) => self.stream_error = Some(e),
            None => self.closed = true,
        }
    }

    /// Move everything already queued into the buffer without waiting.
    pub fn absorb_ready(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => self.absorb(Some(event)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.absorb(None);
                    break;
                }
            }
        }
    }

    /// Wait until `pattern` appears in unconsumed output, output ends, or
    /// `deadline` passes.
    ///
    /// Output that was queued before the deadline is always scanned before
    /// `TimedOut` is reported, and a stream that closed by then reports
    /// `StreamClosed` rather than `TimedOut`.
    pub async fn expect<M: Matcher + ?Sized>(&mut self, pattern: &M, deadline: Instant) -> MatchResult {
        let mut pending = PendingMatch::new(pattern, &self.buffer);
        loop {
            self.absorb_ready();
            if let Some(range) = pending.poll(&self.buffer) {
                return MatchResult::Matched(self.buffer.consume(range));
            }
            if self.closed {
                return MatchResult::StreamClosed;
            }

            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(event) => self.absorb(event),
                Err(_) => {
                    self.absorb_ready();
                    if let Some(range) = pending.poll(&self.buffer) {
                        return MatchResult::Matched(self.buffer.consume(range));
                    }
                    return if self.closed {
                        MatchResult::StreamClosed
                    } else {
                        MatchResult::TimedOut
                    };
                }
            }
        }
    }

    /// Absorb output until the stream closes or `deadline` passes.
    ///
    /// Returns whether the stream closed.
    pub async fn wait_closed(&mut self, deadline: Instant) -> bool {
        self.absorb_ready();
        while !self.closed {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(event) => self.absorb(event),
                Err(_) => return false,
            }
        }
        true
    }

    /// The buffer.
    pub fn buffer(&self) -> &OutputBuffer {
        &self.buffer
    }

    /// Full transcript received so far.
    pub fn transcript(&self) -> &str {
        self.buffer.as_str()
    }

    /// Whether output has ended.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Take the read error that ended the stream, if any.
    pub fn take_stream_error(&mut self) -> Option<io::Error> {
        self.stream_error.take()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::io::Builder;

    use super::*;
    use crate::channel::Pattern;
    use crate::transport::MergedReader;

    fn channel() -> (mpsc::UnboundedSender<PumpEvent>, OutputChannel) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, OutputChannel::new(rx))
    }

    fn soon(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    fn out(text: &str) -> PumpEvent {
        PumpEvent::Output(text.to_string())
    }

    #[tokio::test]
    async fn test_ordered_expectations() {
        let (tx, mut channel) = channel();
        tx.send(out("AABB")).unwrap();

        let first = channel.expect(&Pattern::literal("AA"), soon(100)).await;
        assert!(matches!(first, MatchResult::Matched(ref m) if m.consumed_to == 2));
        let second = channel.expect(&Pattern::literal("BB"), soon(100)).await;
        assert!(matches!(second, MatchResult::Matched(ref m) if m.consumed_to == 4));
    }

    #[tokio::test]
    async fn test_no_overlap_with_consumed_region() {
        let (tx, mut channel) = channel();
        tx.send(out("AABB")).unwrap();

        channel.expect(&Pattern::literal("AA"), soon(100)).await;
        let second = channel.expect(&Pattern::literal("AB"), soon(50)).await;
        assert_eq!(second, MatchResult::TimedOut);
        assert_eq!(channel.buffer().cursor(), 2);
    }

    #[tokio::test]
    async fn test_waits_for_late_output() {
        let (tx, mut channel) = channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            tx.send(out("You say: ")).unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            tx.send(out("Hello\n")).unwrap();
        });

        let result = channel.expect(&Pattern::literal("You say: Hello"), soon(2000)).await;
        match result {
            MatchResult::Matched(m) => assert_eq!(m.matched, "You say: Hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_closed_before_match() {
        let (tx, mut channel) = channel();
        tx.send(out("partial output")).unwrap();
        drop(tx);

        let started = std::time::Instant::now();
        let result = channel.expect(&Pattern::literal("bye"), soon(5000)).await;
        assert_eq!(result, MatchResult::StreamClosed);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(channel.is_closed());
        assert_eq!(channel.transcript(), "partial output");
    }

    #[tokio::test]
    async fn test_match_in_final_output_before_close() {
        let (tx, mut channel) = channel();
        tx.send(out("bye\n")).unwrap();
        drop(tx);

        let result = channel.expect(&Pattern::literal("bye"), soon(100)).await;
        assert!(matches!(result, MatchResult::Matched(_)));
        assert!(channel.wait_closed(soon(100)).await);
    }

    #[tokio::test]
    async fn test_timeout_keeps_cursor() {
        let (tx, mut channel) = channel();
        tx.send(out("> ")).unwrap();

        let result = channel.expect(&Pattern::literal("never"), soon(30)).await;
        assert_eq!(result, MatchResult::TimedOut);
        assert_eq!(channel.buffer().cursor(), 0);
        assert!(!channel.wait_closed(soon(10)).await);
        drop(tx);
    }

    #[tokio::test]
    async fn test_regex_expectation() {
        let (tx, mut channel) = channel();
        tx.send(out("There are 12 players online\n")).unwrap();

        let pattern = Pattern::regex(r"(\d+) players").unwrap();
        match channel.expect(&pattern, soon(100)).await {
            MatchResult::Matched(m) => {
                assert_eq!(m.before, "There are ");
                assert_eq!(m.matched, "12 players");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_attach_to_source() {
        let stdout = Builder::new()
            .read(b"\x1b[1mready\x1b[0m\n")
            .wait(Duration::from_millis(10))
            .read(b"> ")
            .build();
        let config = ChannelConfig {
            strip_ansi: true,
            ..ChannelConfig::default()
        };
        let (mut channel, _pump) =
            OutputChannel::attach(MergedReader::new(stdout, None::<tokio::io::Empty>), &config);

        assert!(matches!(
            channel.expect(&Pattern::literal("ready\n> "), soon(2000)).await,
            MatchResult::Matched(_)
        ));
        assert!(channel.wait_closed(soon(2000)).await);
    }

    #[tokio::test]
    async fn test_stream_error_recorded() {
        let (tx, mut channel) = channel();
        tx.send(PumpEvent::Failed(io::Error::new(io::ErrorKind::Other, "lost")))
            .unwrap();
        drop(tx);

        assert_eq!(
            channel.expect(&Pattern::literal("x"), soon(100)).await,
            MatchResult::StreamClosed
        );
        assert!(channel.take_stream_error().is_some());
    }

    #[test]
    fn test_line_endings() {
        assert_eq!(LineEnding::default().as_str(), "\n");
        assert_eq!(LineEnding::CrLf.as_str(), "\r\n");
    }
}
