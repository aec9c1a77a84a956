//! Output buffer with a consumed cursor and incremental rescans.
//!
//! The buffer only ever grows. Text before the cursor has been attributed to
//! an earlier expectation and is never matched again. While an expectation
//! is pending, [`PendingMatch`] remembers how far the buffer has been ruled
//! out so each rescan of a literal only covers new output plus a bounded
//! overlap. Matchers without a bounded overlap rescan the unconsumed region.

use std::ops::Range;

use super::patterns::Matcher;

/// Append-only transcript with a consumed cursor.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    text: String,
    cursor: usize,
}

/// A satisfied expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Unconsumed output that preceded the match.
    pub before: String,

    /// The matched text.
    pub matched: String,

    /// Cursor position after the match.
    pub consumed_to: usize,
}

impl OutputBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            text: String::with_capacity(4096),
            cursor: 0,
        }
    }

    /// Append decoded output.
    pub fn push_str(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// The full transcript, consumed or not.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Output not yet attributed to any expectation.
    pub fn unconsumed(&self) -> &str {
        &self.text[self.cursor..]
    }

    /// Byte offset of the consumed cursor.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Consume through the end of `range`, returning the match record.
    ///
    /// `range` must lie within the unconsumed region.
    pub fn consume(&mut self, range: Range<usize>) -> Match {
        debug_assert!(range.start >= self.cursor && range.end <= self.text.len());
        let record = Match {
            before: self.text[self.cursor..range.start].to_string(),
            matched: self.text[range.clone()].to_string(),
            consumed_to: range.end,
        };
        self.cursor = range.end;
        record
    }
}

/// Scan state for one pending expectation.
#[derive(Debug)]
pub struct PendingMatch<'p, M: ?Sized> {
    pattern: &'p M,
    overlap: Option<usize>,
    ruled_out: usize,
}

impl<'p, M: Matcher + ?Sized> PendingMatch<'p, M> {
    /// Start scanning for `pattern` from the buffer's cursor.
    pub fn new(pattern: &'p M, buffer: &OutputBuffer) -> Self {
        Self {
            pattern,
            overlap: pattern.rescan_overlap(),
            ruled_out: buffer.cursor(),
        }
    }

    /// Scan output that arrived since the last poll.
    pub fn poll(&mut self, buffer: &OutputBuffer) -> Option<Range<usize>> {
        let text = buffer.as_str();
        let start = match self.overlap {
            Some(overlap) => self.ruled_out.saturating_sub(overlap).max(buffer.cursor()),
            None => buffer.cursor(),
        };
        let start = floor_char_boundary(text, start);

        match self.pattern.find_at(text, start) {
            Some(range) => Some(range),
            None => {
                self.ruled_out = text.len();
                None
            }
        }
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
