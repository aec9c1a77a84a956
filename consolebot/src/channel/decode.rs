//! Streaming text decoding for raw output chunks.
//!
//! Chunk boundaries are arbitrary, so a multi-byte UTF-8 character or an
//! ANSI escape sequence may arrive split across two reads. The decoder holds
//! such a tail back until the rest arrives. Invalid bytes are replaced with
//! U+FFFD, never reported as errors.

use std::mem;

/// Longest unterminated escape sequence held back before giving up on it.
const MAX_ESCAPE_HOLD: usize = 256;

const ESC: u8 = 0x1b;

/// Incremental lossy UTF-8 decoder with optional ANSI stripping.
#[derive(Debug, Default)]
pub struct TextDecoder {
    pending: Vec<u8>,
    strip_ansi: bool,
}

impl TextDecoder {
    /// Create a decoder, optionally stripping ANSI escape codes.
    pub fn new(strip_ansi: bool) -> Self {
        Self {
            pending: Vec::new(),
            strip_ansi,
        }
    }

    /// Decode a chunk. Incomplete trailing sequences are kept for the next call.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut split = complete_utf8_prefix(&self.pending);
        if self.strip_ansi {
            split = escape_boundary(&self.pending[..split]);
        }

        let rest = self.pending.split_off(split);
        let ready = mem::replace(&mut self.pending, rest);
        self.render(&ready)
    }

    /// Flush whatever is still held back. Call once the stream has ended.
    pub fn finish(&mut self) -> String {
        let ready = mem::take(&mut self.pending);
        self.render(&ready)
    }

    fn render(&self, bytes: &[u8]) -> String {
        if bytes.is_empty() {
            return String::new();
        }
        if self.strip_ansi {
            let cleaned = strip_ansi_escapes::strip(bytes);
            String::from_utf8_lossy(&cleaned).into_owned()
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Length of the prefix that can be decoded now: everything except a
/// truncated multi-byte sequence at the very end.
fn complete_utf8_prefix(bytes: &[u8]) -> usize {
    let mut start = 0;
    loop {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(_) => return bytes.len(),
            Err(e) => match e.error_len() {
                // Invalid sequence: lossy decoding replaces it, keep going.
                Some(len) => start += e.valid_up_to() + len,
                None => return start + e.valid_up_to(),
            },
        }
    }
}

/// Start of an unterminated escape sequence at the end of `bytes`, or
/// `bytes.len()` if there is none.
fn escape_boundary(bytes: &[u8]) -> usize {
    let Some(esc) = memchr::memrchr(ESC, bytes) else {
        return bytes.len();
    };
    let tail = &bytes[esc..];
    if tail.len() > MAX_ESCAPE_HOLD || escape_complete(tail) {
        bytes.len()
    } else {
        esc
    }
}

fn escape_complete(seq: &[u8]) -> bool {
    match seq.get(1) {
        None => false,
        // CSI: parameters then a final byte in 0x40..=0x7e.
        Some(b'[') => seq[2..].iter().any(|b| (0x40..=0x7e).contains(b)),
        // OSC: terminated by BEL (ST starts with ESC and is handled as its own sequence).
        Some(b']') => seq[2..].contains(&0x07),
        Some(_) => true,
    }
}
