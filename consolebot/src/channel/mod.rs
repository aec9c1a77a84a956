//! Channel layer: output draining and pattern matching.
//!
//! This module handles everything between the raw output pipe and an
//! expectation: the background pump, text decoding, the consumed-cursor
//! buffer and the matchers.

mod buffer;
mod decode;
mod output;
mod patterns;
mod pump;

pub use buffer::{Match, OutputBuffer, PendingMatch};
pub use decode::TextDecoder;
pub use output::{ChannelConfig, LineEnding, MatchResult, OutputChannel};
pub use patterns::{Literal, Matcher, Pattern};
pub use pump::{OutputPump, PumpEvent};
