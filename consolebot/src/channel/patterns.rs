//! Pattern matching for expectations.

use std::fmt;
use std::ops::Range;

use memchr::memmem;
use regex::Regex;

/// Trait for expectation matching - literal and regex by default, extensible
/// for custom matchers.
pub trait Matcher: Send + Sync {
    /// Find the first match starting at or after byte offset `start`.
    ///
    /// `start` is always a char boundary. Returns the byte range of the
    /// match within `haystack`.
    fn find_at(&self, haystack: &str, start: usize) -> Option<Range<usize>>;

    /// How many bytes before the already-scanned end must be re-examined
    /// when new output arrives. `None` means the matcher can't bound it and
    /// every rescan starts again at the consumed cursor.
    fn rescan_overlap(&self) -> Option<usize> {
        None
    }

    /// Check if the data contains a match.
    fn is_match(&self, haystack: &str) -> bool {
        self.find_at(haystack, 0).is_some()
    }
}

impl Matcher for Regex {
    fn find_at(&self, haystack: &str, start: usize) -> Option<Range<usize>> {
        Regex::find_at(self, haystack, start).map(|m| m.range())
    }
}

/// Pattern an `Expect` step waits for.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Exact substring.
    Literal(Literal),

    /// Regular expression.
    Regex(Regex),
}

/// A literal needle with a precompiled substring finder.
#[derive(Debug, Clone)]
pub struct Literal {
    text: String,
    finder: memmem::Finder<'static>,
}

impl Literal {
    /// The needle text.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl Pattern {
    /// Create a literal pattern.
    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        let finder = memmem::Finder::new(text.as_bytes()).into_owned();
        Pattern::Literal(Literal { text, finder })
    }

    /// Create a regex pattern.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Pattern::Regex(Regex::new(pattern)?))
    }

    /// Whether this is a regex pattern.
    pub fn is_regex(&self) -> bool {
        matches!(self, Pattern::Regex(_))
    }
}

impl Matcher for Pattern {
    fn find_at(&self, haystack: &str, start: usize) -> Option<Range<usize>> {
        match self {
            Pattern::Literal(literal) => {
                let hay = haystack.as_bytes().get(start..)?;
                literal
                    .finder
                    .find(hay)
                    .map(|i| start + i..start + i + literal.text.len())
            }
            Pattern::Regex(regex) => Matcher::find_at(regex, haystack, start),
        }
    }

    fn rescan_overlap(&self) -> Option<usize> {
        match self {
            // A match ending past the scanned region starts at most
            // len - 1 bytes before its end.
            Pattern::Literal(literal) => Some(literal.text.len().saturating_sub(1)),
            Pattern::Regex(_) => None,
        }
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Pattern::literal(text)
    }
}

impl From<String> for Pattern {
    fn from(text: String) -> Self {
        Pattern::literal(text)
    }
}

impl From<Regex> for Pattern {
    fn from(regex: Regex) -> Self {
        Pattern::Regex(regex)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(literal) => write!(f, "{:?}", literal.text),
            Pattern::Regex(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}
