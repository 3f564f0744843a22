/*!
Topic patterns used by step subscriptions.

Three forms are recognized, mirroring the wire-level contract workers are
written against:

- `"*"` matches every topic.
- A pattern ending in `".*"` matches any topic that starts with the pattern
  minus the trailing `*` (the dot stays part of the prefix, so `"order.*"`
  matches `"order.created"` and `"order.created.v2"` but not `"orders"`).
- Anything else matches its exact topic only. A `*` anywhere but in the two
  positions above has no special meaning and is compared literally.

The prefix test is a raw string comparison, not a segment-aware one:
`"order.*"` happily matches `"order..odd"` and `"order.a.b.c"`.
*/

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

/// A parsed subscription pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TopicPattern {
    /// `"*"`: matches every topic.
    Any,
    /// Literal topic match.
    Exact(String),
    /// Raw string-prefix match; the stored prefix keeps its trailing dot.
    Prefix(String),
}

/// Raised when a subscription declares a pattern the router cannot use.
#[derive(Debug, Error, Diagnostic)]
pub enum PatternError {
    #[error("event pattern is empty")]
    #[diagnostic(
        code(steploom::pattern::empty),
        help("subscribe with a topic name, a prefix like \"order.*\", or \"*\"")
    )]
    Empty,
}

impl TopicPattern {
    /// Parses a raw pattern string.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }
        if raw == "*" {
            return Ok(Self::Any);
        }
        if let Some(prefix) = raw.strip_suffix(".*") {
            return Ok(Self::Prefix(format!("{prefix}.")));
        }
        Ok(Self::Exact(raw.to_owned()))
    }

    /// Whether a concrete topic satisfies this pattern.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(exact) => exact == topic,
            Self::Prefix(prefix) => topic.starts_with(prefix.as_str()),
        }
    }

    /// Whether this pattern can match more than one topic.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        !matches!(self, Self::Exact(_))
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(exact) => f.write_str(exact),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}
