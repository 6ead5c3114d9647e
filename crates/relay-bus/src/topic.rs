//! # Topic Matching
//!
//! Topics and filters are `/`-separated segment lists. A filter segment is a
//! literal, the single-level wildcard `+` (exactly one topic segment), or the
//! multi-level wildcard `#`, which is only legal as the last segment and binds
//! every remaining topic segment as one `/`-joined element.
//!
//! Matching is a pure function over two string slices and holds no state, so
//! it can run from any number of tasks at once.

use relay_types::ConfigurationError;
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// Segment separator.
pub const SEPARATOR: char = '/';

/// Matches exactly one topic segment.
pub const SINGLE_LEVEL_WILDCARD: &str = "+";

/// Matches all remaining topic segments; final segment only.
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Matches `topic` against `filter`.
///
/// Returns the wildcard-bound elements in left-to-right order, or `None` if
/// the topic does not match. The topic must have exactly as many segments as
/// the filter unless the filter ends in `#`, in which case it needs at least
/// one segment at the `#` position.
///
/// ```
/// use relay_bus::topic::match_topic;
///
/// assert_eq!(match_topic("a/+/c", "a/b/c"), Some(vec!["b".to_string()]));
/// assert_eq!(match_topic("a/#", "a/b/c"), Some(vec!["b/c".to_string()]));
/// assert_eq!(match_topic("a/+", "a"), None);
/// ```
#[must_use]
pub fn match_topic(filter: &str, topic: &str) -> Option<Vec<String>> {
    let topic_parts: Vec<&str> = topic.split(SEPARATOR).collect();
    let mut elements = Vec::new();

    for (i, segment) in filter.split(SEPARATOR).enumerate() {
        if i >= topic_parts.len() {
            return None;
        }

        match segment {
            SINGLE_LEVEL_WILDCARD => elements.push(topic_parts[i].to_string()),
            MULTI_LEVEL_WILDCARD => {
                elements.push(topic_parts[i..].join("/"));
                return Some(elements);
            }
            literal if literal != topic_parts[i] => return None,
            _ => {}
        }
    }

    // Filter exhausted: the topic must be too.
    if filter.split(SEPARATOR).count() != topic_parts.len() {
        return None;
    }

    Some(elements)
}

/// A validated topic filter.
///
/// Immutable once built. Borrows as `str`, so maps keyed by `TopicFilter` can
/// be queried with a plain pattern string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicFilter(String);

impl TopicFilter {
    /// Validates and wraps a filter pattern.
    ///
    /// # Errors
    ///
    /// `ConfigurationError::InvalidFilter` for an empty pattern or a `#` that
    /// is not the final segment.
    pub fn new(pattern: impl Into<String>) -> Result<Self, ConfigurationError> {
        let pattern = pattern.into();

        if pattern.is_empty() {
            return Err(ConfigurationError::InvalidFilter {
                filter: pattern,
                reason: "filter is empty".to_string(),
            });
        }

        let segment_count = pattern.split(SEPARATOR).count();
        let misplaced_hash = pattern
            .split(SEPARATOR)
            .enumerate()
            .any(|(i, s)| s == MULTI_LEVEL_WILDCARD && i + 1 != segment_count);
        if misplaced_hash {
            return Err(ConfigurationError::InvalidFilter {
                filter: pattern,
                reason: "multi-level wildcard must be the last segment".to_string(),
            });
        }

        Ok(Self(pattern))
    }

    /// Builds `<prefix>/<pattern>` and validates it.
    pub fn with_prefix(prefix: Option<&str>, pattern: &str) -> Result<Self, ConfigurationError> {
        match prefix {
            Some(prefix) => Self::new(format!("{prefix}{SEPARATOR}{pattern}")),
            None => Self::new(pattern),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the filter contains any wildcard segment.
    #[must_use]
    pub fn has_wildcards(&self) -> bool {
        self.0
            .split(SEPARATOR)
            .any(|s| s == SINGLE_LEVEL_WILDCARD || s == MULTI_LEVEL_WILDCARD)
    }

    /// Matches a concrete topic against this filter. See [`match_topic`].
    #[must_use]
    pub fn matches(&self, topic: &str) -> Option<Vec<String>> {
        match_topic(&self.0, topic)
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TopicFilter {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TopicFilter {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for TopicFilter {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Joins an optional prefix onto a concrete topic.
#[must_use]
pub fn prefixed_topic(prefix: Option<&str>, topic: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}{SEPARATOR}{topic}"),
        None => topic.to_string(),
    }
}
