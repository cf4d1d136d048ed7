//! Key Patterns
//!
//! Matchers used by pattern invalidation. Glob patterns use shell syntax
//! (`user:*`), regex patterns use `regex` syntax (`^user:\d+$`).

use crate::error::{Error, Result};
use regex::Regex;
use std::fmt;

/// A key matcher
#[derive(Debug, Clone)]
pub enum KeyPattern {
    /// Shell-style glob (`*`, `?`, `[..]`)
    Glob(glob::Pattern),
    /// Regular expression, unanchored unless the pattern anchors itself
    Regex(Regex),
}

impl KeyPattern {
    /// Compile a glob pattern
    pub fn glob(pattern: &str) -> Result<Self> {
        glob::Pattern::new(pattern)
            .map(KeyPattern::Glob)
            .map_err(|e| Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    /// Compile a regular expression
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(KeyPattern::Regex)
            .map_err(|e| Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    /// Parse a pattern written as `/regex/` or as a glob
    pub fn parse(pattern: &str) -> Result<Self> {
        match pattern
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            Some(inner) if !inner.is_empty() => Self::regex(inner),
            _ => Self::glob(pattern),
        }
    }

    /// Check whether a key matches
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Glob(p) => p.matches(key),
            KeyPattern::Regex(r) => r.is_match(key),
        }
    }

    /// The source text of the pattern
    pub fn as_str(&self) -> &str {
        match self {
            KeyPattern::Glob(p) => p.as_str(),
            KeyPattern::Regex(r) => r.as_str(),
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Glob(p) => write!(f, "{}", p),
            KeyPattern::Regex(r) => write!(f, "/{}/", r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_glob_matching() {
        let pattern = KeyPattern::glob("user:*").unwrap();
        assert!(pattern.matches("user:1"));
        assert!(pattern.matches("user:"));
        assert!(!pattern.matches("order:1"));
    }

    #[test]
    fn test_regex_matching() {
        let pattern = KeyPattern::regex(r"^user:\d+$").unwrap();
        assert!(pattern.matches("user:42"));
        assert!(!pattern.matches("user:abc"));
        assert!(!pattern.matches("xuser:1"));
    }

    #[test]
    fn test_parse_picks_syntax() {
        assert_matches!(KeyPattern::parse("/^user:/").unwrap(), KeyPattern::Regex(_));
        assert_matches!(KeyPattern::parse("user:*").unwrap(), KeyPattern::Glob(_));
        assert_eq!(KeyPattern::parse("/^user:/").unwrap().to_string(), "/^user:/");
    }

    #[test]
    fn test_invalid_patterns() {
        assert_matches!(KeyPattern::regex("("), Err(Error::InvalidPattern { .. }));
        assert_matches!(KeyPattern::glob("[a"), Err(Error::InvalidPattern { .. }));
    }
}
