//! Pattern matching for expect operations

mod matcher;

pub(crate) use matcher::Matcher;

use crate::result::PatternError;
use regex::bytes::Regex;
use std::fmt;

/// Pattern types for recognising points in process output.
///
/// A pattern is a tagged value: the matcher dispatches on the variant, so a
/// scenario can freely mix literals and compiled expressions in one step.
/// End-of-stream and timeout are not patterns; they are reported through
/// [`crate::MatchOutcome`].
///
/// # Examples
///
/// ```
/// use procpilot::Pattern;
///
/// // Literal substring (fastest)
/// let p1 = Pattern::literal("password: ");
///
/// // Regular expression
/// let p2 = Pattern::regex(r"\d+ packages? upgraded").unwrap();
///
/// // Glob, matched against whole lines
/// let p3 = Pattern::glob("*[Yy]/[Nn]*").unwrap();
/// ```
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Literal substring match.
    ///
    /// Uses Boyer-Moore-Horspool for O(n/m) average-case performance.
    Literal(String),

    /// Regular expression match with capture groups, run over raw bytes.
    Regex(Regex),

    /// Shell-style wildcard (`*`, `?`, `[..]`) matched against each output line,
    /// including the trailing line that has no newline yet.
    Glob(String),
}

impl Pattern {
    /// Create a literal substring pattern.
    pub fn literal(s: impl Into<String>) -> Self {
        Pattern::Literal(s.into())
    }

    /// Create a regex pattern.
    ///
    /// # Errors
    ///
    /// Returns a regex error if the pattern is invalid.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Pattern::Regex(Regex::new(pattern)?))
    }

    /// Create a glob pattern.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::InvalidGlob`] if the glob does not compile.
    pub fn glob(pattern: &str) -> Result<Self, PatternError> {
        matcher::GlobMatcher::new(pattern)?;
        Ok(Pattern::Glob(pattern.to_string()))
    }

    /// Convert pattern to a matcher implementation
    pub fn to_matcher(&self) -> Result<Box<dyn Matcher>, PatternError> {
        use matcher::{GlobMatcher, LiteralMatcher, RegexMatcher};

        match self {
            Pattern::Literal(s) => Ok(Box::new(LiteralMatcher::new(s.as_bytes())?)),
            Pattern::Regex(r) => Ok(Box::new(RegexMatcher::new(r.clone()))),
            Pattern::Glob(g) => Ok(Box::new(GlobMatcher::new(g)?)),
        }
    }

    /// Check that the pattern can be turned into a matcher.
    pub fn validate(&self) -> Result<(), PatternError> {
        self.to_matcher().map(|_| ())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(s) => write!(f, "{s:?}"),
            Pattern::Regex(r) => write!(f, "/{}/", r.as_str()),
            Pattern::Glob(g) => write!(f, "glob({g:?})"),
        }
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Pattern::Literal(s.to_string())
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Pattern::Literal(s)
    }
}

impl From<Regex> for Pattern {
    fn from(r: Regex) -> Self {
        Pattern::Regex(r)
    }
}

/// Render a pattern list for error messages, e.g. `"login:" | /pass(word)?:/`.
pub fn describe(patterns: &[Pattern]) -> String {
    patterns
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}
