//! Pattern matcher implementations

use crate::result::PatternError;
use globset::{Glob, GlobMatcher as GlobsetMatcher};
use regex::bytes::Regex;

/// Result of a pattern match
#[derive(Debug, Clone)]
pub struct Match {
    /// Start position of the match
    pub start: usize,
    /// End position of the match
    pub end: usize,
    /// Captured groups (for regex), one entry per group. Groups that did
    /// not participate are empty strings.
    pub captures: Vec<String>,
}

/// Trait for pattern matching
pub trait Matcher: Send + Sync {
    /// Find the first match in the buffer
    fn find(&self, buffer: &[u8]) -> Option<Match>;
}

/// Literal substring matcher using Boyer-Moore-Horspool
pub struct LiteralMatcher {
    pattern: Vec<u8>,
    bad_char_table: [usize; 256],
}

impl LiteralMatcher {
    /// Create a new literal matcher
    pub fn new(pattern: impl Into<Vec<u8>>) -> Result<Self, PatternError> {
        let pattern = pattern.into();

        if pattern.is_empty() {
            return Err(PatternError::EmptyPattern);
        }

        let mut bad_char_table = [pattern.len(); 256];
        for (i, &byte) in pattern.iter().enumerate().take(pattern.len() - 1) {
            bad_char_table[byte as usize] = pattern.len() - 1 - i;
        }

        Ok(Self {
            pattern,
            bad_char_table,
        })
    }
}

impl Matcher for LiteralMatcher {
    fn find(&self, buffer: &[u8]) -> Option<Match> {
        let m = self.pattern.len();
        if buffer.len() < m {
            return None;
        }

        let mut pos = 0;
        while pos + m <= buffer.len() {
            if buffer[pos..pos + m] == self.pattern[..] {
                return Some(Match {
                    start: pos,
                    end: pos + m,
                    captures: vec![],
                });
            }

            let shift_char = buffer[pos + m - 1];
            pos += self.bad_char_table[shift_char as usize];
        }

        None
    }
}

/// Regex matcher.
///
/// Runs over raw bytes so offsets stay valid when the child emits invalid UTF-8.
pub struct RegexMatcher {
    regex: Regex,
}

impl RegexMatcher {
    /// Wrap an already compiled regex
    pub fn new(regex: Regex) -> Self {
        Self { regex }
    }
}

impl Matcher for RegexMatcher {
    fn find(&self, buffer: &[u8]) -> Option<Match> {
        let captures = self.regex.captures(buffer)?;
        let full_match = captures.get(0)?;

        let capture_strings = captures
            .iter()
            .map(|cap| {
                cap.map(|c| String::from_utf8_lossy(c.as_bytes()).into_owned())
                    .unwrap_or_default()
            })
            .collect();

        Some(Match {
            start: full_match.start(),
            end: full_match.end(),
            captures: capture_strings,
        })
    }
}

/// Glob matcher, applied line by line.
///
/// The span of a match is the whole line, newline excluded. The final segment
/// after the last newline is tested too, which is where prompts usually sit.
pub struct GlobMatcher {
    matcher: GlobsetMatcher,
}

impl GlobMatcher {
    /// Create a new glob matcher
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let glob = Glob::new(pattern).map_err(|e| PatternError::InvalidGlob(e.to_string()))?;

        Ok(Self {
            matcher: glob.compile_matcher(),
        })
    }
}

impl Matcher for GlobMatcher {
    fn find(&self, buffer: &[u8]) -> Option<Match> {
        let mut start = 0;
        for segment in buffer.split(|&b| b == b'\n') {
            let end = start + segment.len();
            let line = segment.strip_suffix(b"\r").unwrap_or(segment);
            if !line.is_empty() {
                let text = String::from_utf8_lossy(line);
                if self.matcher.is_match(text.as_ref()) {
                    return Some(Match {
                        start,
                        end: start + line.len(),
                        captures: vec![],
                    });
                }
            }
            start = end + 1;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regex_matcher(pattern: &str) -> RegexMatcher {
        RegexMatcher::new(Regex::new(pattern).unwrap())
    }

    #[test]
    fn test_literal_matcher() {
        let matcher = LiteralMatcher::new(b"hello").unwrap();
        let result = matcher.find(b"world hello there").unwrap();
        assert_eq!(result.start, 6);
        assert_eq!(result.end, 11);
    }

    #[test]
    fn test_literal_matcher_not_found() {
        let matcher = LiteralMatcher::new(b"missing").unwrap();
        assert!(matcher.find(b"this text does not contain it").is_none());
    }

    #[test]
    fn test_literal_matcher_edges() {
        let matcher = LiteralMatcher::new(b"end").unwrap();
        let result = matcher.find(b"this is the end").unwrap();
        assert_eq!((result.start, result.end), (12, 15));

        let matcher = LiteralMatcher::new(b"exact").unwrap();
        let result = matcher.find(b"exact").unwrap();
        assert_eq!((result.start, result.end), (0, 5));
    }

    #[test]
    fn test_literal_matcher_first_occurrence() {
        let matcher = LiteralMatcher::new(b"test").unwrap();
        let result = matcher.find(b"test and test again").unwrap();
        assert_eq!(result.start, 0);
    }

    #[test]
    fn test_literal_matcher_empty_pattern() {
        assert!(LiteralMatcher::new(b"").is_err());
    }

    #[test]
    fn test_literal_matcher_binary_data() {
        let matcher = LiteralMatcher::new([0xFF, 0xFE, 0xFD]).unwrap();
        let result = matcher.find(b"prefix\xFF\xFE\xFDsuffix").unwrap();
        assert_eq!((result.start, result.end), (6, 9));
    }

    #[test]
    fn test_regex_matcher_with_captures() {
        let matcher = regex_matcher(r"(\w+)@(\w+)\.(\w+)");
        let result = matcher.find(b"Email: user@example.com is valid").unwrap();
        assert_eq!(result.captures[0], "user@example.com");
        assert_eq!(result.captures[1], "user");
        assert_eq!(result.captures[2], "example");
        assert_eq!(result.captures[3], "com");
    }

    #[test]
    fn test_regex_matcher_keeps_group_positions() {
        let matcher = regex_matcher(r"(a)?(b)");
        let result = matcher.find(b"b").unwrap();
        assert_eq!(result.captures, ["b", "", "b"]);
    }

    #[test]
    fn test_regex_matcher_invalid_utf8_offsets() {
        let matcher = regex_matcher(r"ok");
        let result = matcher.find(b"\xFF\xFEok").unwrap();
        assert_eq!((result.start, result.end), (2, 4));
    }

    #[test]
    fn test_regex_matcher_no_match() {
        let matcher = regex_matcher(r"\d+");
        assert!(matcher.find(b"no numbers here").is_none());
    }

    #[test]
    fn test_glob_matches_whole_line() {
        let matcher = GlobMatcher::new("Continue*").unwrap();
        let buffer = b"Reading lists\nContinue? [Y/n] ";
        let result = matcher.find(buffer).unwrap();
        assert_eq!(result.start, 14);
        assert_eq!(result.end, buffer.len());
    }

    #[test]
    fn test_glob_strips_carriage_return() {
        let matcher = GlobMatcher::new("*.conf").unwrap();
        let buffer = b"first\r\n/etc/app.conf\r\nlast";
        let result = matcher.find(buffer).unwrap();
        assert_eq!(&buffer[result.start..result.end], b"/etc/app.conf");
    }

    #[test]
    fn test_glob_no_match() {
        let matcher = GlobMatcher::new("*.txt").unwrap();
        assert!(matcher.find(b"file.log\nother.md").is_none());
    }
}
