//! Result types for expect operations and process runs

mod error;

pub use error::{Error, PatternError};

use std::fmt;
use std::time::Duration;

/// Result of a successful pattern match.
///
/// Contains the matched text, its position in the session buffer, the text
/// that arrived before it, and any regex capture groups.
///
/// # Regex Captures
///
/// ```no_run
/// use procpilot::{MatchOutcome, Pattern, Session};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let mut session = Session::spawn("echo user@example.com")?;
/// let pattern = Pattern::regex(r"(\w+)@(\w+)\.(\w+)")?;
/// if let MatchOutcome::Matched(result) = session.expect(pattern).await? {
///     // captures[0] is the full match
///     println!("User: {}", result.captures[1]);
///     println!("Domain: {}", result.captures[2]);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Index of the pattern that matched (0-based index into the pattern slice).
    pub pattern_index: usize,

    /// The matched text.
    pub matched: String,

    /// Start position of the match in the buffer (byte offset).
    pub start: usize,

    /// End position of the match in the buffer (byte offset).
    pub end: usize,

    /// Text that appeared between the previous match and this one.
    pub before: String,

    /// Captured groups (for regex patterns).
    ///
    /// Index 0 is the full match, 1+ are the groups. A group that did not take
    /// part in the match is an empty string, so indices always line up with the
    /// regex. Empty for other pattern kinds.
    pub captures: Vec<String>,
}

/// Outcome of waiting for a set of patterns.
///
/// End-of-stream and timeout are members of the same type as a pattern match,
/// so every wait has exactly one of three results and callers can handle them
/// exhaustively.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// One of the declared patterns matched.
    Matched(MatchResult),

    /// The child closed its output before any pattern matched.
    EndOfStream {
        /// Unmatched text that was pending when the stream closed.
        before: String,
    },

    /// No pattern matched before the deadline.
    Timeout {
        /// Wall-clock time spent waiting.
        elapsed: Duration,
        /// Unmatched text pending at the deadline.
        before: String,
    },
}

impl MatchOutcome {
    /// Returns the match if a declared pattern matched.
    pub fn matched(self) -> Option<MatchResult> {
        match self {
            MatchOutcome::Matched(m) => Some(m),
            _ => None,
        }
    }

    /// Returns `true` for [`MatchOutcome::Matched`].
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched(_))
    }
}

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Normal exit with a status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled(String),
}

impl Termination {
    /// `true` iff the process exited with code exactly 0.
    pub fn success(&self) -> bool {
        matches!(self, Termination::Exited(0))
    }

    /// Exit code, if the process exited normally.
    pub fn code(&self) -> Option<i32> {
        match self {
            Termination::Exited(code) => Some(*code),
            Termination::Signaled(_) => None,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exited(code) => write!(f, "exit code {code}"),
            Termination::Signaled(sig) => write!(f, "terminated by {sig}"),
        }
    }
}

impl From<std::process::ExitStatus> for Termination {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => Termination::Exited(code),
            (None, Some(sig)) => Termination::Signaled(format!("signal {sig}")),
            (None, None) => Termination::Exited(-1),
        }
    }
}

impl From<portable_pty::ExitStatus> for Termination {
    fn from(status: portable_pty::ExitStatus) -> Self {
        match status.signal() {
            Some(sig) => Termination::Signaled(sig.to_string()),
            None => Termination::Exited(status.exit_code() as i32),
        }
    }
}

/// Aggregated result of a [`crate::StreamMultiplexer`] run.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// `true` iff the process exited with code exactly 0 and nothing went wrong.
    pub success: bool,
    /// Every stdout line, newline stripped, in production order.
    pub stdout_lines: Vec<String>,
    /// Every stderr line, newline stripped, in production order.
    pub stderr_lines: Vec<String>,
    /// How the process ended, if it was observed.
    pub termination: Option<Termination>,
    /// Why the run failed, when it did.
    pub message: Option<String>,
}

/// Result of a [`crate::ScenarioRunner`] run.
#[derive(Debug, Clone, Default)]
pub struct ScenarioResult {
    /// `true` iff every step matched and the process exited with code 0.
    pub success: bool,
    /// Captured text with masked responses redacted.
    pub transcript: String,
    /// How the process ended, if it was observed.
    pub termination: Option<Termination>,
    /// Index of the step that failed, if a step failed.
    pub failed_step: Option<usize>,
    /// Human-readable reason for failure.
    pub message: Option<String>,
}
