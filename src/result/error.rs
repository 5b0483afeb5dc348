//! Error types for procpilot

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while spawning or driving a process.
///
/// Only [`Error::Spawn`] and [`Error::MalformedScenario`] ever reach the caller of
/// the high-level runners ([`crate::StreamMultiplexer`] and [`crate::ScenarioRunner`]).
/// The remaining variants are produced by the lower-level primitives and get folded
/// into a failed result with a descriptive message.
///
/// # Examples
///
/// ```no_run
/// use procpilot::{Error, MatchOutcome, Pattern, Session};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut session = Session::builder().spawn("some-command")?;
///
/// match session.expect(Pattern::literal("done")).await {
///     Ok(MatchOutcome::Matched(m)) => println!("Matched: {}", m.matched),
///     Ok(MatchOutcome::Timeout { elapsed, .. }) => eprintln!("Timed out after {elapsed:?}"),
///     Ok(MatchOutcome::EndOfStream { .. }) => eprintln!("Process exited unexpectedly"),
///     Err(Error::Io(e)) => eprintln!("I/O failure: {e}"),
///     Err(e) => return Err(e.into()),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The executable could not be found or the OS refused to create the process.
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    /// A scenario step is structurally invalid. Raised before any process exists.
    #[error("Malformed scenario at step {step}: {reason}")]
    MalformedScenario {
        /// Index of the offending step
        step: usize,
        /// What is wrong with it
        reason: String,
    },

    /// Write to an input stream that the child already closed.
    #[error("Broken pipe: child input stream is closed")]
    BrokenPipe,

    /// A scenario step did not see any of its patterns in time.
    #[error("Step {step}: timeout after {elapsed:?} waiting for {pattern}")]
    StepTimeout {
        /// Index of the step being awaited
        step: usize,
        /// Wall-clock time spent waiting
        elapsed: Duration,
        /// Description of the awaited pattern(s)
        pattern: String,
    },

    /// The child closed its output before a scenario step was satisfied.
    #[error("Step {step}: end of stream while waiting for {pattern}")]
    UnexpectedEndOfStream {
        /// Index of the step being awaited
        step: usize,
        /// Description of the awaited pattern(s)
        pattern: String,
    },

    /// The elevation wrapper asked for a secret but none was supplied.
    #[error("Elevation password requested but no secret was supplied")]
    ElevationSecretMissing,

    /// The elevation wrapper asked again after the secret was sent.
    #[error("Elevation secret was rejected")]
    ElevationRejected,

    /// The child did not finish within the allowed time after the last step.
    #[error("Process did not finish within {0:?}")]
    ExitTimeout(Duration),

    /// Stream readers did not finish within the grace period after process exit.
    #[error("Stream readers did not finish within {0:?} after process exit")]
    JoinTimeout(Duration),

    /// Invalid pattern.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// PTY creation or manipulation failed.
    #[error("PTY error: {0}")]
    Pty(String),
}

impl Error {
    /// Map an I/O error from a write, turning `BrokenPipe` into [`Error::BrokenPipe`].
    pub(crate) fn from_write(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::BrokenPipe {
            Error::BrokenPipe
        } else {
            Error::Io(e)
        }
    }

    /// Returns `true` if this error means the runner never got a process to drive.
    pub fn is_pre_spawn(&self) -> bool {
        matches!(self, Error::Spawn(_) | Error::MalformedScenario { .. })
    }
}

/// Errors related to pattern creation.
#[derive(Error, Debug)]
pub enum PatternError {
    /// Invalid regex pattern.
    #[error("Invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    /// Invalid glob pattern.
    #[error("Invalid glob: {0}")]
    InvalidGlob(String),

    /// Empty pattern.
    #[error("Pattern cannot be empty")]
    EmptyPattern,
}
