//! A single expect/respond step

use crate::pattern::{describe, Pattern};
use std::time::Duration;

/// One step of a scenario: wait for any of `expected`, then optionally send a
/// response line.
///
/// # Examples
///
/// ```
/// use procpilot::{Pattern, ScenarioStep};
/// use std::time::Duration;
///
/// let step = ScenarioStep::expect("Enter password:")
///     .respond("s3cret")
///     .timeout(Duration::from_secs(5));
///
/// let either = ScenarioStep::expect_any([
///     Pattern::literal("[Y/n]"),
///     Pattern::regex(r"(?i)continue\?").unwrap(),
/// ])
/// .respond("y");
/// assert_eq!(either.patterns().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct ScenarioStep {
    expected: Vec<Pattern>,
    response: Option<String>,
    timeout: Option<Duration>,
}

impl ScenarioStep {
    /// A step waiting for a single pattern.
    pub fn expect(pattern: impl Into<Pattern>) -> Self {
        Self {
            expected: vec![pattern.into()],
            response: None,
            timeout: None,
        }
    }

    /// A step waiting for the first of several alternatives, in declared order.
    pub fn expect_any<I, P>(patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Pattern>,
    {
        Self {
            expected: patterns.into_iter().map(Into::into).collect(),
            response: None,
            timeout: None,
        }
    }

    /// Text to send (newline appended) once the step matches.
    pub fn respond(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    /// Override the scenario-wide default timeout for this step.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Declared patterns, in match priority order.
    pub fn patterns(&self) -> &[Pattern] {
        &self.expected
    }

    /// Response, if any.
    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Timeout override, if any.
    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    /// Human-readable form of the awaited patterns.
    pub fn describe(&self) -> String {
        describe(&self.expected)
    }
}
