//! Scripted expect/respond scenarios

mod runner;
mod step;
mod transcript;

pub use runner::{Driver, ScenarioRunner, ScenarioState};
pub use step::ScenarioStep;
pub use transcript::{redact, MASK_PLACEHOLDER};

use crate::pattern::Pattern;
use crate::result::Error;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;

/// What the returned transcript contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptMode {
    /// Everything read from the child, in read order.
    #[default]
    Full,
    /// Per step: the text before and including the match, then the response sent.
    Steps,
}

/// An ordered list of steps plus the set of steps whose responses are masked.
///
/// Steps run strictly in order; there is no retry or reordering.
///
/// # Examples
///
/// ```
/// use procpilot::{Scenario, ScenarioStep};
///
/// let scenario = Scenario::new()
///     .step(ScenarioStep::expect("Username:").respond("admin"))
///     .step(ScenarioStep::expect("Password:").respond("s3cret"))
///     .mask([1]);
/// assert!(scenario.is_masked(1));
/// assert!(scenario.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Scenario {
    steps: Vec<ScenarioStep>,
    masked: BTreeSet<usize>,
    transcript_mode: TranscriptMode,
}

impl Scenario {
    /// An empty scenario: just wait for the process to finish.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn step(mut self, step: ScenarioStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Mask the responses of the steps at these indices.
    pub fn mask(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.masked.extend(indices);
        self
    }

    /// Choose what the transcript contains.
    pub fn transcript_mode(mut self, mode: TranscriptMode) -> Self {
        self.transcript_mode = mode;
        self
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[ScenarioStep] {
        &self.steps
    }

    /// Whether the response of step `index` is masked.
    pub fn is_masked(&self, index: usize) -> bool {
        self.masked.contains(&index)
    }

    /// Configured transcript mode.
    pub fn mode(&self) -> TranscriptMode {
        self.transcript_mode
    }

    /// Check every step before anything is spawned.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedScenario`] naming the first bad step.
    pub fn validate(&self) -> Result<(), Error> {
        for (index, step) in self.steps.iter().enumerate() {
            if step.patterns().is_empty() {
                return Err(malformed(index, "no patterns declared"));
            }
            for pattern in step.patterns() {
                pattern
                    .validate()
                    .map_err(|e| malformed(index, format!("{pattern}: {e}")))?;
            }
        }
        if let Some(&index) = self.masked.iter().find(|&&i| i >= self.steps.len()) {
            return Err(malformed(index, "masked step does not exist"));
        }
        Ok(())
    }

    /// Load a scenario from JSON.
    ///
    /// Either an array of steps or an object `{"steps": [...], "mask": [...],
    /// "transcript": "full"|"steps"}`. Each step is an array of one to three
    /// fields: `[pattern_or_list, response_or_null, timeout_secs_or_null]`.
    /// A pattern is a string (literal), `{"regex": ".."}` or `{"glob": ".."}`.
    ///
    /// # Examples
    ///
    /// ```
    /// use procpilot::Scenario;
    ///
    /// let scenario = Scenario::from_json(r#"{
    ///     "steps": [
    ///         ["Enter password:", "s3cret", 5],
    ///         [["[Y/n]", {"regex": "(?i)proceed\\?"}], "y"],
    ///         [{"glob": "Done*"}]
    ///     ],
    ///     "mask": [0]
    /// }"#).unwrap();
    /// assert_eq!(scenario.steps().len(), 3);
    /// ```
    ///
    /// # Errors
    ///
    /// [`Error::MalformedScenario`] for invalid JSON or an invalid step.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum File {
            Steps(Vec<Value>),
            Full {
                steps: Vec<Value>,
                #[serde(default)]
                mask: Vec<usize>,
                #[serde(default)]
                transcript: TranscriptMode,
            },
        }

        let file: File =
            serde_json::from_str(json).map_err(|e| malformed(0, format!("invalid JSON: {e}")))?;
        let (raw_steps, mask, mode) = match file {
            File::Steps(steps) => (steps, Vec::new(), TranscriptMode::default()),
            File::Full {
                steps,
                mask,
                transcript,
            } => (steps, mask, transcript),
        };

        let steps = raw_steps
            .into_iter()
            .enumerate()
            .map(|(index, raw)| parse_step(index, raw))
            .collect::<Result<Vec<_>, _>>()?;

        let scenario = Scenario {
            steps,
            masked: mask.into_iter().collect(),
            transcript_mode: mode,
        };
        scenario.validate()?;
        Ok(scenario)
    }
}

impl FromIterator<ScenarioStep> for Scenario {
    fn from_iter<T: IntoIterator<Item = ScenarioStep>>(iter: T) -> Self {
        Scenario {
            steps: iter.into_iter().collect(),
            ..Scenario::default()
        }
    }
}

/// Maximum number of fields in a JSON step.
const MAX_STEP_FIELDS: usize = 3;

#[derive(Deserialize)]
#[serde(untagged)]
enum PatternSpec {
    Literal(String),
    Regex { regex: String },
    Glob { glob: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExpectedSpec {
    One(PatternSpec),
    Many(Vec<PatternSpec>),
}

fn parse_step(index: usize, raw: Value) -> Result<ScenarioStep, Error> {
    let Value::Array(fields) = raw else {
        return Err(malformed(index, "step must be an array"));
    };
    if fields.is_empty() || fields.len() > MAX_STEP_FIELDS {
        return Err(malformed(
            index,
            format!("expected 1 to {MAX_STEP_FIELDS} fields, got {}", fields.len()),
        ));
    }

    let mut fields = fields.into_iter();
    let expected: ExpectedSpec = fields
        .next()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| malformed(index, format!("invalid pattern: {e}")))?
        .ok_or_else(|| malformed(index, "missing pattern"))?;

    let specs = match expected {
        ExpectedSpec::One(spec) => vec![spec],
        ExpectedSpec::Many(specs) => specs,
    };
    let patterns = specs
        .into_iter()
        .map(|spec| match spec {
            PatternSpec::Literal(s) => Ok(Pattern::literal(s)),
            PatternSpec::Regex { regex } => {
                Pattern::regex(&regex).map_err(|e| malformed(index, e.to_string()))
            }
            PatternSpec::Glob { glob } => {
                Pattern::glob(&glob).map_err(|e| malformed(index, e.to_string()))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut step = ScenarioStep::expect_any(patterns);

    match fields.next() {
        None | Some(Value::Null) => {}
        Some(Value::String(response)) => step = step.respond(response),
        Some(other) => {
            return Err(malformed(index, format!("response must be a string, got {other}")))
        }
    }

    match fields.next() {
        None | Some(Value::Null) => {}
        Some(Value::Number(n)) => {
            let secs = n
                .as_f64()
                .and_then(|s| Duration::try_from_secs_f64(s).ok())
                .ok_or_else(|| malformed(index, format!("invalid timeout {n}")))?;
            step = step.timeout(secs);
        }
        Some(other) => {
            return Err(malformed(index, format!("timeout must be a number, got {other}")))
        }
    }

    Ok(step)
}

fn malformed(step: usize, reason: impl Into<String>) -> Error {
    Error::MalformedScenario {
        step,
        reason: reason.into(),
    }
}
