//! Transcript assembly and secret redaction

use crate::result::MatchResult;
use crate::scenario::TranscriptMode;

/// Text substituted for every masked secret.
pub const MASK_PLACEHOLDER: &str = "********";

/// Replace every occurrence of each non-empty secret with [`MASK_PLACEHOLDER`].
///
/// Longer secrets are replaced first so a secret that contains another is
/// never left partially visible. Only exact occurrences are hidden. A secret
/// that is itself part of [`MASK_PLACEHOLDER`], such as `"*"`, stays readable
/// inside every placeholder.
///
/// # Examples
///
/// ```
/// use procpilot::{redact, MASK_PLACEHOLDER};
///
/// let out = redact("Password: hunter2\nOK", &["hunter2"]);
/// assert_eq!(out, format!("Password: {MASK_PLACEHOLDER}\nOK"));
/// ```
pub fn redact(text: &str, secrets: &[&str]) -> String {
    let mut ordered: Vec<&str> = secrets.iter().copied().filter(|s| !s.is_empty()).collect();
    ordered.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    ordered.dedup();

    ordered
        .into_iter()
        .fold(text.to_string(), |acc, secret| acc.replace(secret, MASK_PLACEHOLDER))
}

/// Builds the transcript returned from a scenario run.
pub(crate) struct Recorder {
    mode: TranscriptMode,
    steps: String,
    secrets: Vec<String>,
}

impl Recorder {
    pub(crate) fn new(mode: TranscriptMode, secrets: Vec<String>) -> Self {
        Self {
            mode,
            steps: String::new(),
            secrets,
        }
    }

    pub(crate) fn matched(&mut self, m: &MatchResult) {
        self.steps.push_str(&m.before);
        self.steps.push_str(&m.matched);
    }

    pub(crate) fn unmatched(&mut self, before: &str) {
        self.steps.push_str(before);
    }

    pub(crate) fn sent(&mut self, response: &str, masked: bool) {
        self.steps
            .push_str(if masked { MASK_PLACEHOLDER } else { response });
        self.steps.push('\n');
    }

    /// Final, redacted transcript. `raw` is everything read from the child.
    pub(crate) fn finish(self, raw: &[u8]) -> String {
        let text = match self.mode {
            TranscriptMode::Full => String::from_utf8_lossy(raw).into_owned(),
            TranscriptMode::Steps => self.steps,
        };
        let secrets: Vec<&str> = self.secrets.iter().map(String::as_str).collect();
        redact(&text, &secrets)
    }
}
