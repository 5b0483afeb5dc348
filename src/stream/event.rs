//! Structured line events

use crate::process::StreamSelector;
use serde::{Serialize, Serializer};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::Level;

/// One line of child output, stamped when it was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamEvent {
    /// When the line was read (serialized as Unix milliseconds).
    #[serde(serialize_with = "unix_millis")]
    pub timestamp: SystemTime,
    /// Severity: info for stdout and error for stderr unless configured otherwise.
    #[serde(serialize_with = "level_name")]
    pub level: Level,
    /// Which stream produced the line.
    pub stream: StreamSelector,
    /// The line, newline stripped.
    pub text: String,
    /// The line already is an event envelope produced by a nested run.
    #[serde(skip)]
    pub nested: bool,
}

impl StreamEvent {
    /// Build an event for `text`, stamped now.
    pub fn new(stream: StreamSelector, level: Level, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            timestamp: SystemTime::now(),
            level,
            stream,
            nested: is_envelope(&text),
            text,
        }
    }

    /// Render as a single-line JSON envelope.
    ///
    /// Nested events are returned verbatim so they are not wrapped twice.
    pub fn to_envelope(&self) -> String {
        if self.nested {
            return self.text.clone();
        }
        serde_json::to_string(self).unwrap_or_else(|_| self.text.clone())
    }
}

/// Whether `line` looks like an envelope: it starts with `{` and ends with `}`.
pub fn is_envelope(line: &str) -> bool {
    line.len() >= 2 && line.starts_with('{') && line.ends_with('}')
}

fn unix_millis<S: Serializer>(ts: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
    let millis = ts
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    s.serialize_u64(millis)
}

fn level_name<S: Serializer>(level: &Level, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(level.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_envelope_shape() {
        let mut event = StreamEvent::new(StreamSelector::Stderr, Level::ERROR, "disk full");
        event.timestamp = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);

        let json: serde_json::Value = serde_json::from_str(&event.to_envelope()).unwrap();
        assert_eq!(json["timestamp"], 1_700_000_000_123u64);
        assert_eq!(json["level"], "ERROR");
        assert_eq!(json["stream"], "stderr");
        assert_eq!(json["text"], "disk full");
        assert!(json.get("nested").is_none());
    }

    #[test]
    fn test_nested_envelope_passes_through() {
        let inner = r#"{"timestamp":1,"level":"INFO","stream":"stdout","text":"x"}"#;
        let event = StreamEvent::new(StreamSelector::Stdout, Level::INFO, inner);
        assert!(event.nested);
        assert_eq!(event.to_envelope(), inner);
    }

    #[test]
    fn test_is_envelope() {
        assert!(is_envelope("{}"));
        assert!(is_envelope("{\"a\":1}"));
        assert!(!is_envelope("{"));
        assert!(!is_envelope("{ unterminated"));
        assert!(!is_envelope("plain text"));
    }
}
