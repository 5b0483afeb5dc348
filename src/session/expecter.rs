//! Expect loop shared by the PTY and pipe sessions

use crate::buffer::BufferManager;
use crate::pattern::{Matcher, Pattern};
use crate::result::{Error, MatchOutcome, MatchResult};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::trace;

/// Consumes output chunks from a channel and matches them against patterns.
///
/// The channel closing is end of stream. Everything received is appended to
/// the transcript in arrival order, independent of what gets matched.
pub(crate) struct Expecter {
    rx: UnboundedReceiver<Vec<u8>>,
    buffer: BufferManager,
    transcript: Vec<u8>,
    eof: bool,
}

impl Expecter {
    pub(crate) fn new(
        rx: UnboundedReceiver<Vec<u8>>,
        max_buffer_size: usize,
        strip_ansi: bool,
    ) -> Self {
        Self {
            rx,
            buffer: BufferManager::new(max_buffer_size, strip_ansi),
            transcript: Vec::new(),
            eof: false,
        }
    }

    pub(crate) fn transcript(&self) -> &[u8] {
        &self.transcript
    }

    /// Wait until one of `patterns` matches, the stream ends, or `timeout` elapses.
    ///
    /// Patterns are tried in declared order and the first one that matches
    /// anywhere in the pending window wins. Pending data is checked before the
    /// end-of-stream condition, so output that arrived just before EOF still
    /// matches. `None` waits without a deadline.
    pub(crate) async fn expect_any(
        &mut self,
        patterns: &[Pattern],
        timeout: Option<Duration>,
    ) -> Result<MatchOutcome, Error> {
        let matchers = patterns
            .iter()
            .map(Pattern::to_matcher)
            .collect::<Result<Vec<_>, _>>()?;

        let start = Instant::now();
        let deadline = timeout.map(|t| start + t);

        loop {
            if let Some(result) = self.find(&matchers) {
                return Ok(MatchOutcome::Matched(result));
            }

            if self.eof {
                let before = String::from_utf8_lossy(&self.buffer.take_all()).into_owned();
                return Ok(MatchOutcome::EndOfStream { before });
            }

            let chunk = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                    Ok(chunk) => chunk,
                    Err(_) => {
                        return Ok(MatchOutcome::Timeout {
                            elapsed: start.elapsed(),
                            before: self.buffer.pending_text(),
                        })
                    }
                },
                None => self.rx.recv().await,
            };

            match chunk {
                Some(data) => {
                    let dropped = self.buffer.discarded();
                    let stored = self.buffer.append(&data);
                    if self.buffer.discarded() > dropped {
                        trace!(
                            dropped = self.buffer.discarded() - dropped,
                            window = self.buffer.len(),
                            "match window overflowed"
                        );
                    }
                    self.transcript.extend_from_slice(&stored);
                }
                None => self.eof = true,
            }
        }
    }

    fn find(&mut self, matchers: &[Box<dyn Matcher>]) -> Option<MatchResult> {
        let (pattern_index, m) = matchers
            .iter()
            .enumerate()
            .find_map(|(idx, matcher)| matcher.find(self.buffer.pending()).map(|m| (idx, m)))?;

        let before = self.buffer.consume(m.start);
        let matched = self.buffer.consume(m.end - m.start);

        Some(MatchResult {
            pattern_index,
            matched: String::from_utf8_lossy(&matched).into_owned(),
            start: m.start,
            end: m.end,
            before: String::from_utf8_lossy(&before).into_owned(),
            captures: m.captures,
        })
    }
}
