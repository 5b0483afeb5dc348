//! Event sinks

use crate::stream::event::StreamEvent;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::Level;

/// Receives one call per completed line, in per-stream arrival order.
///
/// Called from the reader tasks as lines are read, so implementations must be
/// cheap and must not block for long. Any closure `Fn(&StreamEvent)` is a sink.
pub trait EventSink: Send + Sync {
    /// Handle one event.
    fn emit(&self, event: &StreamEvent);
}

impl<F> EventSink for F
where
    F: Fn(&StreamEvent) + Send + Sync,
{
    fn emit(&self, event: &StreamEvent) {
        self(event)
    }
}

/// Re-emits events through `tracing` at the event's level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &StreamEvent) {
        let stream = event.stream.as_str();
        let text = event.text.as_str();
        match event.level {
            Level::ERROR => tracing::error!(stream, "{text}"),
            Level::WARN => tracing::warn!(stream, "{text}"),
            Level::INFO => tracing::info!(stream, "{text}"),
            Level::DEBUG => tracing::debug!(stream, "{text}"),
            _ => tracing::trace!(stream, "{text}"),
        }
    }
}

/// Forwards events into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &StreamEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.tx.send(event.clone());
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<StreamEvent>>,
}

impl CollectingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events so far, in emission order.
    pub fn events(&self) -> Vec<StreamEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &StreamEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::StreamSelector;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closure_sink() {
        let count = AtomicUsize::new(0);
        let sink = |_: &StreamEvent| {
            count.fetch_add(1, Ordering::SeqCst);
        };
        sink.emit(&StreamEvent::new(StreamSelector::Stdout, Level::INFO, "a"));
        sink.emit(&StreamEvent::new(StreamSelector::Stdout, Level::INFO, "b"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(&StreamEvent::new(StreamSelector::Stderr, Level::ERROR, "boom"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.text, "boom");
        assert_eq!(event.stream, StreamSelector::Stderr);
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        sink.emit(&StreamEvent::new(StreamSelector::Stdout, Level::INFO, "one"));
        assert_eq!(sink.events().len(), 1);
    }
}
