//! Registry of in-flight runs
//!
//! Purely informational: runners report to it when they are given one, and it
//! never influences scheduling or cancellation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A run currently in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    /// Registry-assigned id, unique per registry.
    pub id: u64,
    /// What is running, e.g. the command line.
    pub description: String,
    /// Child pid, if one was spawned.
    pub pid: Option<u32>,
    /// When the run started.
    pub started: Instant,
}

impl Activity {
    /// Time since the run started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Shared, cloneable registry of active runs.
///
/// # Examples
///
/// ```
/// use procpilot::ActivityRegistry;
///
/// let registry = ActivityRegistry::new();
/// let guard = registry.begin("lpadmin -p office", Some(4242));
/// assert_eq!(registry.active().len(), 1);
/// drop(guard);
/// assert!(registry.active().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ActivityRegistry {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: AtomicU64,
    active: Mutex<BTreeMap<u64, Activity>>,
}

impl ActivityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a run. The entry is removed when the guard drops.
    pub fn begin(&self, description: impl Into<String>, pid: Option<u32>) -> ActivityGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let activity = Activity {
            id,
            description: description.into(),
            pid,
            started: Instant::now(),
        };
        if let Ok(mut active) = self.inner.active.lock() {
            active.insert(id, activity);
        }
        ActivityGuard {
            registry: self.clone(),
            id,
        }
    }

    /// Snapshot of active runs, oldest first.
    pub fn active(&self) -> Vec<Activity> {
        self.inner
            .active
            .lock()
            .map(|active| active.values().cloned().collect())
            .unwrap_or_default()
    }

    fn end(&self, id: u64) {
        if let Ok(mut active) = self.inner.active.lock() {
            active.remove(&id);
        }
    }
}

/// Removes its activity from the registry when dropped.
#[derive(Debug)]
pub struct ActivityGuard {
    registry: ActivityRegistry,
    id: u64,
}

impl ActivityGuard {
    /// Id of the tracked activity.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.registry.end(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_end() {
        let registry = ActivityRegistry::new();
        let a = registry.begin("first", None);
        let b = registry.begin("second", Some(7));
        assert_ne!(a.id(), b.id());

        let active = registry.active();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].description, "first");
        assert_eq!(active[1].pid, Some(7));

        drop(a);
        let active = registry.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].description, "second");
    }

    #[test]
    fn test_clones_share_state() {
        let registry = ActivityRegistry::new();
        let view = registry.clone();
        let _guard = registry.begin("shared", None);
        assert_eq!(view.active().len(), 1);
    }
}
