//! In-flight event registry
//!
//! At most one execution per event identity runs at a time. An entry lives
//! exactly as long as the [`InFlightGuard`] handed out for it.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Process-wide set of event identities currently being handled
#[derive(Debug, Clone, Default)]
pub struct DedupRegistry {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `event_id`, or `None` if it is already in flight
    pub fn try_acquire(&self, event_id: &str) -> Option<InFlightGuard> {
        let inserted = self.inner.lock().insert(event_id.to_string());
        inserted.then(|| InFlightGuard {
            registry: self.clone(),
            event_id: event_id.to_string(),
        })
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.inner.lock().contains(event_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn release(&self, event_id: &str) {
        self.inner.lock().remove(event_id);
    }
}

/// Releases its registry entry on drop
#[derive(Debug)]
pub struct InFlightGuard {
    registry: DedupRegistry,
    event_id: String,
}

impl InFlightGuard {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.release(&self.event_id);
    }
}
