//! Cross-component selection stores.
//!
//! Constructed once at the top level and passed by handle to every
//! component that reads or mutates them. The stores only record intent and
//! notify subscribers; scrolling or refetching in response is the
//! consumer's job.

use parking_lot::Mutex;

use crate::cache::Generation;
use crate::pubsub::{Subscribers, Subscription};

/// Highlighted row in the pending list, set from another view (e.g. a
/// candidate referencing a pending entry). Cleared only by explicit reset
/// or a newer selection.
pub struct PendingHighlight {
    slot: Mutex<Option<u64>>,
    subscribers: Subscribers<Option<u64>>,
}

impl PendingHighlight {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            subscribers: Subscribers::new(),
        }
    }

    pub fn get(&self) -> Option<u64> {
        *self.slot.lock()
    }

    pub fn set(&self, index: u64) {
        *self.slot.lock() = Some(index);
        self.subscribers.emit(&Some(index));
    }

    pub fn clear(&self) {
        let had = self.slot.lock().take().is_some();
        if had {
            self.subscribers.emit(&None);
        }
    }

    pub fn subscribe(&self, listener: Box<dyn Fn(&Option<u64>) + Send + Sync>) -> Subscription {
        self.subscribers.subscribe(listener)
    }

    pub fn unsubscribe(&self, handle: Subscription) -> bool {
        self.subscribers.unsubscribe(handle)
    }
}

impl Default for PendingHighlight {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Selection {
    generation: Option<Generation>,
    row: Option<u64>,
}

/// Chosen candidate row within the candidates singleton. A selection is
/// only meaningful under the generation it was made for; observing a new
/// candidates generation clears it.
pub struct CandidateSelection {
    inner: Mutex<Selection>,
    subscribers: Subscribers<Option<u64>>,
}

impl CandidateSelection {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Selection::default()),
            subscribers: Subscribers::new(),
        }
    }

    pub fn select(&self, generation: Generation, row: u64) {
        {
            let mut inner = self.inner.lock();
            inner.generation = Some(generation);
            inner.row = Some(row);
        }
        self.subscribers.emit(&Some(row));
    }

    pub fn selected(&self) -> Option<u64> {
        self.inner.lock().row
    }

    /// Called whenever a candidates generation is observed; a selection
    /// made under a different generation references a row that no longer
    /// exists and is dropped.
    pub fn observe_generation(&self, generation: Generation) {
        let cleared = {
            let mut inner = self.inner.lock();
            let stale = inner.generation.is_some() && inner.generation != Some(generation);
            inner.generation = Some(generation);
            if stale { inner.row.take().is_some() } else { false }
        };
        if cleared {
            self.subscribers.emit(&None);
        }
    }

    pub fn clear(&self) {
        let had = self.inner.lock().row.take().is_some();
        if had {
            self.subscribers.emit(&None);
        }
    }

    pub fn subscribe(&self, listener: Box<dyn Fn(&Option<u64>) + Send + Sync>) -> Subscription {
        self.subscribers.subscribe(listener)
    }

    pub fn unsubscribe(&self, handle: Subscription) -> bool {
        self.subscribers.unsubscribe(handle)
    }
}

impl Default for CandidateSelection {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn highlight_notifies_and_clears() {
        let highlight = PendingHighlight::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = highlight.subscribe(Box::new(move |value: &Option<u64>| {
            sink.lock().push(*value);
        }));

        highlight.set(4);
        highlight.set(9);
        highlight.clear();
        highlight.clear();
        assert_eq!(*seen.lock(), vec![Some(4), Some(9), None]);

        assert!(highlight.unsubscribe(handle));
        highlight.set(1);
        assert_eq!(seen.lock().len(), 3);
    }

    #[test]
    fn selection_cleared_by_new_generation() {
        let selection = CandidateSelection::new();
        selection.observe_generation(2);
        selection.select(2, 5);
        assert_eq!(selection.selected(), Some(5));

        // Same generation observed again: selection survives.
        selection.observe_generation(2);
        assert_eq!(selection.selected(), Some(5));

        selection.observe_generation(3);
        assert_eq!(selection.selected(), None);
    }

    #[test]
    fn stale_clear_notifies_subscribers() {
        let selection = CandidateSelection::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        selection.subscribe(Box::new(move |value: &Option<u64>| {
            sink.lock().push(*value);
        }));

        selection.select(1, 3);
        selection.observe_generation(2);
        assert_eq!(*seen.lock(), vec![Some(3), None]);
    }
}
