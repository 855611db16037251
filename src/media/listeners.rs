//! Callback registry used for adapter events, clock ticks and timeline events.
//!
//! Callbacks are snapshotted before they run, so a callback may add or remove
//! listeners (including itself) without deadlocking the registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

/// Handle returned when a listener is attached; pass it back to detach
pub type ListenerId = u64;

/// Shared callback receiving the event payload
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Keyed callback registry
pub struct Listeners<K, T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, K, Callback<T>)>>,
}

impl<K: Copy + PartialEq, T> Listeners<K, T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Attach a callback for `kind`
    pub fn add(&self, kind: K, callback: Callback<T>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, kind, callback));
        id
    }

    /// Detach a callback. Returns false if it was not attached.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|(entry_id, _, _)| *entry_id == id) {
            Some(pos) => {
                entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Invoke every callback registered for `kind`, in registration order
    pub fn emit(&self, kind: K, payload: &T) {
        let callbacks: Vec<Callback<T>> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, entry_kind, _)| *entry_kind == kind)
            .map(|(_, _, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            callback(payload);
        }
    }

    /// Number of callbacks attached for `kind`
    pub fn count(&self, kind: K) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(_, entry_kind, _)| *entry_kind == kind)
            .count()
    }

    /// Detach everything
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<K: Copy + PartialEq, T> Default for Listeners<K, T> {
    fn default() -> Self {
        Self::new()
    }
}
