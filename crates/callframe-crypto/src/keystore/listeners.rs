//! Observers of current-generation changes.

use std::sync::Arc;

/// Callback invoked with the new current generation.
pub type KeyChangeCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Handle returned by [`crate::KeyStore::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, KeyChangeCallback)>,
}

impl Listeners {
    pub(crate) fn add(&mut self, callback: KeyChangeCallback) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, callback));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    /// Cloned callbacks, so they can run after the lock is released.
    pub(crate) fn snapshot(&self) -> Vec<KeyChangeCallback> {
        self.entries.iter().map(|(_, callback)| Arc::clone(callback)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_after_removal() {
        let mut listeners = Listeners::default();
        let a = listeners.add(Arc::new(|_| {}));
        assert!(listeners.remove(a));

        let b = listeners.add(Arc::new(|_| {}));
        assert_ne!(a, b);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn removing_unknown_id_is_noop() {
        let mut listeners = Listeners::default();
        let id = listeners.add(Arc::new(|_| {}));
        listeners.remove(id);

        assert!(!listeners.remove(id));
        assert!(listeners.snapshot().is_empty());
    }
}
