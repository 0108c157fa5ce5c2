//! Registry of job handles waiting on an out-of-band notification
//!
//! Some executors cannot settle their job from the call that started the work:
//! the result arrives later through a separate notification (for example a tab
//! reporting that its preview image is ready). The executor registers its
//! handle here keyed by entity id and the notification handler takes it back
//! out to finish the job.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Thread-safe map of entity id to a stashed completion handle
pub struct PendingCompletions<K, H> {
    pending: Arc<Mutex<HashMap<K, H>>>,
}

impl<K, H> Clone for PendingCompletions<K, H> {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
        }
    }
}

impl<K, H> Default for PendingCompletions<K, H> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, H> PendingCompletions<K, H>
where
    K: Eq + Hash + std::fmt::Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<K, H>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stash `handle`, returning whatever was previously stashed for `key`
    pub fn register(&self, key: K, handle: H) -> Option<H> {
        debug!("Registered pending completion for {}", key);
        self.pending().insert(key, handle)
    }

    /// Take the handle for `key` so the caller can settle it
    pub fn take(&self, key: &K) -> Option<H> {
        self.pending().remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.pending().contains_key(key)
    }

    /// Drop the handle for `key` without using it
    pub fn remove(&self, key: &K) -> bool {
        self.pending().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_take() {
        let completions: PendingCompletions<u32, &str> = PendingCompletions::new();
        assert!(completions.is_empty());

        assert_eq!(completions.register(7, "first"), None);
        assert!(completions.contains(&7));
        assert_eq!(completions.register(7, "second"), Some("first"));
        assert_eq!(completions.len(), 1);

        assert_eq!(completions.take(&7), Some("second"));
        assert_eq!(completions.take(&7), None);
        assert!(!completions.contains(&7));
    }

    #[test]
    fn test_clones_share_entries() {
        let completions: PendingCompletions<u32, u32> = PendingCompletions::new();
        let other = completions.clone();

        completions.register(1, 10);
        assert!(other.remove(&1));
        assert!(!other.remove(&1));
        assert!(completions.is_empty());
    }
}
