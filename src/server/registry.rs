//! Registry of active streams, keyed by session id.
//!
//! Lets a control request cancel a specific stream by its session id and caps
//! the number of concurrent streams. Entries are removed when the stream's
//! guard drops, whatever terminal state the stream reached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Active streams plus the concurrency limit.
pub struct SessionRegistry {
    active: Mutex<HashMap<String, Entry>>,
    /// `None` means no limit.
    limit: Option<Arc<Semaphore>>,
    max_streams: usize,
    next_entry: AtomicU64,
}

struct Entry {
    /// Distinguishes a superseded registration from its replacement.
    entry_id: u64,
    cancel: CancellationToken,
    superseded: CancellationToken,
}

/// A capacity slot taken before the backend is opened.
///
/// Holds no registry entry, so dropping it (failed open, dropped request)
/// leaves every existing stream untouched.
pub struct Reservation {
    registry: Arc<SessionRegistry>,
    permit: Option<OwnedSemaphorePermit>,
}

/// Holds a registry slot. Dropping it cancels the token and frees the slot.
pub struct SessionGuard {
    key: String,
    entry_id: u64,
    cancel: CancellationToken,
    superseded: CancellationToken,
    registry: Arc<SessionRegistry>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl SessionRegistry {
    /// Create a registry. `max_streams == 0` disables the limit.
    pub fn new(max_streams: usize) -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(HashMap::new()),
            limit: (max_streams > 0).then(|| Arc::new(Semaphore::new(max_streams))),
            max_streams,
            next_entry: AtomicU64::new(1),
        })
    }

    /// Take a capacity slot without waiting. Returns `None` when full.
    pub fn try_reserve(self: &Arc<Self>) -> Option<Reservation> {
        let permit = match &self.limit {
            Some(semaphore) => Some(semaphore.clone().try_acquire_owned().ok()?),
            None => None,
        };

        Some(Reservation {
            registry: Arc::clone(self),
            permit,
        })
    }

    /// Cancel the stream registered under `key`. Returns whether one existed.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self.lock().remove(key);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Configured limit (0 = unlimited).
    pub fn max_streams(&self) -> usize {
        self.max_streams
    }

    fn remove_entry(&self, key: &str, entry_id: u64) {
        let mut active = self.lock();
        if active.get(key).is_some_and(|e| e.entry_id == entry_id) {
            active.remove(key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // The map stays consistent even if a holder panicked.
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Reservation {
    /// Register the stream under `key`, consuming the slot.
    ///
    /// An existing stream under the same key is told it was superseded and
    /// loses its entry. Call only once the new stream is known to be live.
    pub fn commit(self, key: impl Into<String>) -> SessionGuard {
        let registry = self.registry;
        let key = key.into();
        let entry_id = registry.next_entry.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let superseded = CancellationToken::new();

        let previous = registry.lock().insert(
            key.clone(),
            Entry {
                entry_id,
                cancel: cancel.clone(),
                superseded: superseded.clone(),
            },
        );

        if let Some(previous) = previous {
            tracing::info!(session_id = %key, "Superseding active stream for session");
            previous.superseded.cancel();
        }

        SessionGuard {
            key,
            entry_id,
            cancel,
            superseded,
            registry,
            _permit: self.permit,
        }
    }
}

impl SessionGuard {
    /// Cancelled on explicit cancel or when the guard drops.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancelled when a newer stream takes over this key.
    pub fn superseded_token(&self) -> CancellationToken {
        self.superseded.clone()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.registry.remove_entry(&self.key, self.entry_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(registry: &Arc<SessionRegistry>, key: &str) -> Option<SessionGuard> {
        registry.try_reserve().map(|slot| slot.commit(key))
    }

    #[test]
    fn test_register_and_release() {
        let registry = SessionRegistry::new(4);
        let guard = register(&registry, "s-1").unwrap();
        assert!(registry.contains("s-1"));
        assert_eq!(registry.active_count(), 1);

        let token = guard.cancellation_token();
        drop(guard);
        assert!(token.is_cancelled());
        assert!(!registry.contains("s-1"));
    }

    #[test]
    fn test_capacity_limit() {
        let registry = SessionRegistry::new(1);
        let first = register(&registry, "a").unwrap();
        assert!(registry.try_reserve().is_none());

        drop(first);
        assert!(register(&registry, "b").is_some());
    }

    #[test]
    fn test_reservation_counts_against_capacity() {
        let registry = SessionRegistry::new(1);
        let slot = registry.try_reserve().unwrap();
        assert!(registry.try_reserve().is_none());
        assert_eq!(registry.active_count(), 0);

        drop(slot);
        assert!(registry.try_reserve().is_some());
    }

    #[test]
    fn test_zero_means_unlimited() {
        let registry = SessionRegistry::new(0);
        let guards: Vec<_> = (0..100)
            .map(|i| register(&registry, &format!("s-{i}")).unwrap())
            .collect();
        assert_eq!(registry.active_count(), 100);
        drop(guards);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_cancel_by_key() {
        let registry = SessionRegistry::new(4);
        let guard = register(&registry, "s-1").unwrap();

        assert!(registry.cancel("s-1"));
        assert!(guard.cancellation_token().is_cancelled());
        assert!(!guard.superseded_token().is_cancelled());
        assert!(!registry.cancel("s-1"));
        assert!(!registry.cancel("unknown"));
    }

    #[test]
    fn test_same_key_supersedes_previous_stream() {
        let registry = SessionRegistry::new(4);
        let old = register(&registry, "s-1").unwrap();
        let new = register(&registry, "s-1").unwrap();

        assert!(old.superseded_token().is_cancelled());
        assert!(!old.cancellation_token().is_cancelled());
        assert!(!new.superseded_token().is_cancelled());

        // The superseded guard must not evict its replacement.
        drop(old);
        assert!(registry.contains("s-1"));

        drop(new);
        assert!(!registry.contains("s-1"));
    }

    #[test]
    fn test_uncommitted_reservation_leaves_existing_stream_alone() {
        let registry = SessionRegistry::new(4);
        let live = register(&registry, "s-1").unwrap();

        let slot = registry.try_reserve().unwrap();
        drop(slot);

        assert!(registry.contains("s-1"));
        assert!(!live.superseded_token().is_cancelled());
        assert!(!live.cancellation_token().is_cancelled());
    }
}
