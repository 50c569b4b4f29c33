//! In-memory checkpoints of conversation threads.
//!
//! Each thread is keyed by a [`ThreadId`] wrapping a random v4 UUID, so two
//! concurrent turns never share state by accident. The arena is a moka cache
//! bounded in two ways: entries idle for longer than the TTL are dropped, and
//! when the capacity is reached the least-recently-used thread is evicted.
//!
//! Checkpoints live only as long as the process; nothing is persisted.

use crate::conversation::ConversationState;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Identifier of one conversation thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(Uuid);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ThreadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Bounded TTL + LRU map from [`ThreadId`] to [`ConversationState`].
pub struct CheckpointStore {
    threads: Cache<ThreadId, ConversationState>,
    ttl: Option<Duration>,
    capacity: u64,
}

impl CheckpointStore {
    /// `ttl = None` disables idle expiry. `capacity` is clamped to at least 1.
    pub fn new(ttl: Option<Duration>, capacity: usize) -> Self {
        let capacity = capacity.max(1) as u64;
        // LRU rather than TinyLFU: a brand-new thread must always be admitted.
        let mut builder = Cache::<ThreadId, ConversationState>::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(
                |id: Arc<ThreadId>, _state: ConversationState, cause: RemovalCause| {
                    debug!("Dropping checkpoint {} ({:?})", id, cause);
                },
            );
        if let Some(ttl) = ttl {
            builder = builder.time_to_idle(ttl);
        }
        Self {
            threads: builder.build(),
            ttl,
            capacity,
        }
    }

    /// Fetch a copy of the thread's state and mark it as recently used.
    pub fn load(&self, id: &ThreadId) -> Option<ConversationState> {
        self.threads.get(id)
    }

    /// Store the thread's state, evicting the least-recently-used thread
    /// when the arena is full.
    pub fn save(&self, id: ThreadId, state: ConversationState) {
        self.threads.insert(id, state);
    }

    pub fn remove(&self, id: &ThreadId) -> Option<ConversationState> {
        self.threads.remove(id)
    }

    /// Number of live threads, after pending evictions have been applied.
    pub fn len(&self) -> usize {
        self.threads.run_pending_tasks();
        self.threads.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.threads.invalidate_all();
    }
}

impl fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("threads", &self.threads.entry_count())
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn state(q: &str) -> ConversationState {
        let mut s = ConversationState::new();
        s.begin_turn(q);
        s
    }

    #[test]
    fn thread_ids_are_unique() {
        let ids: HashSet<ThreadId> = (0..10_000).map(|_| ThreadId::new()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn thread_id_parses_its_display_form() {
        let id = ThreadId::new();
        let parsed: ThreadId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("1234".parse::<ThreadId>().is_err());
    }

    #[test]
    fn save_then_load() {
        let store = CheckpointStore::new(None, 8);
        let id = ThreadId::new();
        store.save(id, state("hello"));
        assert_eq!(store.load(&id).unwrap().question(), Some("hello"));
        assert!(store.load(&ThreadId::new()).is_none());
    }

    #[test]
    fn evicts_least_recently_used() {
        let store = CheckpointStore::new(None, 2);
        let (a, b, c) = (ThreadId::new(), ThreadId::new(), ThreadId::new());
        store.save(a, state("a"));
        store.save(b, state("b"));
        store.threads.run_pending_tasks();
        // Touch `a` so `b` becomes the LRU entry.
        assert!(store.load(&a).is_some());
        store.threads.run_pending_tasks();
        store.save(c, state("c"));

        assert_eq!(store.len(), 2);
        assert!(store.load(&a).is_some());
        assert!(store.load(&b).is_none());
        assert!(store.load(&c).is_some());
    }

    #[test]
    fn idle_threads_expire() {
        let store = CheckpointStore::new(Some(Duration::from_millis(20)), 8);
        let id = ThreadId::new();
        store.save(id, state("short-lived"));
        std::thread::sleep(Duration::from_millis(200));
        assert!(store.load(&id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn clear_and_remove() {
        let store = CheckpointStore::new(None, 8);
        let (a, b) = (ThreadId::new(), ThreadId::new());
        store.save(a, state("a"));
        store.save(b, state("b"));
        assert!(store.remove(&a).is_some());
        assert!(store.load(&a).is_none());
        assert_eq!(store.len(), 1);
        store.clear();
        assert!(store.load(&b).is_none());
    }
}
