//! Bounded LRU cache of recently touched sessions
//!
//! The cache only ever holds snapshots that have already been committed to
//! the store, so evicting an entry never loses data. It never talks to the
//! store itself; misses are resolved by the session manager.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::debug;

use crate::models::Session;

#[derive(Debug)]
struct CacheEntry {
    session: Session,
    tick: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Access tick -> session id, oldest first
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Thread-safe session cache with least-recently-used eviction
#[derive(Debug)]
pub struct SessionCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl SessionCache {
    /// Create a cache holding at most `capacity` sessions (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Presence check that does not refresh recency
    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().entries.contains_key(id)
    }

    /// Get a copy of a cached session and mark it most recently used
    pub fn get(&self, id: &str) -> Option<Session> {
        let mut state = self.state.lock();
        let tick = state.bump();

        let Some(entry) = state.entries.get_mut(id) else {
            state.misses += 1;
            return None;
        };
        let previous = std::mem::replace(&mut entry.tick, tick);
        let session = entry.session.clone();

        state.recency.remove(&previous);
        state.recency.insert(tick, id.to_string());
        state.hits += 1;
        Some(session)
    }

    /// Insert or replace a session, evicting the least recently used entry
    /// when a new id would exceed capacity.
    ///
    /// Returns the id of the evicted session, if any.
    pub fn put(&self, session: Session) -> Option<String> {
        let mut state = self.state.lock();
        let tick = state.bump();
        let id = session.id.clone();

        if let Some(entry) = state.entries.get_mut(&id) {
            let previous = std::mem::replace(&mut entry.tick, tick);
            entry.session = session;
            state.recency.remove(&previous);
            state.recency.insert(tick, id);
            return None;
        }

        let mut evicted = None;
        if state.entries.len() >= self.capacity {
            if let Some((_, oldest)) = state.recency.pop_first() {
                state.entries.remove(&oldest);
                state.evictions += 1;
                debug!(session_id = %oldest, "Evicted session from cache");
                evicted = Some(oldest);
            }
        }

        state.recency.insert(tick, id.clone());
        state.entries.insert(id, CacheEntry { session, tick });
        evicted
    }

    /// Drop a session from the cache
    pub fn remove(&self, id: &str) -> Option<Session> {
        let mut state = self.state.lock();
        let entry = state.entries.remove(id)?;
        state.recency.remove(&entry.tick);
        Some(entry.session)
    }

    /// Drop every cached session, returning how many were held
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.entries.len();
        state.entries.clear();
        state.recency.clear();
        count
    }

    /// Cached ids, least recently used first
    pub fn ids(&self) -> Vec<String> {
        self.state.lock().recency.values().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            capacity: self.capacity,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}
