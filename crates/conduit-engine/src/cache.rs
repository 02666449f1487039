//! Weak, join-on-synthesis cache keyed by shape
//!
//! Every key owns a slot with its own mutex. A caller that finds no live
//! value synthesizes while holding the slot lock, so concurrent callers for
//! the same key wait and then receive the value just produced. Distinct keys
//! never share a slot lock.
//!
//! Slots hold `Weak` references only: the cache never keeps a value alive.
//! Failed syntheses leave the slot empty and the next caller tries again.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;
use tracing::trace;

/// Observable state of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeState {
    /// No live value and no synthesis in flight
    Unresolved,
    /// A synthesis is in flight
    Synthesizing,
    /// A live value is cached
    Ready,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered by a live entry
    pub hits: u64,
    /// Lookups that had to synthesize
    pub misses: u64,
    /// Successful syntheses
    pub syntheses: u64,
    /// Failed syntheses
    pub failures: u64,
    /// Slots currently held, dead or alive
    pub entries: usize,
}

struct Slot<V> {
    value: Mutex<Weak<V>>,
    synthesizing: AtomicBool,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            value: Mutex::new(Weak::new()),
            synthesizing: AtomicBool::new(false),
        }
    }
}

/// Clears the in-flight flag even if synthesis panics
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Thread-safe weak cache
pub struct ShapeCache<K, V> {
    slots: DashMap<K, Arc<Slot<V>>, FxBuildHasher>,
    hits: AtomicU64,
    misses: AtomicU64,
    syntheses: AtomicU64,
    failures: AtomicU64,
}

impl<K: Eq + Hash + Clone, V> Default for ShapeCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V> ShapeCache<K, V> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            slots: DashMap::with_hasher(FxBuildHasher),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            syntheses: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Return the live value for `key`, or run `synthesize` and cache its
    /// result weakly.
    ///
    /// At most one synthesis per key runs at a time. Errors are returned to
    /// the caller that ran the synthesis and are not cached.
    pub fn get_or_create<E, F>(&self, key: &K, synthesize: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<Arc<V>, E>,
    {
        let slot = self.slot(key);
        let mut current = slot.value.lock();
        if let Some(value) = current.upgrade() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!("shape cache hit");
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        slot.synthesizing.store(true, Ordering::Release);
        let _in_flight = InFlight(&slot.synthesizing);
        match synthesize() {
            Ok(value) => {
                *current = Arc::downgrade(&value);
                self.syntheses.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Live value for `key`, if any. Waits for an in-flight synthesis.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let slot = self.slots.get(key)?.value().clone();
        let value = slot.value.lock().upgrade();
        value
    }

    /// Current state of `key`
    pub fn state(&self, key: &K) -> ShapeState {
        let slot = match self.slots.get(key) {
            Some(slot) => slot.value().clone(),
            None => return ShapeState::Unresolved,
        };
        if slot.synthesizing.load(Ordering::Acquire) {
            return ShapeState::Synthesizing;
        }
        let state = match slot.value.try_lock() {
            Some(weak) if weak.strong_count() > 0 => ShapeState::Ready,
            Some(_) => ShapeState::Unresolved,
            None => ShapeState::Synthesizing,
        };
        state
    }

    /// Drop slots whose value is gone and that nobody is using.
    ///
    /// Returns the number of slots removed.
    pub fn purge(&self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.value.try_lock() {
                Some(weak) => weak.strong_count() > 0,
                None => true,
            }
        });
        before.saturating_sub(self.slots.len())
    }

    /// Number of keys whose value is alive
    pub fn live(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.value().value.lock().strong_count() > 0)
            .count()
    }

    /// Counters snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            syntheses: self.syntheses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            entries: self.slots.len(),
        }
    }

    fn slot(&self, key: &K) -> Arc<Slot<V>> {
        if let Some(slot) = self.slots.get(key) {
            return slot.value().clone();
        }
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Slot::new()))
            .value()
            .clone()
    }
}

impl<K, V> fmt::Debug for ShapeCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapeCache")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .field("syntheses", &self.syntheses.load(Ordering::Relaxed))
            .finish()
    }
}
