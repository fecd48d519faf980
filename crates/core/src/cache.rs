#![forbid(unsafe_code)]

//! Per-scope cache of laid-out trees with single-flight builds.
//!
//! A key is either `Ready` (a finished, immutable `Arc<T>`) or `InFlight`
//! (a build some thread is running right now). Concurrent misses on an
//! in-flight key block on that flight's condition variable and all receive
//! the leader's result. The cache map lock is never held while building.

use crate::clock::Clock;
use crate::ids::OwnerId;
use crate::pipeline::{LaidOutTree, PipelineError};
use crate::scope::ScopeKey;
use crate::source::{ChangeListener, RecordChange};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

pub const DEFAULT_TTL_MS: i64 = 180_000;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("record source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("tree invariant violated: {0}")]
    Invariant(String),
    #[error("tree build failed: {0}")]
    BuildFailed(String),
}

impl From<PipelineError> for CacheError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Source(err) => CacheError::SourceUnavailable(err.to_string()),
            PipelineError::Build(err) => CacheError::Invariant(err.to_string()),
            other => CacheError::BuildFailed(other.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Entries older than this are rebuilt on the next request. Zero or
    /// negative disables reuse entirely.
    pub ttl_ms: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_TTL_MS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    /// Requests that joined a build already in flight.
    pub coalesced: u64,
    pub misses: u64,
    pub builds: u64,
    pub failures: u64,
    pub evictions: u64,
    pub entries: usize,
    pub in_flight: usize,
}

type BuildResult<T> = Result<Arc<T>, CacheError>;

struct Flight<T> {
    result: Mutex<Option<BuildResult<T>>>,
    done: Condvar,
}

impl<T> Flight<T> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn finish(&self, result: BuildResult<T>) {
        let mut slot = self
            .result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(result);
        }
        self.done.notify_all();
    }

    fn wait(&self) -> BuildResult<T> {
        let mut slot = self
            .result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            slot = self
                .done
                .wait(slot)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

struct Ready<T> {
    value: Arc<T>,
    built_at_ms: i64,
    owners: BTreeSet<OwnerId>,
}

struct InFlight<T> {
    flight: Arc<Flight<T>>,
    owners: BTreeSet<OwnerId>,
    id: u64,
    /// Set by an invalidation that lands mid-build: the result is handed to
    /// the waiters already attached but not stored, and later requests start
    /// a new flight instead of joining this one.
    stale: bool,
}

enum Slot<T> {
    Ready(Ready<T>),
    InFlight(InFlight<T>),
}

impl<T> Slot<T> {
    fn owners(&self) -> &BTreeSet<OwnerId> {
        match self {
            Slot::Ready(ready) => &ready.owners,
            Slot::InFlight(flight) => &flight.owners,
        }
    }
}

struct Inner<T> {
    slots: HashMap<ScopeKey, Slot<T>>,
    next_flight: u64,
    stats: CacheStats,
}

pub struct TreeCache<T = LaidOutTree> {
    inner: Mutex<Inner<T>>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

/// Completes the flight with a failure if the builder unwinds.
struct FlightGuard<'a, T> {
    cache: &'a TreeCache<T>,
    key: &'a ScopeKey,
    flight: &'a Arc<Flight<T>>,
    id: u64,
    completed: bool,
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        if !self.completed {
            warn!(scope = %self.key, "tree build panicked");
            self.cache.complete(
                self.key,
                self.flight,
                self.id,
                Err(CacheError::BuildFailed("tree build panicked".to_string())),
            );
        }
    }
}

enum Lookup<T> {
    Hit(Arc<T>),
    Join(Arc<Flight<T>>),
    Lead(Arc<Flight<T>>, u64),
}

impl<T> TreeCache<T> {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                next_flight: 0,
                stats: CacheStats::default(),
            }),
            clock,
            config,
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_fresh(&self, built_at_ms: i64, now_ms: i64) -> bool {
        now_ms.saturating_sub(built_at_ms) < self.config.ttl_ms
    }

    /// Returns the cached tree for `key`, building it with `build` when the
    /// entry is missing, expired, or was built for a different owner set.
    pub fn get_or_build<F>(
        &self,
        key: &ScopeKey,
        owners: &BTreeSet<OwnerId>,
        build: F,
    ) -> Result<Arc<T>, CacheError>
    where
        F: FnOnce() -> Result<T, CacheError>,
    {
        let (flight, id) = match self.lookup(key, owners) {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Join(flight) => return flight.wait(),
            Lookup::Lead(flight, id) => (flight, id),
        };

        let mut guard = FlightGuard {
            cache: self,
            key,
            flight: &flight,
            id,
            completed: false,
        };
        let result = build().map(Arc::new);
        guard.completed = true;
        self.complete(key, &flight, id, result.clone());
        result
    }

    fn lookup(&self, key: &ScopeKey, owners: &BTreeSet<OwnerId>) -> Lookup<T> {
        let now_ms = self.clock.now_ms();
        let mut guard = self.lock();
        let inner = &mut *guard;
        match inner.slots.get(key) {
            Some(Slot::Ready(ready))
                if &ready.owners == owners && self.is_fresh(ready.built_at_ms, now_ms) =>
            {
                let value = Arc::clone(&ready.value);
                inner.stats.hits += 1;
                return Lookup::Hit(value);
            }
            Some(Slot::Ready(_)) => {
                inner.stats.evictions += 1;
                debug!(scope = %key, "cache entry expired or owner set changed");
            }
            Some(Slot::InFlight(in_flight)) if &in_flight.owners == owners && !in_flight.stale => {
                let flight = Arc::clone(&in_flight.flight);
                inner.stats.coalesced += 1;
                return Lookup::Join(flight);
            }
            Some(Slot::InFlight(_)) | None => {}
        }

        inner.stats.misses += 1;
        inner.stats.builds += 1;
        inner.next_flight += 1;
        let id = inner.next_flight;
        let flight = Arc::new(Flight::new());
        // Replacing a stale flight, or one for another owner set, orphans it:
        // its leader still answers its own waiters but will not store the result.
        inner.slots.insert(
            key.clone(),
            Slot::InFlight(InFlight {
                flight: Arc::clone(&flight),
                owners: owners.clone(),
                id,
                stale: false,
            }),
        );
        Lookup::Lead(flight, id)
    }

    fn complete(&self, key: &ScopeKey, flight: &Arc<Flight<T>>, id: u64, result: BuildResult<T>) {
        {
            let built_at_ms = self.clock.now_ms();
            let mut guard = self.lock();
            let inner = &mut *guard;
            if result.is_err() {
                inner.stats.failures += 1;
            }
            let ours = match inner.slots.get(key) {
                Some(Slot::InFlight(in_flight)) if in_flight.id == id => Some(in_flight.stale),
                _ => None,
            };
            match (ours, &result) {
                (Some(false), Ok(value)) => {
                    let owners = inner
                        .slots
                        .remove(key)
                        .map(|slot| slot.owners().clone())
                        .unwrap_or_default();
                    inner.slots.insert(
                        key.clone(),
                        Slot::Ready(Ready {
                            value: Arc::clone(value),
                            built_at_ms,
                            owners,
                        }),
                    );
                }
                (Some(_), _) => {
                    inner.slots.remove(key);
                }
                (None, _) => {}
            }
        }
        flight.finish(result);
    }

    fn evict_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&ScopeKey, &BTreeSet<OwnerId>) -> bool,
    {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let mut evicted = 0usize;
        inner.slots.retain(|key, slot| {
            if !predicate(key, slot.owners()) {
                return true;
            }
            if matches!(slot, Slot::InFlight(in_flight) if in_flight.stale) {
                return true;
            }
            evicted += 1;
            match slot {
                Slot::Ready(_) => false,
                Slot::InFlight(in_flight) => {
                    in_flight.stale = true;
                    true
                }
            }
        });
        inner.stats.evictions += evicted as u64;
        evicted
    }

    pub fn invalidate(&self, key: &ScopeKey) -> usize {
        self.evict_where(|candidate, _| candidate == key)
    }

    pub fn invalidate_all(&self) -> usize {
        self.evict_where(|_, _| true)
    }

    /// Evicts every entry whose owner set contains `owner`, plus every
    /// global entry (a first public record can add an owner to global).
    pub fn invalidate_owner(&self, owner: OwnerId) -> usize {
        self.evict_where(|key, owners| key.is_global() || owners.contains(&owner))
    }

    /// Drops ready entries past their TTL.
    pub fn purge_expired(&self) -> usize {
        let now_ms = self.clock.now_ms();
        let mut inner = self.lock();
        let before = inner.slots.len();
        inner.slots.retain(|_, slot| match slot {
            Slot::Ready(ready) => self.is_fresh(ready.built_at_ms, now_ms),
            Slot::InFlight(_) => true,
        });
        let purged = before - inner.slots.len();
        inner.stats.evictions += purged as u64;
        purged
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let mut stats = inner.stats;
        stats.entries = 0;
        stats.in_flight = 0;
        for slot in inner.slots.values() {
            match slot {
                Slot::Ready(_) => stats.entries += 1,
                Slot::InFlight(_) => stats.in_flight += 1,
            }
        }
        stats
    }
}

impl<T: Send + Sync> ChangeListener for TreeCache<T> {
    fn record_changed(&self, change: &RecordChange) {
        let evicted = self.invalidate_owner(change.owner_id);
        debug!(
            owner_id = %change.owner_id,
            seq = change.seq,
            evicted,
            "record change invalidated cache entries"
        );
    }
}
