#![forbid(unsafe_code)]

//! In-process record source and friend directory, used by tests and by
//! callers that already hold materialized records.

use crate::ids::OwnerId;
use crate::source::{
    ChangeFeed, FriendDirectory, RecordChange, RecordFilter, RecordSource, SourceError,
};
use crate::taxon::{TaxonChain, Visibility};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    records: Vec<TaxonChain>,
    friendships: BTreeMap<OwnerId, BTreeSet<OwnerId>>,
    changes: Vec<RecordChange>,
    next_seq: i64,
    unavailable: bool,
}

#[derive(Default)]
pub struct MemorySource {
    state: Mutex<MemoryState>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, chain: TaxonChain) {
        let mut state = self.lock();
        let owner_id = chain.owner_id;
        let ts_ms = chain.updated_at_ms;
        state.records.retain(|existing| existing.record_id != chain.record_id);
        state.records.push(chain);
        state.next_seq += 1;
        let seq = state.next_seq;
        state.changes.push(RecordChange {
            seq,
            owner_id,
            ts_ms,
        });
    }

    pub fn remove(&self, record_id: &str, ts_ms: i64) -> bool {
        let mut state = self.lock();
        let Some(pos) = state
            .records
            .iter()
            .position(|existing| existing.record_id == record_id)
        else {
            return false;
        };
        let removed = state.records.remove(pos);
        state.next_seq += 1;
        let seq = state.next_seq;
        state.changes.push(RecordChange {
            seq,
            owner_id: removed.owner_id,
            ts_ms,
        });
        true
    }

    /// Friendship is symmetric.
    pub fn befriend(&self, a: OwnerId, b: OwnerId) {
        let mut state = self.lock();
        state.friendships.entry(a).or_default().insert(b);
        state.friendships.entry(b).or_default().insert(a);
    }

    /// Simulates an outage: every read fails until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    fn ensure_available(state: &MemoryState) -> Result<(), SourceError> {
        if state.unavailable {
            return Err(SourceError::Unavailable("memory source offline".to_string()));
        }
        Ok(())
    }
}

impl RecordSource for MemorySource {
    fn fetch_chains(&self, filter: &RecordFilter) -> Result<Vec<TaxonChain>, SourceError> {
        let state = self.lock();
        Self::ensure_available(&state)?;
        Ok(state
            .records
            .iter()
            .filter(|chain| filter.admits(chain))
            .cloned()
            .collect())
    }

    fn public_owner_ids(&self) -> Result<BTreeSet<OwnerId>, SourceError> {
        let state = self.lock();
        Self::ensure_available(&state)?;
        Ok(state
            .records
            .iter()
            .filter(|chain| chain.visibility == Visibility::Public)
            .map(|chain| chain.owner_id)
            .collect())
    }
}

impl FriendDirectory for MemorySource {
    fn friend_ids(&self, viewer: OwnerId) -> Result<BTreeSet<OwnerId>, SourceError> {
        let state = self.lock();
        Self::ensure_available(&state)?;
        Ok(state.friendships.get(&viewer).cloned().unwrap_or_default())
    }
}

impl ChangeFeed for MemorySource {
    fn changes_since(&self, cursor: i64, limit: usize) -> Result<Vec<RecordChange>, SourceError> {
        let state = self.lock();
        Self::ensure_available(&state)?;
        Ok(state
            .changes
            .iter()
            .filter(|change| change.seq > cursor)
            .take(limit)
            .copied()
            .collect())
    }

    fn latest_seq(&self) -> Result<i64, SourceError> {
        let state = self.lock();
        Self::ensure_available(&state)?;
        Ok(state.next_seq)
    }
}
