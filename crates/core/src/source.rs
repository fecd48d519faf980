#![forbid(unsafe_code)]

//! Narrow interfaces to the collaborators that own records and the social graph.
//!
//! The tree engine never talks to a database directly. It asks a
//! [`RecordSource`] for an already-materialized list of chains, asks a
//! [`FriendDirectory`] who the viewer's friends are, and learns about
//! mutations through [`ChangeListener`] callbacks.

use crate::ids::OwnerId;
use crate::taxon::{TaxonChain, Visibility};
use std::collections::BTreeSet;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("record source unavailable: {0}")]
    Unavailable(String),
    #[error("record source returned malformed data: {0}")]
    Malformed(String),
}

/// Which records a build may see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordFilter {
    pub owners: BTreeSet<OwnerId>,
    /// Owner whose records are visible regardless of their visibility tag.
    pub viewer: Option<OwnerId>,
    /// When set, `friends`-visibility records of other owners are admitted.
    pub include_friends_visibility: bool,
}

impl RecordFilter {
    pub fn admits(&self, chain: &TaxonChain) -> bool {
        if !self.owners.contains(&chain.owner_id) {
            return false;
        }
        if self.viewer == Some(chain.owner_id) {
            return true;
        }
        match chain.visibility {
            Visibility::Public => true,
            Visibility::Friends => self.include_friends_visibility,
            Visibility::Private => false,
        }
    }

    /// Lowest visibility admitted for an owner that is not the viewer.
    pub fn min_foreign_visibility(&self) -> Visibility {
        if self.include_friends_visibility {
            Visibility::Friends
        } else {
            Visibility::Public
        }
    }
}

pub trait RecordSource: Send + Sync {
    fn fetch_chains(&self, filter: &RecordFilter) -> Result<Vec<TaxonChain>, SourceError>;

    fn public_owner_ids(&self) -> Result<BTreeSet<OwnerId>, SourceError>;
}

pub trait FriendDirectory: Send + Sync {
    fn friend_ids(&self, viewer: OwnerId) -> Result<BTreeSet<OwnerId>, SourceError>;
}

/// One entry of the record mutation log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordChange {
    pub seq: i64,
    pub owner_id: OwnerId,
    pub ts_ms: i64,
}

pub trait ChangeFeed: Send + Sync {
    /// Returns changes with `seq > cursor`, oldest first.
    fn changes_since(&self, cursor: i64, limit: usize) -> Result<Vec<RecordChange>, SourceError>;

    fn latest_seq(&self) -> Result<i64, SourceError>;
}

pub trait ChangeListener: Send + Sync {
    fn record_changed(&self, change: &RecordChange);
}
