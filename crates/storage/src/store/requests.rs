#![forbid(unsafe_code)]

use tt_core::{OwnerId, Rank, Visibility};

/// One observation to insert or replace, keyed by `record_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservationWrite {
    pub record_id: String,
    pub owner_id: OwnerId,
    pub visibility: Visibility,
    pub updated_at_ms: i64,
    pub scientific_name: Option<String>,
    pub ranks: Vec<(Rank, String)>,
}

impl ObservationWrite {
    /// Name for `rank`, first occurrence wins.
    pub(super) fn name_at(&self, rank: Rank) -> Option<&str> {
        self.ranks
            .iter()
            .find(|(candidate, name)| *candidate == rank && !name.trim().is_empty())
            .map(|(_, name)| name.trim())
    }
}
