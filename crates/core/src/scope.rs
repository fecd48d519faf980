#![forbid(unsafe_code)]

use crate::ids::OwnerId;
use crate::source::{FriendDirectory, RecordFilter, RecordSource, SourceError};
use crate::tree::CaptureContext;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScopeMode {
    Personal,
    Friends,
    Selected,
    Global,
}

impl ScopeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeMode::Personal => "personal",
            ScopeMode::Friends => "friends",
            ScopeMode::Selected => "selected",
            ScopeMode::Global => "global",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ScopeError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "personal" => Ok(ScopeMode::Personal),
            "friends" => Ok(ScopeMode::Friends),
            "selected" => Ok(ScopeMode::Selected),
            "global" => Ok(ScopeMode::Global),
            _ => Err(ScopeError::InvalidMode(value.trim().to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("unknown scope mode: {0:?}")]
    InvalidMode(String),
    #[error("scope mode {0} requires a viewer")]
    ViewerRequired(&'static str),
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Canonical cache key of a resolved scope.
///
/// Non-global keys name the viewer and the other owners that take part, not
/// the requested mode, so `friends` and a `selected` list covering the same
/// friends share one entry. A scope holding only the viewer is `personal`
/// whatever mode asked for it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub fn global() -> Self {
        Self("global".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_global(&self) -> bool {
        self.0 == "global"
    }

    /// `others` are owners besides the viewer; their records are admitted at
    /// friends visibility.
    fn for_owners(viewer: OwnerId, owners: &BTreeSet<OwnerId>) -> Self {
        let others = owners
            .iter()
            .filter(|id| **id != viewer)
            .map(|id| id.to_string())
            .collect::<Vec<_>>();
        if others.is_empty() {
            Self(format!("personal:{viewer}"))
        } else {
            Self(format!("friends:{viewer}:{}", others.join(",")))
        }
    }

    /// Accepts only keys this module could have produced, after sorting and
    /// deduplicating the owner list.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value == "global" {
            return Some(Self::global());
        }
        let mut parts = value.splitn(3, ':');
        let class = parts.next()?;
        let viewer = OwnerId::parse(parts.next()?).ok()?;
        match (class, parts.next()) {
            ("personal", None) => Some(Self::for_owners(viewer, &BTreeSet::from([viewer]))),
            ("friends", Some(csv)) => {
                let mut owners = crate::ids::parse_owner_csv(csv)
                    .ok()?
                    .into_iter()
                    .collect::<BTreeSet<_>>();
                if owners.is_empty() || owners.contains(&viewer) {
                    return None;
                }
                owners.insert(viewer);
                Some(Self::for_owners(viewer, &owners))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedScope {
    pub mode: ScopeMode,
    pub viewer: Option<OwnerId>,
    /// Owners whose records participate in the build.
    pub owners: BTreeSet<OwnerId>,
    /// The viewer's full friend set (empty without a viewer).
    pub friends: BTreeSet<OwnerId>,
    /// Selected ids that survived the friend check (selected mode only).
    pub selected: BTreeSet<OwnerId>,
    pub key: ScopeKey,
}

impl ResolvedScope {
    pub fn record_filter(&self) -> RecordFilter {
        let viewer = match self.mode {
            ScopeMode::Global => None,
            _ => self.viewer,
        };
        // With only the viewer in scope every record is admitted as their own,
        // so the visibility class cannot change the result.
        let only_viewer = viewer.is_some_and(|viewer| self.owners == BTreeSet::from([viewer]));
        RecordFilter {
            owners: self.owners.clone(),
            viewer,
            include_friends_visibility: !only_viewer
                && matches!(self.mode, ScopeMode::Friends | ScopeMode::Selected),
        }
    }

    /// Capture flags as the requesting viewer should see them.
    pub fn capture_context(&self) -> CaptureContext {
        CaptureContext {
            viewer: self.viewer,
            friends: self.friends.clone(),
        }
    }
}

pub struct ScopeResolver<'a> {
    friends: &'a dyn FriendDirectory,
    records: &'a dyn RecordSource,
}

impl<'a> ScopeResolver<'a> {
    pub fn new(friends: &'a dyn FriendDirectory, records: &'a dyn RecordSource) -> Self {
        Self { friends, records }
    }

    pub fn resolve(
        &self,
        viewer: Option<OwnerId>,
        mode: ScopeMode,
        selected_ids: &[OwnerId],
    ) -> Result<ResolvedScope, ScopeError> {
        if mode == ScopeMode::Global {
            let owners = self.records.public_owner_ids()?;
            let friends = match viewer {
                Some(viewer) => self.friends.friend_ids(viewer)?,
                None => BTreeSet::new(),
            };
            return Ok(ResolvedScope {
                mode,
                viewer,
                owners,
                friends,
                selected: BTreeSet::new(),
                key: ScopeKey::global(),
            });
        }

        let viewer = viewer.ok_or(ScopeError::ViewerRequired(mode.as_str()))?;
        let friends = match mode {
            ScopeMode::Personal => BTreeSet::new(),
            _ => self.friends.friend_ids(viewer)?,
        };
        let mut owners = BTreeSet::from([viewer]);
        let mut selected = BTreeSet::new();
        match mode {
            ScopeMode::Personal | ScopeMode::Global => {}
            ScopeMode::Friends => owners.extend(friends.iter().copied()),
            ScopeMode::Selected => {
                for id in selected_ids {
                    if friends.contains(id) {
                        selected.insert(*id);
                    } else if *id != viewer {
                        debug!(viewer = %viewer, dropped = %id, "selected id is not a friend");
                    }
                }
                owners.extend(selected.iter().copied());
            }
        }

        let key = ScopeKey::for_owners(viewer, &owners);
        Ok(ResolvedScope {
            mode,
            viewer: Some(viewer),
            owners,
            friends,
            selected,
            key,
        })
    }
}
