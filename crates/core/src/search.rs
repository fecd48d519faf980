#![forbid(unsafe_code)]

use crate::ids::NodeId;
use crate::tree::Hierarchy;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 200;
pub const MAX_QUERY_CHARS: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    Exact,
    Prefix,
    Substring,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Prefix => "prefix",
            MatchKind::Substring => "substring",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchHit {
    pub id: NodeId,
    pub kind: MatchKind,
}

fn classify(needle: &str, name: &str) -> Option<MatchKind> {
    let name = name.to_lowercase();
    if name == needle {
        Some(MatchKind::Exact)
    } else if name.starts_with(needle) {
        Some(MatchKind::Prefix)
    } else if name.contains(needle) {
        Some(MatchKind::Substring)
    } else {
        None
    }
}

/// Truncates to at most `MAX_QUERY_CHARS` characters on a char boundary.
pub fn normalize_query(query: &str) -> String {
    query.trim().chars().take(MAX_QUERY_CHARS).collect()
}

/// Case-insensitive name search over taxa and animal leaves, ranked exact,
/// then prefix, then substring, ties broken by node id.
pub fn search(hierarchy: &Hierarchy, query: &str, limit: usize) -> Vec<SearchHit> {
    let needle = normalize_query(query).to_lowercase();
    if needle.is_empty() || limit == 0 {
        return Vec::new();
    }
    let mut hits = hierarchy
        .nodes()
        .values()
        .filter_map(|node| {
            classify(&needle, node.name()).map(|kind| SearchHit {
                id: node.id().clone(),
                kind,
            })
        })
        .collect::<Vec<_>>();
    hits.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(limit.min(MAX_LIMIT));
    hits
}
