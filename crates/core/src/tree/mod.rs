#![forbid(unsafe_code)]

mod build;
mod validate;

pub use build::{HierarchyBuilder, build_hierarchy};

use crate::ids::{NodeId, OwnerId};
use crate::taxon::Rank;
use std::collections::{BTreeMap, BTreeSet};

pub const ROOT_DISPLAY_NAME: &str = "Life";

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("tree invariant violated: {0}")]
    Invariant(String),
}

/// Who is looking at the tree, for the per-leaf capture flags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureContext {
    pub viewer: Option<OwnerId>,
    pub friends: BTreeSet<OwnerId>,
}

impl CaptureContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_viewer(&self, owner: OwnerId) -> bool {
        self.viewer == Some(owner)
    }

    pub fn is_friend(&self, owner: OwnerId) -> bool {
        !self.is_viewer(owner) && self.friends.contains(&owner)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaxonomicNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub rank: Rank,
    pub display_name: String,
    pub depth: u32,
    pub children_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnimalNode {
    pub id: NodeId,
    pub parent: NodeId,
    pub depth: u32,
    pub scientific_name: String,
    pub owner_id: OwnerId,
    pub capture_count: usize,
    pub record_ids: BTreeSet<String>,
    pub last_updated_at_ms: i64,
}

impl AnimalNode {
    /// Capture flags as seen by `ctx`. Leaves carry no viewer state, so one
    /// cached tree serves every viewer of its scope.
    pub fn flags_for(&self, ctx: &CaptureContext) -> (bool, BTreeSet<OwnerId>) {
        let by_viewer = ctx.is_viewer(self.owner_id);
        let mut friends = BTreeSet::new();
        if ctx.is_friend(self.owner_id) {
            friends.insert(self.owner_id);
        }
        (by_viewer, friends)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeNode {
    Taxonomic(TaxonomicNode),
    Animal(AnimalNode),
}

impl TreeNode {
    pub fn id(&self) -> &NodeId {
        match self {
            TreeNode::Taxonomic(node) => &node.id,
            TreeNode::Animal(node) => &node.id,
        }
    }

    pub fn parent(&self) -> Option<&NodeId> {
        match self {
            TreeNode::Taxonomic(node) => node.parent.as_ref(),
            TreeNode::Animal(node) => Some(&node.parent),
        }
    }

    pub fn depth(&self) -> u32 {
        match self {
            TreeNode::Taxonomic(node) => node.depth,
            TreeNode::Animal(node) => node.depth,
        }
    }

    pub fn node_type(&self) -> &'static str {
        match self {
            TreeNode::Taxonomic(_) => "taxonomic",
            TreeNode::Animal(_) => "animal",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TreeNode::Taxonomic(node) => &node.display_name,
            TreeNode::Animal(node) => &node.scientific_name,
        }
    }

    /// Animal leaves report the rank of the taxon they hang under.
    pub fn rank(&self, hierarchy: &Hierarchy) -> Rank {
        match self {
            TreeNode::Taxonomic(node) => node.rank,
            TreeNode::Animal(node) => match hierarchy.node(&node.parent) {
                Some(TreeNode::Taxonomic(parent)) => parent.rank,
                _ => Rank::Root,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HierarchyStats {
    pub taxa: usize,
    pub animals: usize,
    pub edges: usize,
    pub max_depth: u32,
    pub skipped_records: usize,
}

/// Deduplicated taxonomy tree for one scope. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hierarchy {
    root: NodeId,
    nodes: BTreeMap<NodeId, TreeNode>,
    edges: Vec<Edge>,
    children: BTreeMap<NodeId, Vec<NodeId>>,
    skipped_records: usize,
}

impl Hierarchy {
    pub fn root(&self) -> &NodeId {
        &self.root
    }

    pub fn nodes(&self) -> &BTreeMap<NodeId, TreeNode> {
        &self.nodes
    }

    pub fn node(&self, id: &NodeId) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    /// Edges sorted by `(source, target)`.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Direct children sorted by id.
    pub fn children(&self, id: &NodeId) -> &[NodeId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> HierarchyStats {
        let mut stats = HierarchyStats {
            edges: self.edges.len(),
            skipped_records: self.skipped_records,
            ..HierarchyStats::default()
        };
        for node in self.nodes.values() {
            match node {
                TreeNode::Taxonomic(_) => stats.taxa += 1,
                TreeNode::Animal(_) => stats.animals += 1,
            }
            stats.max_depth = stats.max_depth.max(node.depth());
        }
        stats
    }
}
