#![forbid(unsafe_code)]

use super::{BuildError, Hierarchy, TreeNode};
use crate::ids::NodeId;
use crate::taxon::Rank;
use std::collections::{BTreeMap, VecDeque};

impl Hierarchy {
    /// Checks that the edge set is a tree rooted at `root`: one node without a
    /// parent edge, every other node with exactly one, and every node
    /// reachable from the root.
    pub fn validate(&self) -> Result<(), BuildError> {
        let root_ok = matches!(
            self.nodes.get(&self.root),
            Some(TreeNode::Taxonomic(root)) if root.rank == Rank::Root && root.parent.is_none()
        );
        if !root_ok {
            return Err(BuildError::Invariant(
                "root node is missing or malformed".to_string(),
            ));
        }

        let mut in_degree: BTreeMap<&NodeId, usize> = BTreeMap::new();
        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.source) {
                return Err(BuildError::Invariant(format!(
                    "edge source {} is not a node",
                    edge.source
                )));
            }
            let Some(target) = self.nodes.get(&edge.target) else {
                return Err(BuildError::Invariant(format!(
                    "edge target {} is not a node",
                    edge.target
                )));
            };
            if target.parent() != Some(&edge.source) {
                return Err(BuildError::Invariant(format!(
                    "edge {} -> {} disagrees with the node's parent",
                    edge.source, edge.target
                )));
            }
            *in_degree.entry(&edge.target).or_default() += 1;
        }

        for id in self.nodes.keys() {
            let degree = in_degree.get(id).copied().unwrap_or(0);
            let expected = usize::from(*id != self.root);
            if degree != expected {
                return Err(BuildError::Invariant(format!(
                    "node {id} has {degree} parent edges, expected {expected}"
                )));
            }
        }

        let mut seen = 0usize;
        let mut queue = VecDeque::from([&self.root]);
        while let Some(id) = queue.pop_front() {
            seen += 1;
            if seen > self.nodes.len() {
                return Err(BuildError::Invariant("cycle detected".to_string()));
            }
            queue.extend(self.children(id));
        }
        if seen != self.nodes.len() {
            return Err(BuildError::Invariant(format!(
                "{} nodes unreachable from the root",
                self.nodes.len() - seen
            )));
        }
        Ok(())
    }
}
