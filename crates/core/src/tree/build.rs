#![forbid(unsafe_code)]

use super::{
    AnimalNode, BuildError, Edge, Hierarchy, ROOT_DISPLAY_NAME, TaxonomicNode, TreeNode,
};
use crate::ids::NodeId;
use crate::taxon::{Rank, TaxonChain};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use tracing::debug;

const ROOT_PATH: &str = "root";

/// Appends one `rank=len:name/` segment. Length-prefixing the name keeps the
/// encoding unambiguous whatever characters the name contains.
fn push_path_segment(path: &mut String, rank: Rank, name: &str) {
    let _ = write!(path, "{}={}:{}/", rank.as_str(), name.len(), name);
}

fn animal_id(parent: &NodeId, chain: &TaxonChain) -> NodeId {
    let input = format!("animal|{parent}|owner:{}", chain.owner_id);
    NodeId::from_digest_input(input.as_bytes())
}

pub fn root_id() -> NodeId {
    NodeId::from_digest_input(ROOT_PATH.as_bytes())
}

/// Folds taxon chains into one deduplicated tree.
///
/// Node identity is the hash of the full ancestor path, so the result depends
/// only on the set of chains pushed, never on their order.
pub struct HierarchyBuilder {
    root: NodeId,
    nodes: BTreeMap<NodeId, TreeNode>,
    edges: BTreeSet<Edge>,
    skipped: usize,
}

impl HierarchyBuilder {
    pub fn new() -> Self {
        let root = root_id();
        let mut nodes = BTreeMap::new();
        nodes.insert(
            root.clone(),
            TreeNode::Taxonomic(TaxonomicNode {
                id: root.clone(),
                parent: None,
                rank: Rank::Root,
                display_name: ROOT_DISPLAY_NAME.to_string(),
                depth: 0,
                children_count: 0,
            }),
        );
        Self {
            root,
            nodes,
            edges: BTreeSet::new(),
            skipped: 0,
        }
    }

    pub fn push(&mut self, chain: &TaxonChain) -> Result<(), BuildError> {
        if chain.is_empty() {
            self.skipped += 1;
            debug!(record_id = %chain.record_id, "skipping record without any resolved rank");
            return Ok(());
        }

        let mut path = String::from(ROOT_PATH);
        path.push('/');
        let mut parent = self.root.clone();
        let mut depth = 0u32;
        for (rank, name) in chain.ranks() {
            push_path_segment(&mut path, *rank, name);
            depth += 1;
            let id = NodeId::from_digest_input(path.as_bytes());
            match self.nodes.get(&id) {
                Some(TreeNode::Taxonomic(existing)) => {
                    if existing.rank != *rank
                        || existing.display_name != *name
                        || existing.parent.as_ref() != Some(&parent)
                    {
                        return Err(BuildError::Invariant(format!(
                            "node {id} reached as {}={name} but stored as {}={}",
                            rank.as_str(),
                            existing.rank.as_str(),
                            existing.display_name
                        )));
                    }
                }
                Some(TreeNode::Animal(_)) => {
                    return Err(BuildError::Invariant(format!(
                        "taxon path collides with animal leaf {id}"
                    )));
                }
                None => {
                    self.nodes.insert(
                        id.clone(),
                        TreeNode::Taxonomic(TaxonomicNode {
                            id: id.clone(),
                            parent: Some(parent.clone()),
                            rank: *rank,
                            display_name: name.clone(),
                            depth,
                            children_count: 0,
                        }),
                    );
                    self.edges.insert(Edge {
                        source: parent.clone(),
                        target: id.clone(),
                    });
                }
            }
            parent = id;
        }

        self.merge_animal(parent, depth + 1, chain)
    }

    fn merge_animal(
        &mut self,
        parent: NodeId,
        depth: u32,
        chain: &TaxonChain,
    ) -> Result<(), BuildError> {
        let id = animal_id(&parent, chain);
        let scientific_name = chain
            .display_scientific_name()
            .unwrap_or_else(|| ROOT_DISPLAY_NAME.to_string());
        match self.nodes.get_mut(&id) {
            Some(TreeNode::Animal(existing)) => {
                if existing.parent != parent || existing.owner_id != chain.owner_id {
                    return Err(BuildError::Invariant(format!(
                        "animal leaf {id} reached from a different taxon or owner"
                    )));
                }
                existing.record_ids.insert(chain.record_id.clone());
                existing.capture_count = existing.record_ids.len();
                existing.last_updated_at_ms = existing.last_updated_at_ms.max(chain.updated_at_ms);
                if scientific_name < existing.scientific_name {
                    existing.scientific_name = scientific_name;
                }
            }
            Some(TreeNode::Taxonomic(_)) => {
                return Err(BuildError::Invariant(format!(
                    "animal leaf collides with taxon node {id}"
                )));
            }
            None => {
                self.nodes.insert(
                    id.clone(),
                    TreeNode::Animal(AnimalNode {
                        id: id.clone(),
                        parent: parent.clone(),
                        depth,
                        scientific_name,
                        owner_id: chain.owner_id,
                        capture_count: 1,
                        record_ids: BTreeSet::from([chain.record_id.clone()]),
                        last_updated_at_ms: chain.updated_at_ms,
                    }),
                );
                self.edges.insert(Edge {
                    source: parent,
                    target: id,
                });
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Result<Hierarchy, BuildError> {
        let Self {
            root,
            mut nodes,
            edges,
            skipped,
        } = self;

        let mut children: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for edge in &edges {
            children
                .entry(edge.source.clone())
                .or_default()
                .push(edge.target.clone());
        }
        for (id, kids) in &children {
            match nodes.get_mut(id) {
                Some(TreeNode::Taxonomic(node)) => node.children_count = kids.len(),
                Some(TreeNode::Animal(_)) => {
                    return Err(BuildError::Invariant(format!(
                        "animal leaf {id} has children"
                    )));
                }
                None => {
                    return Err(BuildError::Invariant(format!(
                        "edge source {id} is not a node"
                    )));
                }
            }
        }

        let hierarchy = Hierarchy {
            root,
            nodes,
            edges: edges.into_iter().collect(),
            children,
            skipped_records: skipped,
        };
        hierarchy.validate()?;
        Ok(hierarchy)
    }
}

impl Default for HierarchyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build_hierarchy(records: &[TaxonChain]) -> Result<Hierarchy, BuildError> {
    let mut builder = HierarchyBuilder::new();
    for chain in records {
        builder.push(chain)?;
    }
    let hierarchy = builder.finish()?;
    let stats = hierarchy.stats();
    debug!(
        records = records.len(),
        taxa = stats.taxa,
        animals = stats.animals,
        skipped = stats.skipped_records,
        "hierarchy built"
    );
    Ok(hierarchy)
}
