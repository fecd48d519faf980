#![forbid(unsafe_code)]

//! JSON shapes for nodes, edges and chunks.

use crate::clock::now_rfc3339;
use serde_json::{Value, json};
use tt_core::chunk::ChunkView;
use tt_core::layout::Point;
use tt_core::search::SearchHit;
use tt_core::tree::{CaptureContext, Edge, TreeNode};
use tt_core::{LaidOutTree, NodeId};

fn point_json(point: Point) -> Value {
    json!([point.x, point.y])
}

pub(crate) fn node_json(tree: &LaidOutTree, id: &NodeId, ctx: &CaptureContext) -> Option<Value> {
    let node = tree.hierarchy.node(id)?;
    let position = tree.positions.get(id).map(point_json).unwrap_or(Value::Null);
    let rank = node.rank(&tree.hierarchy).as_str();
    Some(match node {
        TreeNode::Taxonomic(taxon) => json!({
            "id": taxon.id.as_str(),
            "node_type": node.node_type(),
            "rank": rank,
            "name": taxon.display_name,
            "position": position,
            "depth": taxon.depth,
            "parent": taxon.parent.as_ref().map(NodeId::as_str),
            "children_count": taxon.children_count,
        }),
        TreeNode::Animal(animal) => {
            let (by_viewer, friend_ids) = animal.flags_for(ctx);
            json!({
                "id": animal.id.as_str(),
                "node_type": node.node_type(),
                "rank": rank,
                "scientific_name": animal.scientific_name,
                "position": position,
                "depth": animal.depth,
                "parent": animal.parent.as_str(),
                "owner_id": animal.owner_id.get(),
                "captured_by_viewer": by_viewer,
                "captured_by_friend_ids": friend_ids.iter().map(|id| id.get()).collect::<Vec<_>>(),
                "capture_count": animal.capture_count,
                "last_updated_at_ms": animal.last_updated_at_ms,
            })
        }
    })
}

pub(crate) fn edge_json(edge: &Edge) -> Value {
    json!({
        "source": edge.source.as_str(),
        "target": edge.target.as_str(),
    })
}

pub(crate) fn chunk_json(tree: &LaidOutTree, view: &ChunkView<'_>, ctx: &CaptureContext) -> Value {
    json!({
        "cx": view.key.cx,
        "cy": view.key.cy,
        "nodes": view
            .nodes
            .iter()
            .filter_map(|id| node_json(tree, id, ctx))
            .collect::<Vec<_>>(),
        "edges": view.edges.iter().map(edge_json).collect::<Vec<_>>(),
    })
}

pub(crate) fn tree_json(tree: &LaidOutTree, ctx: &CaptureContext) -> Value {
    let stats = tree.hierarchy.stats();
    let bounds = tree.bounds();
    let chunk_bounds = tree.chunks.grid_bounds().map(|(min, max)| {
        json!({
            "min": [min.cx, min.cy],
            "max": [max.cx, max.cy],
        })
    });
    json!({
        "scope": tree.key.as_str(),
        "generated_at": now_rfc3339(),
        "built_at_ms": tree.built_at_ms,
        "root": tree.hierarchy.root().as_str(),
        "nodes": tree
            .hierarchy
            .nodes()
            .keys()
            .filter_map(|id| node_json(tree, id, ctx))
            .collect::<Vec<_>>(),
        "edges": tree.hierarchy.edges().iter().map(edge_json).collect::<Vec<_>>(),
        "chunk_size": tree.chunks.cell_size(),
        "bounds": {
            "min": point_json(bounds.min),
            "max": point_json(bounds.max),
        },
        "chunk_bounds": chunk_bounds,
        "stats": {
            "taxa": stats.taxa,
            "animals": stats.animals,
            "edges": stats.edges,
            "max_depth": stats.max_depth,
            "skipped_records": stats.skipped_records,
            "chunks": tree.chunks.len(),
        },
    })
}

pub(crate) fn search_hit_json(tree: &LaidOutTree, hit: &SearchHit) -> Option<Value> {
    let node = tree.hierarchy.node(&hit.id)?;
    Some(json!({
        "id": hit.id.as_str(),
        "node_type": node.node_type(),
        "name": node.name(),
        "rank": node.rank(&tree.hierarchy).as_str(),
        "position": tree.positions.get(&hit.id).map(point_json).unwrap_or(Value::Null),
        "match": hit.kind.as_str(),
    }))
}
