#![forbid(unsafe_code)]

//! Spatial bucketing of a laid-out tree into fixed-size grid cells.

use crate::ids::NodeId;
use crate::layout::{Point, Positions};
use crate::tree::{Edge, Hierarchy};
use std::collections::BTreeMap;

pub const DEFAULT_CELL_SIZE: f64 = 2048.0;

/// Upper bound on the number of cells a single window request may cover.
pub const MAX_WINDOW_CELLS: u64 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk cell size must be finite and positive, got {0}")]
    InvalidCellSize(f64),
    #[error("node {0} has no position")]
    MissingPosition(NodeId),
    #[error("window of {0} cells exceeds the limit of {MAX_WINDOW_CELLS}")]
    WindowTooLarge(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    pub cx: i64,
    pub cy: i64,
}

impl CellKey {
    pub fn containing(point: Point, cell_size: f64) -> Self {
        Self {
            cx: (point.x / cell_size).floor() as i64,
            cy: (point.y / cell_size).floor() as i64,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Chunk {
    pub nodes: Vec<NodeId>,
    /// Edges whose source node lies in this cell.
    pub edges: Vec<Edge>,
}

/// Borrowed view of one cell. Empty for cells that hold nothing.
#[derive(Clone, Copy, Debug)]
pub struct ChunkView<'a> {
    pub key: CellKey,
    pub nodes: &'a [NodeId],
    pub edges: &'a [Edge],
}

impl ChunkView<'_> {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChunkIndex {
    cell_size: f64,
    cells: BTreeMap<CellKey, Chunk>,
}

impl ChunkIndex {
    pub fn build(
        hierarchy: &Hierarchy,
        positions: &Positions,
        cell_size: f64,
    ) -> Result<Self, ChunkError> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(ChunkError::InvalidCellSize(cell_size));
        }

        let mut cells: BTreeMap<CellKey, Chunk> = BTreeMap::new();
        let mut cell_of: BTreeMap<&NodeId, CellKey> = BTreeMap::new();
        for id in hierarchy.nodes().keys() {
            let point = positions
                .get(id)
                .ok_or_else(|| ChunkError::MissingPosition(id.clone()))?;
            let key = CellKey::containing(point, cell_size);
            cells.entry(key).or_default().nodes.push(id.clone());
            cell_of.insert(id, key);
        }
        for edge in hierarchy.edges() {
            let key = cell_of
                .get(&edge.source)
                .copied()
                .ok_or_else(|| ChunkError::MissingPosition(edge.source.clone()))?;
            cells.entry(key).or_default().edges.push(edge.clone());
        }

        Ok(Self { cell_size, cells })
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn fetch(&self, cx: i64, cy: i64) -> ChunkView<'_> {
        let key = CellKey { cx, cy };
        match self.cells.get(&key) {
            Some(chunk) => ChunkView {
                key,
                nodes: &chunk.nodes,
                edges: &chunk.edges,
            },
            None => ChunkView {
                key,
                nodes: &[],
                edges: &[],
            },
        }
    }

    /// Non-empty cells inside the inclusive rectangle `min..=max`.
    pub fn window(&self, min: CellKey, max: CellKey) -> Result<Vec<ChunkView<'_>>, ChunkError> {
        if min.cx > max.cx || min.cy > max.cy {
            return Ok(Vec::new());
        }
        let width = max.cx.abs_diff(min.cx).saturating_add(1);
        let height = max.cy.abs_diff(min.cy).saturating_add(1);
        let area = width.saturating_mul(height);
        if area > MAX_WINDOW_CELLS {
            return Err(ChunkError::WindowTooLarge(area));
        }
        Ok(self
            .cells
            .iter()
            .filter(|(key, _)| {
                (min.cx..=max.cx).contains(&key.cx) && (min.cy..=max.cy).contains(&key.cy)
            })
            .map(|(key, chunk)| ChunkView {
                key: *key,
                nodes: &chunk.nodes,
                edges: &chunk.edges,
            })
            .collect())
    }

    pub fn cells(&self) -> impl Iterator<Item = CellKey> + '_ {
        self.cells.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Smallest and largest occupied cell coordinates.
    pub fn grid_bounds(&self) -> Option<(CellKey, CellKey)> {
        let mut keys = self.cells.keys();
        let first = *keys.next()?;
        let (mut min, mut max) = (first, first);
        for key in keys {
            min.cx = min.cx.min(key.cx);
            min.cy = min.cy.min(key.cy);
            max.cx = max.cx.max(key.cx);
            max.cy = max.cy.max(key.cy);
        }
        Some((min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{LayoutConfig, layout};
    use crate::test_support::{canis_felis, synthetic_forest};
    use crate::tree::build_hierarchy;
    use std::collections::BTreeSet;

    fn indexed(cell_size: f64) -> (Hierarchy, ChunkIndex) {
        let mut records = synthetic_forest(3, 4, 6);
        records.extend(canis_felis());
        let hierarchy = build_hierarchy(&records).unwrap();
        let positions = layout(&hierarchy, &LayoutConfig::default()).unwrap();
        let index = ChunkIndex::build(&hierarchy, &positions, cell_size).unwrap();
        (hierarchy, index)
    }

    #[test]
    fn chunk_union_reconstructs_the_tree() {
        let (hierarchy, index) = indexed(512.0);
        assert!(index.len() > 1);

        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for key in index.cells() {
            let view = index.fetch(key.cx, key.cy);
            nodes.extend(view.nodes.iter().cloned());
            edges.extend(view.edges.iter().cloned());
        }
        let unique = nodes.iter().collect::<BTreeSet<_>>();
        assert_eq!(unique.len(), nodes.len(), "node listed in two chunks");
        assert_eq!(
            unique,
            hierarchy.nodes().keys().collect::<BTreeSet<_>>()
        );
        edges.sort();
        assert_eq!(edges, hierarchy.edges());
    }

    #[test]
    fn empty_and_far_cells_return_empty_views() {
        let (_, index) = indexed(DEFAULT_CELL_SIZE);
        assert!(index.fetch(-1, -1).is_empty());
        assert!(index.fetch(i64::MAX, i64::MIN).is_empty());
    }

    #[test]
    fn window_matches_individual_fetches() {
        let (_, index) = indexed(512.0);
        let (min, max) = index.grid_bounds().unwrap();
        let window = index.window(min, max).unwrap();
        assert_eq!(window.len(), index.len());
        for view in &window {
            let single = index.fetch(view.key.cx, view.key.cy);
            assert_eq!(single.nodes, view.nodes);
        }
        assert!(index.window(max, min).unwrap().is_empty() || min == max);
        assert!(matches!(
            index.window(CellKey { cx: 0, cy: 0 }, CellKey { cx: 100, cy: 100 }),
            Err(ChunkError::WindowTooLarge(_))
        ));
    }

    #[test]
    fn invalid_cell_size_is_rejected() {
        let hierarchy = build_hierarchy(&canis_felis()).unwrap();
        let positions = layout(&hierarchy, &LayoutConfig::default()).unwrap();
        for size in [0.0, -5.0, f64::INFINITY, f64::NAN] {
            assert!(matches!(
                ChunkIndex::build(&hierarchy, &positions, size),
                Err(ChunkError::InvalidCellSize(_))
            ));
        }
    }

    #[test]
    fn negative_coordinates_floor_downwards() {
        let key = CellKey::containing(Point { x: -0.5, y: 2047.9 }, 2048.0);
        assert_eq!(key, CellKey { cx: -1, cy: 0 });
    }
}
