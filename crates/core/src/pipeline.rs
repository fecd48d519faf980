#![forbid(unsafe_code)]

//! One full build: fetch chains for a resolved scope, then hierarchy, layout
//! and chunk index.

use crate::chunk::{ChunkError, ChunkIndex, DEFAULT_CELL_SIZE};
use crate::ids::OwnerId;
use crate::layout::{Bounds, LayoutConfig, LayoutError, Positions, layout};
use crate::scope::{ResolvedScope, ScopeKey};
use crate::source::{RecordSource, SourceError};
use crate::tree::{BuildError, Hierarchy, build_hierarchy};
use std::collections::BTreeSet;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

/// Immutable result of one build, shared by every reader of a cache entry.
#[derive(Debug)]
pub struct LaidOutTree {
    pub key: ScopeKey,
    pub hierarchy: Hierarchy,
    pub positions: Positions,
    pub chunks: ChunkIndex,
    pub built_at_ms: i64,
    pub owners: BTreeSet<OwnerId>,
}

impl LaidOutTree {
    pub fn bounds(&self) -> Bounds {
        self.positions.bounds()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TreePipeline {
    layout: LayoutConfig,
    cell_size: f64,
}

impl Default for TreePipeline {
    fn default() -> Self {
        Self {
            layout: LayoutConfig::default(),
            cell_size: DEFAULT_CELL_SIZE,
        }
    }
}

impl TreePipeline {
    pub fn new(layout: LayoutConfig, cell_size: f64) -> Result<Self, PipelineError> {
        layout.validate()?;
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(ChunkError::InvalidCellSize(cell_size).into());
        }
        Ok(Self { layout, cell_size })
    }

    pub fn layout_config(&self) -> &LayoutConfig {
        &self.layout
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn build(
        &self,
        scope: &ResolvedScope,
        source: &dyn RecordSource,
        now_ms: i64,
    ) -> Result<LaidOutTree, PipelineError> {
        let filter = scope.record_filter();
        let mut chains = source.fetch_chains(&filter)?;
        // The filter is authoritative even if a source over-fetches.
        chains.retain(|chain| filter.admits(chain));

        let hierarchy = build_hierarchy(&chains)?;
        let positions = layout(&hierarchy, &self.layout)?;
        let chunks = ChunkIndex::build(&hierarchy, &positions, self.cell_size)?;

        let stats = hierarchy.stats();
        info!(
            scope = %scope.key,
            records = chains.len(),
            nodes = hierarchy.len(),
            animals = stats.animals,
            chunks = chunks.len(),
            "tree built"
        );
        Ok(LaidOutTree {
            key: scope.key.clone(),
            hierarchy,
            positions,
            chunks,
            built_at_ms: now_ms,
            owners: scope.owners.clone(),
        })
    }
}
