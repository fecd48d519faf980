#![forbid(unsafe_code)]

//! Taxonomic tree engine: scope resolution, hierarchy construction, tidy
//! layout, spatial chunking and a single-flight cache of laid-out trees.
//!
//! Nothing in this crate performs I/O. Records, friendships and change
//! notifications arrive through the traits in [`source`].

pub mod cache;
pub mod chunk;
pub mod clock;
pub mod ids;
pub mod layout;
pub mod memory;
pub mod pipeline;
pub mod scope;
pub mod search;
pub mod source;
pub mod taxon;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{CacheConfig, CacheError, CacheStats, TreeCache};
pub use ids::{NodeId, OwnerId};
pub use pipeline::{LaidOutTree, PipelineError, TreePipeline};
pub use scope::{ResolvedScope, ScopeKey, ScopeMode, ScopeResolver};
pub use taxon::{Rank, TaxonChain, Visibility};
