#![forbid(unsafe_code)]

use std::sync::Arc;
use tt_core::clock::Clock;
use tt_core::scope::ScopeError;
use tt_core::source::{ChangeFeed, FriendDirectory, RecordSource};
use tt_core::{
    CacheConfig, CacheError, LaidOutTree, OwnerId, ResolvedScope, ScopeMode, ScopeResolver,
    TreeCache, TreePipeline,
};

/// Everything the server reads from: records, friendships, the change log.
pub trait TreeBackend: RecordSource + FriendDirectory + ChangeFeed {}

impl<T: RecordSource + FriendDirectory + ChangeFeed> TreeBackend for T {}

/// Who is asking and which scope they want, as parsed from a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeRequest {
    pub viewer: Option<OwnerId>,
    pub mode: ScopeMode,
    pub selected: Vec<OwnerId>,
}

pub struct TreeService<B> {
    backend: Arc<B>,
    cache: Arc<TreeCache>,
    pipeline: TreePipeline,
    clock: Arc<dyn Clock>,
}

impl<B: TreeBackend> TreeService<B> {
    pub fn new(
        backend: Arc<B>,
        pipeline: TreePipeline,
        cache: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            cache: Arc::new(TreeCache::new(cache, Arc::clone(&clock))),
            pipeline,
            clock,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn cache(&self) -> &Arc<TreeCache> {
        &self.cache
    }

    pub fn pipeline(&self) -> &TreePipeline {
        &self.pipeline
    }

    pub fn resolve(&self, request: &ScopeRequest) -> Result<ResolvedScope, ScopeError> {
        let backend = &*self.backend;
        ScopeResolver::new(backend, backend).resolve(request.viewer, request.mode, &request.selected)
    }

    /// Cached tree for `scope`; concurrent misses share one build.
    pub fn tree(&self, scope: &ResolvedScope) -> Result<Arc<LaidOutTree>, CacheError> {
        self.cache.get_or_build(&scope.key, &scope.owners, || {
            self.pipeline
                .build(scope, &*self.backend, self.clock.now_ms())
                .map_err(CacheError::from)
        })
    }
}
