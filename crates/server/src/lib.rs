#![forbid(unsafe_code)]

//! HTTP/JSON front end for the taxonomy tree engine: scope resolution per
//! request, a shared single-flight tree cache, and a change-log watcher that
//! keeps the cache honest.

mod clock;
pub mod config;
mod error;
mod http;
mod render;
mod routes;
mod server;
mod service;
mod watcher;

pub use clock::SystemClock;
pub use config::{Cli, ConfigError, ServerConfig};
pub use server::Server;
pub use service::{ScopeRequest, TreeBackend, TreeService};
pub use watcher::{drain_changes, spawn_change_watcher};

use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::info;
use tt_storage::{SqliteStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens the store, starts the change watcher and serves until the accept loop stops.
pub fn run(config: ServerConfig) -> Result<(), ServerError> {
    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    info!(db = %config.db_path.display(), "observation store opened");

    let service = Arc::new(TreeService::new(
        Arc::clone(&store),
        config.pipeline,
        config.cache,
        Arc::new(SystemClock),
    ));
    let server = Server::bind(config.addr, Arc::clone(&service), config.workers)?;
    let shutdown = server.shutdown_flag();
    let watcher = spawn_change_watcher(
        store,
        Arc::clone(service.cache()),
        config.change_poll,
        Arc::clone(&shutdown),
    )?;

    let served = server.run();
    shutdown.store(true, Ordering::Relaxed);
    if watcher.join().is_err() {
        tracing::warn!("change watcher panicked");
    }
    served.map_err(ServerError::from)
}
