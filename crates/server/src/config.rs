#![forbid(unsafe_code)]

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tt_core::chunk::DEFAULT_CELL_SIZE;
use tt_core::layout::{LayoutConfig, Orientation};
use tt_core::{CacheConfig, PipelineError, TreePipeline};

const MAX_WORKERS: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("workers must be between 1 and {MAX_WORKERS}, got {0}")]
    Workers(usize),
    #[error("change poll interval must be positive")]
    ChangePoll,
    #[error("invalid layout settings: {0}")]
    Layout(#[from] PipelineError),
}

fn parse_orientation(raw: &str) -> Result<Orientation, String> {
    Orientation::parse(raw).ok_or_else(|| format!("expected top-down or left-right, got {raw:?}"))
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "tt_server",
    version,
    about = "Serve scoped, laid-out taxonomy trees over HTTP",
    long_about = "Builds one taxonomy tree per viewer scope from a SQLite observation store, \
                  lays it out, splits it into spatial chunks and serves it as JSON."
)]
pub struct Cli {
    #[arg(long, env = "TAXON_TREE_DB", help = "SQLite file holding observations and friendships")]
    pub db: PathBuf,
    #[arg(long, env = "TAXON_TREE_BIND", default_value = "127.0.0.1", help = "Address to listen on")]
    pub bind: IpAddr,
    #[arg(long, env = "TAXON_TREE_PORT", default_value_t = 7878, help = "Port to listen on (0 picks one)")]
    pub port: u16,
    #[arg(long, env = "TAXON_TREE_WORKERS", default_value_t = 4, help = "Request worker threads")]
    pub workers: usize,
    #[arg(
        long,
        env = "TAXON_TREE_CACHE_TTL_SECS",
        default_value_t = 180,
        help = "Seconds a built tree is reused before rebuilding"
    )]
    pub cache_ttl_secs: u64,
    #[arg(
        long,
        env = "TAXON_TREE_CHUNK_SIZE",
        default_value_t = DEFAULT_CELL_SIZE,
        help = "Edge length of one square chunk cell, in layout units"
    )]
    pub chunk_size: f64,
    #[arg(long, env = "TAXON_TREE_SIBLING_GAP", default_value_t = 120.0)]
    pub sibling_gap: f64,
    #[arg(long, env = "TAXON_TREE_SUBTREE_GAP", default_value_t = 160.0)]
    pub subtree_gap: f64,
    #[arg(long, env = "TAXON_TREE_ROW_HEIGHT", default_value_t = 240.0)]
    pub row_height: f64,
    #[arg(
        long,
        env = "TAXON_TREE_ORIENTATION",
        default_value = "top-down",
        value_parser = parse_orientation,
        help = "top-down or left-right"
    )]
    pub orientation: Orientation,
    #[arg(
        long,
        env = "TAXON_TREE_CHANGE_POLL_MS",
        default_value_t = 500,
        help = "How often the record change log is polled"
    )]
    pub change_poll_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub workers: usize,
    pub cache: CacheConfig,
    pub pipeline: TreePipeline,
    pub change_poll: Duration,
}

impl Cli {
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ConfigError::Workers(self.workers));
        }
        if self.change_poll_ms == 0 {
            return Err(ConfigError::ChangePoll);
        }
        let layout = LayoutConfig {
            sibling_gap: self.sibling_gap,
            subtree_gap: self.subtree_gap,
            row_height: self.row_height,
            orientation: self.orientation,
        };
        let ttl_ms = i64::try_from(self.cache_ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        Ok(ServerConfig {
            db_path: self.db,
            addr: SocketAddr::new(self.bind, self.port),
            workers: self.workers,
            cache: CacheConfig { ttl_ms },
            pipeline: TreePipeline::new(layout, self.chunk_size)?,
            change_poll: Duration::from_millis(self.change_poll_ms),
        })
    }
}
