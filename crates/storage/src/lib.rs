#![forbid(unsafe_code)]

//! SQLite-backed record source for the taxon tree engine.
//!
//! Observations and friendships live in two tables; every observation write
//! is mirrored into `record_changes` by triggers, which the server tails to
//! invalidate cached trees.

mod store;

pub use store::{ObservationWrite, SqliteStore, StoreError};
