#![forbid(unsafe_code)]

use super::StoreError;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;

pub(super) const SCHEMA_VERSION: i64 = 1;

const REQUIRED_TABLES: [&str; 4] = ["store_state", "observations", "friendships", "record_changes"];

const SQL: &str = r#"
        CREATE TABLE IF NOT EXISTS store_state (
          singleton INTEGER PRIMARY KEY CHECK(singleton = 1),
          schema_version INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        -- One row per observation. Rank columns hold the resolved taxon name
        -- or NULL when the identification stopped short of that rank.
        CREATE TABLE IF NOT EXISTS observations (
          record_id TEXT PRIMARY KEY,
          owner_id INTEGER NOT NULL CHECK(owner_id > 0),
          visibility TEXT NOT NULL CHECK(visibility IN ('private', 'friends', 'public')),
          updated_at_ms INTEGER NOT NULL,
          kingdom TEXT,
          phylum TEXT,
          class TEXT,
          ord TEXT,
          family TEXT,
          subfamily TEXT,
          genus TEXT,
          species TEXT,
          subspecies TEXT,
          scientific_name TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_observations_owner
          ON observations(owner_id, visibility);

        -- Stored in both directions.
        CREATE TABLE IF NOT EXISTS friendships (
          user_id INTEGER NOT NULL,
          friend_id INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY(user_id, friend_id),
          CHECK(user_id <> friend_id)
        );

        CREATE TABLE IF NOT EXISTS record_changes (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          owner_id INTEGER NOT NULL,
          record_id TEXT NOT NULL,
          op TEXT NOT NULL,
          ts_ms INTEGER NOT NULL
        );

        CREATE TRIGGER IF NOT EXISTS observations_after_insert
        AFTER INSERT ON observations
        BEGIN
          INSERT INTO record_changes(owner_id, record_id, op, ts_ms)
          VALUES (NEW.owner_id, NEW.record_id, 'insert', NEW.updated_at_ms);
        END;

        CREATE TRIGGER IF NOT EXISTS observations_after_update
        AFTER UPDATE ON observations
        BEGIN
          INSERT INTO record_changes(owner_id, record_id, op, ts_ms)
          VALUES (NEW.owner_id, NEW.record_id, 'update', NEW.updated_at_ms);
          INSERT INTO record_changes(owner_id, record_id, op, ts_ms)
          SELECT OLD.owner_id, OLD.record_id, 'update', NEW.updated_at_ms
          WHERE OLD.owner_id <> NEW.owner_id;
        END;

        CREATE TRIGGER IF NOT EXISTS observations_after_delete
        AFTER DELETE ON observations
        BEGIN
          INSERT INTO record_changes(owner_id, record_id, op, ts_ms)
          VALUES (OLD.owner_id, OLD.record_id, 'delete',
                  CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER));
        END;
"#;

/// Refuses to open a database that holds tables this store did not create,
/// or one written by a different schema version.
pub(super) fn preflight_gate(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let mut rows = stmt.query([])?;
    let mut tables = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tables.insert(row.get::<_, String>(0)?);
    }

    if tables.is_empty() {
        return Ok(());
    }

    let required: BTreeSet<&str> = REQUIRED_TABLES.into_iter().collect();
    if tables
        .iter()
        .any(|table| !required.contains(table.as_str()))
    {
        return Err(StoreError::InvalidInput(
            "RESET_REQUIRED: unsupported tables detected",
        ));
    }
    for table in required {
        if !tables.contains(table) {
            return Err(StoreError::InvalidInput(
                "RESET_REQUIRED: required table is missing",
            ));
        }
    }

    let version = conn
        .query_row(
            "SELECT schema_version FROM store_state WHERE singleton=1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    match version {
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(_) => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema version mismatch",
        )),
        None => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema state row is missing",
        )),
    }
}

pub(super) fn install_schema(conn: &Connection, now_ms: i64) -> Result<(), StoreError> {
    conn.execute_batch(SQL)?;
    conn.execute(
        "INSERT INTO store_state(singleton, schema_version, created_at_ms, updated_at_ms) \
         VALUES (1, ?1, ?2, ?2) \
         ON CONFLICT(singleton) DO UPDATE SET schema_version=excluded.schema_version, updated_at_ms=excluded.updated_at_ms",
        params![SCHEMA_VERSION, now_ms],
    )?;
    Ok(())
}
