#![forbid(unsafe_code)]

mod error;
mod requests;
mod schema;

pub use error::StoreError;
pub use requests::ObservationWrite;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use tt_core::source::{
    ChangeFeed, FriendDirectory, RecordChange, RecordFilter, RecordSource, SourceError,
};
use tt_core::{OwnerId, Rank, TaxonChain, Visibility};

/// Column name per chain rank, in `Rank::CHAIN_RANKS` order.
const RANK_COLUMNS: [(Rank, &str); 9] = [
    (Rank::Kingdom, "kingdom"),
    (Rank::Phylum, "phylum"),
    (Rank::Class, "class"),
    (Rank::Order, "ord"),
    (Rank::Family, "family"),
    (Rank::Subfamily, "subfamily"),
    (Rank::Genus, "genus"),
    (Rank::Species, "species"),
    (Rank::Subspecies, "subspecies"),
];

/// Keeps `IN (...)` lists well under SQLite's bound-parameter limit.
const OWNER_BATCH: usize = 500;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self::init(conn, Some(db_path))?;
        debug!(path = ?store.path, "record store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        schema::preflight_gate(&conn)?;
        schema::install_schema(&conn, now_ms())?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn upsert_observation(&self, write: &ObservationWrite) -> Result<(), StoreError> {
        if write.record_id.trim().is_empty() {
            return Err(StoreError::InvalidInput("record_id must not be empty"));
        }
        let mut values: Vec<Value> = vec![
            Value::Text(write.record_id.clone()),
            Value::Integer(owner_to_sql(write.owner_id)?),
            Value::Text(write.visibility.as_str().to_string()),
            Value::Integer(write.updated_at_ms),
        ];
        for (rank, _) in RANK_COLUMNS {
            values.push(match write.name_at(rank) {
                Some(name) => Value::Text(name.to_string()),
                None => Value::Null,
            });
        }
        values.push(match write.scientific_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Value::Text(name.to_string()),
            _ => Value::Null,
        });

        let columns = RANK_COLUMNS
            .iter()
            .map(|(_, column)| *column)
            .collect::<Vec<_>>();
        let updates = columns
            .iter()
            .chain(["owner_id", "visibility", "updated_at_ms", "scientific_name"].iter())
            .map(|column| format!("{column}=excluded.{column}"))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=values.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO observations(record_id, owner_id, visibility, updated_at_ms, {}, scientific_name) \
             VALUES ({placeholders}) \
             ON CONFLICT(record_id) DO UPDATE SET {updates}",
            columns.join(", ")
        );

        self.conn().execute(&sql, params_from_iter(values.iter()))?;
        Ok(())
    }

    pub fn delete_observation(&self, record_id: &str) -> Result<bool, StoreError> {
        let deleted = self.conn().execute(
            "DELETE FROM observations WHERE record_id=?1",
            params![record_id],
        )?;
        Ok(deleted > 0)
    }

    /// Records a symmetric friendship.
    pub fn add_friendship(&self, a: OwnerId, b: OwnerId, now_ms: i64) -> Result<(), StoreError> {
        if a == b {
            return Err(StoreError::InvalidInput("an owner cannot befriend itself"));
        }
        let (a, b) = (owner_to_sql(a)?, owner_to_sql(b)?);
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for (user, friend) in [(a, b), (b, a)] {
            tx.execute(
                "INSERT OR IGNORE INTO friendships(user_id, friend_id, created_at_ms) VALUES (?1, ?2, ?3)",
                params![user, friend, now_ms],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn remove_friendship(&self, a: OwnerId, b: OwnerId) -> Result<bool, StoreError> {
        let (a, b) = (owner_to_sql(a)?, owner_to_sql(b)?);
        let removed = self.conn().execute(
            "DELETE FROM friendships WHERE (user_id=?1 AND friend_id=?2) OR (user_id=?2 AND friend_id=?1)",
            params![a, b],
        )?;
        Ok(removed > 0)
    }

    fn fetch_batch(
        conn: &Connection,
        owners: &[i64],
        filter: &RecordFilter,
    ) -> Result<Vec<TaxonChain>, StoreError> {
        let rank_columns = RANK_COLUMNS
            .iter()
            .map(|(_, column)| *column)
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (0..owners.len())
            .map(|i| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT record_id, owner_id, visibility, updated_at_ms, {rank_columns}, scientific_name \
             FROM observations \
             WHERE owner_id IN ({placeholders}) \
               AND (owner_id = ?1 OR visibility IN ('public', ?2)) \
             ORDER BY record_id ASC"
        );

        let viewer = match filter.viewer {
            Some(viewer) => owner_to_sql(viewer)?,
            None => 0,
        };
        let mut values = vec![
            Value::Integer(viewer),
            Value::Text(filter.min_foreign_visibility().as_str().to_string()),
        ];
        values.extend(owners.iter().map(|owner| Value::Integer(*owner)));

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(chain_from_row(row)?);
        }
        Ok(out)
    }
}

fn chain_from_row(row: &Row<'_>) -> Result<TaxonChain, StoreError> {
    let record_id = row.get::<_, String>(0)?;
    let malformed = |reason: &str| StoreError::MalformedRow {
        record_id: record_id.clone(),
        reason: reason.to_string(),
    };
    let owner_id =
        owner_from_sql(row.get::<_, i64>(1)?).ok_or_else(|| malformed("bad owner_id"))?;
    let visibility = Visibility::parse(&row.get::<_, String>(2)?)
        .ok_or_else(|| malformed("unknown visibility"))?;
    let updated_at_ms = row.get::<_, i64>(3)?;
    let mut ranks = Vec::with_capacity(RANK_COLUMNS.len());
    for (offset, (rank, _)) in RANK_COLUMNS.iter().enumerate() {
        if let Some(name) = row.get::<_, Option<String>>(4 + offset)? {
            ranks.push((*rank, name));
        }
    }
    let scientific_name = row.get::<_, Option<String>>(4 + RANK_COLUMNS.len())?;

    let chain = TaxonChain::new(record_id.clone(), owner_id, visibility, updated_at_ms, ranks);
    Ok(match scientific_name {
        Some(name) => chain.with_scientific_name(name),
        None => chain,
    })
}

fn owner_to_sql(owner: OwnerId) -> Result<i64, StoreError> {
    i64::try_from(owner.get())
        .map_err(|_| StoreError::InvalidInput("owner id exceeds the sqlite integer range"))
}

fn owner_from_sql(raw: i64) -> Option<OwnerId> {
    u64::try_from(raw).ok().and_then(|id| OwnerId::new(id).ok())
}

fn owner_set(
    conn: &Connection,
    sql: &str,
    param: Option<i64>,
) -> Result<BTreeSet<OwnerId>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = match param {
        Some(param) => stmt.query(params![param])?,
        None => stmt.query([])?,
    };
    let mut out = BTreeSet::new();
    while let Some(row) = rows.next()? {
        let raw = row.get::<_, i64>(0)?;
        let owner = owner_from_sql(raw)
            .ok_or(StoreError::InvalidInput("stored owner id is not positive"))?;
        out.insert(owner);
    }
    Ok(out)
}

impl RecordSource for SqliteStore {
    fn fetch_chains(&self, filter: &RecordFilter) -> Result<Vec<TaxonChain>, SourceError> {
        let owners = filter
            .owners
            .iter()
            .map(|owner| owner_to_sql(*owner))
            .collect::<Result<Vec<_>, _>>()?;
        let conn = self.conn();
        let mut out = Vec::new();
        for batch in owners.chunks(OWNER_BATCH) {
            out.extend(Self::fetch_batch(&conn, batch, filter)?);
        }
        debug!(owners = owners.len(), records = out.len(), "fetched taxon chains");
        Ok(out)
    }

    fn public_owner_ids(&self) -> Result<BTreeSet<OwnerId>, SourceError> {
        Ok(owner_set(
            &self.conn(),
            "SELECT DISTINCT owner_id FROM observations WHERE visibility='public'",
            None,
        )?)
    }
}

impl FriendDirectory for SqliteStore {
    fn friend_ids(&self, viewer: OwnerId) -> Result<BTreeSet<OwnerId>, SourceError> {
        let viewer = owner_to_sql(viewer)?;
        Ok(owner_set(
            &self.conn(),
            "SELECT friend_id FROM friendships WHERE user_id=?1",
            Some(viewer),
        )?)
    }
}

impl ChangeFeed for SqliteStore {
    fn changes_since(&self, cursor: i64, limit: usize) -> Result<Vec<RecordChange>, SourceError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(changes_after(&self.conn(), cursor, limit)?)
    }

    fn latest_seq(&self) -> Result<i64, SourceError> {
        let seq = self
            .conn()
            .query_row("SELECT MAX(seq) FROM record_changes", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()
            .map_err(StoreError::from)?
            .flatten()
            .unwrap_or(0);
        Ok(seq)
    }
}

fn changes_after(
    conn: &Connection,
    cursor: i64,
    limit: i64,
) -> Result<Vec<RecordChange>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT seq, owner_id, ts_ms FROM record_changes WHERE seq > ?1 ORDER BY seq ASC LIMIT ?2",
    )?;
    let mut rows = stmt.query(params![cursor, limit])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let seq = row.get::<_, i64>(0)?;
        let Some(owner_id) = owner_from_sql(row.get::<_, i64>(1)?) else {
            continue;
        };
        out.push(RecordChange {
            seq,
            owner_id,
            ts_ms: row.get::<_, i64>(2)?,
        });
    }
    Ok(out)
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration,
        Err(_) => return 0,
    };

    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
