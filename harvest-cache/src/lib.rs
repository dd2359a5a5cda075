//! SQLite-backed durable cache for the Harvest sync layer.
//!
//! Holds two tables in one database file: `records` (the local entity
//! cache) and `ops` (the sync queue's persistence). All writes are
//! synchronous, so a process restart rehydrates both without touching
//! the network.
//!
//! `put` is the single chokepoint that keeps record versions strictly
//! increasing per key; a write that does not advance the version is a
//! logged no-op. Records older than the TTL are excluded from reads and
//! lazily deleted.

mod error;

pub use error::{CacheError, CacheResult};

use harvest_types::{
    unix_millis_now, CacheRecord, Entity, EntityKey, OperationId, OperationKind,
    PendingOperation, Patch, WriteSource,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Process-local, restart-surviving key→versioned-record store.
pub struct DurableCache {
    conn: Arc<Mutex<Connection>>,
    ttl_millis: u64,
}

impl DurableCache {
    /// Opens (or creates) a cache at the given path.
    pub fn open(path: &Path, ttl: Duration) -> CacheResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, ttl)
    }

    /// Opens an in-memory cache (for testing).
    pub fn open_in_memory(ttl: Duration) -> CacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, ttl)
    }

    fn from_connection(conn: Connection, ttl: Duration) -> CacheResult<Self> {
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl_millis: ttl.as_millis() as u64,
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> CacheResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS records (
                key             TEXT PRIMARY KEY,
                data            TEXT NOT NULL,
                version         INTEGER NOT NULL,
                remote_revision INTEGER NOT NULL,
                source          TEXT NOT NULL,
                confirmed       TEXT,
                cached_at       INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ops (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                id          TEXT NOT NULL UNIQUE,
                key         TEXT NOT NULL,
                kind        TEXT NOT NULL,
                patch       TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL,
                attempts    INTEGER NOT NULL,
                last_error  TEXT
            );
            ",
        )?;
        Ok(())
    }

    // ── Records ──────────────────────────────────────────────────

    /// Returns the record for `key`, or `None` if absent or expired.
    ///
    /// An expired record is lazily deleted. A record that fails to
    /// deserialize is deleted, logged, and reported as
    /// [`CacheError::Corrupt`] so the caller can reseed the key from the
    /// remote store.
    pub fn get(&self, key: &EntityKey) -> CacheResult<Option<CacheRecord>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<RecordRow> = conn
            .query_row(
                "SELECT data, version, remote_revision, source, confirmed, cached_at
                 FROM records WHERE key = ?1",
                params![key.as_str()],
                RecordRow::from_row,
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };

        let now = unix_millis_now();
        if now.saturating_sub(row.cached_at) > self.ttl_millis {
            debug!(key = %key, "cache record expired, deleting");
            conn.execute("DELETE FROM records WHERE key = ?1", params![key.as_str()])?;
            return Ok(None);
        }

        match row.into_record(key.clone()) {
            Ok(record) => Ok(Some(record)),
            Err(detail) => {
                warn!(key = %key, %detail, "corrupt cache record, deleting");
                conn.execute("DELETE FROM records WHERE key = ?1", params![key.as_str()])?;
                Err(CacheError::Corrupt {
                    key: key.to_string(),
                    detail,
                })
            }
        }
    }

    /// Stores a record, enforcing the strictly-increasing version
    /// invariant. Returns `false` (and logs) when the write is rejected
    /// because its version does not advance the stored one.
    pub fn put(&self, record: &CacheRecord) -> CacheResult<bool> {
        let conn = self.conn.lock().unwrap();
        let current: Option<u64> = conn
            .query_row(
                "SELECT version FROM records WHERE key = ?1",
                params![record.key.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(current) = current {
            if record.version <= current {
                warn!(
                    key = %record.key,
                    stored = current,
                    offered = record.version,
                    "rejecting non-advancing cache write"
                );
                return Ok(false);
            }
        }

        let data = serde_json::to_string(&record.data)?;
        let confirmed = record
            .confirmed
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT OR REPLACE INTO records
             (key, data, version, remote_revision, source, confirmed, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.key.as_str(),
                data,
                record.version,
                record.remote_revision,
                record.source.to_string(),
                confirmed,
                record.cached_at,
            ],
        )?;
        Ok(true)
    }

    /// Removes the record for `key`.
    pub fn delete(&self, key: &EntityKey) -> CacheResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM records WHERE key = ?1", params![key.as_str()])?;
        Ok(())
    }

    /// Returns all unexpired records whose key starts with `prefix`,
    /// ordered by key. Corrupt rows are skipped with a log.
    pub fn list(&self, prefix: &str) -> CacheResult<Vec<CacheRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT key, data, version, remote_revision, source, confirmed, cached_at
             FROM records WHERE key LIKE ?1 || '%' ORDER BY key",
        )?;
        let rows = stmt.query_map(params![prefix], |row| {
            let key: String = row.get(0)?;
            let record = RecordRow {
                data: row.get(1)?,
                version: row.get(2)?,
                remote_revision: row.get(3)?,
                source: row.get(4)?,
                confirmed: row.get(5)?,
                cached_at: row.get(6)?,
            };
            Ok((key, record))
        })?;

        let now = unix_millis_now();
        let mut records = Vec::new();
        let mut expired = Vec::new();
        for row in rows {
            let (key, raw) = row?;
            if now.saturating_sub(raw.cached_at) > self.ttl_millis {
                expired.push(key);
                continue;
            }
            match raw.into_record(EntityKey::new(key.clone())) {
                Ok(record) => records.push(record),
                Err(detail) => warn!(%key, %detail, "skipping corrupt cache record in list"),
            }
        }
        for key in expired {
            conn.execute("DELETE FROM records WHERE key = ?1", params![key])?;
        }
        Ok(records)
    }

    /// Refreshes a record's `cached_at`, keeping an actively watched key
    /// inside the TTL window.
    pub fn touch(&self, key: &EntityKey) -> CacheResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE records SET cached_at = ?2 WHERE key = ?1",
            params![key.as_str(), unix_millis_now()],
        )?;
        Ok(())
    }

    /// Removes every record and every queued operation (logout/reset).
    pub fn clear(&self) -> CacheResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("DELETE FROM records; DELETE FROM ops;")?;
        Ok(())
    }

    // ── Sync-queue persistence ───────────────────────────────────

    /// Appends an operation to the durable queue.
    pub fn enqueue_op(&self, op: &PendingOperation) -> CacheResult<()> {
        let conn = self.conn.lock().unwrap();
        let patch = serde_json::to_string(&op.patch)?;
        conn.execute(
            "INSERT INTO ops (id, key, kind, patch, enqueued_at, attempts, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                op.id.to_string(),
                op.key.as_str(),
                op.kind.to_string(),
                patch,
                op.enqueued_at,
                op.attempts,
                op.last_error,
            ],
        )?;
        Ok(())
    }

    /// Loads every queued operation in enqueue order. Corrupt rows are
    /// deleted and skipped with a log so one bad row cannot wedge the
    /// queue.
    pub fn load_ops(&self) -> CacheResult<Vec<PendingOperation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, key, kind, patch, enqueued_at, attempts, last_error
             FROM ops ORDER BY seq",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, u64>(4)?,
                row.get::<_, u32>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut ops = Vec::new();
        let mut corrupt = Vec::new();
        for row in rows {
            let (id, key, kind, patch, enqueued_at, attempts, last_error) = row?;
            match parse_op(&id, &key, &kind, &patch, enqueued_at, attempts, last_error) {
                Ok(op) => ops.push(op),
                Err(detail) => {
                    warn!(op_id = %id, %detail, "dropping corrupt queued operation");
                    corrupt.push(id);
                }
            }
        }
        for id in corrupt {
            conn.execute("DELETE FROM ops WHERE id = ?1", params![id])?;
        }
        Ok(ops)
    }

    /// Persists updated retry accounting for an operation.
    pub fn update_op_attempts(
        &self,
        id: OperationId,
        attempts: u32,
        last_error: Option<&str>,
    ) -> CacheResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE ops SET attempts = ?2, last_error = ?3 WHERE id = ?1",
            params![id.to_string(), attempts, last_error],
        )?;
        Ok(())
    }

    /// Removes an operation after acknowledgement or abandonment.
    pub fn remove_op(&self, id: OperationId) -> CacheResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM ops WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }

    /// Number of operations currently queued.
    pub fn pending_op_count(&self) -> CacheResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM ops", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

struct RecordRow {
    data: String,
    version: u64,
    remote_revision: u64,
    source: String,
    confirmed: Option<String>,
    cached_at: u64,
}

impl RecordRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            data: row.get(0)?,
            version: row.get(1)?,
            remote_revision: row.get(2)?,
            source: row.get(3)?,
            confirmed: row.get(4)?,
            cached_at: row.get(5)?,
        })
    }

    fn into_record(self, key: EntityKey) -> Result<CacheRecord, String> {
        let data: Entity =
            serde_json::from_str(&self.data).map_err(|e| format!("bad entity json: {e}"))?;
        let source: WriteSource = self.source.parse()?;
        let confirmed = match self.confirmed {
            Some(json) => Some(
                serde_json::from_str(&json).map_err(|e| format!("bad confirmed json: {e}"))?,
            ),
            None => None,
        };
        Ok(CacheRecord {
            key,
            data,
            version: self.version,
            remote_revision: self.remote_revision,
            source,
            confirmed,
            cached_at: self.cached_at,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn parse_op(
    id: &str,
    key: &str,
    kind: &str,
    patch: &str,
    enqueued_at: u64,
    attempts: u32,
    last_error: Option<String>,
) -> Result<PendingOperation, String> {
    let id: OperationId = id.parse().map_err(|e| format!("bad op id: {e}"))?;
    let kind: OperationKind = kind.parse()?;
    let patch: Patch = serde_json::from_str(patch).map_err(|e| format!("bad patch json: {e}"))?;
    Ok(PendingOperation {
        id,
        key: EntityKey::new(key),
        kind,
        patch,
        enqueued_at,
        attempts,
        last_error,
    })
}
