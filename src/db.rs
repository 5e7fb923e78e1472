//! Shared operational database.
//!
//! One SQLite file holds the `reports`, `fingerprints`, and
//! `score_history` tables so the intake gate can persist a report and
//! mutate trust counters inside a single transaction — a failure never
//! leaves a reference number without its report or a counter increment
//! without the stored report behind it.

use crate::error::Result;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

/// Handle to the operational store. Cheap to clone; all clones share one
/// connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the operational database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::error::CoreError::Transient(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database for tests and ephemeral deployments.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS fingerprints (
                fingerprint      TEXT PRIMARY KEY,
                report_count     INTEGER NOT NULL DEFAULT 0,
                verified_count   INTEGER NOT NULL DEFAULT 0,
                fake_count       INTEGER NOT NULL DEFAULT 0,
                duplicate_count  INTEGER NOT NULL DEFAULT 0,
                resolved_count   INTEGER NOT NULL DEFAULT 0,
                trust_score      INTEGER NOT NULL DEFAULT 50,
                created_at       TEXT NOT NULL,
                last_activity_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_fingerprints_activity
                ON fingerprints(last_activity_at);
            CREATE INDEX IF NOT EXISTS idx_fingerprints_score
                ON fingerprints(trust_score);

            CREATE TABLE IF NOT EXISTS score_history (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                fingerprint TEXT NOT NULL,
                score       INTEGER NOT NULL,
                delta       INTEGER NOT NULL,
                reason      TEXT NOT NULL,
                timestamp   TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_score_history_fingerprint
                ON score_history(fingerprint);

            CREATE TABLE IF NOT EXISTS reports (
                id                  TEXT PRIMARY KEY,
                reference_number    TEXT NOT NULL UNIQUE,
                category            TEXT NOT NULL,
                description         TEXT NOT NULL,
                lat                 REAL NOT NULL,
                lng                 REAL NOT NULL,
                photo_url           TEXT,
                fingerprint         TEXT NOT NULL,
                status              TEXT NOT NULL DEFAULT 'new',
                trust_score_at_submission INTEGER NOT NULL,
                queued              INTEGER NOT NULL DEFAULT 0,
                queued_at           TEXT,
                flagged_as_fake     INTEGER NOT NULL DEFAULT 0,
                verified_by_operator INTEGER NOT NULL DEFAULT 0,
                resolved_credited   INTEGER NOT NULL DEFAULT 0,
                idempotency_token   TEXT UNIQUE,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_reports_fingerprint ON reports(fingerprint);
            CREATE INDEX IF NOT EXISTS idx_reports_created ON reports(created_at);
            CREATE INDEX IF NOT EXISTS idx_reports_queued ON reports(queued);
            CREATE INDEX IF NOT EXISTS idx_reports_status ON reports(status);",
        )?;
        Ok(())
    }

    /// Lock the underlying connection. Held across a transaction by the
    /// intake gate; every other caller keeps the critical section to a
    /// single statement.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        // Re-running the schema against an initialized connection is a no-op
        Database::init_schema(&db.lock()).unwrap();
    }

    #[test]
    fn open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("core.db");
        let _db = Database::open(&path).unwrap();
        assert!(path.exists());
    }
}
