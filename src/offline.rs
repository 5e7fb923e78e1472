//! Durable offline submission buffer.
//!
//! Client-side queue for reports drafted while disconnected. `enqueue`
//! is immediate and returns a local tracking id; `replay` pushes entries
//! through the intake gate strictly in enqueue order. Every entry
//! carries a client-generated idempotency token, so a sync interrupted
//! after the server applied a submission but before the entry was
//! removed is safe to retry — the gate collapses the duplicate and the
//! trust ledger counts the report once.

use crate::error::{CoreError, Result};
use crate::intake::IntakeGate;
use crate::reports::NewReport;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;

/// One buffered submission.
#[derive(Debug, Clone)]
pub struct QueuedSubmission {
    pub local_id: String,
    pub payload: NewReport,
    pub idempotency_token: String,
    pub created_at: DateTime<Utc>,
    /// Replay attempts so far, for client-side surfacing.
    pub attempts: u32,
}

/// A permanently failed entry, removed from the queue.
#[derive(Debug, Clone)]
pub struct ReplayFailure {
    pub local_id: String,
    pub reason: String,
}

/// Result of one replay pass.
#[derive(Debug, Clone, Default)]
pub struct ReplayOutcome {
    /// Entries confirmed applied server-side (including collapsed
    /// duplicates from an earlier interrupted pass).
    pub synced: usize,
    /// Entries dropped as permanently invalid.
    pub failed: Vec<ReplayFailure>,
    /// Entries still queued after the pass (transient stop).
    pub remaining: usize,
}

/// SQLite-backed offline queue.
pub struct OfflineBuffer {
    conn: Mutex<Connection>,
}

impl OfflineBuffer {
    /// Open (or create) the buffer database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::Transient(e.to_string()))?;
        }
        Self::init(Connection::open(path)?)
    }

    /// In-memory buffer for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;

             CREATE TABLE IF NOT EXISTS queued_submissions (
                 seq               INTEGER PRIMARY KEY AUTOINCREMENT,
                 local_id          TEXT NOT NULL UNIQUE,
                 payload           TEXT NOT NULL,
                 idempotency_token TEXT NOT NULL,
                 attempts          INTEGER NOT NULL DEFAULT 0,
                 created_at        TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append a submission to the queue and return its local tracking id
    /// immediately. The report is not yet visible server-side. A missing
    /// idempotency token is stamped here so every replay is collapsible.
    pub fn enqueue(&self, mut payload: NewReport) -> Result<String> {
        let token = payload
            .idempotency_token
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();
        let local_id = uuid::Uuid::new_v4().to_string();
        let raw = serde_json::to_string(&payload)
            .map_err(|e| CoreError::Validation(format!("unserializable payload: {e}")))?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO queued_submissions (local_id, payload, idempotency_token, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![local_id, raw, token, Utc::now().to_rfc3339()],
        )?;
        tracing::debug!(local_id = %local_id, "Submission queued offline");
        Ok(local_id)
    }

    /// Entries still waiting, in enqueue order.
    pub fn pending(&self) -> Result<Vec<QueuedSubmission>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT local_id, payload, idempotency_token, attempts, created_at
             FROM queued_submissions ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (local_id, raw, idempotency_token, attempts, created_at) = row?;
            let payload = serde_json::from_str(&raw)
                .map_err(|e| CoreError::Transient(format!("corrupt queue entry: {e}")))?;
            entries.push(QueuedSubmission {
                local_id,
                payload,
                idempotency_token,
                attempts,
                created_at: crate::trust::parse_ts(&created_at),
            });
        }
        Ok(entries)
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM queued_submissions", [], |row| {
            row.get::<_, i64>(0)
        })? as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Replay the queue through the intake gate, strictly in enqueue
    /// order. Stops at the first transient failure with the rest of the
    /// queue intact; an entry is removed only once its outcome is known
    /// (applied, collapsed duplicate, or permanently invalid).
    pub fn replay(&self, gate: &IntakeGate) -> Result<ReplayOutcome> {
        let entries = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT local_id, payload FROM queued_submissions ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?);
            }
            entries
        };

        let mut outcome = ReplayOutcome::default();
        for (local_id, raw) in entries {
            self.bump_attempts(&local_id)?;

            let payload: NewReport = match serde_json::from_str(&raw) {
                Ok(payload) => payload,
                Err(e) => {
                    // Unparseable entry can never succeed; drop it
                    self.remove(&local_id)?;
                    outcome.failed.push(ReplayFailure {
                        local_id,
                        reason: format!("corrupt payload: {e}"),
                    });
                    continue;
                }
            };

            match gate.submit(&payload) {
                Ok(receipt) => {
                    self.remove(&local_id)?;
                    outcome.synced += 1;
                    tracing::debug!(
                        local_id = %local_id,
                        reference = %receipt.reference_number,
                        deduplicated = receipt.deduplicated,
                        "Queued submission synced"
                    );
                }
                Err(CoreError::Conflict(_)) => {
                    // Applied by an earlier interrupted pass
                    self.remove(&local_id)?;
                    outcome.synced += 1;
                }
                Err(CoreError::Validation(reason)) => {
                    self.remove(&local_id)?;
                    tracing::warn!(local_id = %local_id, %reason, "Queued submission rejected");
                    outcome.failed.push(ReplayFailure { local_id, reason });
                }
                Err(err) => {
                    // Transient: leave this entry and its successors queued
                    tracing::info!(local_id = %local_id, error = %err, "Replay paused");
                    break;
                }
            }
        }

        outcome.remaining = self.len()?;
        if outcome.synced > 0 || !outcome.failed.is_empty() {
            tracing::info!(
                synced = outcome.synced,
                failed = outcome.failed.len(),
                remaining = outcome.remaining,
                "Offline queue replay finished"
            );
        }
        Ok(outcome)
    }

    fn bump_attempts(&self, local_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE queued_submissions SET attempts = attempts + 1 WHERE local_id = ?1",
            params![local_id],
        )?;
        Ok(())
    }

    fn remove(&self, local_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM queued_submissions WHERE local_id = ?1",
            params![local_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IntakeConfig, TrustCoefficients};
    use crate::db::Database;
    use crate::reports::{GeoPoint, ReportStore};
    use crate::trust::TrustLedger;

    fn gate_and_store() -> (IntakeGate, ReportStore, TrustLedger) {
        let db = Database::open_in_memory().unwrap();
        let ledger = TrustLedger::new(db.clone(), TrustCoefficients::default());
        let store = ReportStore::new(db.clone());
        (
            IntakeGate::new(db, ledger.clone(), IntakeConfig::default()),
            store,
            ledger,
        )
    }

    fn payload(description: &str) -> NewReport {
        NewReport {
            category: "Fire".into(),
            description: description.into(),
            location: GeoPoint {
                lat: -1.9441,
                lng: 30.0619,
            },
            photo_url: None,
            fingerprint: "aabbccdd00112233".into(),
            idempotency_token: None,
        }
    }

    #[test]
    fn enqueue_is_immediate_and_ordered() {
        let buffer = OfflineBuffer::open_in_memory().unwrap();
        let first = buffer.enqueue(payload("first")).unwrap();
        let second = buffer.enqueue(payload("second")).unwrap();
        assert_ne!(first, second);

        let pending = buffer.pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].payload.description, "first");
        assert_eq!(pending[1].payload.description, "second");
        // Tokens were stamped at enqueue time
        assert!(!pending[0].idempotency_token.is_empty());
        assert_ne!(pending[0].idempotency_token, pending[1].idempotency_token);
    }

    #[test]
    fn replay_syncs_everything_in_order() {
        let (gate, store, _) = gate_and_store();
        let buffer = OfflineBuffer::open_in_memory().unwrap();
        for i in 0..3 {
            buffer.enqueue(payload(&format!("incident {i}"))).unwrap();
        }

        let outcome = buffer.replay(&gate).unwrap();
        assert_eq!(outcome.synced, 3);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.remaining, 0);
        assert!(buffer.is_empty().unwrap());
        assert_eq!(store.list(&Default::default()).unwrap().len(), 3);

        // A second pass over the empty queue is a no-op
        let outcome = buffer.replay(&gate).unwrap();
        assert_eq!(outcome.synced, 0);
    }

    #[test]
    fn interrupted_sync_retries_without_duplicates() {
        let (gate, store, ledger) = gate_and_store();
        let buffer = OfflineBuffer::open_in_memory().unwrap();
        for i in 0..3 {
            buffer.enqueue(payload(&format!("incident {i}"))).unwrap();
        }

        // Simulate a crash after the server applied the first entry but
        // before the client removed it from the queue
        let first = buffer.pending().unwrap().remove(0);
        gate.submit(&first.payload).unwrap();
        assert_eq!(buffer.len().unwrap(), 3);

        let outcome = buffer.replay(&gate).unwrap();
        assert_eq!(outcome.synced, 3);
        assert_eq!(outcome.remaining, 0);
        // Exactly three reports server-side, and the ledger counted three
        assert_eq!(store.list(&Default::default()).unwrap().len(), 3);
        let record = ledger.get_or_create("aabbccdd00112233").unwrap();
        assert_eq!(record.report_count, 3);
    }

    #[test]
    fn validation_rejection_is_permanent() {
        let (gate, store, _) = gate_and_store();
        let buffer = OfflineBuffer::open_in_memory().unwrap();

        buffer.enqueue(payload("good one")).unwrap();
        let mut bad = payload("theft without photo");
        bad.category = "Theft".into(); // photo required, none attached
        let bad_id = buffer.enqueue(bad).unwrap();
        buffer.enqueue(payload("another good one")).unwrap();

        let outcome = buffer.replay(&gate).unwrap();
        assert_eq!(outcome.synced, 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].local_id, bad_id);
        assert_eq!(outcome.remaining, 0);
        assert_eq!(store.list(&Default::default()).unwrap().len(), 2);
    }

    #[test]
    fn attempts_are_tracked_per_entry() {
        let (gate, _, _) = gate_and_store();
        let buffer = OfflineBuffer::open_in_memory().unwrap();
        buffer.enqueue(payload("tracked")).unwrap();

        assert_eq!(buffer.pending().unwrap()[0].attempts, 0);
        buffer.replay(&gate).unwrap();
        // Entry synced and removed; enqueue another and check the bump
        let id = buffer.enqueue(payload("tracked again")).unwrap();
        buffer.bump_attempts(&id).unwrap();
        assert_eq!(buffer.pending().unwrap()[0].attempts, 1);
    }
}
