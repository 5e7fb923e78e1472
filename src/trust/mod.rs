//! Per-fingerprint trust ledger.
//!
//! Keeps an evolving reputation record for every device fingerprint:
//! submission/verified/fake/duplicate/resolved counters, a 0–100 trust
//! score recomputed from those counters on every mutation, a capped
//! adjustment history for operator audit, and the abuse analytics the
//! admin surfaces read.
//!
//! ## Concurrency
//! Counter mutations are single-statement upserts
//! (`ON CONFLICT DO UPDATE SET n = n + 1`), so there is no
//! read-modify-write window between fingerprints. Multi-statement
//! operations (bump + score recompute + history append) run either under
//! the connection lock or inside the intake gate's transaction.

use crate::config::TrustCoefficients;
use crate::db::Database;
use crate::error::{CoreError, Result};
use crate::fingerprint;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Neutral score assigned on first sighting.
pub const DEFAULT_SCORE: i64 = 50;

/// Score adjustments kept per fingerprint.
const HISTORY_CAP: i64 = 50;

/// Top-offender rows returned by analytics.
const TOP_OFFENDER_LIMIT: u32 = 10;

// ── Types ───────────────────────────────────────────────────────

/// Reputation record for one device fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustRecord {
    pub fingerprint: String,
    pub report_count: i64,
    pub verified_count: i64,
    pub fake_count: i64,
    pub duplicate_count: i64,
    pub resolved_count: i64,
    /// Always in [0, 100].
    pub trust_score: i64,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl TrustRecord {
    pub fn tier(&self) -> TrustTier {
        TrustTier::from_score(self.trust_score)
    }
}

/// Reporting tier derived from the trust score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl TrustTier {
    pub fn from_score(score: i64) -> Self {
        match score {
            s if s < 20 => Self::VeryLow,
            s if s < 40 => Self::Low,
            s if s < 70 => Self::Medium,
            s if s < 90 => Self::High,
            _ => Self::VeryHigh,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

/// One entry in a fingerprint's score history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreAdjustment {
    /// Score after the adjustment.
    pub score: i64,
    /// Signed change against the previous score.
    pub delta: i64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Trust record with the fingerprint partially hidden, safe to show to
/// operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskedTrustRecord {
    pub fingerprint_masked: String,
    pub trust_score: i64,
    pub tier: TrustTier,
    pub report_count: i64,
    pub verified_count: i64,
    pub fake_count: i64,
    pub duplicate_count: i64,
    pub resolved_count: i64,
    pub last_activity_at: DateTime<Utc>,
}

impl MaskedTrustRecord {
    fn from_record(record: &TrustRecord) -> Self {
        Self {
            fingerprint_masked: fingerprint::mask(&record.fingerprint),
            trust_score: record.trust_score,
            tier: record.tier(),
            report_count: record.report_count,
            verified_count: record.verified_count,
            fake_count: record.fake_count,
            duplicate_count: record.duplicate_count,
            resolved_count: record.resolved_count,
            last_activity_at: record.last_activity_at,
        }
    }
}

/// Tier distribution plus worst offenders, for the admin dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseAnalytics {
    pub total_fingerprints: i64,
    pub low_trust_count: i64,
    pub high_trust_count: i64,
    pub distribution: TierDistribution,
    pub top_offenders: Vec<MaskedTrustRecord>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierDistribution {
    pub very_low: i64,
    pub low: i64,
    pub medium: i64,
    pub high: i64,
    pub very_high: i64,
}

// ── Ledger ──────────────────────────────────────────────────────

/// SQLite-backed trust ledger.
#[derive(Clone)]
pub struct TrustLedger {
    db: Database,
    coefficients: TrustCoefficients,
}

impl TrustLedger {
    pub fn new(db: Database, coefficients: TrustCoefficients) -> Self {
        Self { db, coefficients }
    }

    /// Fetch the record for a fingerprint, creating it at the neutral
    /// default score on first sighting.
    pub fn get_or_create(&self, fp: &str) -> Result<TrustRecord> {
        let conn = self.db.lock();
        self.get_or_create_in(&conn, fp, Utc::now())
    }

    /// Increment the submission counter. Does not alter the score.
    pub fn record_submission(&self, fp: &str) -> Result<()> {
        let conn = self.db.lock();
        self.record_submission_in(&conn, fp, Utc::now())
    }

    /// Credit a police-verified report.
    pub fn record_verified(&self, fp: &str, reason: &str) -> Result<i64> {
        let conn = self.db.lock();
        self.bump_in(&conn, fp, Counter::Verified, reason, Utc::now())
    }

    /// Penalize a report flagged as fake. Callers guarantee exactly one
    /// call per report transition into "fake".
    pub fn record_fake(&self, fp: &str, reason: &str) -> Result<i64> {
        let conn = self.db.lock();
        self.bump_in(&conn, fp, Counter::Fake, reason, Utc::now())
    }

    /// Penalize a duplicate/flood submission.
    pub fn record_duplicate(&self, fp: &str, reason: &str) -> Result<i64> {
        let conn = self.db.lock();
        self.bump_in(&conn, fp, Counter::Duplicate, reason, Utc::now())
    }

    /// Credit a report that led to a resolution.
    pub fn record_resolved(&self, fp: &str, reason: &str) -> Result<i64> {
        let conn = self.db.lock();
        self.bump_in(&conn, fp, Counter::Resolved, reason, Utc::now())
    }

    /// Current trust score. Unknown fingerprints read as the neutral
    /// default without creating a record.
    pub fn score(&self, fp: &str) -> Result<i64> {
        let conn = self.db.lock();
        let score = conn
            .query_row(
                "SELECT trust_score FROM fingerprints WHERE fingerprint = ?1",
                params![fp],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(score.unwrap_or(DEFAULT_SCORE))
    }

    /// Recent score adjustments, newest first.
    pub fn history(&self, fp: &str) -> Result<Vec<ScoreAdjustment>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT score, delta, reason, timestamp FROM score_history
             WHERE fingerprint = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![fp, HISTORY_CAP], |row| {
            Ok(ScoreAdjustment {
                score: row.get(0)?,
                delta: row.get(1)?,
                reason: row.get(2)?,
                timestamp: parse_ts(&row.get::<_, String>(3)?),
            })
        })?;
        let mut history = Vec::new();
        for row in rows {
            history.push(row?);
        }
        Ok(history)
    }

    /// Look up a record by fingerprint prefix, masked for display.
    /// The prefix must be at least 4 hex characters.
    pub fn masked_info(&self, prefix: &str) -> Result<MaskedTrustRecord> {
        if prefix.len() < 4 || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::Validation(
                "fingerprint prefix must be at least 4 hex characters".into(),
            ));
        }
        let conn = self.db.lock();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM fingerprints
                     WHERE fingerprint LIKE ?1 ORDER BY fingerprint LIMIT 1"
                ),
                params![format!("{prefix}%")],
                row_to_record,
            )
            .optional()?
            .ok_or_else(|| CoreError::NotFound(format!("no fingerprint matching {prefix}")))?;
        Ok(MaskedTrustRecord::from_record(&record))
    }

    /// Abuse analytics for the admin dashboard.
    pub fn analytics(&self) -> Result<AbuseAnalytics> {
        let conn = self.db.lock();

        let count_where = |clause: &str| -> Result<i64> {
            Ok(conn.query_row(
                &format!("SELECT COUNT(*) FROM fingerprints WHERE {clause}"),
                [],
                |row| row.get(0),
            )?)
        };

        let distribution = TierDistribution {
            very_low: count_where("trust_score < 20")?,
            low: count_where("trust_score >= 20 AND trust_score < 40")?,
            medium: count_where("trust_score >= 40 AND trust_score < 70")?,
            high: count_where("trust_score >= 70 AND trust_score < 90")?,
            very_high: count_where("trust_score >= 90")?,
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM fingerprints
             WHERE fake_count > 0 ORDER BY fake_count DESC, fingerprint LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![TOP_OFFENDER_LIMIT], row_to_record)?;
        let mut top_offenders = Vec::new();
        for row in rows {
            top_offenders.push(MaskedTrustRecord::from_record(&row?));
        }

        Ok(AbuseAnalytics {
            total_fingerprints: count_where("1=1")?,
            low_trust_count: distribution.very_low + distribution.low,
            high_trust_count: distribution.high + distribution.very_high,
            distribution,
            top_offenders,
            generated_at: Utc::now(),
        })
    }

    /// Delete trust data inactive for longer than `max_age_days`.
    /// Returns the number of fingerprint records removed.
    pub fn cleanup(&self, max_age_days: i64) -> Result<usize> {
        if max_age_days < 1 {
            return Err(CoreError::Configuration(
                "max_age_days must be at least 1".into(),
            ));
        }
        let cutoff = (Utc::now() - Duration::days(max_age_days)).to_rfc3339();
        let conn = self.db.lock();
        conn.execute(
            "DELETE FROM score_history WHERE fingerprint IN
                 (SELECT fingerprint FROM fingerprints WHERE last_activity_at < ?1)",
            params![cutoff],
        )?;
        let deleted = conn.execute(
            "DELETE FROM fingerprints WHERE last_activity_at < ?1",
            params![cutoff],
        )?;
        if deleted > 0 {
            tracing::info!(deleted, max_age_days, "Purged stale trust data");
        }
        Ok(deleted)
    }

    // ── Transaction-scoped internals ────────────────────────────
    //
    // The intake gate composes these inside its own transaction; the
    // public wrappers above run them under the connection lock.

    pub(crate) fn get_or_create_in(
        &self,
        conn: &Connection,
        fp: &str,
        now: DateTime<Utc>,
    ) -> Result<TrustRecord> {
        conn.execute(
            "INSERT INTO fingerprints (fingerprint, trust_score, created_at, last_activity_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(fingerprint) DO NOTHING",
            params![fp, DEFAULT_SCORE, now.to_rfc3339()],
        )?;
        Ok(conn.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM fingerprints WHERE fingerprint = ?1"),
            params![fp],
            row_to_record,
        )?)
    }

    pub(crate) fn record_submission_in(
        &self,
        conn: &Connection,
        fp: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO fingerprints (fingerprint, report_count, trust_score, created_at, last_activity_at)
             VALUES (?1, 1, ?2, ?3, ?3)
             ON CONFLICT(fingerprint) DO UPDATE SET
                 report_count = report_count + 1,
                 last_activity_at = excluded.last_activity_at",
            params![fp, DEFAULT_SCORE, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub(crate) fn record_duplicate_in(
        &self,
        conn: &Connection,
        fp: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        self.bump_in(conn, fp, Counter::Duplicate, reason, now)
    }

    pub(crate) fn record_verified_in(
        &self,
        conn: &Connection,
        fp: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        self.bump_in(conn, fp, Counter::Verified, reason, now)
    }

    pub(crate) fn record_fake_in(
        &self,
        conn: &Connection,
        fp: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        self.bump_in(conn, fp, Counter::Fake, reason, now)
    }

    pub(crate) fn record_resolved_in(
        &self,
        conn: &Connection,
        fp: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        self.bump_in(conn, fp, Counter::Resolved, reason, now)
    }

    /// Increment one counter, recompute the score from all counters, and
    /// append a history entry. Returns the new score.
    fn bump_in(
        &self,
        conn: &Connection,
        fp: &str,
        counter: Counter,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let column = counter.column();
        conn.execute(
            &format!(
                "INSERT INTO fingerprints (fingerprint, {column}, trust_score, created_at, last_activity_at)
                 VALUES (?1, 1, ?2, ?3, ?3)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                     {column} = {column} + 1,
                     last_activity_at = excluded.last_activity_at"
            ),
            params![fp, DEFAULT_SCORE, now.to_rfc3339()],
        )?;

        let (old_score, verified, resolved, fake, duplicate) = conn.query_row(
            "SELECT trust_score, verified_count, resolved_count, fake_count, duplicate_count
             FROM fingerprints WHERE fingerprint = ?1",
            params![fp],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )?;

        let score = self
            .coefficients
            .compute(verified, resolved, fake, duplicate);
        conn.execute(
            "UPDATE fingerprints SET trust_score = ?2 WHERE fingerprint = ?1",
            params![fp, score],
        )?;

        conn.execute(
            "INSERT INTO score_history (fingerprint, score, delta, reason, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![fp, score, score - old_score, reason, now.to_rfc3339()],
        )?;
        // Keep only the newest HISTORY_CAP entries per fingerprint
        conn.execute(
            "DELETE FROM score_history WHERE fingerprint = ?1 AND id NOT IN
                 (SELECT id FROM score_history WHERE fingerprint = ?1
                  ORDER BY id DESC LIMIT ?2)",
            params![fp, HISTORY_CAP],
        )?;

        Ok(score)
    }
}

impl TrustCoefficients {
    /// Recompute a score from counters. Never drifts incrementally.
    fn compute(&self, verified: i64, resolved: i64, fake: i64, duplicate: i64) -> i64 {
        (DEFAULT_SCORE + verified * self.verified_bonus + resolved * self.resolved_bonus
            - fake * self.fake_penalty
            - duplicate * self.duplicate_penalty)
            .clamp(0, 100)
    }
}

#[derive(Clone, Copy)]
enum Counter {
    Verified,
    Fake,
    Duplicate,
    Resolved,
}

impl Counter {
    fn column(self) -> &'static str {
        match self {
            Self::Verified => "verified_count",
            Self::Fake => "fake_count",
            Self::Duplicate => "duplicate_count",
            Self::Resolved => "resolved_count",
        }
    }
}

const RECORD_COLUMNS: &str = "fingerprint, report_count, verified_count, fake_count, \
     duplicate_count, resolved_count, trust_score, created_at, last_activity_at";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrustRecord> {
    Ok(TrustRecord {
        fingerprint: row.get(0)?,
        report_count: row.get(1)?,
        verified_count: row.get(2)?,
        fake_count: row.get(3)?,
        duplicate_count: row.get(4)?,
        resolved_count: row.get(5)?,
        trust_score: row.get(6)?,
        created_at: parse_ts(&row.get::<_, String>(7)?),
        last_activity_at: parse_ts(&row.get::<_, String>(8)?),
    })
}

pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
