//! SQLite persistence for incident reports.
//!
//! Public methods take the connection lock per call; `*_in` methods run
//! against a caller-supplied connection so the intake gate and review
//! workflow can compose them inside one transaction.

use super::{GeoPoint, Report, ReportStatus};
use crate::db::Database;
use crate::error::Result;
use crate::geo;
use crate::trust::parse_ts;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

/// Hard cap on listing queries.
const LIST_LIMIT_MAX: u32 = 1000;

/// Filters for report listings.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub category: Option<String>,
    pub status: Option<ReportStatus>,
    /// Defaults to 100, capped at 1000.
    pub limit: Option<u32>,
}

/// A report's clustering-relevant projection.
#[derive(Debug, Clone)]
pub struct EligibleReport {
    pub id: String,
    pub location: GeoPoint,
    pub trust_score_at_submission: i64,
}

/// Report store over the shared operational database.
#[derive(Clone)]
pub struct ReportStore {
    db: Database,
}

impl ReportStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fetch a report by id.
    pub fn get(&self, id: &str) -> Result<Option<Report>> {
        let conn = self.db.lock();
        Ok(Self::get_in(&conn, id)?)
    }

    /// Reports currently held for review, oldest first.
    pub fn low_trust_queue(&self) -> Result<Vec<Report>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports
             WHERE queued = 1 ORDER BY queued_at ASC, id ASC"
        ))?;
        let out = collect_reports(stmt.query_map([], row_to_report)?);
        out
    }

    /// Listing for dashboards: optional category/status filters, newest
    /// first, bounded limit.
    pub fn list(&self, filter: &ReportFilter) -> Result<Vec<Report>> {
        let conn = self.db.lock();
        let mut sql = format!("SELECT {REPORT_COLUMNS} FROM reports WHERE 1=1");
        let mut bind_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        if let Some(ref category) = filter.category {
            sql.push_str(&format!(" AND category = ?{param_idx}"));
            bind_values.push(Box::new(category.clone()));
            param_idx += 1;
        }
        if let Some(status) = filter.status {
            sql.push_str(&format!(" AND status = ?{param_idx}"));
            bind_values.push(Box::new(status.as_str().to_string()));
            param_idx += 1;
        }

        sql.push_str(" ORDER BY created_at DESC, id DESC");
        let limit = filter.limit.unwrap_or(100).min(LIST_LIMIT_MAX);
        sql.push_str(&format!(" LIMIT ?{param_idx}"));
        bind_values.push(Box::new(limit));

        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            bind_values.iter().map(|b| b.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let out = collect_reports(stmt.query_map(params_refs.as_slice(), row_to_report)?);
        out
    }

    /// Release reports whose hold window has elapsed. Returns how many
    /// became publicly visible. `queued_at` is left in place for audit.
    pub fn release_expired_holds(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.db.lock();
        let released = conn.execute(
            "UPDATE reports SET queued = 0, updated_at = ?2
             WHERE queued = 1 AND queued_at <= ?1",
            params![cutoff.to_rfc3339(), Utc::now().to_rfc3339()],
        )?;
        if released > 0 {
            tracing::info!(released, "Hold window elapsed, reports released to public view");
        }
        Ok(released)
    }

    /// Reports eligible for clustering: not held, not fake, inside the
    /// recent window. Ascending id gives the cluster engine its stable
    /// iteration order.
    pub fn eligible_for_clustering(&self, since: DateTime<Utc>) -> Result<Vec<EligibleReport>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id, lat, lng, trust_score_at_submission FROM reports
             WHERE queued = 0 AND status != 'fake' AND created_at >= ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| {
            Ok(EligibleReport {
                id: row.get(0)?,
                location: GeoPoint {
                    lat: row.get(1)?,
                    lng: row.get(2)?,
                },
                trust_score_at_submission: row.get(3)?,
            })
        })?;
        let mut eligible = Vec::new();
        for row in rows {
            eligible.push(row?);
        }
        Ok(eligible)
    }

    // ── Transaction-scoped internals ────────────────────────────

    pub(crate) fn get_in(conn: &Connection, id: &str) -> rusqlite::Result<Option<Report>> {
        conn.query_row(
            &format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?1"),
            params![id],
            row_to_report,
        )
        .optional()
    }

    pub(crate) fn find_by_token_in(
        conn: &Connection,
        token: &str,
    ) -> rusqlite::Result<Option<Report>> {
        conn.query_row(
            &format!("SELECT {REPORT_COLUMNS} FROM reports WHERE idempotency_token = ?1"),
            params![token],
            row_to_report,
        )
        .optional()
    }

    /// Insert a freshly gated report. Constraint violations (reference
    /// number, idempotency token) surface as raw `rusqlite::Error` for
    /// the intake gate to dispatch on.
    pub(crate) fn insert_in(conn: &Connection, report: &Report, token: Option<&str>) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO reports
                (id, reference_number, category, description, lat, lng, photo_url,
                 fingerprint, status, trust_score_at_submission, queued, queued_at,
                 flagged_as_fake, verified_by_operator, idempotency_token,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                report.id,
                report.reference_number,
                report.category,
                report.description,
                report.location.lat,
                report.location.lng,
                report.photo_url,
                report.fingerprint,
                report.status.as_str(),
                report.trust_score_at_submission,
                report.queued as i64,
                report.queued_at.map(|t| t.to_rfc3339()),
                report.flagged_as_fake as i64,
                report.verified_by_operator as i64,
                token,
                report.created_at.to_rfc3339(),
                report.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Count reports from one fingerprint since `since` within
    /// `radius_meters` of `center`. Drives the flood heuristic; distance
    /// is checked in Rust since SQLite has no geo functions.
    pub(crate) fn recent_nearby_count_in(
        conn: &Connection,
        fp: &str,
        since: DateTime<Utc>,
        center: GeoPoint,
        radius_meters: f64,
    ) -> rusqlite::Result<u32> {
        let mut stmt = conn.prepare(
            "SELECT lat, lng FROM reports
             WHERE fingerprint = ?1 AND created_at >= ?2",
        )?;
        let rows = stmt.query_map(params![fp, since.to_rfc3339()], |row| {
            Ok(GeoPoint {
                lat: row.get(0)?,
                lng: row.get(1)?,
            })
        })?;
        let mut nearby = 0u32;
        for row in rows {
            if geo::haversine_meters(row?, center) <= radius_meters {
                nearby += 1;
            }
        }
        Ok(nearby)
    }

    pub(crate) fn set_verified_in(
        conn: &Connection,
        id: &str,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE reports SET verified_by_operator = 1, queued = 0, updated_at = ?2
             WHERE id = ?1",
            params![id, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub(crate) fn set_fake_in(
        conn: &Connection,
        id: &str,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE reports SET flagged_as_fake = 1, status = 'fake', queued = 0, updated_at = ?2
             WHERE id = ?1",
            params![id, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub(crate) fn set_status_in(
        conn: &Connection,
        id: &str,
        status: ReportStatus,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE reports SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// One-shot latch for the resolution bonus. Returns true if this
    /// call flipped the latch.
    pub(crate) fn mark_resolved_credited_in(
        conn: &Connection,
        id: &str,
    ) -> rusqlite::Result<bool> {
        let changed = conn.execute(
            "UPDATE reports SET resolved_credited = 1
             WHERE id = ?1 AND resolved_credited = 0",
            params![id],
        )?;
        Ok(changed > 0)
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }
}

const REPORT_COLUMNS: &str = "id, reference_number, category, description, lat, lng, photo_url, \
     fingerprint, status, trust_score_at_submission, queued, queued_at, \
     flagged_as_fake, verified_by_operator, created_at, updated_at";

fn row_to_report(row: &rusqlite::Row<'_>) -> rusqlite::Result<Report> {
    Ok(Report {
        id: row.get(0)?,
        reference_number: row.get(1)?,
        category: row.get(2)?,
        description: row.get(3)?,
        location: GeoPoint {
            lat: row.get(4)?,
            lng: row.get(5)?,
        },
        photo_url: row.get(6)?,
        fingerprint: row.get(7)?,
        status: ReportStatus::from_str_lossy(&row.get::<_, String>(8)?),
        trust_score_at_submission: row.get(9)?,
        queued: row.get::<_, i64>(10)? != 0,
        queued_at: row
            .get::<_, Option<String>>(11)?
            .map(|raw| parse_ts(&raw)),
        flagged_as_fake: row.get::<_, i64>(12)? != 0,
        verified_by_operator: row.get::<_, i64>(13)? != 0,
        created_at: parse_ts(&row.get::<_, String>(14)?),
        updated_at: parse_ts(&row.get::<_, String>(15)?),
    })
}

fn collect_reports(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<Report>>,
) -> Result<Vec<Report>> {
    let mut reports = Vec::new();
    for row in rows {
        reports.push(row?);
    }
    Ok(reports)
}
