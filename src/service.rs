//! Service facade over the reporting core.
//!
//! External surfaces (HTTP handlers, schedulers, admin tooling) talk to
//! this one type. Every operation is synchronous and safe to repeat;
//! scheduling of periodic cluster refreshes and buffer syncs lives with
//! the caller.

use crate::cluster::{ClusterEngine, ClusterSet, DbscanParams};
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::intake::{IntakeGate, SubmitReceipt};
use crate::reports::{NewReport, Report, ReportFilter, ReportStatus, ReportStore};
use crate::review::ReviewWorkflow;
use crate::trust::{AbuseAnalytics, MaskedTrustRecord, TrustLedger};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Database file name inside the data directory.
const DB_FILE: &str = "civicwatch.db";

/// Result of an operator-triggered trust-data purge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub deleted_count: usize,
}

/// The assembled reporting core.
pub struct ReportService {
    config: Config,
    ledger: TrustLedger,
    gate: IntakeGate,
    review: ReviewWorkflow,
    clusters: ClusterEngine,
    reports: ReportStore,
}

impl ReportService {
    /// Open the service over a data directory.
    pub fn open(data_dir: &Path, config: Config) -> Result<Self> {
        let db = Database::open(&data_dir.join(DB_FILE))?;
        Ok(Self::build(db, config))
    }

    /// Fully in-memory service for tests and ephemeral deployments.
    pub fn open_in_memory(config: Config) -> Result<Self> {
        Ok(Self::build(Database::open_in_memory()?, config))
    }

    fn build(db: Database, config: Config) -> Self {
        let ledger = TrustLedger::new(db.clone(), config.trust.coefficients.clone());
        let reports = ReportStore::new(db.clone());
        let gate = IntakeGate::new(db.clone(), ledger.clone(), config.intake.clone());
        let review = ReviewWorkflow::new(
            db,
            ledger.clone(),
            reports.clone(),
            config.intake.clone(),
        );
        let clusters = ClusterEngine::new(reports.clone(), config.clustering.clone());
        Self {
            config,
            ledger,
            gate,
            review,
            clusters,
            reports,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ── Submission ──────────────────────────────────────────────

    /// Gate and persist a citizen submission.
    pub fn submit_report(&self, payload: &NewReport) -> Result<SubmitReceipt> {
        self.gate.submit(payload)
    }

    // ── Clusters ────────────────────────────────────────────────

    /// Latest hotspot snapshot; never blocks on an in-flight refresh.
    pub fn get_clusters(&self) -> Arc<ClusterSet> {
        self.clusters.current()
    }

    /// Recompute hotspots now, optionally with overridden parameters.
    /// Expired holds are released first so newly public reports join
    /// the eligible set.
    pub fn refresh_clusters(&self, params: Option<DbscanParams>) -> Result<Arc<ClusterSet>> {
        self.review.release_expired_holds()?;
        self.clusters.refresh(params)
    }

    // ── Review ──────────────────────────────────────────────────

    pub fn verify_report(&self, report_id: &str) -> Result<Report> {
        self.review.verify(report_id)
    }

    pub fn mark_report_fake(&self, report_id: &str) -> Result<Report> {
        self.review.mark_fake(report_id)
    }

    pub fn update_report_status(&self, report_id: &str, status: ReportStatus) -> Result<Report> {
        self.review.update_status(report_id, status)
    }

    /// Held reports awaiting review, oldest first.
    pub fn get_low_trust_queue(&self) -> Result<Vec<Report>> {
        self.review.low_trust_queue()
    }

    // ── Trust & admin ───────────────────────────────────────────

    /// Masked trust record for a fingerprint prefix.
    pub fn get_trust_info(&self, fingerprint_prefix: &str) -> Result<MaskedTrustRecord> {
        self.ledger.masked_info(fingerprint_prefix)
    }

    pub fn abuse_analytics(&self) -> Result<AbuseAnalytics> {
        self.ledger.analytics()
    }

    pub fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<Report>> {
        self.reports.list(filter)
    }

    /// Purge trust data past the retention horizon. Defaults to the
    /// configured horizon when no override is given.
    pub fn cleanup_old_trust_data(&self, max_age_days: Option<i64>) -> Result<CleanupOutcome> {
        let max_age_days = max_age_days.unwrap_or(self.config.retention.trust_max_age_days);
        let deleted_count = self.ledger.cleanup(max_age_days)?;
        Ok(CleanupOutcome { deleted_count })
    }

    /// The intake gate, for wiring an `OfflineBuffer` replay.
    pub fn intake_gate(&self) -> &IntakeGate {
        &self.gate
    }
}
