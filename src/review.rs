//! Operator review workflow.
//!
//! Verify and flag-as-fake are idempotent: the report's own flags latch
//! the transition, so the matching ledger credit or penalty happens
//! exactly once no matter how often a timed-out caller retries. Flagging
//! is one-way — there is no unflag path, and the lifecycle status
//! operation refuses to enter or leave "fake".

use crate::config::IntakeConfig;
use crate::db::Database;
use crate::error::{CoreError, Result};
use crate::reports::{Report, ReportStatus, ReportStore};
use crate::trust::TrustLedger;
use chrono::{Duration, Utc};

/// Operator review operations over the shared database.
#[derive(Clone)]
pub struct ReviewWorkflow {
    db: Database,
    ledger: TrustLedger,
    reports: ReportStore,
    config: IntakeConfig,
}

impl ReviewWorkflow {
    pub fn new(db: Database, ledger: TrustLedger, reports: ReportStore, config: IntakeConfig) -> Self {
        Self {
            db,
            ledger,
            reports,
            config,
        }
    }

    /// Mark a report as operator-verified, releasing it from the hold
    /// queue and crediting the submitter. No-op if already verified.
    pub fn verify(&self, report_id: &str) -> Result<Report> {
        let now = Utc::now();
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        let report = ReportStore::get_in(&tx, report_id)?
            .ok_or_else(|| CoreError::NotFound(format!("report {report_id}")))?;
        if report.verified_by_operator {
            return Ok(report);
        }

        ReportStore::set_verified_in(&tx, report_id, now)?;
        self.ledger.record_verified_in(
            &tx,
            &report.fingerprint,
            &format!("report_verified:{report_id}"),
            now,
        )?;
        let updated = ReportStore::get_in(&tx, report_id)?
            .ok_or_else(|| CoreError::NotFound(format!("report {report_id}")))?;
        tx.commit()?;

        tracing::info!(reference = %updated.reference_number, "Report verified by operator");
        Ok(updated)
    }

    /// Flag a report as fake: terminal status, queue cleared, steep
    /// ledger penalty. No-op if already flagged.
    pub fn mark_fake(&self, report_id: &str) -> Result<Report> {
        let now = Utc::now();
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        let report = ReportStore::get_in(&tx, report_id)?
            .ok_or_else(|| CoreError::NotFound(format!("report {report_id}")))?;
        if report.flagged_as_fake {
            return Ok(report);
        }

        ReportStore::set_fake_in(&tx, report_id, now)?;
        self.ledger.record_fake_in(
            &tx,
            &report.fingerprint,
            &format!("report_fake:{report_id}"),
            now,
        )?;
        let updated = ReportStore::get_in(&tx, report_id)?
            .ok_or_else(|| CoreError::NotFound(format!("report {report_id}")))?;
        tx.commit()?;

        tracing::warn!(reference = %updated.reference_number, "Report flagged as fake");
        Ok(updated)
    }

    /// Move a report through its operational lifecycle. Entering
    /// "resolved" credits the submitter once; "fake" is owned by
    /// `mark_fake` and rejected here in both directions.
    pub fn update_status(&self, report_id: &str, status: ReportStatus) -> Result<Report> {
        if status == ReportStatus::Fake {
            return Err(CoreError::Validation(
                "use mark_fake to flag a report".into(),
            ));
        }
        let now = Utc::now();
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        let report = ReportStore::get_in(&tx, report_id)?
            .ok_or_else(|| CoreError::NotFound(format!("report {report_id}")))?;
        if report.status == ReportStatus::Fake {
            return Err(CoreError::Validation(
                "a fake report cannot re-enter the lifecycle".into(),
            ));
        }

        ReportStore::set_status_in(&tx, report_id, status, now)?;
        if status == ReportStatus::Resolved
            && ReportStore::mark_resolved_credited_in(&tx, report_id)?
        {
            self.ledger.record_resolved_in(
                &tx,
                &report.fingerprint,
                &format!("report_resolved:{report_id}"),
                now,
            )?;
        }
        let updated = ReportStore::get_in(&tx, report_id)?
            .ok_or_else(|| CoreError::NotFound(format!("report {report_id}")))?;
        tx.commit()?;

        tracing::info!(
            reference = %updated.reference_number,
            status = status.as_str(),
            "Report status updated"
        );
        Ok(updated)
    }

    /// Reports currently held for review, oldest first. Holds whose
    /// window elapsed are released first — release makes the report
    /// publicly visible but does not imply verification.
    pub fn low_trust_queue(&self) -> Result<Vec<Report>> {
        self.release_expired_holds()?;
        self.reports.low_trust_queue()
    }

    /// Release reports whose hold window has elapsed. Returns the count.
    pub fn release_expired_holds(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::minutes(self.config.hold_duration_minutes);
        self.reports.release_expired_holds(cutoff)
    }
}
