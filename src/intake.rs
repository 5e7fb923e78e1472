//! Intake gate: validation, flood heuristic, trust-gated admission.
//!
//! A submission either fails validation with zero side effects, collapses
//! onto an earlier submission via its idempotency token, or is persisted
//! together with its trust-counter updates in one transaction — no path
//! leaves a reference number without its report or a counter increment
//! without the stored report.

use crate::config::IntakeConfig;
use crate::db::Database;
use crate::error::{CoreError, Result};
use crate::reports::{NewReport, Report, ReportStatus, ReportStore};
use crate::trust::TrustLedger;
use chrono::{DateTime, Duration, Utc};
use rand::RngExt;
use rusqlite::Connection;

/// Attempts to allocate a collision-free reference number.
const MAX_REFERENCE_ATTEMPTS: u32 = 5;

/// Reference suffix alphabet, ambiguous glyphs excluded.
const REFERENCE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Reference suffix length.
const REFERENCE_SUFFIX_LEN: usize = 6;

/// Outcome handed back to the submitting client.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SubmitReceipt {
    pub report_id: String,
    pub reference_number: String,
    /// True when the report is held for review instead of publishing.
    pub queued: bool,
    /// True when an idempotency token matched an earlier submission.
    pub deduplicated: bool,
    pub notice: Option<String>,
}

/// The intake gate. Shares the operational database with the ledger.
#[derive(Clone)]
pub struct IntakeGate {
    db: Database,
    ledger: TrustLedger,
    config: IntakeConfig,
}

impl IntakeGate {
    pub fn new(db: Database, ledger: TrustLedger, config: IntakeConfig) -> Self {
        Self { db, ledger, config }
    }

    /// Gate one submission. See the module docs for the atomicity
    /// contract.
    pub fn submit(&self, payload: &NewReport) -> Result<SubmitReceipt> {
        self.validate(payload)?;

        let now = Utc::now();
        let mut conn = self.db.lock();

        // Replayed submission: hand back the original receipt
        if let Some(token) = payload.idempotency_token.as_deref() {
            if let Some(existing) = ReportStore::find_by_token_in(&conn, token)? {
                tracing::debug!(
                    reference = %existing.reference_number,
                    "Duplicate idempotency token collapsed"
                );
                return Ok(receipt_for(&existing, true));
            }
        }

        let tx = conn.transaction()?;

        // Flood heuristic runs before the admission score is read, so a
        // flooding device is penalized on the submission that trips it
        if self.config.flood.report_threshold > 0 {
            let since = now - Duration::minutes(self.config.flood.window_minutes);
            let prior = ReportStore::recent_nearby_count_in(
                &tx,
                &payload.fingerprint,
                since,
                payload.location,
                self.config.flood.radius_meters,
            )?;
            if prior + 1 >= self.config.flood.report_threshold {
                self.ledger.record_duplicate_in(
                    &tx,
                    &payload.fingerprint,
                    "flood_detection",
                    now,
                )?;
                tracing::warn!(
                    nearby = prior + 1,
                    window_minutes = self.config.flood.window_minutes,
                    "Flood detected, duplicate penalty applied"
                );
            }
        }

        let record = self
            .ledger
            .get_or_create_in(&tx, &payload.fingerprint, now)?;
        let score = record.trust_score;
        let queued = score < self.config.admission_threshold;

        let report = self.insert_with_fresh_reference(&tx, payload, score, queued, now)?;
        self.ledger
            .record_submission_in(&tx, &payload.fingerprint, now)?;
        tx.commit()?;

        tracing::info!(
            reference = %report.reference_number,
            score,
            queued,
            category = %report.category,
            "Report accepted"
        );
        Ok(receipt_for(&report, false))
    }

    /// Reject malformed payloads before any persistence side effect.
    fn validate(&self, payload: &NewReport) -> Result<()> {
        if payload.category.trim().is_empty() {
            return Err(CoreError::Validation("category is required".into()));
        }
        if payload.description.trim().is_empty() {
            return Err(CoreError::Validation("description is required".into()));
        }
        if payload.fingerprint.trim().is_empty() {
            return Err(CoreError::Validation("device fingerprint is required".into()));
        }
        let loc = payload.location;
        if !loc.lat.is_finite()
            || !loc.lng.is_finite()
            || loc.lat.abs() > 90.0
            || loc.lng.abs() > 180.0
        {
            return Err(CoreError::Validation(format!(
                "location out of range: ({}, {})",
                loc.lat, loc.lng
            )));
        }
        if self
            .config
            .photo_required_categories
            .iter()
            .any(|c| c == &payload.category)
            && payload.photo_url.as_deref().is_none_or(str::is_empty)
        {
            return Err(CoreError::Validation(format!(
                "category '{}' requires photographic evidence",
                payload.category
            )));
        }
        Ok(())
    }

    fn insert_with_fresh_reference(
        &self,
        tx: &Connection,
        payload: &NewReport,
        score: i64,
        queued: bool,
        now: DateTime<Utc>,
    ) -> Result<Report> {
        for _ in 0..MAX_REFERENCE_ATTEMPTS {
            let report = Report {
                id: uuid::Uuid::new_v4().to_string(),
                reference_number: generate_reference(now),
                category: payload.category.clone(),
                description: payload.description.clone(),
                location: payload.location,
                photo_url: payload.photo_url.clone(),
                fingerprint: payload.fingerprint.clone(),
                status: ReportStatus::New,
                trust_score_at_submission: score,
                queued,
                queued_at: queued.then_some(now),
                flagged_as_fake: false,
                verified_by_operator: false,
                created_at: now,
                updated_at: now,
            };
            match ReportStore::insert_in(tx, &report, payload.idempotency_token.as_deref()) {
                Ok(()) => return Ok(report),
                Err(err) if constraint_on(&err, "reference_number") => continue,
                Err(err) if constraint_on(&err, "idempotency_token") => {
                    return Err(CoreError::Conflict(
                        "idempotency token already applied".into(),
                    ));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(CoreError::Transient(
            "could not allocate a unique reference number".into(),
        ))
    }
}

fn receipt_for(report: &Report, deduplicated: bool) -> SubmitReceipt {
    SubmitReceipt {
        report_id: report.id.clone(),
        reference_number: report.reference_number.clone(),
        queued: report.queued,
        deduplicated,
        notice: report.queued.then(|| {
            "Your report was received and will become publicly visible after review.".to_string()
        }),
    }
}

/// Human-readable reference: date stamp plus a random suffix. Uniqueness
/// is enforced by the store's UNIQUE constraint, not by this generator.
fn generate_reference(now: DateTime<Utc>) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..REFERENCE_SUFFIX_LEN)
        .map(|_| REFERENCE_CHARSET[rng.random_range(0..REFERENCE_CHARSET.len())] as char)
        .collect();
    format!("CR-{}-{}", now.format("%Y%m%d"), suffix)
}

fn constraint_on(err: &rusqlite::Error, column: &str) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, Some(msg))
            if inner.code == rusqlite::ErrorCode::ConstraintViolation && msg.contains(column)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrustCoefficients;
    use crate::reports::GeoPoint;

    fn gate() -> (IntakeGate, TrustLedger, ReportStore) {
        let db = Database::open_in_memory().unwrap();
        let ledger = TrustLedger::new(db.clone(), TrustCoefficients::default());
        let store = ReportStore::new(db.clone());
        let gate = IntakeGate::new(db, ledger.clone(), IntakeConfig::default());
        (gate, ledger, store)
    }

    fn payload(fp: &str) -> NewReport {
        NewReport {
            category: "Vandalism".into(),
            description: "Broken streetlight cover".into(),
            location: GeoPoint {
                lat: -1.9441,
                lng: 30.0619,
            },
            photo_url: None,
            fingerprint: fp.into(),
            idempotency_token: None,
        }
    }

    #[test]
    fn neutral_fingerprint_publishes_immediately() {
        let (gate, _, store) = gate();
        let receipt = gate.submit(&payload("fp1")).unwrap();
        assert!(!receipt.queued);
        assert!(receipt.notice.is_none());
        let report = store.get(&receipt.report_id).unwrap().unwrap();
        assert_eq!(report.trust_score_at_submission, 50);
        assert!(report.queued_at.is_none());
    }

    #[test]
    fn low_trust_fingerprint_is_held() {
        let (gate, ledger, store) = gate();
        ledger.record_fake("fp1", "test").unwrap(); // 50 - 15 = 35
        let receipt = gate.submit(&payload("fp1")).unwrap();
        assert!(receipt.queued);
        assert!(receipt.notice.is_some());
        let report = store.get(&receipt.report_id).unwrap().unwrap();
        assert_eq!(report.trust_score_at_submission, 35);
        assert!(report.queued_at.is_some());
        assert_eq!(store.low_trust_queue().unwrap().len(), 1);
    }

    #[test]
    fn missing_photo_for_high_risk_category_rejects_without_side_effects() {
        let (gate, ledger, store) = gate();
        let mut p = payload("fp1");
        p.category = "Theft".into();
        let err = gate.submit(&p).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        // No report stored, no trust record sighted
        assert!(store.list(&Default::default()).unwrap().is_empty());
        assert_eq!(ledger.analytics().unwrap().total_fingerprints, 0);

        // Photo satisfies the requirement
        p.photo_url = Some("https://cdn.example/evidence.jpg".into());
        assert!(gate.submit(&p).is_ok());
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let (gate, _, _) = gate();

        let mut p = payload("fp1");
        p.description = "  ".into();
        assert!(matches!(gate.submit(&p), Err(CoreError::Validation(_))));

        let mut p = payload("fp1");
        p.location.lat = 91.0;
        assert!(matches!(gate.submit(&p), Err(CoreError::Validation(_))));

        let mut p = payload("fp1");
        p.fingerprint = String::new();
        assert!(matches!(gate.submit(&p), Err(CoreError::Validation(_))));
    }

    #[test]
    fn idempotency_token_collapses_resubmission() {
        let (gate, ledger, store) = gate();
        let mut p = payload("fp1");
        p.idempotency_token = Some("token-123".into());

        let first = gate.submit(&p).unwrap();
        assert!(!first.deduplicated);
        let second = gate.submit(&p).unwrap();
        assert!(second.deduplicated);
        assert_eq!(first.reference_number, second.reference_number);

        assert_eq!(store.list(&Default::default()).unwrap().len(), 1);
        let record = ledger.get_or_create("fp1").unwrap();
        assert_eq!(record.report_count, 1);
    }

    #[test]
    fn flood_of_nearby_reports_draws_duplicate_penalty() {
        let (gate, ledger, _) = gate();
        for _ in 0..3 {
            gate.submit(&payload("fp1")).unwrap();
        }
        assert_eq!(ledger.get_or_create("fp1").unwrap().duplicate_count, 0);

        // Fourth similar report trips the heuristic
        let receipt = gate.submit(&payload("fp1")).unwrap();
        let record = ledger.get_or_create("fp1").unwrap();
        assert_eq!(record.duplicate_count, 1);
        assert_eq!(record.trust_score, 45);
        // 45 is still above the admission threshold
        assert!(!receipt.queued);

        // Two more floods push the device below the threshold
        gate.submit(&payload("fp1")).unwrap();
        let receipt = gate.submit(&payload("fp1")).unwrap();
        assert_eq!(ledger.get_or_create("fp1").unwrap().trust_score, 35);
        assert!(receipt.queued);
    }

    #[test]
    fn distant_reports_do_not_count_as_flood() {
        let (gate, ledger, _) = gate();
        for i in 0..5 {
            let mut p = payload("fp1");
            // Spread reports ~1.1 km apart
            p.location.lng += i as f64 * 0.01;
            gate.submit(&p).unwrap();
        }
        assert_eq!(ledger.get_or_create("fp1").unwrap().duplicate_count, 0);
    }

    #[test]
    fn references_are_unique_and_well_formed() {
        let (gate, _, _) = gate();
        let mut seen = std::collections::HashSet::new();
        for i in 0..100 {
            let receipt = gate.submit(&payload(&format!("fp{i}"))).unwrap();
            assert!(receipt.reference_number.starts_with("CR-"));
            assert!(seen.insert(receipt.reference_number));
        }
    }
}
