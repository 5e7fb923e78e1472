//! Incident report model and persistence.
//!
//! A report carries its gating metadata next to the incident data: the
//! submitter's trust score at submission time, whether intake held it for
//! review, and the operator flags the review workflow mutates. The queue
//! timestamp survives release so operators can audit a report's hold
//! history after it becomes public.

mod store;

pub use store::{EligibleReport, ReportFilter, ReportStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A WGS-84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Report lifecycle states. "fake" is terminal and reachable only
/// through the review workflow's flagging path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    New,
    Investigating,
    Resolved,
    Closed,
    Fake,
}

impl ReportStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::New => "new",
            Self::Investigating => "investigating",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
            Self::Fake => "fake",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "investigating" => Self::Investigating,
            "resolved" => Self::Resolved,
            "closed" => Self::Closed,
            "fake" => Self::Fake,
            _ => Self::New,
        }
    }
}

/// Payload for a new submission, before the gate touches it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
    pub category: String,
    pub description: String,
    pub location: GeoPoint,
    pub photo_url: Option<String>,
    /// Pseudonymous device token from the fingerprint codec.
    pub fingerprint: String,
    /// Client-generated token for duplicate-resubmission collapse.
    /// Always present on offline-buffer replays.
    pub idempotency_token: Option<String>,
}

/// A stored incident report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub reference_number: String,
    pub category: String,
    pub description: String,
    pub location: GeoPoint,
    pub photo_url: Option<String>,
    pub fingerprint: String,
    pub status: ReportStatus,
    pub trust_score_at_submission: i64,
    /// True while the report is held out of public view.
    pub queued: bool,
    /// When the hold began. Kept after release for audit.
    pub queued_at: Option<DateTime<Utc>>,
    pub flagged_as_fake: bool,
    pub verified_by_operator: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            ReportStatus::New,
            ReportStatus::Investigating,
            ReportStatus::Resolved,
            ReportStatus::Closed,
            ReportStatus::Fake,
        ] {
            assert_eq!(ReportStatus::from_str_lossy(status.as_str()), status);
        }
    }

    #[test]
    fn unknown_status_reads_as_new() {
        assert_eq!(ReportStatus::from_str_lossy("garbage"), ReportStatus::New);
    }
}
