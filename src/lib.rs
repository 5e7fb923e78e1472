//! CivicWatch — abuse-resistant core for citizen incident reporting.
//!
//! The crate implements the two parts of a community-safety platform
//! that need real design: keeping fake and duplicate reports from
//! polluting the map, and turning raw report coordinates into hotspot
//! summaries.
//!
//! - [`fingerprint`] — pseudonymous device token codec
//! - [`trust`] — per-fingerprint reputation ledger with threshold tiers
//! - [`intake`] — validation, flood heuristic, trust-gated admission
//! - [`review`] — idempotent operator verify / flag-as-fake workflow
//! - [`cluster`] — deterministic DBSCAN hotspot engine
//! - [`offline`] — durable client-side submission queue with idempotent
//!   replay
//! - [`service`] — the synchronous facade external surfaces call
//!
//! Transport, UI, and authorization are deliberately out of scope; the
//! facade is storage-backed by an embedded SQLite database and exposes
//! only synchronous, idempotently repeatable operations.

pub mod cluster;
pub mod config;
pub mod db;
pub mod error;
pub mod fingerprint;
pub mod geo;
pub mod intake;
pub mod offline;
pub mod reports;
pub mod review;
pub mod service;
pub mod trust;

pub use cluster::{ClusterSet, DbscanParams, HotspotCluster, RiskLevel};
pub use config::Config;
pub use error::{CoreError, Result};
pub use fingerprint::DeviceAttributes;
pub use intake::SubmitReceipt;
pub use offline::{OfflineBuffer, ReplayOutcome};
pub use reports::{GeoPoint, NewReport, Report, ReportFilter, ReportStatus};
pub use service::{CleanupOutcome, ReportService};
pub use trust::{AbuseAnalytics, MaskedTrustRecord, TrustRecord, TrustTier};
