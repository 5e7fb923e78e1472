//! Hotspot cluster engine.
//!
//! Periodically (or on demand) recomputes the full cluster set from the
//! currently-eligible reports and swaps it in atomically. Recomputing
//! from scratch keeps every snapshot consistent with the parameters that
//! produced it; readers hold an `Arc` to the previous snapshot and are
//! never blocked by an in-flight run. Identical inputs and parameters
//! reproduce an identical set.

mod dbscan;

pub use dbscan::DbscanParams;

use crate::config::ClusteringConfig;
use crate::error::{CoreError, Result};
use crate::geo;
use crate::reports::{GeoPoint, ReportStore};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Risk classification from cluster size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// One geographically dense group of eligible reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotCluster {
    /// Position in discovery order; stable across identical runs.
    pub id: usize,
    /// Centroid of member coordinates.
    pub center: GeoPoint,
    /// Max member-to-centroid distance. Chained clusters exceed epsilon.
    pub radius_meters: f64,
    pub member_count: usize,
    /// Member report ids, ascending.
    pub member_ids: Vec<String>,
    /// Mean submission-time trust score of the members.
    pub average_trust_score: f64,
    pub risk_level: RiskLevel,
}

/// A complete clustering result. Wholly replaced each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSet {
    pub generated_at: DateTime<Utc>,
    pub parameters: DbscanParams,
    pub clusters: Vec<HotspotCluster>,
}

/// Cluster engine over the report store.
pub struct ClusterEngine {
    reports: ReportStore,
    config: ClusteringConfig,
    current: RwLock<Arc<ClusterSet>>,
}

impl ClusterEngine {
    pub fn new(reports: ReportStore, config: ClusteringConfig) -> Self {
        let empty = Arc::new(ClusterSet {
            generated_at: Utc::now(),
            parameters: DbscanParams {
                epsilon_meters: config.epsilon_meters,
                min_samples: config.min_samples,
            },
            clusters: Vec::new(),
        });
        Self {
            reports,
            config,
            current: RwLock::new(empty),
        }
    }

    /// The latest complete snapshot. Never blocks on an in-flight run.
    pub fn current(&self) -> Arc<ClusterSet> {
        self.current.read().clone()
    }

    /// Recompute the cluster set and swap it in. Parameter overrides are
    /// validated before any stored state is touched; the last run to
    /// finish wins.
    pub fn refresh(&self, params: Option<DbscanParams>) -> Result<Arc<ClusterSet>> {
        let params = params.unwrap_or(DbscanParams {
            epsilon_meters: self.config.epsilon_meters,
            min_samples: self.config.min_samples,
        });
        validate_params(&params)?;

        let since = Utc::now() - Duration::hours(self.config.window_hours);
        let eligible = self.reports.eligible_for_clustering(since)?;
        let groups = dbscan::cluster(&eligible, &params);

        let clusters: Vec<HotspotCluster> = groups
            .iter()
            .enumerate()
            .map(|(id, members)| {
                let coords: Vec<GeoPoint> =
                    members.iter().map(|&i| eligible[i].location).collect();
                let center = geo::centroid(&coords);
                let radius_meters = coords
                    .iter()
                    .map(|&p| geo::haversine_meters(p, center))
                    .fold(0.0f64, f64::max);
                let average_trust_score = members
                    .iter()
                    .map(|&i| eligible[i].trust_score_at_submission as f64)
                    .sum::<f64>()
                    / members.len() as f64;
                HotspotCluster {
                    id,
                    center,
                    radius_meters,
                    member_count: members.len(),
                    member_ids: members.iter().map(|&i| eligible[i].id.clone()).collect(),
                    average_trust_score,
                    risk_level: self.risk_level(members.len()),
                }
            })
            .collect();

        let noise = eligible.len() - clusters.iter().map(|c| c.member_count).sum::<usize>();
        tracing::info!(
            eligible = eligible.len(),
            clusters = clusters.len(),
            noise,
            epsilon_meters = params.epsilon_meters,
            min_samples = params.min_samples,
            "Cluster refresh complete"
        );

        let set = Arc::new(ClusterSet {
            generated_at: Utc::now(),
            parameters: params,
            clusters,
        });
        *self.current.write() = set.clone();
        Ok(set)
    }

    fn risk_level(&self, member_count: usize) -> RiskLevel {
        if member_count >= self.config.risk_high_threshold {
            RiskLevel::High
        } else if member_count >= self.config.risk_medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

fn validate_params(params: &DbscanParams) -> Result<()> {
    if !(params.epsilon_meters.is_finite() && params.epsilon_meters > 0.0) {
        return Err(CoreError::Configuration(format!(
            "epsilon_meters must be positive, got {}",
            params.epsilon_meters
        )));
    }
    if params.min_samples < 1 {
        return Err(CoreError::Configuration(
            "min_samples must be at least 1".into(),
        ));
    }
    Ok(())
}
