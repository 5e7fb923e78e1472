//! Configuration for the reporting core.
//!
//! Every tunable the external surfaces may adjust lives here: admission
//! threshold, hold window, clustering parameters, trust coefficients,
//! flood heuristic, and retention horizon. All fields have serde defaults
//! so a partial TOML file (or none at all) yields a working config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub intake: IntakeConfig,
    pub trust: TrustConfig,
    pub clustering: ClusteringConfig,
    pub retention: RetentionConfig,
}

impl Config {
    /// Load configuration from a TOML file. Missing keys fall back to
    /// their defaults; a missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }
}

// ── Intake ──────────────────────────────────────────────────────

/// Intake gate tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Submissions below this trust score are held for review.
    pub admission_threshold: i64,
    /// How long a held report stays out of public view before it is
    /// released automatically (without implying verification).
    pub hold_duration_minutes: i64,
    /// Categories that require photographic evidence.
    pub photo_required_categories: Vec<String>,
    /// Automatic flood/duplicate heuristic.
    pub flood: FloodConfig,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            admission_threshold: 40,
            hold_duration_minutes: 90,
            photo_required_categories: vec![
                "Theft".to_string(),
                "Suspicious Activity".to_string(),
            ],
            flood: FloodConfig::default(),
        }
    }
}

/// Flood detection: N similar reports from one fingerprint within a short
/// time window and small radius count as duplicate submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    /// Look-back window in minutes.
    pub window_minutes: i64,
    /// Radius in meters within which reports count as "similar".
    pub radius_meters: f64,
    /// Total similar reports (including the new one) that trigger the
    /// duplicate penalty. 0 disables the heuristic.
    pub report_threshold: u32,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            window_minutes: 10,
            radius_meters: 100.0,
            report_threshold: 4,
        }
    }
}

// ── Trust ───────────────────────────────────────────────────────

/// Trust ledger tunables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    pub coefficients: TrustCoefficients,
}

/// Score adjustment coefficients. The score is always recomputed from the
/// stored counters as
/// `clamp(50 + verified·vb + resolved·rb − fake·fp − duplicate·dp, 0, 100)`,
/// so changing a coefficient retroactively re-weights all history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustCoefficients {
    pub verified_bonus: i64,
    pub resolved_bonus: i64,
    pub fake_penalty: i64,
    pub duplicate_penalty: i64,
}

impl Default for TrustCoefficients {
    fn default() -> Self {
        Self {
            verified_bonus: 5,
            resolved_bonus: 3,
            fake_penalty: 15,
            duplicate_penalty: 5,
        }
    }
}

// ── Clustering ──────────────────────────────────────────────────

/// Hotspot cluster engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// DBSCAN neighborhood radius in meters.
    pub epsilon_meters: f64,
    /// Minimum neighbors (including self) for a core point.
    pub min_samples: usize,
    /// Advisory interval for the external refresh scheduler.
    pub refresh_interval_minutes: u64,
    /// Only reports newer than this many hours enter a clustering run.
    pub window_hours: i64,
    /// Member count at or above which a cluster is high risk.
    pub risk_high_threshold: usize,
    /// Member count at or above which a cluster is medium risk.
    pub risk_medium_threshold: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            epsilon_meters: 500.0,
            min_samples: 3,
            refresh_interval_minutes: 30,
            window_hours: 24,
            risk_high_threshold: 10,
            risk_medium_threshold: 6,
        }
    }
}

// ── Retention ───────────────────────────────────────────────────

/// Privacy retention horizon for trust data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Fingerprint records inactive for longer than this are eligible
    /// for operator-triggered cleanup.
    pub trust_max_age_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            trust_max_age_days: 30,
        }
    }
}
