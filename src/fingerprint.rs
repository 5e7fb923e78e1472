//! Pseudonymous device fingerprint codec.
//!
//! Turns coarse, non-identifying device attributes into a stable 128-bit
//! token that buckets submission history without identifying a person.
//! The token is deterministic for a given attribute tuple, never reversed,
//! and carries no uniqueness guarantee — collisions merge two devices into
//! one trust bucket and nothing worse.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Placeholder for attributes the client could not read.
const MISSING: &str = "unknown";

/// Hex characters in a fingerprint (128 bits).
pub const FINGERPRINT_LEN: usize = 32;

/// How many leading characters a masked fingerprint exposes.
const MASK_VISIBLE: usize = 8;

/// Coarse device attributes as reported by the client. Every field is
/// optional; a token is always produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceAttributes {
    pub screen_width: Option<u32>,
    pub screen_height: Option<u32>,
    /// Minutes offset from UTC, as the client reports it.
    pub timezone_offset: Option<i32>,
    pub language: Option<String>,
    pub platform: Option<String>,
    pub logical_cores: Option<u32>,
    /// Approximate device memory in GiB.
    pub device_memory_gb: Option<u32>,
}

/// Derive the fingerprint token for an attribute tuple.
///
/// SHA-256 over the "|"-joined attributes, truncated to 32 hex chars.
pub fn derive(attrs: &DeviceAttributes) -> String {
    let screen = match (attrs.screen_width, attrs.screen_height) {
        (Some(w), Some(h)) => format!("{w}x{h}"),
        _ => MISSING.to_string(),
    };

    let joined = [
        screen,
        opt_str(attrs.timezone_offset.map(|v| v.to_string())),
        opt_str(attrs.language.clone()),
        opt_str(attrs.platform.clone()),
        opt_str(attrs.logical_cores.map(|v| v.to_string())),
        opt_str(attrs.device_memory_gb.map(|v| v.to_string())),
    ]
    .join("|");

    let digest = Sha256::digest(joined.as_bytes());
    let mut token = hex::encode(digest);
    token.truncate(FINGERPRINT_LEN);
    token
}

fn opt_str(value: Option<String>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => MISSING.to_string(),
    }
}

/// Mask a fingerprint for operator display: leading prefix only.
pub fn mask(fingerprint: &str) -> String {
    let visible: String = fingerprint.chars().take(MASK_VISIBLE).collect();
    format!("{visible}...")
}
