//! API key model - long-lived credentials stored as digests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix on every issued key string: `ik_<64 hex chars>`.
pub const API_KEY_PREFIX: &str = "ik";

/// Number of leading characters of the key string kept as a display preview.
pub const API_KEY_PREVIEW_LEN: usize = 10;

/// Long-lived API credential. Only a digest of the key material is stored;
/// the plaintext is shown once, at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub key_id: Uuid,
    pub user_id: Uuid,
    pub label: String,
    /// SHA-256 hex digest of the full key string.
    pub key_digest: String,
    /// Short prefix of the key string, safe to display.
    pub key_preview: String,
    /// Explicit permission set, as "action:resource" strings.
    pub permissions: Vec<String>,
    /// Per-key request limit per hour. None falls back to no per-key limit.
    pub rate_limit_per_hour: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: Uuid,
        label: String,
        key_digest: String,
        key_preview: String,
        permissions: Vec<String>,
        rate_limit_per_hour: Option<u32>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            key_id: Uuid::new_v4(),
            user_id,
            label,
            key_digest,
            key_preview,
            permissions,
            rate_limit_per_hour,
            expires_at,
            last_used_at: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}
