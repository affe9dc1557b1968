//! One-time token model - short-lived, single-use codes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a one-time token may be redeemed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    PasswordReset,
    EmailVerification,
    TwoFactor,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::PasswordReset => "password_reset",
            OtpPurpose::EmailVerification => "email_verification",
            OtpPurpose::TwoFactor => "two_factor",
        }
    }
}

/// Single-use token scoped to a purpose. Valid iff unused and unexpired;
/// acceptance must mark it used in the same logical step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpToken {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub purpose: OtpPurpose,
    /// SHA-256 digest of the code or token material.
    pub code_digest: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OtpToken {
    pub fn new(user_id: Uuid, purpose: OtpPurpose, code_digest: String, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            token_id: Uuid::new_v4(),
            user_id,
            purpose,
            code_digest,
            expires_at: now + ttl,
            used_at: None,
            created_at: now,
        }
    }

    /// A token is valid iff it has not been used and has not expired.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}
