//! Two-factor authentication model.
//!
//! The method is a tagged variant so invalid combinations (an SMS method
//! without a phone number, an authenticator method without a secret) are
//! unrepresentable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Configured second factor and its per-variant payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TwoFactorMethod {
    /// TOTP authenticator app; carries the base32 shared secret.
    Authenticator { secret: String },
    /// One-time codes delivered over SMS.
    Sms { phone: String },
    /// One-time codes delivered to the account email.
    Email,
}

impl TwoFactorMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TwoFactorMethod::Authenticator { .. } => "authenticator",
            TwoFactorMethod::Sms { .. } => "sms",
            TwoFactorMethod::Email => "email",
        }
    }
}

/// Lifecycle of a user's two-factor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorState {
    PendingVerification,
    Enabled,
    Disabled,
}

/// One-per-user two-factor record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorAuth {
    pub user_id: Uuid,
    pub method: TwoFactorMethod,
    /// SHA-256 digests of unused backup codes. Codes are removed on use.
    pub backup_code_digests: Vec<String>,
    pub state: TwoFactorState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TwoFactorAuth {
    /// Create a fresh configuration awaiting verification.
    pub fn new(user_id: Uuid, method: TwoFactorMethod, backup_code_digests: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            method,
            backup_code_digests,
            state: TwoFactorState::PendingVerification,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state == TwoFactorState::Enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_config_is_pending() {
        let tfa = TwoFactorAuth::new(
            Uuid::new_v4(),
            TwoFactorMethod::Sms {
                phone: "+15550100".to_string(),
            },
            vec!["digest".to_string()],
        );
        assert_eq!(tfa.state, TwoFactorState::PendingVerification);
        assert!(!tfa.is_enabled());
    }

    #[test]
    fn test_method_tags() {
        assert_eq!(
            TwoFactorMethod::Authenticator {
                secret: "S".to_string()
            }
            .as_str(),
            "authenticator"
        );
        assert_eq!(TwoFactorMethod::Email.as_str(), "email");
    }
}
