//! Login attempt model - immutable record of every authentication attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Internal reason a login attempt failed. Never exposed verbatim to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoginFailureReason {
    FailedInvalidCredentials,
    FailedAccountLocked,
    FailedAccountDisabled,
    FailedTwoFactorInvalid,
}

impl LoginFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginFailureReason::FailedInvalidCredentials => "FAILED_INVALID_CREDENTIALS",
            LoginFailureReason::FailedAccountLocked => "FAILED_ACCOUNT_LOCKED",
            LoginFailureReason::FailedAccountDisabled => "FAILED_ACCOUNT_DISABLED",
            LoginFailureReason::FailedTwoFactorInvalid => "FAILED_2FA_INVALID",
        }
    }
}

/// One row per authentication attempt, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub attempt_id: Uuid,
    /// Identifier as presented by the caller (email/phone/username).
    pub identifier: String,
    pub user_id: Option<Uuid>,
    pub succeeded: bool,
    pub failure_reason: Option<LoginFailureReason>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LoginAttempt {
    pub fn success(identifier: &str, user_id: Uuid, ip_address: &str, user_agent: Option<&str>) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            identifier: identifier.to_string(),
            user_id: Some(user_id),
            succeeded: true,
            failure_reason: None,
            ip_address: ip_address.to_string(),
            user_agent: user_agent.map(|s| s.to_string()),
            created_at: Utc::now(),
        }
    }

    pub fn failure(
        identifier: &str,
        user_id: Option<Uuid>,
        reason: LoginFailureReason,
        ip_address: &str,
        user_agent: Option<&str>,
    ) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            identifier: identifier.to_string(),
            user_id,
            succeeded: false,
            failure_reason: Some(reason),
            ip_address: ip_address.to_string(),
            user_agent: user_agent.map(|s| s.to_string()),
            created_at: Utc::now(),
        }
    }
}
