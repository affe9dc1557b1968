//! Password policy and password history models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Password policy configuration. Exactly one policy is active at a time;
/// updates insert a new active record and deactivate the previous one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub policy_id: Uuid,
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_number: bool,
    pub require_special: bool,
    /// Reject reuse of the last N passwords. 0 disables the check.
    pub prevent_reuse: usize,
    /// Maximum password age in days. 0 means passwords never expire.
    pub max_age_days: i64,
    pub lockout_attempts: u32,
    pub lockout_duration_minutes: i64,
    pub session_timeout_minutes: i64,
    /// Audit retention window in days. CRITICAL events are exempt.
    pub data_retention_days: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            policy_id: Uuid::new_v4(),
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_number: true,
            require_special: true,
            prevent_reuse: 5,
            max_age_days: 90,
            lockout_attempts: 5,
            lockout_duration_minutes: 30,
            session_timeout_minutes: 60,
            data_retention_days: 2555,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

impl PasswordPolicy {
    /// Clone this policy as a new versioned record with fresh id and timestamp.
    pub fn next_version(&self) -> Self {
        Self {
            policy_id: Uuid::new_v4(),
            is_active: true,
            created_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// A past password hash for a user, kept for reuse prevention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordHistory {
    pub history_id: Uuid,
    pub user_id: Uuid,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl PasswordHistory {
    pub fn new(user_id: Uuid, password_hash: String) -> Self {
        Self {
            history_id: Uuid::new_v4(),
            user_id,
            password_hash,
            created_at: Utc::now(),
        }
    }
}
