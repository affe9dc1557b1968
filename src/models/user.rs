//! User model - identity records with lockout state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User entity. At least one of email/phone/username identifies the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub phone: Option<String>,
    pub username: Option<String>,
    pub password_hash: String,
    pub password_set_at: DateTime<Utc>,
    pub email_verified: bool,
    pub login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new, unverified user.
    pub fn new(email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            email,
            phone: None,
            username: None,
            password_hash,
            password_set_at: now,
            email_verified: false,
            login_attempts: 0,
            locked_until: None,
            is_active: true,
            language: "en".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the account is currently locked out.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map(|until| until > now).unwrap_or(false)
    }

    /// Check whether the supplied identifier matches this user.
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        self.email.eq_ignore_ascii_case(identifier)
            || self.phone.as_deref() == Some(identifier)
            || self
                .username
                .as_deref()
                .map(|u| u.eq_ignore_ascii_case(identifier))
                .unwrap_or(false)
    }

    /// Convert to a response shape without sensitive fields.
    pub fn sanitized(&self) -> SanitizedUser {
        SanitizedUser {
            user_id: self.user_id,
            email: self.email.clone(),
            phone: self.phone.clone(),
            username: self.username.clone(),
            email_verified: self.email_verified,
            is_active: self.is_active,
            language: self.language.clone(),
            created_at: self.created_at,
        }
    }
}

/// User response for callers (no password hash or lockout internals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizedUser {
    pub user_id: Uuid,
    pub email: String,
    pub phone: Option<String>,
    pub username: Option<String>,
    pub email_verified: bool,
    pub is_active: bool,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_lock_expiry() {
        let mut user = User::new("a@b.com".to_string(), "hash".to_string());
        let now = Utc::now();
        assert!(!user.is_locked(now));

        user.locked_until = Some(now + Duration::minutes(30));
        assert!(user.is_locked(now));
        assert!(!user.is_locked(now + Duration::minutes(31)));
    }

    #[test]
    fn test_identifier_matching() {
        let mut user = User::new("Baker@example.com".to_string(), "hash".to_string());
        user.username = Some("baker01".to_string());
        user.phone = Some("+15550100".to_string());

        assert!(user.matches_identifier("baker@example.com"));
        assert!(user.matches_identifier("BAKER01"));
        assert!(user.matches_identifier("+15550100"));
        assert!(!user.matches_identifier("other@example.com"));
    }
}
