//! Password policy engine: strength validation, reuse prevention, expiry.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{PasswordPolicy, User};
use crate::services::ServiceError;
use crate::store::CredentialStore;
use crate::utils::{verify_password, Password, PasswordHashString};

/// Weak patterns and keyboard sequences rejected outright.
const WEAK_PATTERNS: &[&str] = &[
    "password", "12345678", "123456789", "qwerty", "qwertyuiop", "asdfghjkl", "zxcvbnm",
    "abc123", "letmein", "iloveyou", "admin", "welcome", "monkey", "dragon", "11111111",
    "00000000", "passw0rd",
];

/// User-facing validation message in both supported languages.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationMessage {
    pub en: String,
    pub ar: String,
}

impl ValidationMessage {
    fn new(en: impl Into<String>, ar: impl Into<String>) -> Self {
        Self {
            en: en.into(),
            ar: ar.into(),
        }
    }
}

/// Four-tier strength label derived from the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordStrength {
    Weak,
    Fair,
    Good,
    Strong,
}

/// Result of a password validation run.
#[derive(Debug, Clone, Serialize)]
pub struct PasswordValidation {
    pub is_valid: bool,
    pub errors: Vec<ValidationMessage>,
    pub score: u32,
    pub strength: PasswordStrength,
}

#[derive(Clone)]
pub struct PasswordPolicyService {
    store: Arc<dyn CredentialStore>,
}

impl PasswordPolicyService {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// The active policy, falling back to defaults when none was configured.
    pub async fn active_policy(&self) -> Result<PasswordPolicy, ServiceError> {
        Ok(self
            .store
            .active_password_policy()
            .await?
            .unwrap_or_default())
    }

    /// Replace the active policy with a new versioned record.
    pub async fn update_policy(&self, policy: PasswordPolicy) -> Result<PasswordPolicy, ServiceError> {
        let versioned = policy.next_version();
        self.store
            .activate_password_policy(versioned.clone())
            .await?;
        tracing::info!(policy_id = %versioned.policy_id, "Password policy updated");
        Ok(versioned)
    }

    /// Validate a candidate password against the active policy. When
    /// `user_id` is given, the candidate is also checked against the user's
    /// recent password history.
    pub async fn validate(
        &self,
        password: &str,
        user_id: Option<Uuid>,
    ) -> Result<PasswordValidation, ServiceError> {
        let policy = self.active_policy().await?;
        let mut errors = Vec::new();

        if password.chars().count() < policy.min_length {
            errors.push(ValidationMessage::new(
                format!("Password must be at least {} characters", policy.min_length),
                format!("يجب أن تتكون كلمة المرور من {} أحرف على الأقل", policy.min_length),
            ));
        }
        if policy.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            errors.push(ValidationMessage::new(
                "Password must contain at least one uppercase letter",
                "يجب أن تحتوي كلمة المرور على حرف كبير واحد على الأقل",
            ));
        }
        if policy.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            errors.push(ValidationMessage::new(
                "Password must contain at least one lowercase letter",
                "يجب أن تحتوي كلمة المرور على حرف صغير واحد على الأقل",
            ));
        }
        if policy.require_number && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push(ValidationMessage::new(
                "Password must contain at least one number",
                "يجب أن تحتوي كلمة المرور على رقم واحد على الأقل",
            ));
        }
        if policy.require_special && !password.chars().any(is_special) {
            errors.push(ValidationMessage::new(
                "Password must contain at least one special character",
                "يجب أن تحتوي كلمة المرور على رمز خاص واحد على الأقل",
            ));
        }

        let lowered = password.to_lowercase();
        if WEAK_PATTERNS.iter().any(|p| lowered.contains(p)) {
            errors.push(ValidationMessage::new(
                "Password contains a common weak pattern",
                "تحتوي كلمة المرور على نمط شائع وضعيف",
            ));
        }

        if has_repeated_run(password, 3) {
            errors.push(ValidationMessage::new(
                "Password must not repeat the same character 3 or more times in a row",
                "يجب ألا تكرر كلمة المرور نفس الحرف 3 مرات أو أكثر على التوالي",
            ));
        }

        if let Some(user_id) = user_id {
            if policy.prevent_reuse > 0
                && self.is_reused(password, user_id, policy.prevent_reuse).await?
            {
                errors.push(ValidationMessage::new(
                    format!(
                        "Password must differ from your last {} passwords",
                        policy.prevent_reuse
                    ),
                    format!(
                        "يجب أن تختلف كلمة المرور عن آخر {} كلمات مرور",
                        policy.prevent_reuse
                    ),
                ));
            }
        }

        let score = score_password(password);
        Ok(PasswordValidation {
            is_valid: errors.is_empty(),
            errors,
            score,
            strength: strength_for(score),
        })
    }

    /// Validate and return an error on failure, for call sites that only care
    /// about pass/fail.
    pub async fn enforce(&self, password: &str, user_id: Option<Uuid>) -> Result<(), ServiceError> {
        let validation = self.validate(password, user_id).await?;
        if validation.is_valid {
            Ok(())
        } else {
            Err(ServiceError::PasswordPolicyViolation(validation.errors))
        }
    }

    /// Whether the user's password is past the policy's maximum age.
    pub async fn is_password_expired(&self, user: &User) -> Result<bool, ServiceError> {
        Ok(self.days_until_expiry(user).await?.map(|d| d <= 0).unwrap_or(false))
    }

    /// Days until the password expires, or None when passwords never expire.
    pub async fn days_until_expiry(&self, user: &User) -> Result<Option<i64>, ServiceError> {
        let policy = self.active_policy().await?;
        if policy.max_age_days == 0 {
            return Ok(None);
        }
        let expires_at = user.password_set_at + Duration::days(policy.max_age_days);
        Ok(Some((expires_at - Utc::now()).num_days()))
    }

    async fn is_reused(
        &self,
        password: &str,
        user_id: Uuid,
        window: usize,
    ) -> Result<bool, ServiceError> {
        let history = self.store.password_history(user_id, window).await?;
        let candidate = Password::new(password.to_string());
        for entry in history {
            let hash = PasswordHashString::new(entry.password_hash);
            if verify_password(&candidate, &hash).is_ok() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn is_special(c: char) -> bool {
    !c.is_ascii_alphanumeric() && !c.is_whitespace()
}

fn has_repeated_run(password: &str, run: usize) -> bool {
    let chars: Vec<char> = password.chars().collect();
    if chars.len() < run {
        return false;
    }
    chars.windows(run).any(|w| w.iter().all(|&c| c == w[0]))
}

fn score_password(password: &str) -> u32 {
    let mut score = 0u32;

    let len = password.chars().count();
    if len >= 8 {
        score += 10;
    }
    if len >= 12 {
        score += 15;
    }
    if len >= 16 {
        score += 15;
    }

    if password.chars().any(|c| c.is_ascii_uppercase()) {
        score += 10;
    }
    if password.chars().any(|c| c.is_ascii_lowercase()) {
        score += 10;
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        score += 10;
    }

    let specials: std::collections::HashSet<char> =
        password.chars().filter(|c| is_special(*c)).collect();
    if !specials.is_empty() {
        score += 10;
    }
    // Bonus for symbol diversity.
    if specials.len() >= 2 {
        score += 10;
    }

    score
}

fn strength_for(score: u32) -> PasswordStrength {
    match score {
        0..=29 => PasswordStrength::Weak,
        30..=49 => PasswordStrength::Fair,
        50..=69 => PasswordStrength::Good,
        _ => PasswordStrength::Strong,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> PasswordPolicyService {
        PasswordPolicyService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_min_length_rejected_regardless_of_composition() {
        let svc = service();
        // Strong composition, but below the default minimum of 8.
        let result = svc.validate("Ab1!x%", None).await.unwrap();
        assert!(!result.is_valid);
    }

    #[tokio::test]
    async fn test_missing_character_classes() {
        let svc = service();
        let result = svc.validate("lowercaseonlyhere", None).await.unwrap();
        assert!(!result.is_valid);
        assert!(result.errors.len() >= 3); // uppercase, number, special
    }

    #[tokio::test]
    async fn test_weak_pattern_rejected() {
        let svc = service();
        let result = svc.validate("Password123!", None).await.unwrap();
        assert!(!result.is_valid);
    }

    #[tokio::test]
    async fn test_repeated_run_rejected() {
        let svc = service();
        let result = svc.validate("Goood#Bread7aaa", None).await.unwrap();
        assert!(!result.is_valid);
    }

    #[tokio::test]
    async fn test_strong_password_accepted() {
        let svc = service();
        let result = svc.validate("Kn3ad!Pr0of&Bake", None).await.unwrap();
        assert!(result.is_valid, "errors: {:?}", result.errors);
        assert_eq!(result.strength, PasswordStrength::Strong);
    }

    #[tokio::test]
    async fn test_reuse_detected() {
        use crate::models::PasswordHistory;
        use crate::utils::hash_password;

        let store = Arc::new(MemoryStore::new());
        let svc = PasswordPolicyService::new(store.clone());
        let user_id = Uuid::new_v4();

        let old = "Old#Passw9rd!x";
        let hash = hash_password(&Password::new(old.to_string())).unwrap();
        store
            .append_password_history(PasswordHistory::new(user_id, hash.into_string()), 5)
            .await
            .unwrap();

        let result = svc.validate(old, Some(user_id)).await.unwrap();
        assert!(!result.is_valid);

        let fresh = svc.validate("Fresh#L0af!Rise", Some(user_id)).await.unwrap();
        assert!(fresh.is_valid);
    }

    #[tokio::test]
    async fn test_policy_versioning_via_service() {
        let svc = service();
        let mut policy = svc.active_policy().await.unwrap();
        policy.min_length = 12;
        svc.update_policy(policy).await.unwrap();

        let result = svc.validate("Sh0rt!pwd", None).await.unwrap();
        assert!(!result.is_valid);
    }
}
