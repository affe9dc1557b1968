//! Two-factor authentication: setup, challenge delivery, and verification.
//!
//! Login verification tries factors in a fixed order: backup code first, then
//! TOTP for authenticator users, then a pending delivered code for SMS/email
//! users. Backup codes and delivered codes are single-use through atomic
//! store consumption.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::audit::actions;
use crate::models::{
    AuditEvent, AuditSeverity, OtpPurpose, OtpToken, TwoFactorAuth, TwoFactorMethod,
    TwoFactorState, User,
};
use crate::notifier::Notifier;
use crate::services::audit::AuditService;
use crate::services::ServiceError;
use crate::store::CredentialStore;
use crate::utils::{self, sha256_hex, totp, verify_password, Password, PasswordHashString};

/// Backup codes issued per setup or regeneration.
const BACKUP_CODE_COUNT: usize = 10;
/// Backup codes are 4 random bytes, hex encoded to 8 characters.
const BACKUP_CODE_BYTES: usize = 4;
/// Delivered login codes expire after this many minutes.
const CHALLENGE_TTL_MINUTES: i64 = 5;

/// Everything the user needs to finish enrolling a second factor. Backup
/// codes appear in plaintext here and nowhere else.
#[derive(Debug, Clone, Serialize)]
pub struct TwoFactorSetup {
    pub method: String,
    /// TOTP provisioning URI for authenticator setups.
    pub provisioning_uri: Option<String>,
    /// Base32 secret for manual entry in authenticator setups.
    pub secret: Option<String>,
    pub backup_codes: Vec<String>,
}

#[derive(Clone)]
pub struct TwoFactorService {
    store: Arc<dyn CredentialStore>,
    notifier: Arc<dyn Notifier>,
    audit: AuditService,
    totp_issuer: String,
}

impl TwoFactorService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
        audit: AuditService,
        totp_issuer: String,
    ) -> Self {
        Self {
            store,
            notifier,
            audit,
            totp_issuer,
        }
    }

    pub async fn status(&self, user_id: Uuid) -> Result<Option<TwoFactorAuth>, ServiceError> {
        Ok(self.store.find_two_factor(user_id).await?)
    }

    pub async fn is_enabled(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self
            .store
            .find_two_factor(user_id)
            .await?
            .map(|t| t.is_enabled())
            .unwrap_or(false))
    }

    /// Begin enrollment for a method. The configuration stays in
    /// `PendingVerification` until the user proves the factor works via
    /// `verify_setup`; re-running setup replaces any pending configuration.
    pub async fn setup(
        &self,
        user: &User,
        method: TwoFactorMethod,
    ) -> Result<TwoFactorSetup, ServiceError> {
        let (codes, digests) = generate_backup_codes();
        let method_name = method.as_str().to_string();

        let (provisioning_uri, secret) = match &method {
            TwoFactorMethod::Authenticator { secret } => (
                Some(totp::provisioning_uri(
                    &self.totp_issuer,
                    &user.email,
                    secret,
                )),
                Some(secret.clone()),
            ),
            _ => (None, None),
        };

        let record = TwoFactorAuth::new(user.user_id, method, digests);
        self.store.upsert_two_factor(record).await?;

        Ok(TwoFactorSetup {
            method: method_name,
            provisioning_uri,
            secret,
            backup_codes: codes,
        })
    }

    /// Convenience for authenticator enrollment: generates the shared secret.
    pub async fn setup_authenticator(&self, user: &User) -> Result<TwoFactorSetup, ServiceError> {
        self.setup(
            user,
            TwoFactorMethod::Authenticator {
                secret: totp::generate_secret(),
            },
        )
        .await
    }

    /// Prove the pending factor works and flip it to `Enabled`. For delivered
    /// methods, `send_challenge` must have been called first.
    pub async fn verify_setup(&self, user: &User, code: &str) -> Result<(), ServiceError> {
        let mut record = self
            .store
            .find_two_factor(user.user_id)
            .await?
            .ok_or(ServiceError::TwoFactorNotConfigured)?;
        if record.state != TwoFactorState::PendingVerification {
            return Err(ServiceError::TwoFactorNotConfigured);
        }

        if !self.verify_factor(user, &record, code).await? {
            return Err(ServiceError::InvalidTwoFactorCode);
        }

        record.state = TwoFactorState::Enabled;
        record.updated_at = Utc::now();
        self.store.upsert_two_factor(record.clone()).await?;

        self.audit
            .record(
                AuditEvent::new(actions::TWO_FACTOR_ENABLED, "user", AuditSeverity::Warn)
                    .with_user(user.user_id)
                    .with_metadata(serde_json::json!({ "method": record.method.as_str() })),
            )
            .await;
        Ok(())
    }

    /// Generate and deliver a login code for SMS/email methods. Authenticator
    /// users never receive a challenge; their app is the source.
    pub async fn send_challenge(&self, user: &User) -> Result<(), ServiceError> {
        let record = self
            .store
            .find_two_factor(user.user_id)
            .await?
            .ok_or(ServiceError::TwoFactorNotConfigured)?;

        let code = utils::generate_numeric_code();
        let token = OtpToken::new(
            user.user_id,
            OtpPurpose::TwoFactor,
            sha256_hex(&code),
            Duration::minutes(CHALLENGE_TTL_MINUTES),
        );
        self.store.insert_otp_token(token).await?;

        match &record.method {
            TwoFactorMethod::Sms { phone } => {
                self.notifier
                    .send_sms(
                        phone,
                        &format!(
                            "Your verification code is {}. It expires in {} minutes.",
                            code, CHALLENGE_TTL_MINUTES
                        ),
                    )
                    .await?;
            }
            TwoFactorMethod::Email => {
                self.notifier
                    .send_email(
                        &user.email,
                        "Your verification code",
                        &format!(
                            "<p>Your verification code is <strong>{}</strong>.</p>\
                             <p>It expires in {} minutes.</p>",
                            code, CHALLENGE_TTL_MINUTES
                        ),
                    )
                    .await?;
            }
            TwoFactorMethod::Authenticator { .. } => {
                return Err(ServiceError::TwoFactorNotConfigured);
            }
        }

        tracing::debug!(user_id = %user.user_id, method = record.method.as_str(), "Two-factor challenge sent");
        Ok(())
    }

    /// Verify a code presented during login against an enabled configuration.
    pub async fn verify_login(&self, user: &User, code: &str) -> Result<(), ServiceError> {
        let record = self
            .store
            .find_two_factor(user.user_id)
            .await?
            .filter(|r| r.is_enabled())
            .ok_or(ServiceError::TwoFactorNotConfigured)?;

        if self.verify_factor(user, &record, code).await? {
            Ok(())
        } else {
            Err(ServiceError::InvalidTwoFactorCode)
        }
    }

    /// Turn off two-factor after a fresh password check and a valid code or
    /// backup code. Both proofs are required.
    pub async fn disable(
        &self,
        user: &User,
        password: &str,
        code: &str,
    ) -> Result<(), ServiceError> {
        self.require_password(user, password)?;

        let mut record = self
            .store
            .find_two_factor(user.user_id)
            .await?
            .filter(|r| r.is_enabled())
            .ok_or(ServiceError::TwoFactorNotConfigured)?;
        if !self.verify_factor(user, &record, code).await? {
            return Err(ServiceError::InvalidTwoFactorCode);
        }

        record.state = TwoFactorState::Disabled;
        record.backup_code_digests.clear();
        record.updated_at = Utc::now();
        self.store.upsert_two_factor(record).await?;

        self.audit
            .record(
                AuditEvent::new(actions::TWO_FACTOR_DISABLED, "user", AuditSeverity::Warn)
                    .with_user(user.user_id),
            )
            .await;
        Ok(())
    }

    /// Replace all backup codes after a fresh password check and a valid
    /// code or backup code; rotating secrets without proof of possession is
    /// not allowed. Outstanding codes are invalidated.
    pub async fn regenerate_backup_codes(
        &self,
        user: &User,
        password: &str,
        code: &str,
    ) -> Result<Vec<String>, ServiceError> {
        self.require_password(user, password)?;

        let mut record = self
            .store
            .find_two_factor(user.user_id)
            .await?
            .filter(|r| r.is_enabled())
            .ok_or(ServiceError::TwoFactorNotConfigured)?;
        if !self.verify_factor(user, &record, code).await? {
            return Err(ServiceError::InvalidTwoFactorCode);
        }

        let (codes, digests) = generate_backup_codes();
        record.backup_code_digests = digests;
        record.updated_at = Utc::now();
        self.store.upsert_two_factor(record).await?;

        self.audit
            .record(
                AuditEvent::new(
                    actions::BACKUP_CODES_REGENERATED,
                    "user",
                    AuditSeverity::Warn,
                )
                .with_user(user.user_id),
            )
            .await;
        Ok(codes)
    }

    /// Check `code` against the configuration's factors, in fixed priority:
    /// backup code, then TOTP or delivered code by method.
    async fn verify_factor(
        &self,
        user: &User,
        record: &TwoFactorAuth,
        code: &str,
    ) -> Result<bool, ServiceError> {
        // Backup codes are 8 hex chars and never collide with 6-digit codes.
        let digest = sha256_hex(code);
        if self
            .store
            .consume_backup_code(user.user_id, &digest)
            .await?
        {
            tracing::info!(user_id = %user.user_id, "Backup code consumed");
            return Ok(true);
        }

        match &record.method {
            TwoFactorMethod::Authenticator { secret } => {
                Ok(totp::verify(secret, code, Utc::now().timestamp() as u64))
            }
            TwoFactorMethod::Sms { .. } | TwoFactorMethod::Email => Ok(self
                .store
                .consume_otp_token_for_user(user.user_id, OtpPurpose::TwoFactor, &digest)
                .await?),
        }
    }

    fn require_password(&self, user: &User, password: &str) -> Result<(), ServiceError> {
        let candidate = Password::new(password.to_string());
        let hash = PasswordHashString::new(user.password_hash.clone());
        verify_password(&candidate, &hash).map_err(|_| ServiceError::InvalidCredentials)
    }
}

/// Generate plaintext backup codes alongside their digests. Only the digests
/// are stored.
fn generate_backup_codes() -> (Vec<String>, Vec<String>) {
    let codes: Vec<String> = (0..BACKUP_CODE_COUNT)
        .map(|_| utils::generate_token(BACKUP_CODE_BYTES))
        .collect();
    let digests = codes.iter().map(|c| sha256_hex(c)).collect();
    (codes, digests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::MockNotifier;
    use crate::store::MemoryStore;
    use crate::utils::hash_password;

    const TEST_PASSWORD: &str = "Flour&Water9!";

    async fn setup_service() -> (TwoFactorService, Arc<MemoryStore>, Arc<MockNotifier>, User) {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(MockNotifier::new());
        let audit = AuditService::new(store.clone());
        let svc = TwoFactorService::new(
            store.clone(),
            notifier.clone(),
            audit,
            "identity-service".to_string(),
        );

        let hash = hash_password(&Password::new(TEST_PASSWORD.to_string())).unwrap();
        let mut user = User::new("tfa@example.com".to_string(), hash.into_string());
        user.phone = Some("+15550100".to_string());
        store.insert_user(user.clone()).await.unwrap();
        (svc, store, notifier, user)
    }

    #[tokio::test]
    async fn test_authenticator_enrollment_round_trip() {
        let (svc, _store, _notifier, user) = setup_service().await;

        let setup = svc.setup_authenticator(&user).await.unwrap();
        assert_eq!(setup.backup_codes.len(), BACKUP_CODE_COUNT);
        let secret = setup.secret.unwrap();
        assert!(setup.provisioning_uri.unwrap().contains("otpauth://totp/"));

        assert!(!svc.is_enabled(user.user_id).await.unwrap());

        let code = totp::code_at(&secret, Utc::now().timestamp() as u64).unwrap();
        svc.verify_setup(&user, &code).await.unwrap();
        assert!(svc.is_enabled(user.user_id).await.unwrap());

        let fresh = totp::code_at(&secret, Utc::now().timestamp() as u64).unwrap();
        svc.verify_login(&user, &fresh).await.unwrap();
    }

    #[tokio::test]
    async fn test_sms_challenge_round_trip() {
        let (svc, _store, notifier, user) = setup_service().await;

        svc.setup(
            &user,
            TwoFactorMethod::Sms {
                phone: "+15550100".to_string(),
            },
        )
        .await
        .unwrap();

        svc.send_challenge(&user).await.unwrap();
        assert_eq!(notifier.sms_count(), 1);
        let sms = notifier.last_sms().unwrap();
        let code: String = sms
            .message
            .chars()
            .filter(|c| c.is_ascii_digit())
            .take(6)
            .collect();

        svc.verify_setup(&user, &code).await.unwrap();
        assert!(svc.is_enabled(user.user_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delivered_code_is_single_use() {
        let (svc, _store, notifier, user) = setup_service().await;

        svc.setup(&user, TwoFactorMethod::Email).await.unwrap();
        svc.send_challenge(&user).await.unwrap();
        let email = notifier.last_email().unwrap();
        let code: String = email
            .html
            .chars()
            .filter(|c| c.is_ascii_digit())
            .take(6)
            .collect();
        svc.verify_setup(&user, &code).await.unwrap();

        // Same code cannot be replayed for login.
        let err = svc.verify_login(&user, &code).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTwoFactorCode));
    }

    #[tokio::test]
    async fn test_backup_code_works_once() {
        let (svc, _store, _notifier, user) = setup_service().await;

        let setup = svc.setup_authenticator(&user).await.unwrap();
        let secret = setup.secret.unwrap();
        let code = totp::code_at(&secret, Utc::now().timestamp() as u64).unwrap();
        svc.verify_setup(&user, &code).await.unwrap();

        let backup = setup.backup_codes[0].clone();
        svc.verify_login(&user, &backup).await.unwrap();
        let err = svc.verify_login(&user, &backup).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTwoFactorCode));
    }

    #[tokio::test]
    async fn test_disable_requires_password_and_code() {
        let (svc, _store, _notifier, user) = setup_service().await;

        let setup = svc.setup_authenticator(&user).await.unwrap();
        let secret = setup.secret.unwrap();
        let code = totp::code_at(&secret, Utc::now().timestamp() as u64).unwrap();
        svc.verify_setup(&user, &code).await.unwrap();

        let code = totp::code_at(&secret, Utc::now().timestamp() as u64).unwrap();
        let err = svc.disable(&user, "wrong-password", &code).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));

        let err = svc.disable(&user, TEST_PASSWORD, "000000").await;
        // A random 6-digit code almost certainly fails; tolerate the 1-in-1M case.
        if let Err(e) = err {
            assert!(matches!(e, ServiceError::InvalidTwoFactorCode));
        }

        let code = totp::code_at(&secret, Utc::now().timestamp() as u64).unwrap();
        svc.disable(&user, TEST_PASSWORD, &code).await.unwrap();
        assert!(!svc.is_enabled(user.user_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_regenerate_invalidates_old_backup_codes() {
        let (svc, _store, _notifier, user) = setup_service().await;

        let setup = svc.setup_authenticator(&user).await.unwrap();
        let secret = setup.secret.unwrap();
        let code = totp::code_at(&secret, Utc::now().timestamp() as u64).unwrap();
        svc.verify_setup(&user, &code).await.unwrap();

        let old = setup.backup_codes[0].clone();
        let code = totp::code_at(&secret, Utc::now().timestamp() as u64).unwrap();
        let fresh = svc
            .regenerate_backup_codes(&user, TEST_PASSWORD, &code)
            .await
            .unwrap();
        assert_eq!(fresh.len(), BACKUP_CODE_COUNT);

        let err = svc.verify_login(&user, &old).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTwoFactorCode));
        svc.verify_login(&user, &fresh[0]).await.unwrap();
    }

    #[tokio::test]
    async fn test_regenerate_requires_a_valid_factor() {
        let (svc, _store, _notifier, user) = setup_service().await;

        let setup = svc.setup_authenticator(&user).await.unwrap();
        let secret = setup.secret.unwrap();
        let code = totp::code_at(&secret, Utc::now().timestamp() as u64).unwrap();
        svc.verify_setup(&user, &code).await.unwrap();

        // Password alone does not rotate the codes; an invalid code fails.
        let bad_code = wrong_code(&secret);
        let err = svc
            .regenerate_backup_codes(&user, TEST_PASSWORD, &bad_code)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTwoFactorCode));

        // The old codes still work afterwards.
        svc.verify_login(&user, &setup.backup_codes[0]).await.unwrap();
    }

    // A 6-digit code that is not valid for `secret` right now. Five steps of
    // skew admit at most five codes, so one of six candidates must miss.
    fn wrong_code(secret: &str) -> String {
        let now = Utc::now().timestamp() as u64;
        ["000000", "111111", "222222", "333333", "444444", "555555"]
            .into_iter()
            .find(|c| !totp::verify(secret, c, now))
            .unwrap()
            .to_string()
    }
}
