//! Authentication flows: registration, login with lockout, two-factor
//! completion, email verification, and password lifecycle.
//!
//! Callers see generic failures (`InvalidCredentials`) wherever a specific
//! reason would help account enumeration; the precise reason goes to the
//! login-attempt log and audit trail instead. Lockout is visible because the
//! locked account itself is already known to its owner.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::audit::actions;
use crate::models::{
    AuditEvent, AuditSeverity, LoginAttempt, LoginFailureReason, OtpPurpose, OtpToken,
    PasswordHistory, SanitizedUser, TwoFactorMethod, User,
};
use crate::notifier::Notifier;
use crate::services::audit::AuditService;
use crate::services::password_policy::PasswordPolicyService;
use crate::services::rate_limit::RateLimiter;
use crate::services::rbac::RbacService;
use crate::services::session::{SessionService, SessionTokens};
use crate::services::store_access::StoreAccessService;
use crate::services::two_factor::TwoFactorService;
use crate::services::ServiceError;
use crate::store::{CredentialStore, StoreError};
use crate::utils::{generate_token, hash_password, sha256_hex, verify_password, Password, PasswordHashString};

/// Email verification tokens stay valid for a day.
const EMAIL_VERIFICATION_TTL_HOURS: i64 = 24;
/// Password reset tokens stay valid for half an hour.
const PASSWORD_RESET_TTL_MINUTES: i64 = 30;
/// Random bytes behind emailed verification/reset tokens.
const LINK_TOKEN_BYTES: usize = 32;

/// What a successful password check leads to.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginOutcome {
    /// Fully authenticated; tokens are ready to use.
    Success {
        user: SanitizedUser,
        tokens: SessionTokens,
    },
    /// Password accepted, second factor still required. The temp token is
    /// only redeemable at `complete_two_factor`.
    RequiresTwoFactor {
        temp_token: String,
        method: String,
    },
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    notifier: Arc<dyn Notifier>,
    session: SessionService,
    two_factor: TwoFactorService,
    rbac: RbacService,
    store_access: StoreAccessService,
    password_policy: PasswordPolicyService,
    audit: AuditService,
    limiter: Arc<RateLimiter>,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
        session: SessionService,
        two_factor: TwoFactorService,
        rbac: RbacService,
        store_access: StoreAccessService,
        password_policy: PasswordPolicyService,
        audit: AuditService,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            store,
            notifier,
            session,
            two_factor,
            rbac,
            store_access,
            password_policy,
            audit,
            limiter,
        }
    }

    // --- registration & verification ---

    /// Create an account and send the verification email. The account cannot
    /// log in until the email is verified.
    pub async fn register(
        &self,
        email: &str,
        phone: Option<String>,
        username: Option<String>,
        password: &str,
        ip: &str,
    ) -> Result<SanitizedUser, ServiceError> {
        if !self.limiter.check_ip(ip).allowed {
            return Err(ServiceError::RateLimited);
        }

        self.password_policy.enforce(password, None).await?;

        let hash = hash_password(&Password::new(password.to_string()))?;
        let mut user = User::new(email.to_string(), hash.into_string());
        user.phone = phone;
        user.username = username;

        match self.store.insert_user(user.clone()).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => return Err(ServiceError::UserAlreadyExists),
            Err(e) => return Err(e.into()),
        }

        let policy = self.password_policy.active_policy().await?;
        self.store
            .append_password_history(
                PasswordHistory::new(user.user_id, user.password_hash.clone()),
                policy.prevent_reuse,
            )
            .await?;

        self.send_verification_email(&user).await?;

        self.audit
            .record(
                AuditEvent::new(actions::REGISTER, "user", AuditSeverity::Info)
                    .with_user(user.user_id)
                    .with_ip(ip),
            )
            .await;
        tracing::info!(user_id = %user.user_id, "User registered");
        Ok(user.sanitized())
    }

    /// Issue (or re-issue) the email verification token.
    pub async fn send_verification_email(&self, user: &User) -> Result<(), ServiceError> {
        let token = generate_token(LINK_TOKEN_BYTES);
        self.store
            .insert_otp_token(OtpToken::new(
                user.user_id,
                OtpPurpose::EmailVerification,
                sha256_hex(&token),
                Duration::hours(EMAIL_VERIFICATION_TTL_HOURS),
            ))
            .await?;

        self.notifier
            .send_email(
                &user.email,
                "Verify your email address",
                &format!(
                    "<p>Welcome! Use this token to verify your email address:</p>\
                     <p><code>{}</code></p>\
                     <p>The token expires in {} hours.</p>",
                    token, EMAIL_VERIFICATION_TTL_HOURS
                ),
            )
            .await?;
        Ok(())
    }

    /// Redeem an emailed verification token. Single use.
    pub async fn verify_email(&self, token: &str) -> Result<SanitizedUser, ServiceError> {
        let consumed = self
            .store
            .consume_otp_token(OtpPurpose::EmailVerification, &sha256_hex(token))
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        let mut user = self
            .store
            .find_user_by_id(consumed.user_id)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        user.email_verified = true;
        user.updated_at = Utc::now();
        self.store.update_user(user.clone()).await?;

        self.audit
            .record(
                AuditEvent::new(actions::EMAIL_VERIFIED, "user", AuditSeverity::Info)
                    .with_user(user.user_id),
            )
            .await;
        Ok(user.sanitized())
    }

    // --- login ---

    /// First login step: identifier + password. Ends in a full session or,
    /// when two-factor is enabled, a temp token for the second step.
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        ip: &str,
        user_agent: Option<&str>,
    ) -> Result<LoginOutcome, ServiceError> {
        if !self.limiter.check_ip(ip).allowed {
            return Err(ServiceError::RateLimited);
        }

        let user = match self.store.find_user_by_identifier(identifier).await? {
            Some(user) => user,
            None => {
                self.log_failure(identifier, None, LoginFailureReason::FailedInvalidCredentials, ip, user_agent)
                    .await;
                return Err(ServiceError::InvalidCredentials);
            }
        };

        let now = Utc::now();
        if user.is_locked(now) {
            self.log_failure(identifier, Some(user.user_id), LoginFailureReason::FailedAccountLocked, ip, user_agent)
                .await;
            return Err(ServiceError::AccountLocked);
        }
        if !user.is_active {
            self.log_failure(identifier, Some(user.user_id), LoginFailureReason::FailedAccountDisabled, ip, user_agent)
                .await;
            return Err(ServiceError::AccountDisabled);
        }

        let candidate = Password::new(password.to_string());
        let hash = PasswordHashString::new(user.password_hash.clone());
        if verify_password(&candidate, &hash).is_err() {
            return Err(self.handle_wrong_password(&user, identifier, ip, user_agent).await?);
        }

        if !user.email_verified {
            self.log_failure(identifier, Some(user.user_id), LoginFailureReason::FailedAccountDisabled, ip, user_agent)
                .await;
            return Err(ServiceError::AccountNotVerified);
        }

        self.store.reset_login_attempts(user.user_id).await?;

        if let Some(config) = self.two_factor.status(user.user_id).await? {
            if config.is_enabled() {
                let temp_token = self.session.issue_two_factor_token(user.user_id)?;
                // Authenticator users generate their own code; delivered
                // methods get one pushed now.
                if !matches!(config.method, TwoFactorMethod::Authenticator { .. }) {
                    self.two_factor.send_challenge(&user).await?;
                }
                return Ok(LoginOutcome::RequiresTwoFactor {
                    temp_token,
                    method: config.method.as_str().to_string(),
                });
            }
        }

        self.finish_login(&user, identifier, ip, user_agent).await
    }

    /// Second login step: redeem the temp token with a two-factor code.
    pub async fn complete_two_factor(
        &self,
        temp_token: &str,
        code: &str,
        ip: &str,
        user_agent: Option<&str>,
    ) -> Result<LoginOutcome, ServiceError> {
        let claims = self.session.validate_two_factor_token(temp_token)?;
        let user_id: Uuid = claims
            .sub
            .parse()
            .map_err(|_| ServiceError::InvalidToken)?;
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        let now = Utc::now();
        if user.is_locked(now) {
            return Err(ServiceError::AccountLocked);
        }
        if !user.is_active {
            return Err(ServiceError::AccountDisabled);
        }

        if let Err(e) = self.two_factor.verify_login(&user, code).await {
            self.log_failure(&user.email, Some(user.user_id), LoginFailureReason::FailedTwoFactorInvalid, ip, user_agent)
                .await;
            return Err(e);
        }

        self.store.reset_login_attempts(user.user_id).await?;
        self.finish_login(&user, &user.email, ip, user_agent).await
    }

    /// Exchange a refresh token for a fresh token pair.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<SessionTokens, ServiceError> {
        let claims = self.session.validate_refresh_token(refresh_token)?;
        let user_id: Uuid = claims
            .sub
            .parse()
            .map_err(|_| ServiceError::InvalidToken)?;
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or(ServiceError::InvalidToken)?;

        self.issue_session(&user).await
    }

    // --- password lifecycle ---

    /// Start a password reset. Always succeeds from the caller's view so the
    /// response does not reveal whether the identifier exists.
    pub async fn request_password_reset(&self, identifier: &str, ip: &str) -> Result<(), ServiceError> {
        if !self.limiter.check_ip(ip).allowed {
            return Err(ServiceError::RateLimited);
        }

        let Some(user) = self.store.find_user_by_identifier(identifier).await? else {
            tracing::debug!("Password reset requested for unknown identifier");
            return Ok(());
        };

        let token = generate_token(LINK_TOKEN_BYTES);
        self.store
            .insert_otp_token(OtpToken::new(
                user.user_id,
                OtpPurpose::PasswordReset,
                sha256_hex(&token),
                Duration::minutes(PASSWORD_RESET_TTL_MINUTES),
            ))
            .await?;

        self.notifier
            .send_email(
                &user.email,
                "Reset your password",
                &format!(
                    "<p>Use this token to reset your password:</p>\
                     <p><code>{}</code></p>\
                     <p>It expires in {} minutes. If you did not request this, ignore this email.</p>",
                    token, PASSWORD_RESET_TTL_MINUTES
                ),
            )
            .await?;
        Ok(())
    }

    /// Redeem a reset token. A successful reset also clears any lockout, so
    /// the owner of a locked account can recover through their email.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), ServiceError> {
        let consumed = self
            .store
            .consume_otp_token(OtpPurpose::PasswordReset, &sha256_hex(token))
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        let mut user = self
            .store
            .find_user_by_id(consumed.user_id)
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        self.password_policy
            .enforce(new_password, Some(user.user_id))
            .await?;
        self.apply_new_password(&mut user, new_password).await?;
        self.store.reset_login_attempts(user.user_id).await?;

        self.audit
            .record(
                AuditEvent::new(actions::PASSWORD_RESET, "user", AuditSeverity::Warn)
                    .with_user(user.user_id),
            )
            .await;
        tracing::info!(user_id = %user.user_id, "Password reset completed");
        Ok(())
    }

    /// Change the password of a logged-in user. Requires the current password.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ServiceError> {
        let mut user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        let candidate = Password::new(current_password.to_string());
        let hash = PasswordHashString::new(user.password_hash.clone());
        verify_password(&candidate, &hash).map_err(|_| ServiceError::InvalidCredentials)?;

        self.password_policy
            .enforce(new_password, Some(user_id))
            .await?;
        self.apply_new_password(&mut user, new_password).await?;

        self.audit
            .record(
                AuditEvent::new(actions::PASSWORD_CHANGED, "user", AuditSeverity::Info)
                    .with_user(user_id),
            )
            .await;
        Ok(())
    }

    // --- account state ---

    pub async fn set_user_active(
        &self,
        user_id: Uuid,
        active: bool,
        actor: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let mut user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        if user.is_active == active {
            return Ok(());
        }
        user.is_active = active;
        user.updated_at = Utc::now();
        self.store.update_user(user).await?;

        let action = if active {
            actions::USER_REACTIVATED
        } else {
            actions::USER_DEACTIVATED
        };
        let mut event =
            AuditEvent::new(action, "user", AuditSeverity::Warn).with_resource_id(user_id.to_string());
        if let Some(actor) = actor {
            event = event.with_user(actor);
        }
        self.audit.record(event).await;
        Ok(())
    }

    // --- internals ---

    /// Hash and store a new password, stamp `password_set_at`, and append the
    /// new hash to the reuse-prevention history.
    async fn apply_new_password(&self, user: &mut User, new_password: &str) -> Result<(), ServiceError> {
        let hash = hash_password(&Password::new(new_password.to_string()))?;
        user.password_hash = hash.into_string();
        user.password_set_at = Utc::now();
        user.updated_at = Utc::now();
        self.store.update_user(user.clone()).await?;

        let policy = self.password_policy.active_policy().await?;
        self.store
            .append_password_history(
                PasswordHistory::new(user.user_id, user.password_hash.clone()),
                policy.prevent_reuse,
            )
            .await?;
        Ok(())
    }

    async fn handle_wrong_password(
        &self,
        user: &User,
        identifier: &str,
        ip: &str,
        user_agent: Option<&str>,
    ) -> Result<ServiceError, ServiceError> {
        let policy = self.password_policy.active_policy().await?;
        let count = self
            .store
            .record_failed_login(
                user.user_id,
                policy.lockout_attempts,
                Duration::minutes(policy.lockout_duration_minutes),
            )
            .await?;

        self.log_failure(identifier, Some(user.user_id), LoginFailureReason::FailedInvalidCredentials, ip, user_agent)
            .await;

        if count.locked_until.is_some() {
            self.audit
                .log_security_event(
                    "security.account.locked",
                    Some(user.user_id),
                    &format!("Account locked after {} failed login attempts", count.attempts),
                )
                .await;
        }

        Ok(ServiceError::InvalidCredentials)
    }

    async fn finish_login(
        &self,
        user: &User,
        identifier: &str,
        ip: &str,
        user_agent: Option<&str>,
    ) -> Result<LoginOutcome, ServiceError> {
        let tokens = self.issue_session(user).await?;

        if let Err(e) = self
            .store
            .insert_login_attempt(LoginAttempt::success(identifier, user.user_id, ip, user_agent))
            .await
        {
            tracing::error!(error = %e, "Failed to record login attempt");
        }
        self.audit
            .log_auth_event(actions::LOGIN_SUCCESS, Some(user.user_id), true, Some(ip))
            .await;
        tracing::info!(user_id = %user.user_id, "Login successful");

        Ok(LoginOutcome::Success {
            user: user.sanitized(),
            tokens,
        })
    }

    /// Build the claims from the user's current roles, flattened permissions,
    /// and accessible stores, then sign the pair.
    async fn issue_session(&self, user: &User) -> Result<SessionTokens, ServiceError> {
        let role = self.rbac.display_role(user.user_id).await?;
        let permissions: Vec<String> = self
            .rbac
            .effective_permissions(user.user_id)
            .await?
            .into_iter()
            .map(|p| format!("{}:{}", p.action, p.resource))
            .collect();
        let stores: Vec<Uuid> = self
            .store_access
            .accessible_stores(user.user_id)
            .await?
            .into_iter()
            .map(|g| g.store_id)
            .collect();

        let access_token =
            self.session
                .issue_access_token(user.user_id, &user.email, role, permissions, stores)?;
        let refresh_token = self.session.issue_refresh_token(user.user_id)?;

        Ok(SessionTokens {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.session.access_token_expiry_seconds(),
        })
    }

    async fn log_failure(
        &self,
        identifier: &str,
        user_id: Option<Uuid>,
        reason: LoginFailureReason,
        ip: &str,
        user_agent: Option<&str>,
    ) {
        if let Err(e) = self
            .store
            .insert_login_attempt(LoginAttempt::failure(identifier, user_id, reason, ip, user_agent))
            .await
        {
            tracing::error!(error = %e, "Failed to record login attempt");
        }
        self.audit
            .log_auth_event(actions::LOGIN_FAILED, user_id, false, Some(ip))
            .await;
        tracing::warn!(reason = reason.as_str(), "Login failed");
    }
}
