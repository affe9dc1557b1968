//! Service-level error taxonomy.
//!
//! Authentication failures stay generic toward callers; the specific internal
//! reason goes to the login-attempt log and the audit trail instead.

use thiserror::Error;

use crate::notifier::NotifierError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    // Authentication failures: deliberately generic.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account locked")]
    AccountLocked,

    #[error("account disabled")]
    AccountDisabled,

    #[error("account not verified")]
    AccountNotVerified,

    #[error("invalid two-factor code")]
    InvalidTwoFactorCode,

    #[error("two-factor authentication is not configured")]
    TwoFactorNotConfigured,

    #[error("invalid or expired token")]
    InvalidToken,

    // Integrity failures: specific by design.
    #[error("user already exists")]
    UserAlreadyExists,

    #[error("user not found")]
    UserNotFound,

    #[error("role not found")]
    RoleNotFound,

    #[error("role already exists")]
    RoleAlreadyExists,

    #[error("permission not found")]
    PermissionNotFound,

    #[error("permission already exists")]
    PermissionAlreadyExists,

    #[error("system roles cannot be modified or deleted")]
    SystemRoleImmutable,

    #[error("role has active assignments and cannot be deleted")]
    RoleInUse,

    #[error("store not found")]
    StoreNotFound,

    #[error("store access denied")]
    StoreAccessDenied,

    // Validation failures carry bilingual user-facing messages.
    #[error("password does not meet the active policy")]
    PasswordPolicyViolation(Vec<crate::services::password_policy::ValidationMessage>),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("notification failed: {0}")]
    Notification(#[from] NotifierError),
}
