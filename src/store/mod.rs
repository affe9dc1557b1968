//! Data-access interface for the identity subsystem.
//!
//! The relational store is an external collaborator; everything here is
//! expressed against the `CredentialStore` trait. Operations that must not
//! race (OTP consumption, backup-code consumption, failed-login counting)
//! are single trait calls so an implementation can make them one atomic
//! statement against its backend.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ApiKey, AuditEvent, AuditQuery, LoginAttempt, OtpPurpose, OtpToken, PasswordHistory,
    PasswordPolicy, Permission, Role, RolePermission, Store, TwoFactorAuth, User,
    UserRoleAssignment, UserStore,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Outcome of an atomic failed-login increment.
#[derive(Debug, Clone, Copy)]
pub struct FailedLoginCount {
    pub attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    // --- users ---

    async fn insert_user(&self, user: User) -> Result<(), StoreError>;
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;
    /// Lookup by any unique identifier: email, phone, or username.
    async fn find_user_by_identifier(&self, identifier: &str) -> Result<Option<User>, StoreError>;
    async fn update_user(&self, user: User) -> Result<(), StoreError>;

    /// Atomically increment the failed-login counter; when the new count
    /// reaches `lockout_attempts`, set `locked_until = now + lockout_duration`
    /// in the same step.
    async fn record_failed_login(
        &self,
        user_id: Uuid,
        lockout_attempts: u32,
        lockout_duration: Duration,
    ) -> Result<FailedLoginCount, StoreError>;

    /// Reset the failed-login counter and clear any lockout.
    async fn reset_login_attempts(&self, user_id: Uuid) -> Result<(), StoreError>;

    // --- password history ---

    /// Append a history row and prune the user's history to `keep` entries.
    async fn append_password_history(
        &self,
        entry: PasswordHistory,
        keep: usize,
    ) -> Result<(), StoreError>;
    async fn password_history(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<PasswordHistory>, StoreError>;

    // --- password policy ---

    async fn active_password_policy(&self) -> Result<Option<PasswordPolicy>, StoreError>;
    /// Deactivate the current active policy and insert `policy` as active.
    async fn activate_password_policy(&self, policy: PasswordPolicy) -> Result<(), StoreError>;

    // --- two-factor ---

    async fn upsert_two_factor(&self, record: TwoFactorAuth) -> Result<(), StoreError>;
    async fn find_two_factor(&self, user_id: Uuid) -> Result<Option<TwoFactorAuth>, StoreError>;
    /// Atomically remove a backup-code digest from the user's set. Returns
    /// true iff the digest was present (single use).
    async fn consume_backup_code(&self, user_id: Uuid, digest: &str) -> Result<bool, StoreError>;

    // --- one-time tokens ---

    async fn insert_otp_token(&self, token: OtpToken) -> Result<(), StoreError>;
    /// Atomically find a valid (unused, unexpired) token for the user and
    /// purpose matching `digest`, and mark it used. Returns true once.
    async fn consume_otp_token_for_user(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        digest: &str,
    ) -> Result<bool, StoreError>;
    /// As above but matched on digest alone, for emailed high-entropy tokens
    /// where the caller does not yet know the user. Returns the consumed
    /// token so the caller learns the user.
    async fn consume_otp_token(
        &self,
        purpose: OtpPurpose,
        digest: &str,
    ) -> Result<Option<OtpToken>, StoreError>;
    async fn purge_expired_otp_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    // --- login attempts ---

    async fn insert_login_attempt(&self, attempt: LoginAttempt) -> Result<(), StoreError>;

    // --- roles & permissions ---

    async fn insert_role(&self, role: Role) -> Result<(), StoreError>;
    async fn find_role_by_id(&self, role_id: Uuid) -> Result<Option<Role>, StoreError>;
    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError>;
    async fn update_role(&self, role: Role) -> Result<(), StoreError>;
    async fn delete_role(&self, role_id: Uuid) -> Result<(), StoreError>;
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError>;

    async fn insert_permission(&self, permission: Permission) -> Result<(), StoreError>;
    async fn find_permission(
        &self,
        action: &str,
        resource: &str,
    ) -> Result<Option<Permission>, StoreError>;
    async fn find_permission_by_id(
        &self,
        permission_id: Uuid,
    ) -> Result<Option<Permission>, StoreError>;
    async fn update_permission(&self, permission: Permission) -> Result<(), StoreError>;
    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError>;

    async fn upsert_role_permission(&self, link: RolePermission) -> Result<(), StoreError>;
    async fn remove_role_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), StoreError>;
    /// Active permissions attached to a role, with per-assignment conditions.
    async fn role_permissions(
        &self,
        role_id: Uuid,
    ) -> Result<Vec<(Permission, Option<Value>)>, StoreError>;

    /// Idempotent upsert of a user-role assignment, toggling `is_active`.
    async fn upsert_role_assignment(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        active: bool,
    ) -> Result<UserRoleAssignment, StoreError>;
    async fn user_role_assignments(
        &self,
        user_id: Uuid,
        only_active: bool,
    ) -> Result<Vec<UserRoleAssignment>, StoreError>;
    async fn role_has_active_assignments(&self, role_id: Uuid) -> Result<bool, StoreError>;

    // --- stores & access grants ---

    async fn insert_store(&self, store: Store) -> Result<(), StoreError>;
    async fn find_store(&self, store_id: Uuid) -> Result<Option<Store>, StoreError>;
    async fn upsert_user_store(&self, grant: UserStore) -> Result<(), StoreError>;
    async fn find_user_store(
        &self,
        user_id: Uuid,
        store_id: Uuid,
    ) -> Result<Option<UserStore>, StoreError>;
    async fn user_stores(&self, user_id: Uuid) -> Result<Vec<UserStore>, StoreError>;
    /// Clear the default flag on every grant for the user.
    async fn clear_default_store(&self, user_id: Uuid) -> Result<(), StoreError>;

    // --- api keys ---

    async fn insert_api_key(&self, key: ApiKey) -> Result<(), StoreError>;
    async fn find_api_key_by_id(&self, key_id: Uuid) -> Result<Option<ApiKey>, StoreError>;
    async fn find_api_key_by_digest(&self, digest: &str) -> Result<Option<ApiKey>, StoreError>;
    async fn update_api_key(&self, key: ApiKey) -> Result<(), StoreError>;
    async fn list_api_keys(&self, user_id: Uuid) -> Result<Vec<ApiKey>, StoreError>;

    // --- audit ---

    async fn insert_audit_event(&self, event: AuditEvent) -> Result<(), StoreError>;
    async fn query_audit_events(
        &self,
        query: &AuditQuery,
    ) -> Result<(Vec<AuditEvent>, usize), StoreError>;
    async fn audit_events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>, StoreError>;
    /// Delete events older than `cutoff`, keeping CRITICAL severity.
    async fn purge_audit_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
