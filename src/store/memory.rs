//! In-memory `CredentialStore` used by the test harness and embeddable callers.
//!
//! Atomicity contracts (OTP consumption, backup-code removal, failed-login
//! counting) hold because each mutation runs under a single write lock.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::{CredentialStore, FailedLoginCount, StoreError};
use crate::models::{
    ApiKey, AuditEvent, AuditQuery, AuditSeverity, LoginAttempt, OtpPurpose, OtpToken,
    PasswordHistory, PasswordPolicy, Permission, Role, RolePermission, Store, TwoFactorAuth, User,
    UserRoleAssignment, UserStore,
};

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    password_history: RwLock<HashMap<Uuid, Vec<PasswordHistory>>>,
    policies: RwLock<Vec<PasswordPolicy>>,
    two_factor: RwLock<HashMap<Uuid, TwoFactorAuth>>,
    otp_tokens: RwLock<Vec<OtpToken>>,
    login_attempts: RwLock<Vec<LoginAttempt>>,
    roles: RwLock<HashMap<Uuid, Role>>,
    permissions: RwLock<HashMap<Uuid, Permission>>,
    role_permissions: RwLock<Vec<RolePermission>>,
    assignments: RwLock<Vec<UserRoleAssignment>>,
    stores: RwLock<HashMap<Uuid, Store>>,
    user_stores: RwLock<Vec<UserStore>>,
    api_keys: RwLock<HashMap<Uuid, ApiKey>>,
    audit_events: RwLock<Vec<AuditEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_poisoned() -> StoreError {
        StoreError::Backend(anyhow::anyhow!("memory store lock poisoned"))
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        let mut users = self.users.write().map_err(|_| Self::lock_poisoned())?;
        let collides = users.values().any(|u| {
            u.email.eq_ignore_ascii_case(&user.email)
                || (user.phone.is_some() && u.phone == user.phone)
                || (user.username.is_some() && u.username == user.username)
        });
        if collides {
            return Err(StoreError::Duplicate(user.email));
        }
        users.insert(user.user_id, user);
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let users = self.users.read().map_err(|_| Self::lock_poisoned())?;
        Ok(users.get(&user_id).cloned())
    }

    async fn find_user_by_identifier(&self, identifier: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().map_err(|_| Self::lock_poisoned())?;
        Ok(users
            .values()
            .find(|u| u.matches_identifier(identifier))
            .cloned())
    }

    async fn update_user(&self, user: User) -> Result<(), StoreError> {
        let mut users = self.users.write().map_err(|_| Self::lock_poisoned())?;
        match users.get_mut(&user.user_id) {
            Some(existing) => {
                *existing = user;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn record_failed_login(
        &self,
        user_id: Uuid,
        lockout_attempts: u32,
        lockout_duration: Duration,
    ) -> Result<FailedLoginCount, StoreError> {
        let mut users = self.users.write().map_err(|_| Self::lock_poisoned())?;
        let user = users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.login_attempts += 1;
        if lockout_attempts > 0 && user.login_attempts >= lockout_attempts {
            user.locked_until = Some(Utc::now() + lockout_duration);
        }
        user.updated_at = Utc::now();
        Ok(FailedLoginCount {
            attempts: user.login_attempts,
            locked_until: user.locked_until,
        })
    }

    async fn reset_login_attempts(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut users = self.users.write().map_err(|_| Self::lock_poisoned())?;
        let user = users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.login_attempts = 0;
        user.locked_until = None;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn append_password_history(
        &self,
        entry: PasswordHistory,
        keep: usize,
    ) -> Result<(), StoreError> {
        let mut history = self
            .password_history
            .write()
            .map_err(|_| Self::lock_poisoned())?;
        let entries = history.entry(entry.user_id).or_default();
        entries.push(entry);
        entries.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        entries.truncate(keep.max(1));
        Ok(())
    }

    async fn password_history(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<PasswordHistory>, StoreError> {
        let history = self
            .password_history
            .read()
            .map_err(|_| Self::lock_poisoned())?;
        let mut entries = history.get(&user_id).cloned().unwrap_or_default();
        entries.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn active_password_policy(&self) -> Result<Option<PasswordPolicy>, StoreError> {
        let policies = self.policies.read().map_err(|_| Self::lock_poisoned())?;
        Ok(policies.iter().find(|p| p.is_active).cloned())
    }

    async fn activate_password_policy(&self, policy: PasswordPolicy) -> Result<(), StoreError> {
        let mut policies = self.policies.write().map_err(|_| Self::lock_poisoned())?;
        for existing in policies.iter_mut() {
            existing.is_active = false;
        }
        policies.push(policy);
        Ok(())
    }

    async fn upsert_two_factor(&self, record: TwoFactorAuth) -> Result<(), StoreError> {
        let mut map = self.two_factor.write().map_err(|_| Self::lock_poisoned())?;
        map.insert(record.user_id, record);
        Ok(())
    }

    async fn find_two_factor(&self, user_id: Uuid) -> Result<Option<TwoFactorAuth>, StoreError> {
        let map = self.two_factor.read().map_err(|_| Self::lock_poisoned())?;
        Ok(map.get(&user_id).cloned())
    }

    async fn consume_backup_code(&self, user_id: Uuid, digest: &str) -> Result<bool, StoreError> {
        let mut map = self.two_factor.write().map_err(|_| Self::lock_poisoned())?;
        let record = match map.get_mut(&user_id) {
            Some(r) => r,
            None => return Ok(false),
        };
        let before = record.backup_code_digests.len();
        record.backup_code_digests.retain(|d| d != digest);
        let consumed = record.backup_code_digests.len() < before;
        if consumed {
            record.updated_at = Utc::now();
        }
        Ok(consumed)
    }

    async fn insert_otp_token(&self, token: OtpToken) -> Result<(), StoreError> {
        let mut tokens = self.otp_tokens.write().map_err(|_| Self::lock_poisoned())?;
        tokens.push(token);
        Ok(())
    }

    async fn consume_otp_token_for_user(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        digest: &str,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut tokens = self.otp_tokens.write().map_err(|_| Self::lock_poisoned())?;
        for token in tokens.iter_mut() {
            if token.user_id == user_id
                && token.purpose == purpose
                && token.code_digest == digest
                && token.is_valid(now)
            {
                token.used_at = Some(now);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn consume_otp_token(
        &self,
        purpose: OtpPurpose,
        digest: &str,
    ) -> Result<Option<OtpToken>, StoreError> {
        let now = Utc::now();
        let mut tokens = self.otp_tokens.write().map_err(|_| Self::lock_poisoned())?;
        for token in tokens.iter_mut() {
            if token.purpose == purpose && token.code_digest == digest && token.is_valid(now) {
                token.used_at = Some(now);
                return Ok(Some(token.clone()));
            }
        }
        Ok(None)
    }

    async fn purge_expired_otp_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tokens = self.otp_tokens.write().map_err(|_| Self::lock_poisoned())?;
        let before = tokens.len();
        tokens.retain(|t| t.expires_at > now && t.used_at.is_none());
        Ok((before - tokens.len()) as u64)
    }

    async fn insert_login_attempt(&self, attempt: LoginAttempt) -> Result<(), StoreError> {
        let mut attempts = self
            .login_attempts
            .write()
            .map_err(|_| Self::lock_poisoned())?;
        attempts.push(attempt);
        Ok(())
    }

    async fn insert_role(&self, role: Role) -> Result<(), StoreError> {
        let mut roles = self.roles.write().map_err(|_| Self::lock_poisoned())?;
        if roles.values().any(|r| r.name == role.name) {
            return Err(StoreError::Duplicate(role.name));
        }
        roles.insert(role.role_id, role);
        Ok(())
    }

    async fn find_role_by_id(&self, role_id: Uuid) -> Result<Option<Role>, StoreError> {
        let roles = self.roles.read().map_err(|_| Self::lock_poisoned())?;
        Ok(roles.get(&role_id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        let roles = self.roles.read().map_err(|_| Self::lock_poisoned())?;
        Ok(roles.values().find(|r| r.name == name).cloned())
    }

    async fn update_role(&self, role: Role) -> Result<(), StoreError> {
        let mut roles = self.roles.write().map_err(|_| Self::lock_poisoned())?;
        match roles.get_mut(&role.role_id) {
            Some(existing) => {
                *existing = role;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn delete_role(&self, role_id: Uuid) -> Result<(), StoreError> {
        let mut roles = self.roles.write().map_err(|_| Self::lock_poisoned())?;
        roles.remove(&role_id).ok_or(StoreError::NotFound)?;
        drop(roles);

        let mut links = self
            .role_permissions
            .write()
            .map_err(|_| Self::lock_poisoned())?;
        links.retain(|l| l.role_id != role_id);
        Ok(())
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let roles = self.roles.read().map_err(|_| Self::lock_poisoned())?;
        let mut all: Vec<Role> = roles.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn insert_permission(&self, permission: Permission) -> Result<(), StoreError> {
        let mut permissions = self.permissions.write().map_err(|_| Self::lock_poisoned())?;
        if permissions
            .values()
            .any(|p| p.action == permission.action && p.resource == permission.resource)
        {
            return Err(StoreError::Duplicate(format!(
                "{}:{}",
                permission.action, permission.resource
            )));
        }
        permissions.insert(permission.permission_id, permission);
        Ok(())
    }

    async fn find_permission(
        &self,
        action: &str,
        resource: &str,
    ) -> Result<Option<Permission>, StoreError> {
        let permissions = self.permissions.read().map_err(|_| Self::lock_poisoned())?;
        Ok(permissions
            .values()
            .find(|p| p.action == action && p.resource == resource)
            .cloned())
    }

    async fn find_permission_by_id(
        &self,
        permission_id: Uuid,
    ) -> Result<Option<Permission>, StoreError> {
        let permissions = self.permissions.read().map_err(|_| Self::lock_poisoned())?;
        Ok(permissions.get(&permission_id).cloned())
    }

    async fn update_permission(&self, permission: Permission) -> Result<(), StoreError> {
        let mut permissions = self.permissions.write().map_err(|_| Self::lock_poisoned())?;
        match permissions.get_mut(&permission.permission_id) {
            Some(existing) => {
                *existing = permission;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError> {
        let permissions = self.permissions.read().map_err(|_| Self::lock_poisoned())?;
        let mut all: Vec<Permission> = permissions.values().cloned().collect();
        all.sort_by(|a, b| (a.resource.clone(), a.action.clone()).cmp(&(b.resource.clone(), b.action.clone())));
        Ok(all)
    }

    async fn upsert_role_permission(&self, link: RolePermission) -> Result<(), StoreError> {
        let mut links = self
            .role_permissions
            .write()
            .map_err(|_| Self::lock_poisoned())?;
        if let Some(existing) = links
            .iter_mut()
            .find(|l| l.role_id == link.role_id && l.permission_id == link.permission_id)
        {
            existing.conditions = link.conditions;
        } else {
            links.push(link);
        }
        Ok(())
    }

    async fn remove_role_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut links = self
            .role_permissions
            .write()
            .map_err(|_| Self::lock_poisoned())?;
        links.retain(|l| !(l.role_id == role_id && l.permission_id == permission_id));
        Ok(())
    }

    async fn role_permissions(
        &self,
        role_id: Uuid,
    ) -> Result<Vec<(Permission, Option<Value>)>, StoreError> {
        let links = self
            .role_permissions
            .read()
            .map_err(|_| Self::lock_poisoned())?;
        let permissions = self.permissions.read().map_err(|_| Self::lock_poisoned())?;

        let mut result = Vec::new();
        for link in links.iter().filter(|l| l.role_id == role_id) {
            if let Some(permission) = permissions.get(&link.permission_id) {
                if permission.is_active {
                    result.push((permission.clone(), link.conditions.clone()));
                }
            }
        }
        Ok(result)
    }

    async fn upsert_role_assignment(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        active: bool,
    ) -> Result<UserRoleAssignment, StoreError> {
        let mut assignments = self.assignments.write().map_err(|_| Self::lock_poisoned())?;
        if let Some(existing) = assignments
            .iter_mut()
            .find(|a| a.user_id == user_id && a.role_id == role_id)
        {
            existing.is_active = active;
            existing.updated_at = Utc::now();
            return Ok(existing.clone());
        }

        let mut assignment = UserRoleAssignment::new(user_id, role_id);
        assignment.is_active = active;
        assignments.push(assignment.clone());
        Ok(assignment)
    }

    async fn user_role_assignments(
        &self,
        user_id: Uuid,
        only_active: bool,
    ) -> Result<Vec<UserRoleAssignment>, StoreError> {
        let assignments = self.assignments.read().map_err(|_| Self::lock_poisoned())?;
        Ok(assignments
            .iter()
            .filter(|a| a.user_id == user_id && (!only_active || a.is_active))
            .cloned()
            .collect())
    }

    async fn role_has_active_assignments(&self, role_id: Uuid) -> Result<bool, StoreError> {
        let assignments = self.assignments.read().map_err(|_| Self::lock_poisoned())?;
        Ok(assignments
            .iter()
            .any(|a| a.role_id == role_id && a.is_active))
    }

    async fn insert_store(&self, store: Store) -> Result<(), StoreError> {
        let mut stores = self.stores.write().map_err(|_| Self::lock_poisoned())?;
        stores.insert(store.store_id, store);
        Ok(())
    }

    async fn find_store(&self, store_id: Uuid) -> Result<Option<Store>, StoreError> {
        let stores = self.stores.read().map_err(|_| Self::lock_poisoned())?;
        Ok(stores.get(&store_id).cloned())
    }

    async fn upsert_user_store(&self, grant: UserStore) -> Result<(), StoreError> {
        let mut grants = self.user_stores.write().map_err(|_| Self::lock_poisoned())?;
        if let Some(existing) = grants
            .iter_mut()
            .find(|g| g.user_id == grant.user_id && g.store_id == grant.store_id)
        {
            *existing = grant;
        } else {
            grants.push(grant);
        }
        Ok(())
    }

    async fn find_user_store(
        &self,
        user_id: Uuid,
        store_id: Uuid,
    ) -> Result<Option<UserStore>, StoreError> {
        let grants = self.user_stores.read().map_err(|_| Self::lock_poisoned())?;
        Ok(grants
            .iter()
            .find(|g| g.user_id == user_id && g.store_id == store_id)
            .cloned())
    }

    async fn user_stores(&self, user_id: Uuid) -> Result<Vec<UserStore>, StoreError> {
        let grants = self.user_stores.read().map_err(|_| Self::lock_poisoned())?;
        Ok(grants
            .iter()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn clear_default_store(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut grants = self.user_stores.write().map_err(|_| Self::lock_poisoned())?;
        for grant in grants.iter_mut().filter(|g| g.user_id == user_id) {
            grant.is_default = false;
            grant.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_api_key(&self, key: ApiKey) -> Result<(), StoreError> {
        let mut keys = self.api_keys.write().map_err(|_| Self::lock_poisoned())?;
        keys.insert(key.key_id, key);
        Ok(())
    }

    async fn find_api_key_by_id(&self, key_id: Uuid) -> Result<Option<ApiKey>, StoreError> {
        let keys = self.api_keys.read().map_err(|_| Self::lock_poisoned())?;
        Ok(keys.get(&key_id).cloned())
    }

    async fn find_api_key_by_digest(&self, digest: &str) -> Result<Option<ApiKey>, StoreError> {
        let keys = self.api_keys.read().map_err(|_| Self::lock_poisoned())?;
        Ok(keys.values().find(|k| k.key_digest == digest).cloned())
    }

    async fn update_api_key(&self, key: ApiKey) -> Result<(), StoreError> {
        let mut keys = self.api_keys.write().map_err(|_| Self::lock_poisoned())?;
        match keys.get_mut(&key.key_id) {
            Some(existing) => {
                *existing = key;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn list_api_keys(&self, user_id: Uuid) -> Result<Vec<ApiKey>, StoreError> {
        let keys = self.api_keys.read().map_err(|_| Self::lock_poisoned())?;
        let mut result: Vec<ApiKey> = keys.values().filter(|k| k.user_id == user_id).cloned().collect();
        result.sort_by_key(|k| k.created_at);
        Ok(result)
    }

    async fn insert_audit_event(&self, event: AuditEvent) -> Result<(), StoreError> {
        let mut events = self.audit_events.write().map_err(|_| Self::lock_poisoned())?;
        events.push(event);
        Ok(())
    }

    async fn query_audit_events(
        &self,
        query: &AuditQuery,
    ) -> Result<(Vec<AuditEvent>, usize), StoreError> {
        let events = self.audit_events.read().map_err(|_| Self::lock_poisoned())?;
        let mut matching: Vec<AuditEvent> =
            events.iter().filter(|e| query.matches(e)).cloned().collect();
        matching.sort_by_key(|e| std::cmp::Reverse(e.created_at));

        let total = matching.len();
        let page = query.page.max(1);
        let page_size = if query.page_size == 0 { 50 } else { query.page_size };
        let start = (page - 1) * page_size;
        let page_events = if start >= matching.len() {
            Vec::new()
        } else {
            matching[start..(start + page_size).min(matching.len())].to_vec()
        };
        Ok((page_events, total))
    }

    async fn audit_events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let events = self.audit_events.read().map_err(|_| Self::lock_poisoned())?;
        Ok(events
            .iter()
            .filter(|e| e.created_at >= from && e.created_at <= to)
            .cloned()
            .collect())
    }

    async fn purge_audit_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut events = self.audit_events.write().map_err(|_| Self::lock_poisoned())?;
        let before = events.len();
        events.retain(|e| e.created_at >= cutoff || e.severity == AuditSeverity::Critical);
        Ok((before - events.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_duplicate_user_rejected() {
        let store = MemoryStore::new();
        let user = User::new("a@b.com".to_string(), "hash".to_string());
        store.insert_user(user.clone()).await.unwrap();

        let dup = User::new("a@b.com".to_string(), "hash2".to_string());
        assert!(matches!(
            store.insert_user(dup).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_login_locks_at_threshold() {
        let store = MemoryStore::new();
        let user = User::new("a@b.com".to_string(), "hash".to_string());
        let user_id = user.user_id;
        store.insert_user(user).await.unwrap();

        for i in 1..=4 {
            let count = store
                .record_failed_login(user_id, 5, Duration::minutes(30))
                .await
                .unwrap();
            assert_eq!(count.attempts, i);
            assert!(count.locked_until.is_none());
        }

        let count = store
            .record_failed_login(user_id, 5, Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(count.attempts, 5);
        assert!(count.locked_until.is_some());
    }

    #[tokio::test]
    async fn test_otp_token_single_use() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let token = OtpToken::new(
            user_id,
            OtpPurpose::TwoFactor,
            "digest".to_string(),
            Duration::minutes(5),
        );
        store.insert_otp_token(token).await.unwrap();

        assert!(store
            .consume_otp_token_for_user(user_id, OtpPurpose::TwoFactor, "digest")
            .await
            .unwrap());
        assert!(!store
            .consume_otp_token_for_user(user_id, OtpPurpose::TwoFactor, "digest")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_backup_code_single_use() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let record = TwoFactorAuth::new(
            user_id,
            crate::models::TwoFactorMethod::Email,
            vec!["d1".to_string(), "d2".to_string()],
        );
        store.upsert_two_factor(record).await.unwrap();

        assert!(store.consume_backup_code(user_id, "d1").await.unwrap());
        assert!(!store.consume_backup_code(user_id, "d1").await.unwrap());
        assert!(store.consume_backup_code(user_id, "d2").await.unwrap());
    }

    #[tokio::test]
    async fn test_policy_versioning() {
        let store = MemoryStore::new();
        let first = PasswordPolicy::default();
        let first_id = first.policy_id;
        store.activate_password_policy(first).await.unwrap();

        let mut second = PasswordPolicy::default();
        second.min_length = 12;
        store.activate_password_policy(second).await.unwrap();

        let active = store.active_password_policy().await.unwrap().unwrap();
        assert_eq!(active.min_length, 12);
        assert_ne!(active.policy_id, first_id);
    }

    #[tokio::test]
    async fn test_audit_purge_keeps_critical() {
        let store = MemoryStore::new();
        let old = Utc::now() - Duration::days(10);

        let mut info = AuditEvent::new("auth.login.failed", "user", AuditSeverity::Info);
        info.created_at = old;
        let mut critical = AuditEvent::new("security.breach", "user", AuditSeverity::Critical);
        critical.created_at = old;

        store.insert_audit_event(info).await.unwrap();
        store.insert_audit_event(critical).await.unwrap();

        let purged = store
            .purge_audit_events_before(Utc::now() - Duration::days(5))
            .await
            .unwrap();
        assert_eq!(purged, 1);

        let (events, total) = store
            .query_audit_events(&AuditQuery::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(events[0].severity, AuditSeverity::Critical);
    }
}
