//! Multi-store access grants.
//!
//! Grants are soft-revoked (the row survives with `can_access = false`) so
//! access history is preserved, and at most one grant per user is the
//! default store.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::models::audit::actions;
use crate::models::{Store, UserStore};
use crate::services::audit::AuditService;
use crate::services::ServiceError;
use crate::store::CredentialStore;

#[derive(Clone)]
pub struct StoreAccessService {
    store: Arc<dyn CredentialStore>,
    audit: AuditService,
}

impl StoreAccessService {
    pub fn new(store: Arc<dyn CredentialStore>, audit: AuditService) -> Self {
        Self { store, audit }
    }

    pub async fn create_store(&self, name: &str) -> Result<Store, ServiceError> {
        let record = Store::new(name.to_string());
        self.store.insert_store(record.clone()).await?;
        Ok(record)
    }

    /// Grant a user access to a store. A user's first grant becomes their
    /// default; re-granting restores a revoked grant.
    pub async fn grant(
        &self,
        user_id: Uuid,
        store_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<UserStore, ServiceError> {
        if self.store.find_user_by_id(user_id).await?.is_none() {
            return Err(ServiceError::UserNotFound);
        }
        if self.store.find_store(store_id).await?.is_none() {
            return Err(ServiceError::StoreNotFound);
        }

        let has_default = self
            .store
            .user_stores(user_id)
            .await?
            .iter()
            .any(|g| g.is_default && g.can_access);

        let grant = match self.store.find_user_store(user_id, store_id).await? {
            Some(mut existing) => {
                existing.can_access = true;
                existing.is_default = existing.is_default || !has_default;
                existing.updated_at = Utc::now();
                existing
            }
            None => UserStore::new(user_id, store_id, !has_default),
        };
        self.store.upsert_user_store(grant.clone()).await?;

        self.audit
            .log_permission_change(
                actions::STORE_ACCESS_GRANTED,
                actor,
                "user_store",
                &user_id.to_string(),
                None,
                Some(json!({ "store_id": store_id })),
            )
            .await;
        Ok(grant)
    }

    /// Revoke access. When the revoked grant was the default, another
    /// accessible grant is promoted so the invariant of one default per
    /// user with access holds.
    pub async fn revoke(
        &self,
        user_id: Uuid,
        store_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let mut grant = self
            .store
            .find_user_store(user_id, store_id)
            .await?
            .ok_or(ServiceError::StoreNotFound)?;

        let was_default = grant.is_default;
        grant.can_access = false;
        grant.is_default = false;
        grant.updated_at = Utc::now();
        self.store.upsert_user_store(grant).await?;

        if was_default {
            let remaining = self.accessible_stores(user_id).await?;
            if let Some(next) = remaining.into_iter().next() {
                self.set_default(user_id, next.store_id).await?;
            }
        }

        self.audit
            .log_permission_change(
                actions::STORE_ACCESS_REVOKED,
                actor,
                "user_store",
                &user_id.to_string(),
                Some(json!({ "store_id": store_id })),
                None,
            )
            .await;
        Ok(())
    }

    /// Make `store_id` the user's default store. Clears the flag everywhere
    /// else first so exactly one grant carries it.
    pub async fn set_default(&self, user_id: Uuid, store_id: Uuid) -> Result<(), ServiceError> {
        let mut grant = self
            .store
            .find_user_store(user_id, store_id)
            .await?
            .filter(|g| g.can_access)
            .ok_or(ServiceError::StoreAccessDenied)?;

        self.store.clear_default_store(user_id).await?;
        grant.is_default = true;
        grant.updated_at = Utc::now();
        self.store.upsert_user_store(grant).await?;
        Ok(())
    }

    /// Grants the user can currently use, default first.
    pub async fn accessible_stores(&self, user_id: Uuid) -> Result<Vec<UserStore>, ServiceError> {
        let mut grants: Vec<UserStore> = self
            .store
            .user_stores(user_id)
            .await?
            .into_iter()
            .filter(|g| g.can_access)
            .collect();
        grants.sort_by_key(|g| std::cmp::Reverse(g.is_default));
        Ok(grants)
    }

    pub async fn default_store(&self, user_id: Uuid) -> Result<Option<UserStore>, ServiceError> {
        Ok(self
            .accessible_stores(user_id)
            .await?
            .into_iter()
            .find(|g| g.is_default))
    }

    pub async fn can_access(&self, user_id: Uuid, store_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self
            .store
            .find_user_store(user_id, store_id)
            .await?
            .map(|g| g.can_access)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::store::MemoryStore;

    async fn setup() -> (StoreAccessService, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditService::new(store.clone());
        let svc = StoreAccessService::new(store.clone(), audit);

        let user = User::new("stores@example.com".to_string(), "hash".to_string());
        let user_id = user.user_id;
        store.insert_user(user).await.unwrap();
        (svc, store, user_id)
    }

    #[tokio::test]
    async fn test_first_grant_is_default() {
        let (svc, _store, user_id) = setup().await;
        let a = svc.create_store("Main").await.unwrap();
        let b = svc.create_store("Branch").await.unwrap();

        svc.grant(user_id, a.store_id, None).await.unwrap();
        svc.grant(user_id, b.store_id, None).await.unwrap();

        let default = svc.default_store(user_id).await.unwrap().unwrap();
        assert_eq!(default.store_id, a.store_id);
    }

    #[tokio::test]
    async fn test_set_default_moves_flag() {
        let (svc, _store, user_id) = setup().await;
        let a = svc.create_store("Main").await.unwrap();
        let b = svc.create_store("Branch").await.unwrap();
        svc.grant(user_id, a.store_id, None).await.unwrap();
        svc.grant(user_id, b.store_id, None).await.unwrap();

        svc.set_default(user_id, b.store_id).await.unwrap();

        let grants = svc.accessible_stores(user_id).await.unwrap();
        let defaults: Vec<_> = grants.iter().filter(|g| g.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].store_id, b.store_id);
    }

    #[tokio::test]
    async fn test_revoking_default_promotes_another() {
        let (svc, _store, user_id) = setup().await;
        let a = svc.create_store("Main").await.unwrap();
        let b = svc.create_store("Branch").await.unwrap();
        svc.grant(user_id, a.store_id, None).await.unwrap();
        svc.grant(user_id, b.store_id, None).await.unwrap();

        svc.revoke(user_id, a.store_id, None).await.unwrap();

        assert!(!svc.can_access(user_id, a.store_id).await.unwrap());
        let default = svc.default_store(user_id).await.unwrap().unwrap();
        assert_eq!(default.store_id, b.store_id);
    }

    #[tokio::test]
    async fn test_cannot_default_to_revoked_store() {
        let (svc, _store, user_id) = setup().await;
        let a = svc.create_store("Main").await.unwrap();
        let b = svc.create_store("Branch").await.unwrap();
        svc.grant(user_id, a.store_id, None).await.unwrap();
        svc.grant(user_id, b.store_id, None).await.unwrap();
        svc.revoke(user_id, b.store_id, None).await.unwrap();

        let err = svc.set_default(user_id, b.store_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::StoreAccessDenied));
    }

    #[tokio::test]
    async fn test_regrant_restores_access() {
        let (svc, _store, user_id) = setup().await;
        let a = svc.create_store("Main").await.unwrap();
        svc.grant(user_id, a.store_id, None).await.unwrap();
        svc.revoke(user_id, a.store_id, None).await.unwrap();
        assert!(!svc.can_access(user_id, a.store_id).await.unwrap());

        svc.grant(user_id, a.store_id, None).await.unwrap();
        assert!(svc.can_access(user_id, a.store_id).await.unwrap());
    }
}
