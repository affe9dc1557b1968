//! API key issuance and verification.
//!
//! The plaintext key is returned exactly once, at creation. Verification
//! looks the digest up, then re-checks it in constant time before consulting
//! activity, expiry, and the per-key rate limit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::models::api_key::{API_KEY_PREFIX, API_KEY_PREVIEW_LEN};
use crate::models::audit::actions;
use crate::models::{ApiKey, AuditEvent, AuditSeverity};
use crate::services::audit::AuditService;
use crate::services::rate_limit::RateLimiter;
use crate::services::ServiceError;
use crate::store::CredentialStore;
use crate::utils::{generate_token, sha256_hex};

/// A freshly issued key. The `key` field is the only place the plaintext
/// ever appears.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedApiKey {
    pub key_id: Uuid,
    pub key: String,
    pub key_preview: String,
    pub label: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Successful verification: who the key belongs to and what it may do.
#[derive(Debug, Clone)]
pub struct ApiKeyVerification {
    pub key_id: Uuid,
    pub user_id: Uuid,
    pub permissions: Vec<String>,
}

#[derive(Clone)]
pub struct ApiKeyService {
    store: Arc<dyn CredentialStore>,
    audit: AuditService,
    limiter: Arc<RateLimiter>,
}

impl ApiKeyService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        audit: AuditService,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            store,
            audit,
            limiter,
        }
    }

    /// Issue a new key for a user: `ik_` followed by 64 hex characters.
    pub async fn create(
        &self,
        user_id: Uuid,
        label: &str,
        permissions: Vec<String>,
        rate_limit_per_hour: Option<u32>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedApiKey, ServiceError> {
        if self.store.find_user_by_id(user_id).await?.is_none() {
            return Err(ServiceError::UserNotFound);
        }

        let key = format!("{}_{}", API_KEY_PREFIX, generate_token(32));
        let preview: String = key.chars().take(API_KEY_PREVIEW_LEN).collect();

        let record = ApiKey::new(
            user_id,
            label.to_string(),
            sha256_hex(&key),
            preview.clone(),
            permissions,
            rate_limit_per_hour,
            expires_at,
        );
        self.store.insert_api_key(record.clone()).await?;

        self.audit
            .record(
                AuditEvent::new(actions::API_KEY_CREATED, "api_key", AuditSeverity::Warn)
                    .with_user(user_id)
                    .with_resource_id(record.key_id.to_string()),
            )
            .await;
        tracing::info!(user_id = %user_id, key_id = %record.key_id, "API key created");

        Ok(IssuedApiKey {
            key_id: record.key_id,
            key,
            key_preview: preview,
            label: record.label,
            expires_at: record.expires_at,
        })
    }

    /// Verify a presented key. Fails with `InvalidCredentials` for unknown,
    /// revoked, and expired keys and for keys whose owner is deactivated,
    /// and with `RateLimited` when the per-key budget is exhausted. Updates
    /// `last_used_at` on success.
    pub async fn verify(&self, presented: &str) -> Result<ApiKeyVerification, ServiceError> {
        let digest = sha256_hex(presented);
        let mut record = self
            .store
            .find_api_key_by_digest(&digest)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        // The lookup already matched; this re-check keeps the comparison
        // constant-time rather than trusting the store's equality.
        if record.key_digest.as_bytes().ct_eq(digest.as_bytes()).unwrap_u8() != 1 {
            return Err(ServiceError::InvalidCredentials);
        }

        if !record.is_active || record.is_expired(Utc::now()) {
            return Err(ServiceError::InvalidCredentials);
        }

        // A key is only as alive as its owner.
        let owner_active = self
            .store
            .find_user_by_id(record.user_id)
            .await?
            .map(|u| u.is_active)
            .unwrap_or(false);
        if !owner_active {
            return Err(ServiceError::InvalidCredentials);
        }

        if let Some(limit) = record.rate_limit_per_hour {
            if !self.limiter.check_api_key(&record.key_digest, limit).allowed {
                return Err(ServiceError::RateLimited);
            }
        }

        record.last_used_at = Some(Utc::now());
        self.store.update_api_key(record.clone()).await?;

        Ok(ApiKeyVerification {
            key_id: record.key_id,
            user_id: record.user_id,
            permissions: record.permissions,
        })
    }

    /// Soft-revoke a key. Only the owner may revoke; the row is kept for
    /// history.
    pub async fn revoke(&self, user_id: Uuid, key_id: Uuid) -> Result<(), ServiceError> {
        let mut record = self
            .store
            .find_api_key_by_id(key_id)
            .await?
            .filter(|k| k.user_id == user_id)
            .ok_or(ServiceError::InvalidCredentials)?;
        if !record.is_active {
            return Ok(());
        }

        record.is_active = false;
        self.store.update_api_key(record).await?;

        self.audit
            .record(
                AuditEvent::new(actions::API_KEY_REVOKED, "api_key", AuditSeverity::Warn)
                    .with_user(user_id)
                    .with_resource_id(key_id.to_string()),
            )
            .await;
        Ok(())
    }

    /// The user's keys with digests stripped; previews only.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<ApiKeySummary>, ServiceError> {
        Ok(self
            .store
            .list_api_keys(user_id)
            .await?
            .into_iter()
            .map(ApiKeySummary::from)
            .collect())
    }
}

/// Listing shape for a key: everything except the secret material.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeySummary {
    pub key_id: Uuid,
    pub label: String,
    pub key_preview: String,
    pub permissions: Vec<String>,
    pub rate_limit_per_hour: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<ApiKey> for ApiKeySummary {
    fn from(key: ApiKey) -> Self {
        Self {
            key_id: key.key_id,
            label: key.label,
            key_preview: key.key_preview,
            permissions: key.permissions,
            rate_limit_per_hour: key.rate_limit_per_hour,
            expires_at: key.expires_at,
            last_used_at: key.last_used_at,
            is_active: key.is_active,
            created_at: key.created_at,
        }
    }
}
