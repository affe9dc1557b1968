//! Store (tenant/location) and user-store access models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant/location entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub store_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Store {
    pub fn new(name: String) -> Self {
        Self {
            store_id: Uuid::new_v4(),
            name,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Grant of store access to a user. Revocation flips `can_access` instead of
/// deleting the row; exactly one grant per user carries `is_default`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStore {
    pub user_id: Uuid,
    pub store_id: Uuid,
    pub is_default: bool,
    pub can_access: bool,
    pub granted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserStore {
    pub fn new(user_id: Uuid, store_id: Uuid, is_default: bool) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            store_id,
            is_default,
            can_access: true,
            granted_at: now,
            updated_at: now,
        }
    }
}
