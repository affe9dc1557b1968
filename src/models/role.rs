//! Role and permission models for RBAC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Named bundle of permissions. System roles are immutable and undeletable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub role_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: String, description: Option<String>, is_system: bool) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            name,
            description,
            is_system,
            created_at: Utc::now(),
        }
    }
}

/// An (action, resource) pair, globally unique. Deactivated rather than deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub permission_id: Uuid,
    pub action: String,
    pub resource: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Permission {
    pub fn new(action: &str, resource: &str, description: Option<String>) -> Self {
        Self {
            permission_id: Uuid::new_v4(),
            action: action.to_string(),
            resource: resource.to_string(),
            description,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Join of Role and Permission. Per-assignment conditions override the
/// permission's defaults; condition evaluation is an extension point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub conditions: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl RolePermission {
    pub fn new(role_id: Uuid, permission_id: Uuid, conditions: Option<Value>) -> Self {
        Self {
            role_id,
            permission_id,
            conditions,
            created_at: Utc::now(),
        }
    }
}

/// Join of User and Role. Soft-activatable so assignment history is preserved;
/// re-assignment reactivates instead of duplicating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoleAssignment {
    pub assignment_id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub is_active: bool,
    pub assigned_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRoleAssignment {
    pub fn new(user_id: Uuid, role_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            assignment_id: Uuid::new_v4(),
            user_id,
            role_id,
            is_active: true,
            assigned_at: now,
            updated_at: now,
        }
    }
}

/// A flattened, de-duplicated grant in a user's effective permission set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectivePermission {
    pub action: String,
    pub resource: String,
    pub conditions: Option<Value>,
}

/// Fixed role ordering used for display and reporting only. Permission
/// resolution is strictly assignment-based and never implied by rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleRank {
    Owner,
    Admin,
    Manager,
    Accountant,
    Sales,
    Inventory,
    Customer,
    User,
}

impl RoleRank {
    /// Numeric rank, highest first. Owner=8 .. User=1.
    pub fn rank(&self) -> u8 {
        match self {
            RoleRank::Owner => 8,
            RoleRank::Admin => 7,
            RoleRank::Manager => 6,
            RoleRank::Accountant => 5,
            RoleRank::Sales => 4,
            RoleRank::Inventory => 3,
            RoleRank::Customer => 2,
            RoleRank::User => 1,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "owner" => Some(RoleRank::Owner),
            "admin" => Some(RoleRank::Admin),
            "manager" => Some(RoleRank::Manager),
            "accountant" => Some(RoleRank::Accountant),
            "sales" => Some(RoleRank::Sales),
            "inventory" => Some(RoleRank::Inventory),
            "customer" => Some(RoleRank::Customer),
            "user" => Some(RoleRank::User),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleRank::Owner => "owner",
            RoleRank::Admin => "admin",
            RoleRank::Manager => "manager",
            RoleRank::Accountant => "accountant",
            RoleRank::Sales => "sales",
            RoleRank::Inventory => "inventory",
            RoleRank::Customer => "customer",
            RoleRank::User => "user",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_ordering() {
        assert!(RoleRank::Owner.rank() > RoleRank::Admin.rank());
        assert!(RoleRank::Admin.rank() > RoleRank::Manager.rank());
        assert!(RoleRank::Customer.rank() > RoleRank::User.rank());
    }

    #[test]
    fn test_rank_from_name() {
        assert_eq!(RoleRank::from_name("OWNER"), Some(RoleRank::Owner));
        assert_eq!(RoleRank::from_name("unknown"), None);
    }
}
