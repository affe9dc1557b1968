//! Audit event model - append-only, never updated after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Severity of an audit event. CRITICAL events are exempt from retention sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditSeverity {
    Info,
    Warn,
    Error,
    Critical,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "INFO",
            AuditSeverity::Warn => "WARN",
            AuditSeverity::Error => "ERROR",
            AuditSeverity::Critical => "CRITICAL",
        }
    }
}

/// Audit action taxonomy. Prefixes group actions for compliance reporting.
pub mod actions {
    pub const LOGIN_SUCCESS: &str = "auth.login.success";
    pub const LOGIN_FAILED: &str = "auth.login.failed";
    pub const REGISTER: &str = "auth.register";
    pub const EMAIL_VERIFIED: &str = "auth.email.verified";
    pub const PASSWORD_RESET: &str = "auth.password.reset";
    pub const PASSWORD_CHANGED: &str = "auth.password.changed";
    pub const TWO_FACTOR_ENABLED: &str = "auth.2fa.enabled";
    pub const TWO_FACTOR_DISABLED: &str = "auth.2fa.disabled";
    pub const BACKUP_CODES_REGENERATED: &str = "auth.2fa.backup_codes_regenerated";
    pub const USER_DEACTIVATED: &str = "auth.user.deactivated";
    pub const USER_REACTIVATED: &str = "auth.user.reactivated";

    pub const ROLE_CREATED: &str = "rbac.role.created";
    pub const ROLE_UPDATED: &str = "rbac.role.updated";
    pub const ROLE_DELETED: &str = "rbac.role.deleted";
    pub const ROLE_ASSIGNED: &str = "rbac.role.assigned";
    pub const ROLE_REVOKED: &str = "rbac.role.revoked";
    pub const PERMISSION_CREATED: &str = "rbac.permission.created";
    pub const PERMISSION_DEACTIVATED: &str = "rbac.permission.deactivated";
    pub const PERMISSION_GRANTED: &str = "rbac.permission.granted";
    pub const PERMISSION_REVOKED: &str = "rbac.permission.revoked";

    pub const STORE_ACCESS_GRANTED: &str = "rbac.store_access.granted";
    pub const STORE_ACCESS_REVOKED: &str = "rbac.store_access.revoked";

    pub const API_KEY_CREATED: &str = "apikey.created";
    pub const API_KEY_REVOKED: &str = "apikey.revoked";

    pub const DATA_EXPORT: &str = "data.export";
    pub const CONFIG_POLICY_UPDATED: &str = "config.password_policy.updated";

    /// Prefix for privilege-affecting actions (role/permission/store access).
    pub const PRIVILEGE_PREFIX: &str = "rbac.";
    /// Prefix for sensitive data-access actions.
    pub const DATA_PREFIX: &str = "data.";
    /// Prefix for configuration changes.
    pub const CONFIG_PREFIX: &str = "config.";
    /// Prefix for explicitly security-relevant events.
    pub const SECURITY_PREFIX: &str = "security.";
}

/// Append-only audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    /// Acting user, when known.
    pub user_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    /// Snapshot of the record before the change, when applicable.
    pub before: Option<Value>,
    /// Snapshot after the change.
    pub after: Option<Value>,
    pub severity: AuditSeverity,
    pub ip_address: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: &str, resource: &str, severity: AuditSeverity) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            user_id: None,
            store_id: None,
            action: action.to_string(),
            resource: resource.to_string(),
            resource_id: None,
            before: None,
            after: None,
            severity,
            ip_address: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_store(mut self, store_id: Uuid) -> Self {
        self.store_id = Some(store_id);
        self
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_snapshots(mut self, before: Option<Value>, after: Option<Value>) -> Self {
        self.before = before;
        self.after = after;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Filter set for querying audit events.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub user_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub severity: Option<AuditSeverity>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// 1-based page number. 0 is treated as 1.
    pub page: usize,
    pub page_size: usize,
}

impl AuditQuery {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(user_id) = self.user_id {
            if event.user_id != Some(user_id) {
                return false;
            }
        }
        if let Some(store_id) = self.store_id {
            if event.store_id != Some(store_id) {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &event.action != action {
                return false;
            }
        }
        if let Some(resource) = &self.resource {
            if &event.resource != resource {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if event.severity != severity {
                return false;
            }
        }
        if let Some(from) = self.from {
            if event.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.created_at > to {
                return false;
            }
        }
        true
    }
}

/// One page of audit query results.
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub events: Vec<AuditEvent>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}
