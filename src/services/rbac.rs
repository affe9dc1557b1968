//! Role-based access control: role and permission administration plus
//! dynamic permission resolution.
//!
//! Resolution is strictly assignment-based: a user holds a permission only
//! through an active assignment of an active role carrying an active
//! permission. Role names imply nothing.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::audit::actions;
use crate::models::{EffectivePermission, Permission, Role, RoleRank, UserRoleAssignment};
use crate::services::audit::AuditService;
use crate::services::ServiceError;
use crate::store::CredentialStore;

/// Default permission catalog seeded on first run: (action, resource).
const DEFAULT_PERMISSIONS: &[(&str, &str)] = &[
    ("create", "products"),
    ("read", "products"),
    ("update", "products"),
    ("delete", "products"),
    ("create", "orders"),
    ("read", "orders"),
    ("update", "orders"),
    ("delete", "orders"),
    ("create", "customers"),
    ("read", "customers"),
    ("update", "customers"),
    ("create", "invoices"),
    ("read", "invoices"),
    ("update", "invoices"),
    ("read", "reports"),
    ("export", "reports"),
    ("read", "inventory"),
    ("update", "inventory"),
    ("manage", "users"),
    ("manage", "roles"),
    ("manage", "settings"),
];

/// Default system roles and the subset of the catalog each receives.
/// "manage" grants are deliberately confined to owner/admin.
fn default_role_grants() -> Vec<(&'static str, &'static str, Vec<(&'static str, &'static str)>)> {
    let all: Vec<(&str, &str)> = DEFAULT_PERMISSIONS.to_vec();
    vec![
        ("owner", "Full access to everything", all.clone()),
        ("admin", "Administrative access", all),
        (
            "manager",
            "Operational management",
            vec![
                ("create", "products"),
                ("read", "products"),
                ("update", "products"),
                ("create", "orders"),
                ("read", "orders"),
                ("update", "orders"),
                ("read", "customers"),
                ("update", "customers"),
                ("read", "invoices"),
                ("read", "reports"),
                ("read", "inventory"),
                ("update", "inventory"),
            ],
        ),
        (
            "sales",
            "Sales operations",
            vec![
                ("read", "products"),
                ("create", "orders"),
                ("read", "orders"),
                ("create", "customers"),
                ("read", "customers"),
                ("create", "invoices"),
                ("read", "invoices"),
            ],
        ),
        (
            "inventory",
            "Stock management",
            vec![
                ("read", "products"),
                ("update", "products"),
                ("read", "inventory"),
                ("update", "inventory"),
            ],
        ),
    ]
}

#[derive(Clone)]
pub struct RbacService {
    store: Arc<dyn CredentialStore>,
    audit: AuditService,
}

impl RbacService {
    pub fn new(store: Arc<dyn CredentialStore>, audit: AuditService) -> Self {
        Self { store, audit }
    }

    // --- role administration ---

    pub async fn create_role(
        &self,
        name: &str,
        description: Option<String>,
        actor: Option<Uuid>,
    ) -> Result<Role, ServiceError> {
        if self.store.find_role_by_name(name).await?.is_some() {
            return Err(ServiceError::RoleAlreadyExists);
        }

        let role = Role::new(name.to_string(), description, false);
        self.store.insert_role(role.clone()).await?;
        self.audit
            .log_permission_change(
                actions::ROLE_CREATED,
                actor,
                "role",
                &role.role_id.to_string(),
                None,
                Some(json!({ "name": role.name })),
            )
            .await;
        Ok(role)
    }

    pub async fn update_role(
        &self,
        role_id: Uuid,
        name: Option<String>,
        description: Option<String>,
        actor: Option<Uuid>,
    ) -> Result<Role, ServiceError> {
        let mut role = self
            .store
            .find_role_by_id(role_id)
            .await?
            .ok_or(ServiceError::RoleNotFound)?;
        if role.is_system {
            return Err(ServiceError::SystemRoleImmutable);
        }

        let before = json!({ "name": role.name, "description": role.description });
        if let Some(name) = name {
            if let Some(existing) = self.store.find_role_by_name(&name).await? {
                if existing.role_id != role_id {
                    return Err(ServiceError::RoleAlreadyExists);
                }
            }
            role.name = name;
        }
        if description.is_some() {
            role.description = description;
        }
        self.store.update_role(role.clone()).await?;

        self.audit
            .log_permission_change(
                actions::ROLE_UPDATED,
                actor,
                "role",
                &role_id.to_string(),
                Some(before),
                Some(json!({ "name": role.name, "description": role.description })),
            )
            .await;
        Ok(role)
    }

    /// Delete a role. Refused for system roles and for roles still actively
    /// assigned to any user.
    pub async fn delete_role(&self, role_id: Uuid, actor: Option<Uuid>) -> Result<(), ServiceError> {
        let role = self
            .store
            .find_role_by_id(role_id)
            .await?
            .ok_or(ServiceError::RoleNotFound)?;
        if role.is_system {
            return Err(ServiceError::SystemRoleImmutable);
        }
        if self.store.role_has_active_assignments(role_id).await? {
            return Err(ServiceError::RoleInUse);
        }

        self.store.delete_role(role_id).await?;
        self.audit
            .log_permission_change(
                actions::ROLE_DELETED,
                actor,
                "role",
                &role_id.to_string(),
                Some(json!({ "name": role.name })),
                None,
            )
            .await;
        Ok(())
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>, ServiceError> {
        Ok(self.store.list_roles().await?)
    }

    // --- permission administration ---

    pub async fn create_permission(
        &self,
        action: &str,
        resource: &str,
        description: Option<String>,
        actor: Option<Uuid>,
    ) -> Result<Permission, ServiceError> {
        if self.store.find_permission(action, resource).await?.is_some() {
            return Err(ServiceError::PermissionAlreadyExists);
        }

        let permission = Permission::new(action, resource, description);
        self.store.insert_permission(permission.clone()).await?;
        self.audit
            .log_permission_change(
                actions::PERMISSION_CREATED,
                actor,
                "permission",
                &permission.permission_id.to_string(),
                None,
                Some(json!({ "action": action, "resource": resource })),
            )
            .await;
        Ok(permission)
    }

    /// Permissions are referenced by audit history, so they are deactivated
    /// rather than deleted.
    pub async fn deactivate_permission(
        &self,
        permission_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let mut permission = self
            .store
            .find_permission_by_id(permission_id)
            .await?
            .ok_or(ServiceError::PermissionNotFound)?;
        if !permission.is_active {
            return Ok(());
        }
        permission.is_active = false;
        self.store.update_permission(permission.clone()).await?;

        self.audit
            .log_permission_change(
                actions::PERMISSION_DEACTIVATED,
                actor,
                "permission",
                &permission_id.to_string(),
                Some(json!({ "action": permission.action, "resource": permission.resource })),
                None,
            )
            .await;
        Ok(())
    }

    pub async fn list_permissions(&self) -> Result<Vec<Permission>, ServiceError> {
        Ok(self.store.list_permissions().await?)
    }

    pub async fn grant_permission_to_role(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        conditions: Option<Value>,
        actor: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        if self.store.find_role_by_id(role_id).await?.is_none() {
            return Err(ServiceError::RoleNotFound);
        }
        let permission = self
            .store
            .find_permission_by_id(permission_id)
            .await?
            .ok_or(ServiceError::PermissionNotFound)?;

        self.store
            .upsert_role_permission(crate::models::RolePermission::new(
                role_id,
                permission_id,
                conditions,
            ))
            .await?;
        self.audit
            .log_permission_change(
                actions::PERMISSION_GRANTED,
                actor,
                "role_permission",
                &role_id.to_string(),
                None,
                Some(json!({ "action": permission.action, "resource": permission.resource })),
            )
            .await;
        Ok(())
    }

    pub async fn revoke_permission_from_role(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        self.store
            .remove_role_permission(role_id, permission_id)
            .await?;
        self.audit
            .log_permission_change(
                actions::PERMISSION_REVOKED,
                actor,
                "role_permission",
                &role_id.to_string(),
                Some(json!({ "permission_id": permission_id })),
                None,
            )
            .await;
        Ok(())
    }

    // --- assignment ---

    /// Assign a role to a user. Idempotent: re-assigning an existing
    /// assignment reactivates it rather than duplicating.
    pub async fn assign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<UserRoleAssignment, ServiceError> {
        if self.store.find_user_by_id(user_id).await?.is_none() {
            return Err(ServiceError::UserNotFound);
        }
        let role = self
            .store
            .find_role_by_id(role_id)
            .await?
            .ok_or(ServiceError::RoleNotFound)?;

        let assignment = self
            .store
            .upsert_role_assignment(user_id, role_id, true)
            .await?;
        self.audit
            .log_permission_change(
                actions::ROLE_ASSIGNED,
                actor,
                "user_role",
                &user_id.to_string(),
                None,
                Some(json!({ "role": role.name })),
            )
            .await;
        Ok(assignment)
    }

    /// Deactivate a user's role assignment. The user loses the role's
    /// permissions on the next resolution; idempotent when already inactive.
    pub async fn revoke_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let role = self
            .store
            .find_role_by_id(role_id)
            .await?
            .ok_or(ServiceError::RoleNotFound)?;

        self.store
            .upsert_role_assignment(user_id, role_id, false)
            .await?;
        self.audit
            .log_permission_change(
                actions::ROLE_REVOKED,
                actor,
                "user_role",
                &user_id.to_string(),
                Some(json!({ "role": role.name })),
                None,
            )
            .await;
        Ok(())
    }

    // --- resolution ---

    /// The user's active roles, resolved from active assignments.
    pub async fn user_roles(&self, user_id: Uuid) -> Result<Vec<Role>, ServiceError> {
        let assignments = self.store.user_role_assignments(user_id, true).await?;
        let mut roles = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            if let Some(role) = self.store.find_role_by_id(assignment.role_id).await? {
                roles.push(role);
            }
        }
        Ok(roles)
    }

    /// The highest-ranked role name for display, when the user holds any of
    /// the well-known roles.
    pub async fn display_role(&self, user_id: Uuid) -> Result<Option<String>, ServiceError> {
        let roles = self.user_roles(user_id).await?;
        Ok(roles
            .iter()
            .filter_map(|r| RoleRank::from_name(&r.name))
            .max_by_key(|rank| rank.rank())
            .map(|rank| rank.as_str().to_string()))
    }

    /// Flatten the user's permissions across all active roles, de-duplicated
    /// by (action, resource). When duplicates disagree on conditions, the
    /// unconditional grant wins.
    pub async fn effective_permissions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<EffectivePermission>, ServiceError> {
        let assignments = self.store.user_role_assignments(user_id, true).await?;

        let mut merged: HashMap<(String, String), Option<Value>> = HashMap::new();
        for assignment in assignments {
            for (permission, conditions) in self.store.role_permissions(assignment.role_id).await? {
                if !permission.is_active {
                    continue;
                }
                let key = (permission.action, permission.resource);
                match merged.get(&key) {
                    Some(None) => {} // already unconditional
                    Some(Some(_)) if conditions.is_none() => {
                        merged.insert(key, None);
                    }
                    Some(Some(_)) => {}
                    None => {
                        merged.insert(key, conditions);
                    }
                }
            }
        }

        let mut permissions: Vec<EffectivePermission> = merged
            .into_iter()
            .map(|((action, resource), conditions)| EffectivePermission {
                action,
                resource,
                conditions,
            })
            .collect();
        permissions.sort_by(|a, b| (&a.resource, &a.action).cmp(&(&b.resource, &b.action)));
        Ok(permissions)
    }

    /// Whether the user may perform `action` on `resource`.
    ///
    /// Conditional grants are denied here: condition evaluation needs request
    /// context this subsystem does not carry, and an unevaluated condition
    /// must fail closed.
    pub async fn has_permission(
        &self,
        user_id: Uuid,
        action: &str,
        resource: &str,
    ) -> Result<bool, ServiceError> {
        let permissions = self.effective_permissions(user_id).await?;
        Ok(permissions
            .iter()
            .any(|p| p.action == action && p.resource == resource && p.conditions.is_none()))
    }

    // --- seeding ---

    /// Seed the default permission catalog and system roles. Idempotent:
    /// existing records are left alone.
    pub async fn initialize_default_roles(&self) -> Result<(), ServiceError> {
        for (action, resource) in DEFAULT_PERMISSIONS {
            if self.store.find_permission(action, resource).await?.is_none() {
                self.store
                    .insert_permission(Permission::new(action, resource, None))
                    .await?;
            }
        }

        for (name, description, grants) in default_role_grants() {
            let role = match self.store.find_role_by_name(name).await? {
                Some(role) => role,
                None => {
                    let role = Role::new(name.to_string(), Some(description.to_string()), true);
                    self.store.insert_role(role.clone()).await?;
                    role
                }
            };

            for (action, resource) in grants {
                if let Some(permission) = self.store.find_permission(action, resource).await? {
                    self.store
                        .upsert_role_permission(crate::models::RolePermission::new(
                            role.role_id,
                            permission.permission_id,
                            None,
                        ))
                        .await?;
                }
            }
        }

        tracing::info!("Default roles and permissions initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::store::MemoryStore;

    async fn service_with_user() -> (RbacService, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditService::new(store.clone());
        let svc = RbacService::new(store.clone(), audit);

        let user = User::new("rbac@example.com".to_string(), "hash".to_string());
        let user_id = user.user_id;
        store.insert_user(user).await.unwrap();
        (svc, store, user_id)
    }

    #[tokio::test]
    async fn test_assignment_grants_and_revocation_removes() {
        let (svc, _store, user_id) = service_with_user().await;

        let role = svc.create_role("warehouse", None, None).await.unwrap();
        let permission = svc
            .create_permission("read", "inventory", None, None)
            .await
            .unwrap();
        svc.grant_permission_to_role(role.role_id, permission.permission_id, None, None)
            .await
            .unwrap();

        assert!(!svc.has_permission(user_id, "read", "inventory").await.unwrap());
        svc.assign_role(user_id, role.role_id, None).await.unwrap();
        assert!(svc.has_permission(user_id, "read", "inventory").await.unwrap());

        svc.revoke_role(user_id, role.role_id, None).await.unwrap();
        assert!(!svc.has_permission(user_id, "read", "inventory").await.unwrap());
    }

    #[tokio::test]
    async fn test_system_role_is_immutable() {
        let (svc, store, _user_id) = service_with_user().await;

        let system = Role::new("owner".to_string(), None, true);
        store.insert_role(system.clone()).await.unwrap();

        let err = svc
            .update_role(system.role_id, Some("renamed".to_string()), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::SystemRoleImmutable));

        let err = svc.delete_role(system.role_id, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::SystemRoleImmutable));
    }

    #[tokio::test]
    async fn test_role_in_use_cannot_be_deleted() {
        let (svc, _store, user_id) = service_with_user().await;

        let role = svc.create_role("temp", None, None).await.unwrap();
        svc.assign_role(user_id, role.role_id, None).await.unwrap();

        let err = svc.delete_role(role.role_id, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::RoleInUse));

        svc.revoke_role(user_id, role.role_id, None).await.unwrap();
        svc.delete_role(role.role_id, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_effective_permissions_deduplicate_across_roles() {
        let (svc, _store, user_id) = service_with_user().await;

        let a = svc.create_role("a", None, None).await.unwrap();
        let b = svc.create_role("b", None, None).await.unwrap();
        let permission = svc
            .create_permission("read", "orders", None, None)
            .await
            .unwrap();
        svc.grant_permission_to_role(a.role_id, permission.permission_id, None, None)
            .await
            .unwrap();
        svc.grant_permission_to_role(b.role_id, permission.permission_id, None, None)
            .await
            .unwrap();
        svc.assign_role(user_id, a.role_id, None).await.unwrap();
        svc.assign_role(user_id, b.role_id, None).await.unwrap();

        let permissions = svc.effective_permissions(user_id).await.unwrap();
        assert_eq!(permissions.len(), 1);
    }

    #[tokio::test]
    async fn test_conditional_grant_fails_closed() {
        let (svc, _store, user_id) = service_with_user().await;

        let role = svc.create_role("scoped", None, None).await.unwrap();
        let permission = svc
            .create_permission("read", "reports", None, None)
            .await
            .unwrap();
        svc.grant_permission_to_role(
            role.role_id,
            permission.permission_id,
            Some(json!({ "own_store_only": true })),
            None,
        )
        .await
        .unwrap();
        svc.assign_role(user_id, role.role_id, None).await.unwrap();

        assert!(!svc.has_permission(user_id, "read", "reports").await.unwrap());
        let permissions = svc.effective_permissions(user_id).await.unwrap();
        assert!(permissions[0].conditions.is_some());
    }

    #[tokio::test]
    async fn test_deactivated_permission_disappears() {
        let (svc, _store, user_id) = service_with_user().await;

        let role = svc.create_role("ops", None, None).await.unwrap();
        let permission = svc
            .create_permission("update", "orders", None, None)
            .await
            .unwrap();
        svc.grant_permission_to_role(role.role_id, permission.permission_id, None, None)
            .await
            .unwrap();
        svc.assign_role(user_id, role.role_id, None).await.unwrap();
        assert!(svc.has_permission(user_id, "update", "orders").await.unwrap());

        svc.deactivate_permission(permission.permission_id, None)
            .await
            .unwrap();
        assert!(!svc.has_permission(user_id, "update", "orders").await.unwrap());
    }

    #[tokio::test]
    async fn test_seeding_is_idempotent() {
        let (svc, _store, _user_id) = service_with_user().await;

        svc.initialize_default_roles().await.unwrap();
        svc.initialize_default_roles().await.unwrap();

        let roles = svc.list_roles().await.unwrap();
        let owners = roles.iter().filter(|r| r.name == "owner").count();
        assert_eq!(owners, 1);
        assert!(roles.iter().all(|r| r.is_system));
    }

    #[tokio::test]
    async fn test_display_role_picks_highest_rank() {
        let (svc, _store, user_id) = service_with_user().await;
        svc.initialize_default_roles().await.unwrap();

        let roles = svc.list_roles().await.unwrap();
        let sales = roles.iter().find(|r| r.name == "sales").unwrap();
        let manager = roles.iter().find(|r| r.name == "manager").unwrap();
        svc.assign_role(user_id, sales.role_id, None).await.unwrap();
        svc.assign_role(user_id, manager.role_id, None).await.unwrap();

        assert_eq!(svc.display_role(user_id).await.unwrap().as_deref(), Some("manager"));
    }
}
