//! Authorization Engine
//! Mission: Role/permission CRUD and live membership checks

use crate::auth::context::AuthContext;
use crate::auth::db::is_unique_violation;
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::models::{Permission, Role};
use crate::auth::role_store::RoleStore;
use crate::auth::user_store::UserStore;
use tracing::{debug, info, warn};

/// A gate evaluated against the identity in the request context.
///
/// The `Any*` variants short-circuit on the first match in argument order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Role(String),
    Permission(String),
    AnyRole(Vec<String>),
    AnyPermission(Vec<String>),
    /// Passes if any nested requirement passes
    AnyOf(Vec<Requirement>),
}

impl Requirement {
    pub fn role(name: impl Into<String>) -> Self {
        Requirement::Role(name.into())
    }

    pub fn permission(name: impl Into<String>) -> Self {
        Requirement::Permission(name.into())
    }

    pub fn any_role<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Requirement::AnyRole(names.into_iter().map(Into::into).collect())
    }

    pub fn any_permission<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Requirement::AnyPermission(names.into_iter().map(Into::into).collect())
    }
}

fn normalize_name(name: &str) -> AuthResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AuthError::InvalidInput("name must not be empty"));
    }
    Ok(name.to_string())
}

/// Role-based access control over the relational store.
///
/// No caching: every predicate is one round-trip reflecting current
/// membership.
#[derive(Clone)]
pub struct Rbac {
    roles: RoleStore,
    users: UserStore,
}

impl Rbac {
    pub fn new(roles: RoleStore, users: UserStore) -> Self {
        Self { roles, users }
    }

    // ---- roles ----

    pub fn create_role(&self, name: &str, description: &str) -> AuthResult<Role> {
        let name = normalize_name(name)?;
        if self.roles.get_role_by_name(&name)?.is_some() {
            return Err(AuthError::DuplicateName(name));
        }

        let role = self
            .roles
            .insert_role(&name, description)
            .map_err(|e| duplicate_or_internal(e, &name))?;
        info!(role_id = role.id, role = %role.name, "Role created");
        Ok(role)
    }

    pub fn get_role(&self, role_id: i64) -> AuthResult<Role> {
        self.roles.get_role(role_id)?.ok_or(AuthError::NotFound("role"))
    }

    pub fn role_by_name(&self, name: &str) -> AuthResult<Option<Role>> {
        Ok(self.roles.get_role_by_name(name.trim())?)
    }

    pub fn list_roles(&self) -> AuthResult<Vec<Role>> {
        Ok(self.roles.list_roles()?)
    }

    pub fn update_role(&self, role_id: i64, name: &str, description: &str) -> AuthResult<Role> {
        let name = normalize_name(name)?;
        self.get_role(role_id)?;
        if let Some(existing) = self.roles.get_role_by_name(&name)? {
            if existing.id != role_id {
                return Err(AuthError::DuplicateName(name));
            }
        }

        self.roles
            .update_role(role_id, &name, description)
            .map_err(|e| duplicate_or_internal(e, &name))?;
        info!(role_id, role = %name, "Role updated");
        self.get_role(role_id)
    }

    /// Blocked (not cascaded) while any identity holds the role
    pub fn delete_role(&self, role_id: i64) -> AuthResult<()> {
        match self.roles.delete_role_if_unused(role_id)? {
            None => Err(AuthError::NotFound("role")),
            Some(false) => {
                warn!(role_id, "Refusing to delete role still in use");
                Err(AuthError::RoleInUse)
            }
            Some(true) => {
                info!(role_id, "Role deleted");
                Ok(())
            }
        }
    }

    // ---- permissions ----

    pub fn create_permission(&self, name: &str, description: &str) -> AuthResult<Permission> {
        let name = normalize_name(name)?;
        if self.roles.get_permission_by_name(&name)?.is_some() {
            return Err(AuthError::DuplicateName(name));
        }

        let permission = self
            .roles
            .insert_permission(&name, description)
            .map_err(|e| duplicate_or_internal(e, &name))?;
        info!(permission_id = permission.id, permission = %permission.name, "Permission created");
        Ok(permission)
    }

    pub fn get_permission(&self, permission_id: i64) -> AuthResult<Permission> {
        self.roles
            .get_permission(permission_id)?
            .ok_or(AuthError::NotFound("permission"))
    }

    pub fn permission_by_name(&self, name: &str) -> AuthResult<Option<Permission>> {
        Ok(self.roles.get_permission_by_name(name.trim())?)
    }

    pub fn list_permissions(&self) -> AuthResult<Vec<Permission>> {
        Ok(self.roles.list_permissions()?)
    }

    pub fn update_permission(
        &self,
        permission_id: i64,
        name: &str,
        description: &str,
    ) -> AuthResult<Permission> {
        let name = normalize_name(name)?;
        self.get_permission(permission_id)?;
        if let Some(existing) = self.roles.get_permission_by_name(&name)? {
            if existing.id != permission_id {
                return Err(AuthError::DuplicateName(name));
            }
        }

        self.roles
            .update_permission(permission_id, &name, description)
            .map_err(|e| duplicate_or_internal(e, &name))?;
        info!(permission_id, permission = %name, "Permission updated");
        self.get_permission(permission_id)
    }

    pub fn delete_permission(&self, permission_id: i64) -> AuthResult<()> {
        if !self.roles.delete_permission(permission_id)? {
            return Err(AuthError::NotFound("permission"));
        }
        info!(permission_id, "Permission deleted");
        Ok(())
    }

    // ---- grants ----

    /// Idempotent
    pub fn grant_permission(&self, role_id: i64, permission_id: i64) -> AuthResult<()> {
        self.get_role(role_id)?;
        self.get_permission(permission_id)?;
        if self.roles.add_grant(role_id, permission_id)? {
            info!(role_id, permission_id, "Permission granted to role");
        }
        Ok(())
    }

    pub fn revoke_permission(&self, role_id: i64, permission_id: i64) -> AuthResult<()> {
        self.get_role(role_id)?;
        self.get_permission(permission_id)?;
        if !self.roles.remove_grant(role_id, permission_id)? {
            return Err(AuthError::NotAssigned);
        }
        info!(role_id, permission_id, "Permission revoked from role");
        Ok(())
    }

    pub fn role_permissions(&self, role_id: i64) -> AuthResult<Vec<Permission>> {
        self.get_role(role_id)?;
        Ok(self.roles.permissions_for_role(role_id)?)
    }

    // ---- memberships ----

    fn ensure_user(&self, user_id: i64) -> AuthResult<()> {
        if self.users.exists(user_id)? {
            Ok(())
        } else {
            Err(AuthError::UserNotFound)
        }
    }

    /// Idempotent: assigning a held role is a no-op
    pub fn assign_role(&self, user_id: i64, role_id: i64) -> AuthResult<()> {
        self.ensure_user(user_id)?;
        self.get_role(role_id)?;
        if self.roles.add_membership(user_id, role_id)? {
            info!(user_id, role_id, "Role assigned");
        } else {
            debug!(user_id, role_id, "Role already assigned");
        }
        Ok(())
    }

    pub fn remove_role(&self, user_id: i64, role_id: i64) -> AuthResult<()> {
        self.ensure_user(user_id)?;
        self.get_role(role_id)?;
        if !self.roles.remove_membership(user_id, role_id)? {
            return Err(AuthError::NotAssigned);
        }
        info!(user_id, role_id, "Role removed");
        Ok(())
    }

    pub fn user_roles(&self, user_id: i64) -> AuthResult<Vec<Role>> {
        Ok(self.roles.roles_for_user(user_id)?)
    }

    /// Role names currently held, sorted
    pub fn user_role_names(&self, user_id: i64) -> AuthResult<Vec<String>> {
        Ok(self
            .user_roles(user_id)?
            .into_iter()
            .map(|r| r.name)
            .collect())
    }

    pub fn user_permissions(&self, user_id: i64) -> AuthResult<Vec<Permission>> {
        Ok(self.roles.permissions_for_user(user_id)?)
    }

    // ---- predicates ----

    pub fn has_role(&self, user_id: i64, role_name: &str) -> AuthResult<bool> {
        Ok(self.roles.user_has_role(user_id, role_name)?)
    }

    pub fn has_permission(&self, user_id: i64, permission_name: &str) -> AuthResult<bool> {
        Ok(self.roles.user_has_permission(user_id, permission_name)?)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, user_id: i64, role_names: &[S]) -> AuthResult<bool> {
        for name in role_names {
            if self.has_role(user_id, name.as_ref())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn has_any_permission<S: AsRef<str>>(
        &self,
        user_id: i64,
        permission_names: &[S],
    ) -> AuthResult<bool> {
        for name in permission_names {
            if self.has_permission(user_id, name.as_ref())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ---- gates ----

    pub fn require_role(&self, ctx: Option<&AuthContext>, role: &str) -> AuthResult<()> {
        self.check(ctx, &Requirement::role(role))
    }

    pub fn require_permission(&self, ctx: Option<&AuthContext>, permission: &str) -> AuthResult<()> {
        self.check(ctx, &Requirement::permission(permission))
    }

    pub fn require_any_role<S: AsRef<str>>(
        &self,
        ctx: Option<&AuthContext>,
        roles: &[S],
    ) -> AuthResult<()> {
        self.check(ctx, &Requirement::any_role(roles.iter().map(|r| r.as_ref())))
    }

    pub fn require_any_permission<S: AsRef<str>>(
        &self,
        ctx: Option<&AuthContext>,
        permissions: &[S],
    ) -> AuthResult<()> {
        self.check(
            ctx,
            &Requirement::any_permission(permissions.iter().map(|p| p.as_ref())),
        )
    }

    /// Fail-closed evaluation: no identity is `Unauthenticated`, an identity
    /// that fails the check is `Forbidden`, a store error stays `Internal`.
    pub fn check(&self, ctx: Option<&AuthContext>, requirement: &Requirement) -> AuthResult<()> {
        let ctx = ctx.ok_or(AuthError::Unauthenticated)?;

        if self.satisfies(ctx.user_id, requirement)? {
            Ok(())
        } else {
            warn!(
                user_id = ctx.user_id,
                requirement = ?requirement,
                "Permission denied"
            );
            Err(AuthError::Forbidden)
        }
    }
}

impl Rbac {
    fn satisfies(&self, user_id: i64, requirement: &Requirement) -> AuthResult<bool> {
        match requirement {
            Requirement::Role(role) => self.has_role(user_id, role),
            Requirement::Permission(perm) => self.has_permission(user_id, perm),
            Requirement::AnyRole(roles) => self.has_any_role(user_id, roles),
            Requirement::AnyPermission(perms) => self.has_any_permission(user_id, perms),
            Requirement::AnyOf(nested) => {
                for inner in nested {
                    if self.satisfies(user_id, inner)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

fn duplicate_or_internal(err: anyhow::Error, name: &str) -> AuthError {
    if is_unique_violation(&err) {
        AuthError::DuplicateName(name.to_string())
    } else {
        AuthError::Internal(err)
    }
}
