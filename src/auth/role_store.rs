//! Role Storage
//! Mission: Roles, permissions and both junction tables in SQLite

use crate::auth::db::AuthDb;
use crate::auth::models::{Permission, Role};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;

fn role_from_row(row: &Row<'_>) -> rusqlite::Result<Role> {
    Ok(Role {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
    })
}

fn permission_from_row(row: &Row<'_>) -> rusqlite::Result<Permission> {
    Ok(Permission {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
    })
}

fn exists(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<bool> {
    let found: bool = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(found)
}

/// Row-level access to roles, permissions, memberships and grants.
///
/// No business rules live here; `Rbac` layers uniqueness and referential
/// checks on top.
#[derive(Clone)]
pub struct RoleStore {
    db: Arc<AuthDb>,
}

impl RoleStore {
    pub fn new(db: Arc<AuthDb>) -> Self {
        Self { db }
    }

    // ---- roles ----

    pub fn insert_role(&self, name: &str, description: &str) -> Result<Role> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO roles (name, description) VALUES (?1, ?2)",
                params![name, description],
            )
            .context("Failed to insert role")?;
            Ok(Role {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                description: description.to_string(),
            })
        })
    }

    pub fn get_role(&self, role_id: i64) -> Result<Option<Role>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, description FROM roles WHERE id = ?1",
                    params![role_id],
                    role_from_row,
                )
                .optional()?)
        })
    }

    pub fn get_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, description FROM roles WHERE name = ?1",
                    params![name],
                    role_from_row,
                )
                .optional()?)
        })
    }

    pub fn list_roles(&self) -> Result<Vec<Role>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, description FROM roles ORDER BY name")?;
            let roles = stmt
                .query_map([], role_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(roles)
        })
    }

    pub fn update_role(&self, role_id: i64, name: &str, description: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let rows = conn
                .execute(
                    "UPDATE roles SET name = ?2, description = ?3 WHERE id = ?1",
                    params![role_id, name, description],
                )
                .context("Failed to update role")?;
            Ok(rows > 0)
        })
    }

    /// Delete a role and its grants in one transaction, refusing while any
    /// membership still points at it. Returns `Ok(None)` when the role is
    /// missing and `Ok(Some(false))` when it is still in use.
    pub fn delete_role_if_unused(&self, role_id: i64) -> Result<Option<bool>> {
        self.db.with_tx(|tx| {
            let present = exists(tx, "SELECT EXISTS(SELECT 1 FROM roles WHERE id = ?1)", params![role_id])?;
            if !present {
                return Ok(None);
            }
            let in_use = exists(
                tx,
                "SELECT EXISTS(SELECT 1 FROM user_roles WHERE role_id = ?1)",
                params![role_id],
            )?;
            if in_use {
                return Ok(Some(false));
            }
            tx.execute("DELETE FROM role_permissions WHERE role_id = ?1", params![role_id])?;
            tx.execute("DELETE FROM roles WHERE id = ?1", params![role_id])?;
            Ok(Some(true))
        })
    }

    // ---- permissions ----

    pub fn insert_permission(&self, name: &str, description: &str) -> Result<Permission> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO permissions (name, description) VALUES (?1, ?2)",
                params![name, description],
            )
            .context("Failed to insert permission")?;
            Ok(Permission {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                description: description.to_string(),
            })
        })
    }

    pub fn get_permission(&self, permission_id: i64) -> Result<Option<Permission>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, description FROM permissions WHERE id = ?1",
                    params![permission_id],
                    permission_from_row,
                )
                .optional()?)
        })
    }

    pub fn get_permission_by_name(&self, name: &str) -> Result<Option<Permission>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, description FROM permissions WHERE name = ?1",
                    params![name],
                    permission_from_row,
                )
                .optional()?)
        })
    }

    pub fn list_permissions(&self) -> Result<Vec<Permission>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, description FROM permissions ORDER BY name")?;
            let permissions = stmt
                .query_map([], permission_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(permissions)
        })
    }

    pub fn update_permission(&self, permission_id: i64, name: &str, description: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let rows = conn
                .execute(
                    "UPDATE permissions SET name = ?2, description = ?3 WHERE id = ?1",
                    params![permission_id, name, description],
                )
                .context("Failed to update permission")?;
            Ok(rows > 0)
        })
    }

    /// Delete a permission together with its grants
    pub fn delete_permission(&self, permission_id: i64) -> Result<bool> {
        self.db.with_tx(|tx| {
            tx.execute(
                "DELETE FROM role_permissions WHERE permission_id = ?1",
                params![permission_id],
            )?;
            let rows = tx.execute("DELETE FROM permissions WHERE id = ?1", params![permission_id])?;
            Ok(rows > 0)
        })
    }

    // ---- memberships ----

    /// Insert a membership; an existing pair is left untouched.
    /// Returns true when a row was added.
    pub fn add_membership(&self, user_id: i64, role_id: i64) -> Result<bool> {
        self.db.with_conn(|conn| {
            let rows = conn
                .execute(
                    "INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?1, ?2)",
                    params![user_id, role_id],
                )
                .context("Failed to insert membership")?;
            Ok(rows > 0)
        })
    }

    pub fn remove_membership(&self, user_id: i64, role_id: i64) -> Result<bool> {
        self.db.with_conn(|conn| {
            let rows = conn.execute(
                "DELETE FROM user_roles WHERE user_id = ?1 AND role_id = ?2",
                params![user_id, role_id],
            )?;
            Ok(rows > 0)
        })
    }

    pub fn roles_for_user(&self, user_id: i64) -> Result<Vec<Role>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.name, r.description
                 FROM roles r
                 JOIN user_roles ur ON ur.role_id = r.id
                 WHERE ur.user_id = ?1
                 ORDER BY r.name",
            )?;
            let roles = stmt
                .query_map(params![user_id], role_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(roles)
        })
    }

    pub fn user_has_role(&self, user_id: i64, role_name: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            exists(
                conn,
                "SELECT EXISTS(
                    SELECT 1 FROM user_roles ur
                    JOIN roles r ON r.id = ur.role_id
                    WHERE ur.user_id = ?1 AND r.name = ?2
                 )",
                params![user_id, role_name],
            )
        })
    }

    /// permission -> grant -> role -> membership, collapsed into one EXISTS
    pub fn user_has_permission(&self, user_id: i64, permission_name: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            exists(
                conn,
                "SELECT EXISTS(
                    SELECT 1 FROM permissions p
                    JOIN role_permissions rp ON rp.permission_id = p.id
                    JOIN user_roles ur ON ur.role_id = rp.role_id
                    WHERE ur.user_id = ?1 AND p.name = ?2
                 )",
                params![user_id, permission_name],
            )
        })
    }

    /// Union of permissions across every role the user holds
    pub fn permissions_for_user(&self, user_id: i64) -> Result<Vec<Permission>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT p.id, p.name, p.description
                 FROM permissions p
                 JOIN role_permissions rp ON rp.permission_id = p.id
                 JOIN user_roles ur ON ur.role_id = rp.role_id
                 WHERE ur.user_id = ?1
                 ORDER BY p.name",
            )?;
            let permissions = stmt
                .query_map(params![user_id], permission_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(permissions)
        })
    }

    // ---- grants ----

    pub fn add_grant(&self, role_id: i64, permission_id: i64) -> Result<bool> {
        self.db.with_conn(|conn| {
            let rows = conn
                .execute(
                    "INSERT OR IGNORE INTO role_permissions (role_id, permission_id) VALUES (?1, ?2)",
                    params![role_id, permission_id],
                )
                .context("Failed to insert grant")?;
            Ok(rows > 0)
        })
    }

    pub fn remove_grant(&self, role_id: i64, permission_id: i64) -> Result<bool> {
        self.db.with_conn(|conn| {
            let rows = conn.execute(
                "DELETE FROM role_permissions WHERE role_id = ?1 AND permission_id = ?2",
                params![role_id, permission_id],
            )?;
            Ok(rows > 0)
        })
    }

    pub fn permissions_for_role(&self, role_id: i64) -> Result<Vec<Permission>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, p.name, p.description
                 FROM permissions p
                 JOIN role_permissions rp ON rp.permission_id = p.id
                 WHERE rp.role_id = ?1
                 ORDER BY p.name",
            )?;
            let permissions = stmt
                .query_map(params![role_id], permission_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(permissions)
        })
    }
}
