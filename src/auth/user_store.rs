//! User Storage
//! Mission: Read and write identity rows in SQLite

use crate::auth::db::{opt_timestamp, timestamp, AuthDb};
use crate::auth::models::User;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::info;

const USER_COLUMNS: &str = "id, email, username, password_hash, active, email_verified, \
     email_verified_at, verification_token, verification_expires_at, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        active: row.get(4)?,
        email_verified: row.get(5)?,
        email_verified_at: opt_timestamp(row, 6)?,
        verification_token: row.get(7)?,
        verification_expires_at: opt_timestamp(row, 8)?,
        created_at: timestamp(row, 9)?,
    })
}

/// Identity storage backed by the shared auth database
#[derive(Clone)]
pub struct UserStore {
    db: Arc<AuthDb>,
}

impl UserStore {
    pub fn new(db: Arc<AuthDb>) -> Self {
        Self { db }
    }

    /// Insert a new active, unverified identity
    pub fn create_user(&self, email: &str, username: &str, password_hash: &str) -> Result<User> {
        let now = Utc::now().to_rfc3339();

        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (email, username, password_hash, active, email_verified,
                                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, 0, ?4, ?4)",
                params![email, username, password_hash, now],
            )
            .context("Failed to insert user")?;
            Ok(conn.last_insert_rowid())
        })?;

        info!(user_id = id, "Created user {}", username);

        self.get_by_id(id)?
            .context("Inserted user vanished before read-back")
    }

    fn get_where(&self, predicate: &str, value: &dyn rusqlite::ToSql) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, predicate);
        self.db.with_conn(|conn| {
            let user = conn
                .query_row(&sql, params![value], user_from_row)
                .optional()
                .context("Failed to load user")?;
            Ok(user)
        })
    }

    pub fn get_by_id(&self, user_id: i64) -> Result<Option<User>> {
        self.get_where("id", &user_id)
    }

    pub fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        self.get_where("email", &email)
    }

    pub fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        self.get_where("username", &username)
    }

    pub fn get_by_verification_token(&self, token: &str) -> Result<Option<User>> {
        self.get_where("verification_token", &token)
    }

    pub fn get_by_consumed_token_digest(&self, digest: &str) -> Result<Option<User>> {
        self.get_where("consumed_token_digest", &digest)
    }

    pub fn exists(&self, user_id: i64) -> Result<bool> {
        self.db.with_conn(|conn| {
            let found: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(found)
        })
    }

    /// Overwrite the verification token; any previous token stops matching
    pub fn set_verification_token(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.update(
            "UPDATE users SET verification_token = ?2, verification_expires_at = ?3, updated_at = ?4
             WHERE id = ?1",
            params![user_id, token, expires_at.to_rfc3339(), Utc::now().to_rfc3339()],
        )
    }

    /// Flip the verified flag and clear the token, but only if `token` is
    /// still the active one. Returns false when another caller consumed it first.
    pub fn consume_verification_token(
        &self,
        user_id: i64,
        token: &str,
        verified_at: DateTime<Utc>,
        consumed_digest: &str,
    ) -> Result<bool> {
        let stamp = verified_at.to_rfc3339();
        self.update(
            "UPDATE users
             SET email_verified = 1, email_verified_at = ?3,
                 verification_token = NULL, verification_expires_at = NULL,
                 consumed_token_digest = ?4, updated_at = ?3
             WHERE id = ?1 AND verification_token = ?2",
            params![user_id, token, stamp, consumed_digest],
        )
    }

    /// Administrative verification; clears any outstanding token
    pub fn mark_email_verified(&self, user_id: i64, verified_at: DateTime<Utc>) -> Result<bool> {
        let stamp = verified_at.to_rfc3339();
        self.update(
            "UPDATE users
             SET email_verified = 1, email_verified_at = ?2,
                 verification_token = NULL, verification_expires_at = NULL, updated_at = ?2
             WHERE id = ?1",
            params![user_id, stamp],
        )
    }

    pub fn set_active(&self, user_id: i64, active: bool) -> Result<bool> {
        self.update(
            "UPDATE users SET active = ?2, updated_at = ?3 WHERE id = ?1",
            params![user_id, active, Utc::now().to_rfc3339()],
        )
    }

    pub fn update_password_hash(&self, user_id: i64, password_hash: &str) -> Result<bool> {
        self.update(
            "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
            params![user_id, password_hash, Utc::now().to_rfc3339()],
        )
    }

    fn update(&self, sql: &str, params: impl rusqlite::Params) -> Result<bool> {
        self.db.with_conn(|conn| {
            let rows = conn.execute(sql, params).context("Failed to update user")?;
            Ok(rows > 0)
        })
    }

    /// List all users ordered by id
    pub fn list_users(&self) -> Result<Vec<User>> {
        let sql = format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let users = stmt
                .query_map([], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }

    /// Delete a user; memberships go with it
    pub fn delete_user(&self, user_id: i64) -> Result<bool> {
        let deleted = self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])?)
        })?;

        if deleted > 0 {
            info!(user_id, "Deleted user");
        }
        Ok(deleted > 0)
    }
}
