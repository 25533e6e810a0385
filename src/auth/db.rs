//! Auth Database
//! Mission: Own the SQLite connection and the auth schema

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{ffi, types::Type, Connection, Row};
use tracing::debug;

/// Shared SQLite handle for the user and role stores.
///
/// One connection serialized behind a mutex; every store call is a short
/// synchronous round-trip.
pub struct AuthDb {
    conn: Mutex<Connection>,
}

impl AuthDb {
    /// Open (or create) a database file and initialize the schema
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open auth database at {}", db_path))?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, used by tests and ephemeral setups
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a transaction, committing on `Ok`
    pub fn with_tx<T>(&self, f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// True when `err` wraps a SQLite UNIQUE / PRIMARY KEY violation.
/// Other constraint failures (FOREIGN KEY, NOT NULL, CHECK) do not count.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        )
    })
}

pub(crate) fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

pub(crate) fn opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_timestamp(idx, &s)).transpose()
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn init_schema(conn: &Connection) -> Result<()> {
    // Users table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT UNIQUE NOT NULL,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            email_verified INTEGER NOT NULL DEFAULT 0,
            email_verified_at TEXT,
            verification_token TEXT UNIQUE,
            verification_expires_at TEXT,
            consumed_token_digest TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS roles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            description TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS permissions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            description TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    // Membership junction (identity <-> role)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_roles (
            user_id INTEGER NOT NULL,
            role_id INTEGER NOT NULL,
            PRIMARY KEY (user_id, role_id),
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY (role_id) REFERENCES roles(id)
        )",
        [],
    )?;

    // Grant junction (role <-> permission)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS role_permissions (
            role_id INTEGER NOT NULL,
            permission_id INTEGER NOT NULL,
            PRIMARY KEY (role_id, permission_id),
            FOREIGN KEY (role_id) REFERENCES roles(id),
            FOREIGN KEY (permission_id) REFERENCES permissions(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_user_roles_role ON user_roles(role_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_role_permissions_permission ON role_permissions(permission_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_consumed_token ON users(consumed_token_digest)",
        [],
    )?;

    debug!("auth schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn table_names(db: &AuthDb) -> Vec<String> {
        db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })
        .unwrap()
    }

    #[test]
    fn test_schema_created_in_memory() {
        let db = AuthDb::open_in_memory().unwrap();
        let names = table_names(&db);
        for table in ["permissions", "role_permissions", "roles", "user_roles", "users"] {
            assert!(names.iter().any(|n| n == table), "missing table {}", table);
        }
    }

    #[test]
    fn test_reopen_file_is_idempotent() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();

        drop(AuthDb::open(db_path).unwrap());
        let db = AuthDb::open(db_path).unwrap();
        assert!(table_names(&db).iter().any(|n| n == "users"));
    }

    #[test]
    fn test_unique_violation_detected() {
        let db = AuthDb::open_in_memory().unwrap();
        let insert = |db: &AuthDb| {
            db.with_conn(|c| {
                c.execute("INSERT INTO roles (name) VALUES ('admin')", [])
                    .context("insert role")?;
                Ok(())
            })
        };
        insert(&db).unwrap();
        let err = insert(&db).unwrap_err();
        assert!(is_unique_violation(&err));
        assert!(!is_unique_violation(&anyhow::anyhow!("unrelated")));
    }

    #[test]
    fn test_foreign_key_failure_is_not_a_unique_violation() {
        let db = AuthDb::open_in_memory().unwrap();
        let err = db
            .with_conn(|c| {
                c.execute("INSERT INTO user_roles (user_id, role_id) VALUES (999, 999)", [])
                    .context("insert membership")?;
                Ok(())
            })
            .unwrap_err();
        assert!(!is_unique_violation(&err));

        let err = db
            .with_conn(|c| {
                c.execute("INSERT INTO roles (name) VALUES (NULL)", [])
                    .context("insert role")?;
                Ok(())
            })
            .unwrap_err();
        assert!(!is_unique_violation(&err));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = AuthDb::open_in_memory().unwrap();
        let result: Result<()> = db.with_tx(|tx| {
            tx.execute("INSERT INTO roles (name) VALUES ('temp')", [])?;
            anyhow::bail!("abort");
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM roles", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }
}
