use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, ffi};
use uuid::Uuid;

use civicfix_types::models::Identity;

use crate::Database;

impl Database {
    // -- Users --

    /// Record the caller as the auth layer last described them.
    pub fn upsert_user(&self, identity: &Identity) -> Result<()> {
        self.with_conn_mut(|conn| upsert_user(conn, identity))
    }

    pub fn user_exists(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row("SELECT 1 FROM users WHERE id = ?1", [id.to_string()], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Delete an account. Notifications, votes and issues go with it through
    /// the foreign key cascades.
    pub fn delete_user(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute("DELETE FROM users WHERE id = ?1", [id.to_string()])?;
            Ok(removed > 0)
        })
    }
}

pub(crate) fn upsert_user(conn: &Connection, identity: &Identity) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, username, is_admin, district, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
             username = excluded.username,
             is_admin = excluded.is_admin,
             district = excluded.district",
        rusqlite::params![
            identity.user_id.to_string(),
            identity.username,
            identity.is_admin(),
            identity.district,
            now_ts(),
        ],
    )?;
    Ok(())
}

/// Timestamps are stored as RFC 3339 with microseconds so that rows written
/// within the same second still sort in commit order.
pub(crate) fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
