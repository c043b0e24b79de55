use anyhow::{Result, anyhow};
use rusqlite::Connection;
use uuid::Uuid;

use civicfix_types::models::Notification;

use crate::Database;
use crate::models::notification_from_row;
use crate::queries::{OptionalExt, now_ts};

const NOTIFICATION_SELECT: &str =
    "SELECT id, user_id, issue_id, title, message, kind, is_read, created_at FROM notifications";

impl Database {
    /// A user's notifications, newest first.
    pub fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
                NOTIFICATION_SELECT
            ))?;
            let rows = stmt
                .query_map([user_id.to_string()], notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Flip a notification to read. There is no inverse.
    /// Returns false when the notification does not exist or belongs to
    /// someone else.
    pub fn mark_notification_read(&self, id: i64, user_id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id, user_id.to_string()],
            )?;
            Ok(updated > 0)
        })
    }
}

/// Insert inside the caller's transaction so the notification commits or
/// rolls back with the state change that produced it.
pub(crate) fn insert_notification(
    conn: &Connection,
    user_id: Uuid,
    issue_id: Option<i64>,
    title: &str,
    message: &str,
    kind: &str,
) -> Result<Notification> {
    conn.execute(
        "INSERT INTO notifications (user_id, issue_id, title, message, kind, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![user_id.to_string(), issue_id, title, message, kind, now_ts()],
    )?;
    let id = conn.last_insert_rowid();

    conn.query_row(
        &format!("{} WHERE id = ?1", NOTIFICATION_SELECT),
        [id],
        notification_from_row,
    )
    .optional()?
    .ok_or_else(|| anyhow!("Notification {} vanished after insert", id))
}
