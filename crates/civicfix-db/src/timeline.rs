use anyhow::{Result, anyhow};
use rusqlite::{Connection, TransactionBehavior};

use civicfix_types::models::{AdminComment, Identity, IssueStatus, StatusHistoryEntry};

use crate::Database;
use crate::issues::query_issue;
use crate::models::{StatusChange, comment_from_row, history_from_row};
use crate::notifications::insert_notification;
use crate::queries::{OptionalExt, now_ts};

const HISTORY_SELECT: &str =
    "SELECT id, issue_id, old_status, new_status, changed_by, comment, changed_at FROM status_history";

/// Owner-facing copy for a status change.
pub fn status_message(title: &str, status: IssueStatus) -> String {
    match status {
        IssueStatus::InProgress => "Your issue is being worked on and will be solved soon.".to_string(),
        IssueStatus::Resolved => "Your issue has been fixed. Thanks for your cooperation.".to_string(),
        other => format!("Status of your issue '{}' changed to {}.", title, other.label()),
    }
}

impl Database {
    /// Move an issue to `new_status`.
    ///
    /// The status update, its history row, the optional admin comment and the
    /// owner's notification commit together or not at all. The transaction
    /// takes the write lock up front, so concurrent transitions on one issue
    /// each read the `old_status` left by the previous commit.
    ///
    /// Returns `None` when the issue does not exist.
    pub fn transition_status(
        &self,
        issue_id: i64,
        actor: &Identity,
        new_status: IssueStatus,
        comment: Option<&str>,
    ) -> Result<Option<StatusChange>> {
        let comment = comment.map(str::trim).filter(|c| !c.is_empty());

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let Some(issue) = query_issue(&tx, issue_id)? else {
                return Ok(None);
            };

            if issue.status == new_status {
                return Ok(Some(StatusChange::Unchanged(issue)));
            }

            let old_status = issue.status;
            let now = now_ts();

            tx.execute(
                "UPDATE issues SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![new_status.as_str(), now, issue_id],
            )?;

            tx.execute(
                "INSERT INTO status_history (issue_id, old_status, new_status, changed_by, comment, changed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    issue_id,
                    old_status.as_str(),
                    new_status.as_str(),
                    actor.username,
                    comment,
                    now,
                ],
            )?;
            let history_id = tx.last_insert_rowid();

            if let Some(text) = comment {
                tx.execute(
                    "INSERT INTO admin_comments (issue_id, admin_name, comment, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![issue_id, actor.username, text, now],
                )?;
            }

            let notification = insert_notification(
                &tx,
                issue.user_id,
                Some(issue_id),
                "Issue status update",
                &status_message(&issue.title, new_status),
                "status_update",
            )?;

            let history = tx
                .query_row(
                    &format!("{} WHERE id = ?1", HISTORY_SELECT),
                    [history_id],
                    history_from_row,
                )
                .optional()?
                .ok_or_else(|| anyhow!("History row {} vanished after insert", history_id))?;

            let issue = query_issue(&tx, issue_id)?
                .ok_or_else(|| anyhow!("Issue {} vanished mid-transition", issue_id))?;

            tx.commit()?;

            Ok(Some(StatusChange::Applied {
                issue,
                old_status,
                history,
                notification,
            }))
        })
    }

    /// Status timeline for an issue, most recent change first.
    pub fn status_history(&self, issue_id: i64) -> Result<Vec<StatusHistoryEntry>> {
        self.with_conn(|conn| query_history(conn, issue_id))
    }

    pub fn admin_comments(&self, issue_id: i64) -> Result<Vec<AdminComment>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, issue_id, admin_name, comment, created_at FROM admin_comments
                 WHERE issue_id = ?1 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([issue_id], comment_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_history(conn: &Connection, issue_id: i64) -> Result<Vec<StatusHistoryEntry>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE issue_id = ?1 ORDER BY changed_at DESC, id DESC",
        HISTORY_SELECT
    ))?;
    let rows = stmt
        .query_map([issue_id], history_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
