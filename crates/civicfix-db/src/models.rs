//! Row mapping and the outcome types returned by the write paths.
//! Rows are converted straight into `civicfix-types` models; a column that
//! fails to parse surfaces as a `FromSqlConversionFailure` for that column.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use civicfix_types::models::{
    AdminComment, Issue, IssueStatus, Notification, StatusHistoryEntry, VoteAction,
};

/// Column list shared by every issue query. `vote_count` is derived live
/// from the ledger instead of being stored on the issue.
pub(crate) const ISSUE_SELECT: &str = "
    SELECT i.id, i.title, i.description, i.category, i.status,
           i.street_address, i.landmark_reference, i.detailed_description,
           i.province, i.district, i.sector, i.image_url, i.user_id,
           u.username,
           (SELECT COUNT(*) FROM votes v WHERE v.issue_id = i.id),
           i.created_at, i.updated_at
    FROM issues i
    LEFT JOIN users u ON u.id = i.user_id";

/// Filters for issue listings. `district` doubles as the admin scope.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub status: Option<IssueStatus>,
    pub category: Option<String>,
    pub province: Option<String>,
    pub district: Option<String>,
    pub sector: Option<String>,
    pub search: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

/// Result of a status transition that found its issue.
#[derive(Debug, Clone)]
pub enum StatusChange {
    /// Requested status equals the current one; nothing was written.
    Unchanged(Issue),
    Applied {
        issue: Issue,
        old_status: IssueStatus,
        history: StatusHistoryEntry,
        notification: Notification,
    },
}

/// Result of a vote toggle that found its issue.
#[derive(Debug, Clone)]
pub struct VoteOutcome {
    pub action: VoteAction,
    pub vote_count: i64,
    pub owner_id: Uuid,
    pub notification: Option<Notification>,
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

pub(crate) fn status_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<IssueStatus> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_err(idx, e))
}

fn opt_status_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<IssueStatus>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion_err(idx, e)))
        .transpose()
}

pub(crate) fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        status: status_col(row, 4)?,
        street_address: row.get(5)?,
        landmark_reference: row.get(6)?,
        detailed_description: row.get(7)?,
        province: row.get(8)?,
        district: row.get(9)?,
        sector: row.get(10)?,
        image_url: row.get(11)?,
        user_id: uuid_col(row, 12)?,
        reporter_username: row.get(13)?,
        vote_count: row.get(14)?,
        created_at: ts_col(row, 15)?,
        updated_at: ts_col(row, 16)?,
    })
}

pub(crate) fn history_from_row(row: &Row<'_>) -> rusqlite::Result<StatusHistoryEntry> {
    Ok(StatusHistoryEntry {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        old_status: opt_status_col(row, 2)?,
        new_status: status_col(row, 3)?,
        changed_by: row.get(4)?,
        comment: row.get(5)?,
        changed_at: ts_col(row, 6)?,
    })
}

pub(crate) fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<AdminComment> {
    Ok(AdminComment {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        admin_name: row.get(2)?,
        comment: row.get(3)?,
        created_at: ts_col(row, 4)?,
    })
}

pub(crate) fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: uuid_col(row, 1)?,
        issue_id: row.get(2)?,
        title: row.get(3)?,
        message: row.get(4)?,
        kind: row.get(5)?,
        read: row.get(6)?,
        created_at: ts_col(row, 7)?,
    })
}
