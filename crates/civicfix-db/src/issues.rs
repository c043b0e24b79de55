use anyhow::{Result, anyhow};
use rusqlite::types::ToSql;
use rusqlite::{Connection, TransactionBehavior};
use uuid::Uuid;

use civicfix_types::api::{CreateIssueRequest, DashboardStats, UpdateIssueRequest};
use civicfix_types::models::{Identity, Issue, IssueStatus, Notification};

use crate::Database;
use crate::models::{ISSUE_SELECT, IssueFilter, issue_from_row, status_col};
use crate::notifications::insert_notification;
use crate::queries::{OptionalExt, now_ts, upsert_user};

impl Database {
    /// Insert a new issue in `Open` state together with the owner's
    /// confirmation notification.
    pub fn create_issue(
        &self,
        owner: &Identity,
        req: &CreateIssueRequest,
    ) -> Result<(Issue, Notification)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            upsert_user(&tx, owner)?;

            let now = now_ts();
            tx.execute(
                "INSERT INTO issues (title, description, category, status, street_address,
                     landmark_reference, detailed_description, province, district, sector,
                     image_url, user_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                rusqlite::params![
                    req.title.trim(),
                    req.description.trim(),
                    req.category.trim(),
                    IssueStatus::Open.as_str(),
                    req.street_address,
                    req.landmark_reference,
                    req.detailed_description,
                    req.province,
                    req.district,
                    req.sector,
                    req.image_url,
                    owner.user_id.to_string(),
                    now,
                ],
            )?;
            let issue_id = tx.last_insert_rowid();

            let notification = insert_notification(
                &tx,
                owner.user_id,
                Some(issue_id),
                "Issue reported",
                &format!("Your issue '{}' was reported successfully.", req.title.trim()),
                "success",
            )?;

            let issue = query_issue(&tx, issue_id)?
                .ok_or_else(|| anyhow!("Issue {} vanished after insert", issue_id))?;
            tx.commit()?;
            Ok((issue, notification))
        })
    }

    pub fn get_issue(&self, id: i64) -> Result<Option<Issue>> {
        self.with_conn(|conn| query_issue(conn, id))
    }

    /// Newest-first page of issues matching `filter`, plus the total match count.
    pub fn list_issues(&self, filter: &IssueFilter) -> Result<(Vec<Issue>, i64)> {
        self.with_conn(|conn| {
            let mut clauses: Vec<&str> = Vec::new();
            let mut params: Vec<Box<dyn ToSql>> = Vec::new();

            if let Some(status) = filter.status {
                clauses.push("i.status = ?");
                params.push(Box::new(status.as_str()));
            }
            for (clause, value) in [
                ("i.category = ?", &filter.category),
                ("i.province = ?", &filter.province),
                ("i.district = ?", &filter.district),
                ("i.sector = ?", &filter.sector),
            ] {
                if let Some(v) = value {
                    clauses.push(clause);
                    params.push(Box::new(v.clone()));
                }
            }
            if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
                clauses.push(
                    "(i.title LIKE ? ESCAPE '\\' OR i.description LIKE ? ESCAPE '\\'
                      OR i.street_address LIKE ? ESCAPE '\\' OR i.landmark_reference LIKE ? ESCAPE '\\'
                      OR i.detailed_description LIKE ? ESCAPE '\\' OR i.province LIKE ? ESCAPE '\\'
                      OR i.district LIKE ? ESCAPE '\\' OR i.sector LIKE ? ESCAPE '\\')",
                );
                let pattern = format!("%{}%", escape_like(search.trim()));
                for _ in 0..8 {
                    params.push(Box::new(pattern.clone()));
                }
            }

            let where_sql = if clauses.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", clauses.join(" AND "))
            };

            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM issues i{}", where_sql),
                param_refs.as_slice(),
                |r| r.get(0),
            )?;

            let sql = format!(
                "{}{} ORDER BY i.created_at DESC, i.id DESC LIMIT {} OFFSET {}",
                ISSUE_SELECT, where_sql, filter.limit, filter.offset
            );
            let mut stmt = conn.prepare(&sql)?;
            let issues = stmt
                .query_map(param_refs.as_slice(), issue_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((issues, total))
        })
    }

    /// Remove an issue. Votes, history, comments and notifications that
    /// reference it are removed by cascade.
    pub fn delete_issue(&self, id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute("DELETE FROM issues WHERE id = ?1", [id])?;
            Ok(removed > 0)
        })
    }

    /// Apply an owner's edit. Returns `None` when the issue is missing or
    /// belongs to someone else. Status and district are not editable here.
    pub fn update_issue(&self, id: i64, owner: &Identity, req: &UpdateIssueRequest) -> Result<Option<Issue>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            upsert_user(&tx, owner)?;

            let updated = tx.execute(
                "UPDATE issues SET title = ?1, description = ?2, category = ?3,
                     street_address = ?4, landmark_reference = ?5, detailed_description = ?6,
                     image_url = COALESCE(?7, image_url), updated_at = ?8
                 WHERE id = ?9 AND user_id = ?10",
                rusqlite::params![
                    req.title.trim(),
                    req.description.trim(),
                    req.category.trim(),
                    req.street_address,
                    req.landmark_reference,
                    req.detailed_description,
                    req.image_url,
                    now_ts(),
                    id,
                    owner.user_id.to_string(),
                ],
            )?;
            if updated == 0 {
                return Ok(None);
            }

            let issue = query_issue(&tx, id)?;
            tx.commit()?;
            Ok(issue)
        })
    }

    /// Everything one user has reported, newest first.
    pub fn list_user_issues(&self, user_id: Uuid) -> Result<Vec<Issue>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE i.user_id = ?1 ORDER BY i.created_at DESC, i.id DESC",
                ISSUE_SELECT
            ))?;
            let issues = stmt
                .query_map([user_id.to_string()], issue_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(issues)
        })
    }

    /// Issue counts per status, across every district or within one.
    pub fn dashboard_stats(&self, district: Option<&str>) -> Result<DashboardStats> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM issues
                 WHERE ?1 IS NULL OR district = ?1
                 GROUP BY status",
            )?;
            let rows = stmt.query_map([district], |r| Ok((status_col(r, 0)?, r.get::<_, i64>(1)?)))?;

            let mut stats = DashboardStats::default();
            for row in rows {
                let (status, count) = row?;
                stats.total_issues += count;
                match status {
                    IssueStatus::Open => stats.open_issues = count,
                    IssueStatus::InProgress => stats.in_progress_issues = count,
                    IssueStatus::Resolved => stats.resolved_issues = count,
                }
            }
            Ok(stats)
        })
    }
}

/// `LIKE` treats `%` and `_` as wildcards; searches match them literally.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub(crate) fn query_issue(conn: &Connection, id: i64) -> Result<Option<Issue>> {
    let mut stmt = conn.prepare(&format!("{} WHERE i.id = ?1", ISSUE_SELECT))?;
    stmt.query_row([id], issue_from_row).optional()
}
