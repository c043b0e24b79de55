use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AdminComment, Identity, Issue, Notification, Role, StatusHistoryEntry, VoteAction};

// -- JWT Claims --

/// Claims carried by the bearer tokens the auth service issues. Shared by the
/// REST middleware and the WebSocket upgrade so both resolve callers the
/// same way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub district: Option<String>,
    pub exp: usize,
}

impl Claims {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.sub,
            username: self.username.clone(),
            role: if self.is_admin { Role::Admin } else { Role::Citizen },
            district: self.district.clone().filter(|d| !d.is_empty()),
        }
    }
}

// -- Issues --

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateIssueRequest {
    pub title: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub street_address: Option<String>,
    #[serde(default)]
    pub landmark_reference: Option<String>,
    #[serde(default)]
    pub detailed_description: Option<String>,
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Owner edit. Location text is replaced as sent; an absent `image_url`
/// keeps the current image.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateIssueRequest {
    pub title: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub street_address: Option<String>,
    #[serde(default)]
    pub landmark_reference: Option<String>,
    #[serde(default)]
    pub detailed_description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionRequest {
    pub status: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub status: Option<String>,
    pub category: Option<String>,
    pub province: Option<String>,
    pub district: Option<String>,
    pub sector: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IssueListResponse {
    pub issues: Vec<Issue>,
    pub total: i64,
    pub pages: i64,
    pub current_page: u32,
}

#[derive(Debug, Serialize)]
pub struct IssueDetails {
    #[serde(flatten)]
    pub issue: Issue,
    pub status_history: Vec<StatusHistoryEntry>,
    pub admin_comments: Vec<AdminComment>,
}

#[derive(Debug, Serialize)]
pub struct UserIssuesResponse {
    pub issues: Vec<Issue>,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub total_issues: i64,
    pub open_issues: i64,
    pub in_progress_issues: i64,
    pub resolved_issues: i64,
}

#[derive(Debug, Serialize)]
pub struct AdminDashboard {
    pub stats: DashboardStats,
    pub recent_issues: Vec<Issue>,
}

// -- Votes --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteResponse {
    pub action: VoteAction,
    pub vote_count: i64,
}

#[derive(Debug, Serialize)]
pub struct VoteCountResponse {
    pub vote_count: i64,
}

/// One of the caller's recent votes.
#[derive(Debug, Clone, Serialize)]
pub struct VoteActivity {
    #[serde(rename = "type")]
    pub kind: String,
    pub issue_id: i64,
    pub issue_title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserStats {
    pub votes_given: i64,
    pub votes_received: i64,
    pub issues_submitted: i64,
    pub recent_activity: Vec<VoteActivity>,
}

// -- Notifications --

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
