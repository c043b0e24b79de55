use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// -- Identity --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Citizen,
    Admin,
}

/// An already-authenticated caller. The core never reads ambient request
/// state; every operation takes one of these explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub district: Option<String>,
}

impl Identity {
    pub fn citizen(user_id: Uuid, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            role: Role::Citizen,
            district: None,
        }
    }

    pub fn admin(user_id: Uuid, username: impl Into<String>, district: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            role: Role::Admin,
            district: Some(district.into()),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// True when this caller administers `district`. An issue with no
    /// district has no administrator.
    pub fn administers(&self, district: Option<&str>) -> bool {
        match (self.is_admin(), self.district.as_deref(), district) {
            (true, Some(mine), Some(theirs)) => mine == theirs,
            _ => false,
        }
    }
}

// -- Issue status --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueStatus {
    Open,
    InProgress,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status: {0}")]
pub struct InvalidStatus(pub String);

impl IssueStatus {
    pub const ALL: [IssueStatus; 3] = [Self::Open, Self::InProgress, Self::Resolved];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InProgress => "InProgress",
            Self::Resolved => "Resolved",
        }
    }

    /// Human-readable label used in notification copy.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InProgress => "In Progress",
            Self::Resolved => "Resolved",
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = InvalidStatus;

    // Older clients send "In Progress" or the kebab-case admin dashboard form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Open" | "open" => Ok(Self::Open),
            "InProgress" | "In Progress" | "in-progress" | "in_progress" => Ok(Self::InProgress),
            "Resolved" | "resolved" => Ok(Self::Resolved),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

// -- Issues --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub category: String,
    pub status: IssueStatus,
    pub street_address: Option<String>,
    pub landmark_reference: Option<String>,
    pub detailed_description: Option<String>,
    pub province: Option<String>,
    pub district: Option<String>,
    pub sector: Option<String>,
    pub image_url: Option<String>,
    pub user_id: Uuid,
    pub reporter_username: Option<String>,
    pub vote_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Compact issue view carried by real-time events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueSummary {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub status: IssueStatus,
    pub district: Option<String>,
    pub sector: Option<String>,
    pub user_id: Uuid,
}

impl From<&Issue> for IssueSummary {
    fn from(issue: &Issue) -> Self {
        Self {
            id: issue.id,
            title: issue.title.clone(),
            category: issue.category.clone(),
            status: issue.status,
            district: issue.district.clone(),
            sector: issue.sector.clone(),
            user_id: issue.user_id,
        }
    }
}

// -- Timeline --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: i64,
    pub issue_id: i64,
    /// `None` only for rows describing an issue's creation.
    pub old_status: Option<IssueStatus>,
    pub new_status: IssueStatus,
    pub changed_by: String,
    pub comment: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminComment {
    pub id: i64,
    pub issue_id: i64,
    pub admin_name: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

// -- Votes --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteAction {
    Voted,
    Unvoted,
}

impl VoteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voted => "voted",
            Self::Unvoted => "unvoted",
        }
    }
}

// -- Notifications --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: Uuid,
    pub issue_id: Option<i64>,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
