use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{IssueStatus, IssueSummary, VoteAction};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the connection is live
    Ready { user_id: Uuid, username: String },

    /// A room join was accepted
    JoinedRoom { room: String },

    /// A room join or leave was refused
    RoomError { message: String },

    /// An issue owned by this user changed status
    StatusUpdate {
        issue_id: i64,
        new_status: IssueStatus,
        message: String,
        title: String,
    },

    /// Dashboard update for administrators
    AdminUpdate {
        kind: AdminUpdateKind,
        message: String,
        issue: IssueSummary,
    },

    /// A new issue was reported
    NewIssue { message: String, issue: IssueSummary },

    /// An issue's vote count changed. `issue_owner_id` lets the owner's
    /// client show its own note without a separate private event.
    VoteUpdate {
        issue_id: i64,
        vote_count: i64,
        issue_owner_id: Uuid,
        action: VoteAction,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminUpdateKind {
    StatusChange,
    NewIssue,
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Receive notifications addressed to `user_<user_id>`
    JoinUserRoom { user_id: Uuid },

    /// Stop receiving per-user notifications
    LeaveUserRoom { user_id: Uuid },

    /// Receive the administrator dashboard feed
    JoinAdminRoom,

    /// Stop receiving the administrator feed
    LeaveAdminRoom,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_tagged_envelope() {
        let event = GatewayEvent::JoinedRoom { room: "admins".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "JoinedRoom");
        assert_eq!(json["data"]["room"], "admins");
    }

    #[test]
    fn vote_update_serializes_lowercase_action() {
        let event = GatewayEvent::VoteUpdate {
            issue_id: 7,
            vote_count: 3,
            issue_owner_id: Uuid::nil(),
            action: VoteAction::Unvoted,
            message: "Vote removed from issue #7".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["action"], "unvoted");
        assert_eq!(json["data"]["vote_count"], 3);
    }

    #[test]
    fn unit_commands_parse() {
        let cmd: GatewayCommand = serde_json::from_str(r#"{"type":"JoinAdminRoom"}"#).unwrap();
        assert_eq!(cmd, GatewayCommand::JoinAdminRoom);

        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"JoinUserRoom","data":{{"user_id":"{}"}}}}"#, id);
        let cmd: GatewayCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(cmd, GatewayCommand::JoinUserRoom { user_id: id });
    }
}
