use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::info;

use civicfix_types::api::{MessageResponse, UserStats};
use civicfix_types::models::Identity;

use crate::error::ApiError;
use crate::state::{AppState, run_blocking};

/// Remove the caller's account together with their issues, votes and
/// notifications. Live gateway sessions for the user are closed out of
/// every room.
pub async fn delete_account(state: &AppState, user: &Identity) -> Result<(), ApiError> {
    let user_id = user.user_id;
    if !run_blocking(state, move |db| db.delete_user(user_id)).await? {
        return Err(ApiError::NotFound);
    }

    for conn_id in state.dispatcher.rooms().connections_of_user(user_id).await {
        state.dispatcher.on_disconnect(conn_id).await;
    }

    info!("Account {} ({}) deleted", user.username, user_id);
    Ok(())
}

/// Ledger totals for the caller plus their latest votes.
pub async fn user_stats(state: &AppState, user: &Identity) -> Result<UserStats, ApiError> {
    let user_id = user.user_id;
    run_blocking(state, move |db| db.user_stats(user_id)).await
}

pub async fn user_stats_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(user_stats(&state, &identity).await?))
}

pub async fn delete_account_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    delete_account(&state, &identity).await?;
    Ok(Json(MessageResponse {
        message: "Account deleted successfully".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::get_issue;
    use crate::votes::toggle_vote;
    use crate::test_support::{listen, reported, state};
    use civicfix_gateway::rooms::Room;
    use uuid::Uuid;

    #[tokio::test]
    async fn deleting_account_cascades_and_drops_sessions() {
        let state = state();
        let owner = Identity::citizen(Uuid::new_v4(), "ana");
        let issue = reported(&state, &owner, "Gasabo").await;
        let _rx = listen(&state, &owner, Room::User(owner.user_id)).await;

        delete_account(&state, &owner).await.unwrap();

        assert!(!state.db.user_exists(owner.user_id).unwrap());
        assert!(state.db.list_notifications(owner.user_id).unwrap().is_empty());
        assert!(matches!(get_issue(&state, issue.id).await.unwrap_err(), ApiError::NotFound));
        assert!(state.dispatcher.rooms().connections_of_user(owner.user_id).await.is_empty());
    }

    #[tokio::test]
    async fn stats_reflect_votes_and_reports() {
        let state = state();
        let ana = Identity::citizen(Uuid::new_v4(), "ana");
        let ben = Identity::citizen(Uuid::new_v4(), "ben");
        let mine = reported(&state, &ana, "Gasabo").await;
        let theirs = reported(&state, &ben, "Gasabo").await;

        toggle_vote(&state, &ben, mine.id).await.unwrap();
        toggle_vote(&state, &ana, theirs.id).await.unwrap();

        let stats = user_stats(&state, &ana).await.unwrap();
        assert_eq!(stats.votes_given, 1);
        assert_eq!(stats.votes_received, 1);
        assert_eq!(stats.issues_submitted, 1);
        assert_eq!(stats.recent_activity.len(), 1);
        assert_eq!(stats.recent_activity[0].issue_id, theirs.id);

        let fresh = user_stats(&state, &Identity::citizen(Uuid::new_v4(), "cy")).await.unwrap();
        assert_eq!(fresh.votes_given + fresh.votes_received + fresh.issues_submitted, 0);
        assert!(fresh.recent_activity.is_empty());
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let state = state();
        let ghost = Identity::citizen(Uuid::new_v4(), "ghost");
        assert!(matches!(delete_account(&state, &ghost).await.unwrap_err(), ApiError::NotFound));
    }
}
