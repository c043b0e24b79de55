use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::debug;

use civicfix_gateway::dispatcher::FanoutEvent;
use civicfix_types::api::{VoteCountResponse, VoteResponse};
use civicfix_types::models::Identity;

use crate::error::ApiError;
use crate::state::{AppState, run_blocking};

/// Flip the caller's vote on an issue and broadcast the new count.
pub async fn toggle_vote(state: &AppState, voter: &Identity, issue_id: i64) -> Result<VoteResponse, ApiError> {
    let voter_db = voter.clone();
    let outcome = run_blocking(state, move |db| db.toggle_vote(issue_id, &voter_db))
        .await?
        .ok_or(ApiError::NotFound)?;

    debug!(
        "{} {} issue #{} (count now {})",
        voter.username,
        outcome.action.as_str(),
        issue_id,
        outcome.vote_count
    );

    state
        .publish(FanoutEvent::VoteChanged {
            issue_id,
            vote_count: outcome.vote_count,
            owner_id: outcome.owner_id,
            action: outcome.action,
        })
        .await;

    Ok(VoteResponse {
        action: outcome.action,
        vote_count: outcome.vote_count,
    })
}

pub async fn vote_count(state: &AppState, issue_id: i64) -> Result<i64, ApiError> {
    run_blocking(state, move |db| db.vote_count(issue_id))
        .await?
        .ok_or(ApiError::NotFound)
}

pub async fn toggle_vote_handler(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(toggle_vote(&state, &identity, issue_id).await?))
}

pub async fn vote_count_handler(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let vote_count = vote_count(&state, issue_id).await?;
    Ok(Json(VoteCountResponse { vote_count }))
}
