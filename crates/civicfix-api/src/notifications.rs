use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};

use civicfix_types::api::{MessageResponse, NotificationsResponse};
use civicfix_types::models::{Identity, Notification};

use crate::error::ApiError;
use crate::state::{AppState, run_blocking};

pub async fn list_notifications(state: &AppState, user: &Identity) -> Result<Vec<Notification>, ApiError> {
    let user_id = user.user_id;
    run_blocking(state, move |db| db.list_notifications(user_id)).await
}

/// Someone else's notification looks the same as a missing one.
pub async fn mark_read(state: &AppState, user: &Identity, notification_id: i64) -> Result<(), ApiError> {
    let user_id = user.user_id;
    if run_blocking(state, move |db| db.mark_notification_read(notification_id, user_id)).await? {
        Ok(())
    } else {
        Err(ApiError::NotFound)
    }
}

pub async fn list_notifications_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let notifications = list_notifications(&state, &identity).await?;
    Ok(Json(NotificationsResponse { notifications }))
}

pub async fn mark_read_handler(
    State(state): State<AppState>,
    Path(notification_id): Path<i64>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    mark_read(&state, &identity, notification_id).await?;
    Ok(Json(MessageResponse {
        message: "Notification marked as read".into(),
    }))
}
