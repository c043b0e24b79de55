use std::sync::Arc;

use tracing::error;

use civicfix_db::Database;
use civicfix_gateway::dispatcher::{Dispatcher, FanoutEvent};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
}

impl AppStateInner {
    /// Post-commit hook. Runs only after the producing transaction has
    /// committed; delivery problems are logged by the dispatcher and never
    /// reach the caller.
    pub(crate) async fn publish(&self, event: FanoutEvent) {
        self.dispatcher.dispatch(&event).await;
    }
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn run_blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::TransientStoreFailure(e.into())
        })?
        .map_err(ApiError::from)
}
