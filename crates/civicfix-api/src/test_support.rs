use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use civicfix_db::Database;
use civicfix_gateway::dispatcher::Dispatcher;
use civicfix_gateway::rooms::Room;
use civicfix_types::api::CreateIssueRequest;
use civicfix_types::events::GatewayEvent;
use civicfix_types::models::{Identity, Issue};

use crate::state::{AppState, AppStateInner};

/// Application state over a scratch database file, removed on drop.
pub struct TestState {
    state: AppState,
    path: PathBuf,
}

impl Deref for TestState {
    type Target = AppState;

    fn deref(&self) -> &AppState {
        &self.state
    }
}

impl Drop for TestState {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut p = self.path.clone().into_os_string();
            p.push(suffix);
            let _ = std::fs::remove_file(p);
        }
    }
}

pub fn state() -> TestState {
    let path = std::env::temp_dir().join(format!("civicfix-api-test-{}.db", Uuid::new_v4()));
    let state = Arc::new(AppStateInner {
        db: Database::open(&path).unwrap(),
        dispatcher: Dispatcher::new(),
        jwt_secret: "test-secret".into(),
    });
    TestState { state, path }
}

pub fn pothole(district: &str) -> CreateIssueRequest {
    CreateIssueRequest {
        title: "Pothole on KN 5".into(),
        description: "Deep enough to lose a wheel".into(),
        category: "Roads".into(),
        district: Some(district.into()),
        ..Default::default()
    }
}

pub async fn reported(state: &AppState, owner: &Identity, district: &str) -> Issue {
    crate::issues::create_issue(state, owner, pothole(district)).await.unwrap()
}

/// A live connection joined to `room`, as the gateway would set it up.
pub async fn listen(state: &AppState, identity: &Identity, room: Room) -> mpsc::Receiver<GatewayEvent> {
    let (conn, rx) = state.dispatcher.connect(identity).await;
    state.dispatcher.join_room(conn, room, identity).await.unwrap();
    rx
}

pub fn drain(rx: &mut mpsc::Receiver<GatewayEvent>) -> Vec<GatewayEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_database_is_removed_on_drop() {
        let state = state();
        let path = state.path.clone();
        assert!(path.exists());

        drop(state);
        assert!(!path.exists());
        let mut wal = path.into_os_string();
        wal.push("-wal");
        assert!(!PathBuf::from(wal).exists());
    }
}
