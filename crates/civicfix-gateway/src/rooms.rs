use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use civicfix_types::events::GatewayEvent;

/// Identifies one live transport connection. A user may hold several.
pub type ConnectionId = Uuid;

/// Named fanout targets. Broadcast is not a room: it is "every registered
/// connection" and is handled by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// `user_<id>`: every connection of one user
    User(Uuid),
    /// `admins`: every administrator connection
    Admins,
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::User(id) => write!(f, "user_{}", id),
            Room::Admins => f.write_str("admins"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
    #[error("not allowed to join {0}")]
    Forbidden(String),
}

struct Member {
    user_id: Uuid,
    tx: mpsc::Sender<GatewayEvent>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Member>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
    /// Reverse index so a disconnect can clean up without scanning every room.
    memberships: HashMap<ConnectionId, HashSet<Room>>,
}

/// In-memory room bookkeeping. Both indexes live behind one lock so a reader
/// never sees a connection in a room it has already left.
pub struct RoomRegistry {
    state: RwLock<RegistryState>,
    buffer: usize,
}

impl RoomRegistry {
    /// `buffer` bounds each connection's outbound queue.
    pub fn new(buffer: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            buffer: buffer.max(1),
        }
    }

    /// Register a live connection. Returns its id and the receiving half of
    /// its outbound buffer.
    pub async fn connect(&self, user_id: Uuid) -> (ConnectionId, mpsc::Receiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        self.state
            .write()
            .await
            .connections
            .insert(conn_id, Member { user_id, tx });
        (conn_id, rx)
    }

    /// Add a connection to a room. Returns false if it was already a member.
    pub async fn join(&self, conn_id: ConnectionId, room: Room) -> Result<bool, RoomError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if !state.connections.contains_key(&conn_id) {
            return Err(RoomError::UnknownConnection(conn_id));
        }

        let added = state.rooms.entry(room.clone()).or_default().insert(conn_id);
        state.memberships.entry(conn_id).or_default().insert(room);
        Ok(added)
    }

    /// Remove a connection from a room. Returns false if it was not a member.
    pub async fn leave(&self, conn_id: ConnectionId, room: &Room) -> bool {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let removed = match state.rooms.get_mut(room) {
            Some(members) => {
                let removed = members.remove(&conn_id);
                if members.is_empty() {
                    state.rooms.remove(room);
                }
                removed
            }
            None => false,
        };

        if let Some(rooms) = state.memberships.get_mut(&conn_id) {
            rooms.remove(room);
            if rooms.is_empty() {
                state.memberships.remove(&conn_id);
            }
        }

        removed
    }

    /// Forget a connection entirely: every room membership and its outbound
    /// sender. Dropping the sender ends the connection's writer loop.
    /// Returns the number of rooms it was removed from.
    pub async fn drop_connection(&self, conn_id: ConnectionId) -> usize {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.connections.remove(&conn_id);

        let rooms = state.memberships.remove(&conn_id).unwrap_or_default();
        for room in &rooms {
            if let Some(members) = state.rooms.get_mut(room) {
                members.remove(&conn_id);
                if members.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }
        rooms.len()
    }

    pub async fn members_of(&self, room: &Room) -> HashSet<ConnectionId> {
        self.state
            .read()
            .await
            .rooms
            .get(room)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn rooms_of(&self, conn_id: ConnectionId) -> HashSet<Room> {
        self.state
            .read()
            .await
            .memberships
            .get(&conn_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_connected(&self, conn_id: ConnectionId) -> bool {
        self.state.read().await.connections.contains_key(&conn_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Live connections belonging to one user.
    pub async fn connections_of_user(&self, user_id: Uuid) -> Vec<ConnectionId> {
        self.state
            .read()
            .await
            .connections
            .iter()
            .filter(|(_, m)| m.user_id == user_id)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Outbound senders for the members of `room`, or for every connection
    /// when `room` is `None`.
    pub(crate) async fn senders(
        &self,
        room: Option<&Room>,
    ) -> Vec<(ConnectionId, mpsc::Sender<GatewayEvent>)> {
        let state = self.state.read().await;
        match room {
            Some(room) => state
                .rooms
                .get(room)
                .into_iter()
                .flatten()
                .filter_map(|id| state.connections.get(id).map(|m| (*id, m.tx.clone())))
                .collect(),
            None => state
                .connections
                .iter()
                .map(|(id, m)| (*id, m.tx.clone()))
                .collect(),
        }
    }

    pub(crate) async fn sender(&self, conn_id: ConnectionId) -> Option<mpsc::Sender<GatewayEvent>> {
        self.state
            .read()
            .await
            .connections
            .get(&conn_id)
            .map(|m| m.tx.clone())
    }

    /// Drop every connection and room. Used at shutdown.
    pub async fn clear(&self) -> usize {
        let mut state = self.state.write().await;
        let count = state.connections.len();
        *state = RegistryState::default();
        count
    }
}
