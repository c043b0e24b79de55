use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use civicfix_types::events::{AdminUpdateKind, GatewayEvent};
use civicfix_types::models::{Identity, IssueStatus, IssueSummary, VoteAction};

use crate::rooms::{ConnectionId, Room, RoomError, RoomRegistry};

/// Default per-connection outbound buffer, in events.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Domain events handed to the dispatcher after the producing transaction
/// has committed.
#[derive(Debug, Clone, PartialEq)]
pub enum FanoutEvent {
    StatusChanged {
        issue: IssueSummary,
        new_status: IssueStatus,
        owner_id: Uuid,
        message: String,
    },
    NewIssue {
        issue: IssueSummary,
    },
    VoteChanged {
        issue_id: i64,
        vote_count: i64,
        owner_id: Uuid,
        action: VoteAction,
    },
}

/// Where a routed payload goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Room(Room),
    /// Every connection currently registered
    Everyone,
}

/// Routing table: which targets receive which payload for a domain event.
pub fn route(event: &FanoutEvent) -> Vec<(Target, GatewayEvent)> {
    match event {
        FanoutEvent::StatusChanged {
            issue,
            new_status,
            owner_id,
            message,
        } => vec![
            (
                Target::Room(Room::User(*owner_id)),
                GatewayEvent::StatusUpdate {
                    issue_id: issue.id,
                    new_status: *new_status,
                    message: message.clone(),
                    title: issue.title.clone(),
                },
            ),
            (
                Target::Room(Room::Admins),
                GatewayEvent::AdminUpdate {
                    kind: AdminUpdateKind::StatusChange,
                    message: format!("Issue #{} status changed to {}", issue.id, new_status.label()),
                    issue: issue.clone(),
                },
            ),
        ],
        FanoutEvent::NewIssue { issue } => {
            let message = format!("New issue reported: {}", issue.title);
            vec![
                (
                    Target::Room(Room::Admins),
                    GatewayEvent::AdminUpdate {
                        kind: AdminUpdateKind::NewIssue,
                        message: message.clone(),
                        issue: issue.clone(),
                    },
                ),
                (
                    Target::Everyone,
                    GatewayEvent::NewIssue {
                        message,
                        issue: issue.clone(),
                    },
                ),
            ]
        }
        FanoutEvent::VoteChanged {
            issue_id,
            vote_count,
            owner_id,
            action,
        } => {
            let message = match action {
                VoteAction::Voted => format!("Issue #{} received a new vote", issue_id),
                VoteAction::Unvoted => format!("Vote removed from issue #{}", issue_id),
            };
            vec![(
                Target::Everyone,
                GatewayEvent::VoteUpdate {
                    issue_id: *issue_id,
                    vote_count: *vote_count,
                    issue_owner_id: *owner_id,
                    action: *action,
                    message,
                },
            )]
        }
    }
}

/// Owns the room registry and pushes events to connections. Every push is a
/// non-blocking enqueue; a full buffer drops the event for that connection
/// only.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    rooms: RoomRegistry,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_OUTBOUND_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                rooms: RoomRegistry::new(buffer),
            }),
        }
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.inner.rooms
    }

    /// Register a new live connection for `identity`.
    pub async fn connect(&self, identity: &Identity) -> (ConnectionId, mpsc::Receiver<GatewayEvent>) {
        self.inner.rooms.connect(identity.user_id).await
    }

    /// Join `room` after checking the caller may: a user room only for its
    /// own user, the admin pool only for administrators.
    pub async fn join_room(
        &self,
        conn_id: ConnectionId,
        room: Room,
        identity: &Identity,
    ) -> Result<Room, RoomError> {
        let allowed = match &room {
            Room::User(id) => *id == identity.user_id,
            Room::Admins => identity.is_admin(),
        };
        if !allowed {
            return Err(RoomError::Forbidden(room.to_string()));
        }

        if self.inner.rooms.join(conn_id, room.clone()).await? {
            info!("{} ({}) joined {}", identity.username, identity.user_id, room);
        }
        Ok(room)
    }

    pub async fn leave_room(&self, conn_id: ConnectionId, room: &Room, identity: &Identity) -> bool {
        let left = self.inner.rooms.leave(conn_id, room).await;
        if left {
            info!("{} ({}) left {}", identity.username, identity.user_id, room);
        }
        left
    }

    /// Must run on every disconnect, clean or not.
    pub async fn on_disconnect(&self, conn_id: ConnectionId) {
        let rooms = self.inner.rooms.drop_connection(conn_id).await;
        debug!("Connection {} dropped from {} rooms", conn_id, rooms);
    }

    /// Route and push a domain event. Returns how many connection buffers
    /// accepted a payload; zero is not an error.
    pub async fn dispatch(&self, event: &FanoutEvent) -> usize {
        let mut delivered = 0;
        for (target, payload) in route(event) {
            let room = match &target {
                Target::Room(room) => Some(room),
                Target::Everyone => None,
            };
            let senders = self.inner.rooms.senders(room).await;
            let mut accepted = 0;
            for (conn_id, tx) in &senders {
                if push(*conn_id, tx, payload.clone()) {
                    accepted += 1;
                }
            }
            debug!(
                "{} fanout to {:?}: {}/{} delivered",
                event_name(event),
                target,
                accepted,
                senders.len()
            );
            delivered += accepted;
        }
        delivered
    }

    /// Push directly to one connection.
    pub async fn send(&self, conn_id: ConnectionId, event: GatewayEvent) -> bool {
        match self.inner.rooms.sender(conn_id).await {
            Some(tx) => push(conn_id, &tx, event),
            None => false,
        }
    }

    /// Drop every connection. Their writer loops see a closed buffer and exit.
    pub async fn shutdown(&self) {
        let count = self.inner.rooms.clear().await;
        info!("Dispatcher shut down, released {} connections", count);
    }
}

fn push(conn_id: ConnectionId, tx: &mpsc::Sender<GatewayEvent>, event: GatewayEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("Outbound buffer full for connection {}, dropping event", conn_id);
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

fn event_name(event: &FanoutEvent) -> &'static str {
    match event {
        FanoutEvent::StatusChanged { .. } => "status_changed",
        FanoutEvent::NewIssue { .. } => "new_issue",
        FanoutEvent::VoteChanged { .. } => "vote_changed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(owner: Uuid) -> IssueSummary {
        IssueSummary {
            id: 7,
            title: "Pothole".into(),
            category: "Roads".into(),
            status: IssueStatus::InProgress,
            district: Some("Gasabo".into()),
            sector: None,
            user_id: owner,
        }
    }

    fn status_changed(owner: Uuid) -> FanoutEvent {
        FanoutEvent::StatusChanged {
            issue: summary(owner),
            new_status: IssueStatus::InProgress,
            owner_id: owner,
            message: "Your issue is being worked on and will be solved soon.".into(),
        }
    }

    #[test]
    fn routing_table() {
        let owner = Uuid::new_v4();

        let targets: Vec<Target> = route(&status_changed(owner)).into_iter().map(|(t, _)| t).collect();
        assert_eq!(targets, vec![Target::Room(Room::User(owner)), Target::Room(Room::Admins)]);

        let targets: Vec<Target> = route(&FanoutEvent::NewIssue { issue: summary(owner) })
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        assert_eq!(targets, vec![Target::Room(Room::Admins), Target::Everyone]);

        let routed = route(&FanoutEvent::VoteChanged {
            issue_id: 7,
            vote_count: 2,
            owner_id: owner,
            action: VoteAction::Voted,
        });
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].0, Target::Everyone);
        assert!(matches!(
            &routed[0].1,
            GatewayEvent::VoteUpdate { vote_count: 2, issue_owner_id, .. } if *issue_owner_id == owner
        ));
    }

    #[tokio::test]
    async fn status_change_reaches_owner_and_admins_only() {
        let dispatcher = Dispatcher::new();
        let owner = Identity::citizen(Uuid::new_v4(), "ana");
        let other = Identity::citizen(Uuid::new_v4(), "ben");
        let admin = Identity::admin(Uuid::new_v4(), "ops", "Gasabo");

        let (owner_conn, mut owner_rx) = dispatcher.connect(&owner).await;
        let (other_conn, mut other_rx) = dispatcher.connect(&other).await;
        let (admin_conn, mut admin_rx) = dispatcher.connect(&admin).await;
        dispatcher.join_room(owner_conn, Room::User(owner.user_id), &owner).await.unwrap();
        dispatcher.join_room(other_conn, Room::User(other.user_id), &other).await.unwrap();
        dispatcher.join_room(admin_conn, Room::Admins, &admin).await.unwrap();

        let delivered = dispatcher.dispatch(&status_changed(owner.user_id)).await;
        assert_eq!(delivered, 2);

        assert!(matches!(owner_rx.try_recv(), Ok(GatewayEvent::StatusUpdate { issue_id: 7, .. })));
        assert!(matches!(
            admin_rx.try_recv(),
            Ok(GatewayEvent::AdminUpdate { kind: AdminUpdateKind::StatusChange, .. })
        ));
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_connections_without_rooms() {
        let dispatcher = Dispatcher::new();
        let anon = Identity::citizen(Uuid::new_v4(), "guest");
        let (_conn, mut rx) = dispatcher.connect(&anon).await;

        let delivered = dispatcher
            .dispatch(&FanoutEvent::VoteChanged {
                issue_id: 1,
                vote_count: 1,
                owner_id: Uuid::new_v4(),
                action: VoteAction::Voted,
            })
            .await;
        assert_eq!(delivered, 1);
        assert!(matches!(rx.try_recv(), Ok(GatewayEvent::VoteUpdate { .. })));
    }

    #[tokio::test]
    async fn new_issue_hits_admins_twice_and_citizens_once() {
        let dispatcher = Dispatcher::new();
        let citizen = Identity::citizen(Uuid::new_v4(), "ana");
        let admin = Identity::admin(Uuid::new_v4(), "ops", "Gasabo");
        let (_c, mut citizen_rx) = dispatcher.connect(&citizen).await;
        let (admin_conn, mut admin_rx) = dispatcher.connect(&admin).await;
        dispatcher.join_room(admin_conn, Room::Admins, &admin).await.unwrap();

        let delivered = dispatcher
            .dispatch(&FanoutEvent::NewIssue { issue: summary(citizen.user_id) })
            .await;
        assert_eq!(delivered, 3);

        assert!(matches!(admin_rx.try_recv(), Ok(GatewayEvent::AdminUpdate { .. })));
        assert!(matches!(admin_rx.try_recv(), Ok(GatewayEvent::NewIssue { .. })));
        assert!(matches!(citizen_rx.try_recv(), Ok(GatewayEvent::NewIssue { .. })));
        assert!(citizen_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_requires_matching_identity() {
        let dispatcher = Dispatcher::new();
        let ana = Identity::citizen(Uuid::new_v4(), "ana");
        let (conn, _rx) = dispatcher.connect(&ana).await;

        assert!(matches!(
            dispatcher.join_room(conn, Room::Admins, &ana).await,
            Err(RoomError::Forbidden(_))
        ));
        assert!(matches!(
            dispatcher.join_room(conn, Room::User(Uuid::new_v4()), &ana).await,
            Err(RoomError::Forbidden(_))
        ));
        assert!(dispatcher.rooms().rooms_of(conn).await.is_empty());
    }

    #[tokio::test]
    async fn disconnected_member_receives_nothing() {
        let dispatcher = Dispatcher::new();
        let owner = Identity::citizen(Uuid::new_v4(), "ana");
        let (conn, _rx) = dispatcher.connect(&owner).await;
        dispatcher.join_room(conn, Room::User(owner.user_id), &owner).await.unwrap();

        dispatcher.on_disconnect(conn).await;

        let delivered = dispatcher.dispatch(&status_changed(owner.user_id)).await;
        assert_eq!(delivered, 0);
        assert!(dispatcher.rooms().members_of(&Room::User(owner.user_id)).await.is_empty());
    }

    #[tokio::test]
    async fn slow_connection_drops_without_stalling_others() {
        let dispatcher = Dispatcher::with_buffer(2);
        let slow = Identity::citizen(Uuid::new_v4(), "slow");
        let fast = Identity::citizen(Uuid::new_v4(), "fast");
        let (_s, mut slow_rx) = dispatcher.connect(&slow).await;
        let (_f, mut fast_rx) = dispatcher.connect(&fast).await;

        let event = FanoutEvent::VoteChanged {
            issue_id: 1,
            vote_count: 1,
            owner_id: slow.user_id,
            action: VoteAction::Voted,
        };

        for _ in 0..5 {
            dispatcher.dispatch(&event).await;
            // The fast client keeps up.
            assert!(fast_rx.try_recv().is_ok());
        }

        // The slow client only ever holds what fit in its buffer.
        assert!(slow_rx.try_recv().is_ok());
        assert!(slow_rx.try_recv().is_ok());
        assert!(slow_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_unknown_connection_is_false() {
        let dispatcher = Dispatcher::new();
        assert!(
            !dispatcher
                .send(Uuid::new_v4(), GatewayEvent::JoinedRoom { room: "admins".into() })
                .await
        );
    }
}
