use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use civicfix_types::events::{GatewayCommand, GatewayEvent};
use civicfix_types::models::Identity;

use crate::dispatcher::Dispatcher;
use crate::rooms::{ConnectionId, Room};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one WebSocket whose caller was already authenticated at the HTTP
/// upgrade. Returns once the socket closes, after the connection has been
/// removed from every room.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, identity: Identity) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to gateway", identity.username, identity.user_id);

    let ready = GatewayEvent::Ready {
        user_id: identity.user_id,
        username: identity.username.clone(),
    };
    let Ok(text) = serde_json::to_string(&ready) else {
        return;
    };
    if sender.send(Message::Text(text.into())).await.is_err() {
        return;
    }

    let (conn_id, mut outbound) = dispatcher.connect(&identity).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound.recv() => {
                    // Registry released the sender: disconnect or shutdown.
                    let Some(event) = event else { break };

                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode gateway event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let identity_recv = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&dispatcher_recv, conn_id, &identity_recv, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            identity_recv.username,
                            identity_recv.user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.on_disconnect(conn_id).await;
    info!("{} ({}) disconnected from gateway", identity.username, identity.user_id);
}

async fn handle_command(
    dispatcher: &Dispatcher,
    conn_id: ConnectionId,
    identity: &Identity,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::JoinUserRoom { user_id } => {
            join(dispatcher, conn_id, identity, Room::User(user_id)).await;
        }
        GatewayCommand::JoinAdminRoom => {
            join(dispatcher, conn_id, identity, Room::Admins).await;
        }
        GatewayCommand::LeaveUserRoom { user_id } => {
            dispatcher.leave_room(conn_id, &Room::User(user_id), identity).await;
        }
        GatewayCommand::LeaveAdminRoom => {
            dispatcher.leave_room(conn_id, &Room::Admins, identity).await;
        }
    }
}

async fn join(dispatcher: &Dispatcher, conn_id: ConnectionId, identity: &Identity, room: Room) {
    let reply = match dispatcher.join_room(conn_id, room, identity).await {
        Ok(room) => GatewayEvent::JoinedRoom { room: room.to_string() },
        Err(e) => {
            warn!("{} ({}) room join refused: {}", identity.username, identity.user_id, e);
            GatewayEvent::RoomError { message: e.to_string() }
        }
    };
    dispatcher.send(conn_id, reply).await;
}
