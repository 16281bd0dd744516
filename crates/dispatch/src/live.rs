//! WebSocket bridge from recipient socket groups to connected clients.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use adcrm_core::UserId;
use adcrm_notify::GroupHub;

use crate::api::AppState;

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(user_id): Path<UserId>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_ws(socket, hub, user_id))
}

async fn handle_ws(socket: WebSocket, hub: Arc<GroupHub>, user_id: UserId) {
    let group = GroupHub::group_name(user_id);
    let (mut sender, mut receiver) = socket.split();
    let mut rx = hub.subscribe(&group);
    debug!(group = %group, "socket client joined");

    // Forward group events to this client.
    let forward_group = group.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if sender.send(Message::Text(event.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(group = %forward_group, skipped, "socket client lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Consume incoming messages (pings, close frames) but ignore content.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    // Whichever side finishes first ends the session.
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            let _ = recv_task.await;
        }
        _ = &mut recv_task => {
            send_task.abort();
            let _ = send_task.await;
        }
    }

    hub.prune();
    debug!(group = %group, "socket client left");
}
