//! WebSocket server for real-time reservation updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use crate::lifecycle::ReservationStatus;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::UserRole;

/// A reservation status change, as pushed to clients
#[derive(Debug, Clone, Serialize)]
pub struct ReservationEvent {
    pub reservation_id: Uuid,
    pub customer_id: Uuid,
    pub from: ReservationStatus,
    pub to: ReservationStatus,
    pub event: &'static str,
    pub at: DateTime<Utc>,
}

/// WebSocket server state
#[derive(Clone)]
pub struct WsState {
    pub tx: broadcast::Sender<ReservationEvent>,
    pub clients: Arc<RwLock<HashMap<Uuid, ClientInfo>>>,
}

/// Client connection information
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub user_id: Uuid,
    pub role: UserRole,
    /// Empty means every reservation the client may see
    pub subscribed_reservations: Vec<Uuid>,
}

impl ClientInfo {
    fn wants(&self, event: &ReservationEvent) -> bool {
        let visible = self.role == UserRole::Admin || self.user_id == event.customer_id;
        visible
            && (self.subscribed_reservations.is_empty()
                || self.subscribed_reservations.contains(&event.reservation_id))
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    Subscribe { reservation_ids: Vec<Uuid> },
    Unsubscribe { reservation_ids: Vec<Uuid> },
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerMessage {
    Event { event: ReservationEvent },
    Subscribed { reservation_ids: Vec<Uuid> },
    Unsubscribed { reservation_ids: Vec<Uuid> },
    Pong,
}

impl Default for WsState {
    fn default() -> Self {
        Self::new()
    }
}

impl WsState {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            tx,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Broadcast to connected clients. Having no listeners is not an error.
    pub fn broadcast_event(&self, event: ReservationEvent) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        if let Err(e) = self.tx.send(event) {
            tracing::debug!("No websocket listeners for event: {}", e);
        }
    }

    async fn register_client(&self, client_id: Uuid, user: &AuthenticatedUser) {
        self.clients.write().await.insert(
            client_id,
            ClientInfo {
                user_id: user.user_id,
                role: user.role,
                subscribed_reservations: vec![],
            },
        );
    }

    async fn unregister_client(&self, client_id: Uuid) {
        self.clients.write().await.remove(&client_id);
        tracing::info!(client_id = %client_id, "WebSocket client disconnected");
    }

    async fn update_subscriptions(&self, client_id: Uuid, update: impl FnOnce(&mut Vec<Uuid>)) {
        if let Some(client) = self.clients.write().await.get_mut(&client_id) {
            update(&mut client.subscribed_reservations);
        }
    }
}

/// GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    user: AuthenticatedUser,
    State(state): State<WsState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: WsState, user: AuthenticatedUser) {
    let client_id = Uuid::new_v4();
    state.register_client(client_id, &user).await;
    tracing::info!(client_id = %client_id, user_id = %user.user_id, "WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();
    let (internal_tx, mut internal_rx) = mpsc::channel::<ServerMessage>(32);
    let mut rx = state.tx.subscribe();

    let send_state = state.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => {
                        let clients = send_state.clients.read().await;
                        match clients.get(&client_id) {
                            Some(client) if client.wants(&event) => ServerMessage::Event { event },
                            _ => continue,
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(client_id = %client_id, skipped, "WebSocket client lagging");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(msg) = internal_rx.recv() => msg,
                else => break,
            };

            if let Ok(text) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) else {
                continue;
            };
            let response = match client_msg {
                ClientMessage::Subscribe { reservation_ids } => {
                    let ids = reservation_ids.clone();
                    recv_state
                        .update_subscriptions(client_id, move |subs| *subs = ids)
                        .await;
                    ServerMessage::Subscribed { reservation_ids }
                }
                ClientMessage::Unsubscribe { reservation_ids } => {
                    let ids = reservation_ids.clone();
                    recv_state
                        .update_subscriptions(client_id, move |subs| {
                            subs.retain(|id| !ids.contains(id))
                        })
                        .await;
                    ServerMessage::Unsubscribed { reservation_ids }
                }
                ClientMessage::Ping => ServerMessage::Pong,
            };
            if internal_tx.send(response).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.unregister_client(client_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(customer_id: Uuid, reservation_id: Uuid) -> ReservationEvent {
        ReservationEvent {
            reservation_id,
            customer_id,
            from: ReservationStatus::PaymentPending,
            to: ReservationStatus::Paid,
            event: "payment_succeeded",
            at: Utc::now(),
        }
    }

    #[test]
    fn test_customers_only_see_their_reservations() {
        let me = Uuid::new_v4();
        let client = ClientInfo {
            user_id: me,
            role: UserRole::User,
            subscribed_reservations: vec![],
        };
        assert!(client.wants(&event(me, Uuid::new_v4())));
        assert!(!client.wants(&event(Uuid::new_v4(), Uuid::new_v4())));
    }

    #[test]
    fn test_subscription_narrows_admin_feed() {
        let watched = Uuid::new_v4();
        let admin = ClientInfo {
            user_id: Uuid::new_v4(),
            role: UserRole::Admin,
            subscribed_reservations: vec![watched],
        };
        assert!(admin.wants(&event(Uuid::new_v4(), watched)));
        assert!(!admin.wants(&event(Uuid::new_v4(), Uuid::new_v4())));
    }

    #[tokio::test]
    async fn test_broadcast_without_listeners_is_silent() {
        let state = WsState::new();
        state.broadcast_event(event(Uuid::new_v4(), Uuid::new_v4()));

        let mut rx = state.tx.subscribe();
        state.broadcast_event(event(Uuid::new_v4(), Uuid::new_v4()));
        assert!(rx.try_recv().is_ok());
    }
}
