//! WebSocket transport for the session topic.

use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};

use crate::hub::{ConnectionId, Hub};
use crate::messages::InboundMessage;
use crate::topic::Frame;
use crate::types::Rejected;

/// Receives every inbound message that passed validation and came from a
/// connection subscribed to its topic.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, connection: ConnectionId, message: InboundMessage) -> Result<(), Rejected>;
}

#[derive(Clone)]
struct ChannelState {
    hub: Arc<Hub>,
    dispatcher: Arc<dyn Dispatch>,
}

/// `GET /ws` upgrades to a channel connection.
pub fn router(hub: Arc<Hub>, dispatcher: Arc<dyn Dispatch>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(ChannelState { hub, dispatcher })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ChannelState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ChannelState) {
    let (connection, mut outbound) = state.hub.connect();
    tracing::info!(%connection, "channel connection opened");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                tracing::debug!("websocket send failed, client gone");
                return;
            }
        }
        // The hub dropped this connection.
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_text(&state.hub, state.dispatcher.as_ref(), connection, text.as_str());
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%connection, "websocket error: {e}");
                break;
            }
        }
    }

    state.hub.disconnect(connection);
    send_task.abort();
    tracing::info!(%connection, "channel connection closed");
}

/// Apply one inbound text frame from `connection`.
pub fn handle_text(hub: &Hub, dispatcher: &dyn Dispatch, connection: ConnectionId, text: &str) {
    let frame = match hub.spec().decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(%connection, "refusing frame: {e}");
            hub.send_error(connection, None, &e.to_string());
            return;
        }
    };

    match frame {
        Frame::Subscribe(topic) => {
            if !hub.subscribe(connection, &topic) {
                hub.send_error(connection, Some(&topic), "subscription refused");
            }
        }
        Frame::Unsubscribe(topic) => {
            hub.unsubscribe(connection, &topic);
        }
        Frame::Message(message) => {
            let topic = message.session.topic();
            if !hub.is_subscribed(connection, &topic) {
                hub.send_error(connection, Some(&topic), "not subscribed to topic");
                return;
            }
            if let Err(Rejected(reason)) = dispatcher.dispatch(connection, message) {
                hub.send_error(connection, Some(&topic), &reason);
            }
        }
    }
}
