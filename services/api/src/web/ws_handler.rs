//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! A connection watches at most one topic at a time: the caller's session list
//! or one session's transcript. Matching store events are pushed as JSON frames.

use crate::{
    error::ApiError,
    web::{
        protocol::{ClientMessage, ServerMessage},
        state::AppState,
    },
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use bookwise_core::events::{Subscription, Topic, UnsubscribeHandle};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// The forwarding task for the connection's current watch.
struct ActiveWatch {
    handle: UnsubscribeHandle,
    task: JoinHandle<()>,
}

impl ActiveWatch {
    async fn stop(self) {
        self.handle.unsubscribe();
        if let Err(e) = self.task.await {
            warn!("Watch task ended abnormally: {:?}", e);
        }
    }
}

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(owner): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, owner))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, owner: Uuid) {
    info!("New WebSocket connection established for user: {}", owner);

    // The sender is wrapped in an Arc<Mutex<>> so the forwarding task can share it.
    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));
    let mut watch: Option<ActiveWatch> = None;

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Err(e) =
                    handle_text_message(text.as_str(), &app_state, owner, &ws_sender, &mut watch)
                        .await
                {
                    error!("Failed to answer client message: {:?}", e);
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!("Client sent close message.");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    // --- Cleanup ---
    if let Some(active) = watch.take() {
        active.stop().await;
    }
    info!("WebSocket connection closed for user: {}", owner);
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(
    text: &str,
    app_state: &Arc<AppState>,
    owner: Uuid,
    ws_sender: &WsSender,
    watch: &mut Option<ActiveWatch>,
) -> Result<(), ApiError> {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            return send(
                ws_sender,
                &ServerMessage::Error {
                    message: format!("Unrecognised message: {}", e),
                },
            )
            .await;
        }
    };

    // Any new request replaces the current watch.
    if let Some(active) = watch.take() {
        active.stop().await;
    }

    match client_msg {
        ClientMessage::WatchSessions => {
            let subscription = app_state.sessions.subscribe(Topic::Owner(owner));
            send(ws_sender, &ServerMessage::Watching { session_id: None }).await?;
            *watch = Some(spawn_forwarder(subscription, ws_sender.clone()));
            debug!(%owner, "Watching session list");
        }
        ClientMessage::WatchSession { session_id } => {
            if let Err(e) = app_state.chat.owned_session(owner, session_id).await {
                warn!(%session_id, %owner, "Refused to watch session: {}", e);
                let (_, message) = <(axum::http::StatusCode, String)>::from(ApiError::from(e));
                return send(ws_sender, &ServerMessage::Error { message }).await;
            }
            let subscription = app_state.sessions.subscribe(Topic::Session(session_id));
            send(
                ws_sender,
                &ServerMessage::Watching {
                    session_id: Some(session_id),
                },
            )
            .await?;
            *watch = Some(spawn_forwarder(subscription, ws_sender.clone()));
            debug!(%session_id, "Watching session transcript");
        }
        ClientMessage::Unwatch => {
            send(ws_sender, &ServerMessage::Unwatched).await?;
        }
    }
    Ok(())
}

/// Pushes every event of `subscription` to the client until it is unsubscribed
/// or the socket stops accepting frames.
fn spawn_forwarder(mut subscription: Subscription, ws_sender: WsSender) -> ActiveWatch {
    let handle = subscription.handle();
    let task = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            if let Err(e) = send(&ws_sender, &ServerMessage::Event { event }).await {
                warn!("Stopped forwarding events: {:?}", e);
                break;
            }
        }
    });
    ActiveWatch { handle, task }
}

async fn send(ws_sender: &WsSender, msg: &ServerMessage) -> Result<(), ApiError> {
    let json = serde_json::to_string(msg).map_err(|e| ApiError::Internal(e.to_string()))?;
    ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await?;
    Ok(())
}
