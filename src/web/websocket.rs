use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::dashboard::{apply_selection, SelectionRequest};
use crate::market::{DashboardSnapshot, DashboardState};
use crate::ml::{ModelStatus, PredictionEngine};
use crate::predictor::{PredictorState, PredictorView};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Predict { input: String },
    Select(SelectionRequest),
    Status,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ModelStatus { status: ModelStatus },
    Prediction { view: PredictorView },
    Dashboard { snapshot: Box<DashboardSnapshot> },
    Error { message: String },
}

/// What a connection needs to answer client messages.
#[derive(Clone)]
pub struct SessionContext {
    pub engine: Arc<PredictionEngine>,
    pub dashboard: Arc<RwLock<DashboardState>>,
}

#[derive(Debug, Clone)]
struct ConnectionInfo {
    connected_at: chrono::DateTime<chrono::Utc>,
}

pub struct WebSocketHandler {
    connections: Arc<RwLock<HashMap<String, ConnectionInfo>>>,
    broadcast_tx: broadcast::Sender<String>,
}

impl Default for WebSocketHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketHandler {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1000);

        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            broadcast_tx,
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    async fn register(&self) -> String {
        let connection_id = Uuid::new_v4().to_string();
        let info = ConnectionInfo {
            connected_at: chrono::Utc::now(),
        };
        self.connections
            .write()
            .await
            .insert(connection_id.clone(), info);
        connection_id
    }

    async fn unregister(&self, connection_id: &str) {
        if let Some(info) = self.connections.write().await.remove(connection_id) {
            let open_for = chrono::Utc::now() - info.connected_at;
            info!(
                "WebSocket connection {} closed after {}s",
                connection_id,
                open_for.num_seconds()
            );
        }
    }

    /// Each connection owns its own predictor form state.
    pub async fn handle_connection(&self, socket: WebSocket, ctx: SessionContext) {
        let connection_id = self.register().await;
        info!("New WebSocket connection: {}", connection_id);

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let mut broadcast_rx = self.broadcast_tx.subscribe();
        let (mut sender, mut receiver) = socket.split();

        let connection_id_clone = connection_id.clone();

        let recv_task = tokio::spawn(async move {
            let mut predictor = PredictorState::new();

            while let Some(msg) = receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        debug!("Received message from {}: {}", connection_id_clone, text);
                        let reply = handle_client_message(&text, &ctx, &mut predictor).await;
                        match serde_json::to_string(&reply) {
                            Ok(json) => {
                                if tx.send(json).is_err() {
                                    break;
                                }
                            }
                            Err(e) => error!("Failed to encode reply: {}", e),
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("Close frame from {}", connection_id_clone);
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        let send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok(msg) = broadcast_rx.recv() => {
                        if sender.send(Message::Text(msg)).await.is_err() {
                            break;
                        }
                    }
                    Some(msg) = rx.recv() => {
                        if sender.send(Message::Text(msg)).await.is_err() {
                            break;
                        }
                    }
                    else => break,
                }
            }
        });

        join_first(recv_task, send_task).await;
        self.unregister(&connection_id).await;
    }

    pub async fn broadcast(&self, message: String) {
        // Nobody listening is not an error.
        if self.broadcast_tx.send(message).is_err() {
            debug!("No WebSocket subscribers for broadcast");
        }
    }
}

/// Waits for either task to finish, then aborts the other and waits for it
/// to wind down.
async fn join_first<A, B>(mut first: JoinHandle<A>, mut second: JoinHandle<B>) {
    tokio::select! {
        _ = &mut first => {
            second.abort();
            let _ = second.await;
        }
        _ = &mut second => {
            first.abort();
            let _ = first.await;
        }
    }
}

pub async fn handle_client_message(
    message: &str,
    ctx: &SessionContext,
    predictor: &mut PredictorState,
) -> ServerMessage {
    let request: ClientMessage = match serde_json::from_str(message) {
        Ok(request) => request,
        Err(e) => {
            debug!("Unknown message: {}", message);
            return ServerMessage::Error {
                message: format!("Unrecognised message: {}", e),
            };
        }
    };

    match request {
        ClientMessage::Predict { input } => {
            predictor.set_input(input);
            predictor.submit(&ctx.engine).await;
            ServerMessage::Prediction {
                view: predictor.render(!ctx.engine.is_ready()),
            }
        }
        ClientMessage::Select(selection) => match apply_selection(&ctx.dashboard, &selection).await {
            Ok(snapshot) => ServerMessage::Dashboard {
                snapshot: Box::new(snapshot),
            },
            Err(e) => ServerMessage::Error {
                message: e.to_string(),
            },
        },
        ClientMessage::Status => ServerMessage::ModelStatus {
            status: ctx.engine.status().await,
        },
    }
}
