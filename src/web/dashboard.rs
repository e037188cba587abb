use anyhow::Result;
use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use super::websocket::{ServerMessage, SessionContext, WebSocketHandler};
use crate::error::{DashboardError, PredictError};
use crate::market::dashboard::{check_prediction_days, find_stock};
use crate::market::{selection_options, DashboardSnapshot, DashboardState};
use crate::ml::PredictionEngine;
use crate::predictor::{format_currency, PredictionWindow};

#[derive(Clone)]
pub struct DashboardServer {
    engine: Arc<PredictionEngine>,
    dashboard_state: Arc<RwLock<DashboardState>>,
    websocket_handler: Arc<WebSocketHandler>,
    static_dir: PathBuf,
    metrics_handle: Option<PrometheusHandle>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectionRequest {
    pub symbol: Option<String>,
    pub prediction_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PredictRequest {
    pub input: Option<String>,
    pub values: Option<Vec<f64>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: f64,
    pub formatted: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
    detail: String,
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let status = match &self {
            PredictError::Validation { .. } | PredictError::NonFinite { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            PredictError::ModelNotReady | PredictError::ModelLoad(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PredictError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.user_message(),
            kind: self.kind(),
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            kind: "selection",
            detail: self.to_string(),
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

/// Validates the whole selection before touching the state.
pub async fn apply_selection(
    dashboard: &RwLock<DashboardState>,
    request: &SelectionRequest,
) -> Result<DashboardSnapshot, DashboardError> {
    if let Some(symbol) = &request.symbol {
        find_stock(symbol)?;
    }
    if let Some(days) = request.prediction_days {
        check_prediction_days(days)?;
    }

    let today = chrono::Utc::now().date_naive();
    let mut rng = StdRng::from_entropy();
    let mut state = dashboard.write().await;

    if let Some(days) = request.prediction_days {
        state.set_prediction_days(days, today, &mut rng)?;
    }
    if let Some(symbol) = &request.symbol {
        state.select_symbol(symbol, today, &mut rng)?;
    }
    if request.symbol.is_none() && request.prediction_days.is_none() {
        state.regenerate(today, &mut rng);
    }

    Ok(state.snapshot())
}

impl DashboardServer {
    pub fn new(
        engine: Arc<PredictionEngine>,
        dashboard_state: DashboardState,
        static_dir: impl Into<PathBuf>,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            engine,
            dashboard_state: Arc::new(RwLock::new(dashboard_state)),
            websocket_handler: Arc::new(WebSocketHandler::new()),
            static_dir: static_dir.into(),
            metrics_handle,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(serve_dashboard))
            .route("/predictor", get(serve_predictor))
            .route("/api/health", get(get_health))
            .route("/api/dashboard", get(get_dashboard))
            .route("/api/dashboard/selection", post(post_selection))
            .route("/api/stocks", get(get_stock_options))
            .route("/api/predict", post(post_predict))
            .route("/api/model", get(get_model_status))
            .route("/api/model/reload", post(post_model_reload))
            .route("/metrics", get(get_metrics))
            .route("/ws", get(websocket_handler))
            .fallback_service(ServeDir::new(&self.static_dir))
            .with_state(self.clone())
    }

    pub async fn start(&self, host: &str, port: u16) -> Result<()> {
        let listener = TcpListener::bind(format!("{}:{}", host, port)).await?;
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!("Starting stock forecast dashboard on {}", addr);

        let forwarder = self.clone();
        tokio::spawn(async move {
            forwarder.forward_model_status().await;
        });

        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Pushes every model state change to all WebSocket clients.
    async fn forward_model_status(&self) {
        let mut states = self.engine.subscribe();
        loop {
            match states.recv().await {
                Ok(state) => {
                    info!("Model state changed: {:?}", state);
                    let message = ServerMessage::ModelStatus {
                        status: self.engine.status().await,
                    };
                    match serde_json::to_string(&message) {
                        Ok(json) => self.websocket_handler.broadcast(json).await,
                        Err(e) => warn!("Failed to encode model status: {}", e),
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Missed {} model status updates", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn session(&self) -> SessionContext {
        SessionContext {
            engine: self.engine.clone(),
            dashboard: self.dashboard_state.clone(),
        }
    }
}

// API Handlers
async fn serve_dashboard() -> Html<&'static str> {
    Html(include_str!("../../static/dashboard.html"))
}

async fn serve_predictor() -> Html<&'static str> {
    Html(include_str!("../../static/predictor.html"))
}

async fn get_health(State(server): State<DashboardServer>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "model_ready": server.engine.is_ready(),
        "websocket_connections": server.websocket_handler.connection_count().await,
    }))
}

async fn get_dashboard(State(server): State<DashboardServer>) -> impl IntoResponse {
    let state = server.dashboard_state.read().await;
    Json(state.snapshot())
}

async fn post_selection(
    State(server): State<DashboardServer>,
    Json(request): Json<SelectionRequest>,
) -> Result<Json<DashboardSnapshot>, DashboardError> {
    let snapshot = apply_selection(&server.dashboard_state, &request).await?;
    Ok(Json(snapshot))
}

async fn get_stock_options() -> impl IntoResponse {
    Json(selection_options())
}

async fn post_predict(
    State(server): State<DashboardServer>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, PredictError> {
    server.engine.ensure_available().await?;

    let window = match request.values {
        Some(values) => PredictionWindow::try_from(values)?,
        None => PredictionWindow::try_from(request.input.as_deref().unwrap_or_default())?,
    };
    let prediction = server.engine.predict(window).await?;

    Ok(Json(PredictResponse {
        prediction,
        formatted: format_currency(prediction),
    }))
}

async fn get_model_status(State(server): State<DashboardServer>) -> impl IntoResponse {
    Json(server.engine.status().await)
}

async fn post_model_reload(State(server): State<DashboardServer>) -> Response {
    match server.engine.reload().await {
        Ok(()) => Json(server.engine.status().await).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_metrics(State(server): State<DashboardServer>) -> Response {
    match &server.metrics_handle {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed").into_response(),
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(server): State<DashboardServer>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let ctx = server.session();
        server.websocket_handler.handle_connection(socket, ctx).await;
    })
}
