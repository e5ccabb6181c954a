//! HTTP surface for the running pipeline.
//!
//! This module provides a local HTTP server that:
//! - Reports the latest prediction and its short history via GET /prediction
//! - Reports pipeline counters via GET /stats
//! - Accepts ranging observations from an external beacon collaborator via
//!   POST /proximity and feeds them to the alert gate
//!
//! # Architecture
//!
//! ```text
//! Beacon ranging ──→ POST /proximity ──→ ProximityFeeder ──→ alert gate
//!                                                               ↑
//! Dashboards    ←── GET /prediction ←── SharedPrediction ←── inference
//! ```

use crate::collector::{ProximityEvent, ProximityFeeder, ProximityLevel};
use crate::core::{PredictionRecord, SharedPrediction};
use crate::stats::{SharedStats, StatsSnapshot};
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Threshold used to label predictions
    pub threshold: f64,
}

impl ServerConfig {
    pub fn new(port: u16, threshold: f64) -> Self {
        Self { port, threshold }
    }
}

/// Shared server state
pub struct ServerState {
    prediction: SharedPrediction,
    stats: SharedStats,
    /// Absent when the pipeline runs without an externally fed proximity source
    feeder: Option<ProximityFeeder>,
    threshold: f64,
}

impl ServerState {
    pub fn new(
        config: &ServerConfig,
        prediction: SharedPrediction,
        stats: SharedStats,
        feeder: Option<ProximityFeeder>,
    ) -> Self {
        Self {
            prediction,
            stats,
            feeder,
            threshold: config.threshold,
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Latest prediction plus history
#[derive(Serialize)]
pub struct PredictionResponse {
    /// Probability in [0, 1], null before the first window is scored
    pub score: Option<f64>,
    pub label: String,
    pub history: Vec<PredictionRecord>,
}

/// Ranging observation posted by a beacon collaborator
#[derive(Debug, Deserialize)]
pub struct ProximityRequest {
    pub source_id: Uuid,
    pub proximity: ProximityLevel,
    /// Estimated distance accuracy in meters
    #[serde(default)]
    pub accuracy: Option<f64>,
    pub signal_strength: i32,
}

impl ProximityRequest {
    /// Stamp the observation with its arrival time.
    fn into_event(self) -> ProximityEvent {
        let mut event = ProximityEvent::new(self.source_id, self.proximity, self.signal_strength);
        if let Some(accuracy) = self.accuracy {
            event.accuracy = accuracy;
        }
        event
    }
}

/// Response from the proximity endpoint
#[derive(Serialize)]
pub struct ProximityResponse {
    pub status: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: &str, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /prediction
async fn prediction(State(state): State<Arc<ServerState>>) -> Json<PredictionResponse> {
    let latest = state.prediction.latest();
    Json(PredictionResponse {
        score: latest.value(),
        label: latest.label(state.threshold).to_string(),
        history: state.prediction.history(),
    })
}

/// GET /stats
async fn stats(State(state): State<Arc<ServerState>>) -> Json<StatsSnapshot> {
    Json(state.stats.stats())
}

/// POST /proximity
///
/// Events are stamped with their arrival time.
async fn proximity(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ProximityRequest>,
) -> Result<(StatusCode, Json<ProximityResponse>), ApiError> {
    let feeder = state.feeder.as_ref().ok_or_else(|| {
        api_error(
            StatusCode::NOT_FOUND,
            "Proximity ingest is not enabled",
            "PROXIMITY_DISABLED",
        )
    })?;

    if !feeder.push(request.into_event()) {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Proximity queue is full or closed",
            "QUEUE_UNAVAILABLE",
        ));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(ProximityResponse {
            status: "accepted".to_string(),
        }),
    ))
}

/// Build the router over `state`.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/prediction", get(prediction))
        .route("/stats", get(stats))
        .route("/proximity", post(proximity))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    prediction: SharedPrediction,
    stats: SharedStats,
    feeder: Option<ProximityFeeder>,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new(&config, prediction, stats, feeder));
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Motion alert server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
