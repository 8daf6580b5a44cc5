//! HTTP surface: one prediction route per churn model plus health checks

use crate::artifacts::TrainedArtifacts;
use crate::classifier::ChurnModelKind;
use crate::error::PipelineError;
use crate::pipeline::{self, Prediction};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared, read-only request state.
#[derive(Clone)]
pub struct AppState {
    artifacts: Arc<TrainedArtifacts>,
    readiness: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(artifacts: Arc<TrainedArtifacts>) -> Self {
        Self {
            artifacts,
            readiness: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mark_ready(&self) {
        self.readiness.store(true, Ordering::Release);
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route(
            "/api/v1/predict/logistic-regression",
            post(predict_logistic),
        )
        .route("/api/v1/predict/random-forest", post(predict_random_forest))
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
///
/// Artifacts are loaded by the caller, so a broken model directory never
/// reaches the listener.
pub async fn run(artifacts: Arc<TrainedArtifacts>, addr: SocketAddr) -> crate::Result<()> {
    let state = AppState::new(artifacts);
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    state.mark_ready();
    info!(
        %addr,
        segments = state.artifacts.manifest().n_segments,
        "churn prediction service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Acquire);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn predict_logistic(
    State(state): State<AppState>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<Prediction>, PipelineError> {
    predict(&state, body, ChurnModelKind::Logistic)
}

async fn predict_random_forest(
    State(state): State<AppState>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<Prediction>, PipelineError> {
    predict(&state, body, ChurnModelKind::RandomForest)
}

/// Unreadable bodies and missing or ill-typed fields all surface as
/// [`PipelineError::SchemaMismatch`].
fn predict(
    state: &AppState,
    body: Result<Json<serde_json::Value>, JsonRejection>,
    kind: ChurnModelKind,
) -> Result<Json<Prediction>, PipelineError> {
    let Json(value) = body.map_err(|rejection| {
        PipelineError::SchemaMismatch(format!(
            "unreadable request body: {}",
            rejection.body_text()
        ))
    })?;
    pipeline::run_json(&state.artifacts, value, kind).map(Json)
}
