//! HTTP API over a shared engine.
//!
//! Mutation endpoints answer `{"status":"success"}` or an error document.
//! An unknown metric is a 404, any other per-call failure a 400. A failed
//! push is reported as 202 Accepted: the metrics are intact, only delivery
//! failed.

use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::LabelSet;

/// Body of `increment` and `decrement`.
#[derive(Debug, Deserialize)]
pub struct MetricRequest {
    pub name: String,
    #[serde(default)]
    pub labels: LabelSet,
}

/// Body of `add` and `set`.
#[derive(Debug, Deserialize)]
pub struct ValueRequest {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub labels: LabelSet,
}

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub gateway_url: String,
    pub job_name: String,
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::UnknownMetric(_) => StatusCode::NOT_FOUND,
            e if e.is_recoverable() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "status": "error", "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult = std::result::Result<Json<Value>, ApiError>;

fn success() -> Json<Value> {
    Json(json!({ "status": "success" }))
}

/// Build the router. Routes:
///
/// - `GET /metrics`: populated instance identifiers
/// - `GET /metrics/debug`: registered metrics with kinds and instance counts
/// - `GET /metrics/export`: backend snapshot in its native format
/// - `POST /metrics/{increment,decrement,add,set}`
/// - `POST /metrics/push`
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/metrics", get(list_instances))
        .route("/metrics/debug", get(describe))
        .route("/metrics/export", get(export))
        .route("/metrics/increment", post(increment))
        .route("/metrics/decrement", post(decrement))
        .route("/metrics/add", post(add))
        .route("/metrics/set", post(set))
        .route("/metrics/push", post(push))
        .with_state(engine)
}

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn serve<F>(engine: Arc<Engine>, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP service listening");
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn list_instances(State(engine): State<Arc<Engine>>) -> Json<Value> {
    let instances = engine.list_instances();
    Json(json!({ "count": instances.len(), "instances": instances }))
}

async fn describe(State(engine): State<Arc<Engine>>) -> Json<Value> {
    Json(json!({ "metrics": engine.describe() }))
}

async fn export(State(engine): State<Arc<Engine>>) -> std::result::Result<Response, ApiError> {
    let snapshot = engine.export()?;
    Ok(([(CONTENT_TYPE, snapshot.content_type)], snapshot.body).into_response())
}

async fn increment(State(engine): State<Arc<Engine>>, Json(req): Json<MetricRequest>) -> ApiResult {
    engine.increment(&req.name, &req.labels)?;
    Ok(success())
}

async fn decrement(State(engine): State<Arc<Engine>>, Json(req): Json<MetricRequest>) -> ApiResult {
    engine.decrement(&req.name, &req.labels)?;
    Ok(success())
}

async fn add(State(engine): State<Arc<Engine>>, Json(req): Json<ValueRequest>) -> ApiResult {
    engine.add(&req.name, req.value, &req.labels)?;
    Ok(success())
}

async fn set(State(engine): State<Arc<Engine>>, Json(req): Json<ValueRequest>) -> ApiResult {
    engine.set(&req.name, req.value, &req.labels)?;
    Ok(success())
}

async fn push(State(engine): State<Arc<Engine>>, Json(req): Json<PushRequest>) -> Response {
    match engine.push(&req.gateway_url, &req.job_name).await {
        Ok(()) => success().into_response(),
        Err(e) => {
            warn!(error = %e, "push requested over HTTP failed");
            (
                StatusCode::ACCEPTED,
                Json(json!({
                    "status": "accepted",
                    "message": "metrics collected but push failed",
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}
