use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose;
use base64::Engine as _;
use memkv::Storage;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::sync::Mutex;

#[derive(Clone)]
struct AppState {
    storage: Arc<Mutex<Storage>>,
    metrics_handle: PrometheusHandle,
}

/// Builds the read-only HTTP inspection surface: health, key listing,
/// single-value lookup, and Prometheus metric exposition.
pub fn router(storage: Arc<Mutex<Storage>>, metrics_handle: PrometheusHandle) -> Router {
    let state = AppState { storage, metrics_handle };
    Router::new()
        .route("/api/health", get(health))
        .route("/api/keys", get(list_keys))
        .route("/api/values/:key", get(get_value))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, storage: Arc<Mutex<Storage>>, metrics_handle: PrometheusHandle) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(storage, metrics_handle)).await
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
struct KeysResponse {
    keys: Vec<String>,
}

async fn list_keys(State(state): State<AppState>) -> Json<KeysResponse> {
    let guard = state.storage.lock().await;
    let keys = guard.dump_live().into_iter().map(|(k, _)| String::from_utf8_lossy(k).into_owned()).collect();
    Json(KeysResponse { keys })
}

#[derive(Serialize)]
struct ValueResponse {
    value: String,
    /// `true` when `value` is base64-encoded because the stored bytes
    /// were not valid UTF-8 (an enrichment over the original, which
    /// assumed UTF-8 value bodies; see the design notes on this point).
    base64: bool,
}

async fn get_value(State(state): State<AppState>, Path(key): Path<String>) -> impl IntoResponse {
    let guard = state.storage.lock().await;
    match guard.dump_live().into_iter().find(|(k, _)| k.as_slice() == key.as_bytes()) {
        Some((_, record)) => match std::str::from_utf8(&record.data) {
            Ok(s) => Json(ValueResponse { value: s.to_string(), base64: false }).into_response(),
            Err(_) => {
                let encoded = general_purpose::STANDARD.encode(&record.data);
                Json(ValueResponse { value: encoded, base64: true }).into_response()
            }
        },
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn metrics(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}
