use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pdf_rag_core::{IngestJob, IngestionQueue, QueryError, QueryService};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state handed to every route handler. All resources are built once
/// at startup and injected; handlers never construct their own.
#[derive(Clone)]
pub struct AppState {
    pub query: Arc<QueryService>,
    pub queue: IngestionQueue,
    pub data_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/query", post(query))
        .route("/documents/{name}", post(upload))
        .with_state(state)
}

pub async fn serve(listen: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, "http server listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query_text: String,
}

/// Streams the answer as `text/plain`. Rejections are JSON with a status
/// distinct from both an empty answer (200) and "not ready" (503).
async fn query(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Response {
    let client_id = client_identity(&headers, addr);

    match state
        .query
        .stream_answer(&client_id, &request.query_text)
        .await
    {
        Ok(fragments) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            Body::from_stream(fragments),
        )
            .into_response(),
        Err(rejection) => query_rejection(rejection),
    }
}

fn query_rejection(rejection: QueryError) -> Response {
    let status = match &rejection {
        QueryError::AlreadyActive(_) => StatusCode::TOO_MANY_REQUESTS,
        QueryError::IndexUninitialized => StatusCode::SERVICE_UNAVAILABLE,
        QueryError::EmptyQuestion => StatusCode::BAD_REQUEST,
        QueryError::GenerationUnreachable(_) => StatusCode::BAD_GATEWAY,
        QueryError::Streaming(_) | QueryError::Index(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(status = %status, error = %rejection, "query rejected");
    (status, Json(json!({ "error": rejection.to_string() }))).into_response()
}

/// Stores the uploaded PDF in the data directory and enqueues an ingestion
/// run. Returns 202: acceptance says nothing about the run's outcome.
async fn upload(State(state): State<AppState>, Path(name): Path<String>, body: Bytes) -> Response {
    if let Err(reason) = validate_document_name(&name) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": reason }))).into_response();
    }

    if let Err(io_error) = tokio::fs::create_dir_all(&state.data_dir).await {
        return storage_failure(&name, &io_error.to_string());
    }
    if let Err(io_error) = tokio::fs::write(state.data_dir.join(&name), &body).await {
        return storage_failure(&name, &io_error.to_string());
    }

    match state.queue.submit(IngestJob::new(format!("upload:{name}"))) {
        Ok(()) => {
            info!(document = %name, bytes = body.len(), "document stored, ingestion queued");
            (
                StatusCode::ACCEPTED,
                Json(json!({ "status": "queued", "document": name })),
            )
                .into_response()
        }
        Err(rejected) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": rejected.to_string() })),
        )
            .into_response(),
    }
}

fn storage_failure(name: &str, reason: &str) -> Response {
    warn!(document = %name, reason = %reason, "failed to store uploaded document");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("failed to store document: {reason}") })),
    )
        .into_response()
}

fn validate_document_name(name: &str) -> Result<(), String> {
    if !name.to_ascii_lowercase().ends_with(".pdf") {
        return Err("only .pdf documents are accepted".to_string());
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err("document name must be a bare file name".to_string());
    }
    Ok(())
}

/// Client identity for the per-client query gate: the first hop of
/// `x-forwarded-for` when present, otherwise the connection's address.
fn client_identity(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| addr.ip().to_string())
}
