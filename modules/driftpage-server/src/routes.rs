//! HTTP dispatcher: prefetch-first generation, NDJSON streaming, queue
//! administration and diagnostics.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use driftpage_common::doc::normalize_doc;
use driftpage_llm::EngineMode;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::check_api_key;
use crate::ratelimit::Decision;
use crate::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/generate", post(generate))
        .route("/generate/stream", post(generate_stream))
        .route("/prefetch/fill", post(prefetch_fill))
        .route("/prefetch/status", get(prefetch_status))
        .route("/prefetch/previews", get(prefetch_previews))
        .route("/prefetch/take", post(prefetch_take))
        .route("/metrics/total", get(metrics_total))
        .route("/llm/status", get(llm_status))
        .route("/llm/probe", get(llm_probe))
        .route("/validate", post(validate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Request bodies ---

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub brief: String,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct FillRequest {
    #[serde(default)]
    pub brief: String,
    #[serde(default)]
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct TakeRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct PreviewsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub page: serde_json::Value,
}

// --- Shared helpers ---

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

fn rate_headers(decision: &Decision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut set = |name: &'static str, value: String| {
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(name, v);
        }
    };
    set("x-ratelimit-limit", decision.limit.to_string());
    set("x-ratelimit-remaining", decision.remaining.to_string());
    set("x-ratelimit-reset", decision.reset.to_string());
    headers
}

/// Authorize and rate-limit one request. Returns the client key and the
/// rate headers to attach, or the finished 401/429 response.
fn gate(state: &AppState, headers: &HeaderMap, bucket: &str) -> Result<(String, HeaderMap), Response> {
    let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if !check_api_key(&state.config.api_keys, api_key) {
        return Err(error_body(StatusCode::UNAUTHORIZED, "invalid_api_key"));
    }

    let client_key = api_key
        .map(str::to_string)
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "anon".to_string());

    let decision = state.limiter.acquire(bucket, &client_key);
    let mut rl_headers = rate_headers(&decision);
    if !decision.allowed {
        let retry_after = decision.retry_after_seconds();
        if let Ok(v) = HeaderValue::from_str(&retry_after.to_string()) {
            rl_headers.insert(header::RETRY_AFTER, v);
        }
        let body = Json(json!({
            "error": "rate_limited",
            "reset": decision.reset,
            "retry_after_seconds": retry_after,
        }));
        return Err((StatusCode::TOO_MANY_REQUESTS, rl_headers, body).into_response());
    }
    Ok((client_key, rl_headers))
}

fn llm_unconfigured(state: &AppState) -> bool {
    !state.config.has_llm_credentials() && state.engine.mode() == EngineMode::Live
}

fn schedule_topup_if_low(state: &Arc<AppState>) {
    if state.queue.size() <= state.prefetcher.low_water() {
        let prefetcher = state.prefetcher.clone();
        tokio::spawn(async move {
            prefetcher.top_up("", 0).await;
        });
    }
}

fn ndjson_line(value: &serde_json::Value) -> Bytes {
    let mut line = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    line.push('\n');
    Bytes::from(line)
}

// --- Handlers ---

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn generate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<GenerateRequest>,
) -> Response {
    let (client_key, rl_headers) = match gate(&state, &headers, "gen") {
        Ok(ok) => ok,
        Err(denied) => return denied,
    };

    if llm_unconfigured(&state) {
        return error_body(StatusCode::SERVICE_UNAVAILABLE, "LLM not configured");
    }

    // Prefetch first: serve a reviewed document immediately.
    if let Some(doc) = state.queue.dequeue().await {
        if state.config.prefetch_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(state.config.prefetch_delay_ms)).await;
        }
        state.counter.increment(1);
        schedule_topup_if_low(&state);
        return (StatusCode::OK, rl_headers, Json(doc)).into_response();
    }

    // Miss: live burst, first document wins.
    let mut stream = state
        .engine
        .generate_burst(&req.brief, req.seed, &client_key);
    match stream.next().await {
        Some(doc) => {
            state.counter.increment(1);
            (StatusCode::OK, rl_headers, Json(doc)).into_response()
        }
        None => (
            StatusCode::OK,
            rl_headers,
            Json(json!({"error": "No pages generated"})),
        )
            .into_response(),
    }
}

async fn generate_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<GenerateRequest>,
) -> Response {
    let (client_key, rl_headers) = match gate(&state, &headers, "gen") {
        Ok(ok) => ok,
        Err(denied) => return denied,
    };

    if llm_unconfigured(&state) {
        return error_body(StatusCode::SERVICE_UNAVAILABLE, "LLM not configured");
    }

    let request_id = uuid::Uuid::new_v4().to_string();
    let stream_state = state.clone();

    let body = async_stream::stream! {
        yield Ok::<Bytes, Infallible>(ndjson_line(&json!({
            "event": "meta",
            "request_id": request_id,
        })));

        if let Some(doc) = stream_state.queue.dequeue().await {
            stream_state.counter.increment(1);
            schedule_topup_if_low(&stream_state);
            yield Ok(ndjson_line(&json!({"event": "page", "data": doc})));
            return;
        }

        let mut burst = stream_state
            .engine
            .generate_burst(&req.brief, req.seed, &client_key);
        match burst.next().await {
            Some(first) => {
                stream_state.counter.increment(1);
                yield Ok(ndjson_line(&json!({"event": "page", "data": first})));

                // One artifact per request: spares are queued for later with
                // review deferred to the background worker.
                let mut spare_ids = Vec::new();
                while let Some(spare) = burst.next().await {
                    if let Some(id) = stream_state.queue.enqueue(&spare) {
                        spare_ids.push(id);
                    }
                }
                if !spare_ids.is_empty() {
                    info!(count = spare_ids.len(), "Enqueued spare burst documents");
                    stream_state.prefetcher.schedule_review(spare_ids);
                }
            }
            None => {
                yield Ok(ndjson_line(&json!({
                    "event": "error",
                    "data": {"error": "No pages generated"},
                })));
            }
        }
    };

    let mut response = Response::new(Body::from_stream(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson"),
    );
    response.headers_mut().extend(rl_headers);
    response
}

async fn prefetch_fill(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<FillRequest>,
) -> Response {
    let (client_key, rl_headers) = match gate(&state, &headers, "fill") {
        Ok(ok) => ok,
        Err(denied) => return denied,
    };

    // Fill is LLM-only; offline generation is not allowed to pad the queue.
    if !state.config.has_llm_credentials() {
        return error_body(StatusCode::SERVICE_UNAVAILABLE, "LLM not configured");
    }

    let requested = driftpage_prefetch::clamp_batch(
        req.count,
        state.config.prefetch_batch_min,
        state.config.prefetch_batch_max,
    );

    let mut added = 0usize;
    let mut new_ids = Vec::new();
    for _ in 0..requested {
        let mut stream = state.engine.generate_burst(&req.brief, None, &client_key);
        match stream.next().await {
            Some(doc) => {
                if let Some(id) = state.queue.enqueue(&doc) {
                    added += 1;
                    new_ids.push(id);
                }
            }
            None => break,
        }
    }
    state.prefetcher.schedule_review(new_ids);

    (
        StatusCode::OK,
        rl_headers,
        Json(json!({
            "requested": requested,
            "added": added,
            "queue_size": state.queue.size(),
        })),
    )
        .into_response()
}

async fn prefetch_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "size": state.queue.size(),
        "dir": state.queue.dir().to_string_lossy(),
    }))
}

async fn prefetch_previews(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PreviewsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(10).min(50);
    Json(state.queue.peek(limit))
}

async fn prefetch_take(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TakeRequest>,
) -> Response {
    match state.queue.take(&req.token).await {
        Some(doc) => {
            state.counter.increment(1);
            Json(doc).into_response()
        }
        None => error_body(StatusCode::NOT_FOUND, "not_found"),
    }
}

async fn metrics_total(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({"total": state.counter.total()}))
}

async fn llm_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.engine.status();
    Json(json!({
        "provider": status.provider,
        "has_token": status.has_token,
        "burst": status.burst,
        "review": status.review,
        "providers": status.providers,
        "offline": state.engine.mode() == EngineMode::Stub,
    }))
}

async fn llm_probe(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.engine.status();
    Json(json!({
        "provider": status.provider,
        "has_token": status.has_token,
        "queue_size": state.queue.size(),
        "checked_at": driftpage_common::epoch_seconds(),
    }))
}

async fn validate(Json(req): Json<ValidateRequest>) -> Response {
    match normalize_doc(&req.page) {
        Ok(_) => Json(json!({"detail": {"valid": true}})).into_response(),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"detail": {"valid": false, "errors": [e.to_string()]}})),
        )
            .into_response(),
    }
}
