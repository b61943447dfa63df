//! In-process mock of an OpenAI-compatible inference server for integration tests.
//! Behaviour is switched per test through [`Mock`]; every request is recorded as "METHOD /path".

#![allow(dead_code)]

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether::config::ServerEndpoint;
use tether::llm::{ApiClient, ClientSettings};
use tether::state::ModelState;

#[derive(Default)]
pub struct Mock {
    /// Entries returned under `data` by GET /v1/models.
    pub models: Mutex<Vec<Value>>,
    /// GET /v1/models answers 500.
    pub models_fail: AtomicBool,
    /// POST /v1/internal/model/load answers 200 (and loads the model) instead of 404.
    pub direct_load_ok: AtomicBool,
    /// POST /v1/internal/model/unload answers 200 instead of 404.
    pub unload_ok: AtomicBool,
    /// POST /v1/models/{id}/unload answers 200 instead of 404.
    pub unload_by_id_ok: AtomicBool,
    /// Model named by GET /v1/internal/model/info; 404 when unset.
    pub info_model: Mutex<Option<String>>,
    /// POST /v1/chat/completions answers 503.
    pub completions_fail: AtomicBool,
    /// Completions answer 200 with an empty `choices` array.
    pub completions_empty: AtomicBool,
    /// `model` field of completion responses; defaults to the loaded model.
    pub completion_model: Mutex<Option<String>>,
    pub completion_delay_ms: AtomicU64,
    /// Stream events separated by `\r\n\r\n` instead of `\n\n`.
    pub stream_crlf: AtomicBool,
    /// GET /v1/internal/model/info sleeps this long before answering.
    pub info_delay_ms: AtomicU64,
    /// Model named by GET /v1/model/info; 404 when unset.
    pub alt_info_model: Mutex<Option<String>>,
    /// What the server has in memory.
    pub loaded: Mutex<Option<String>>,
    pub hits: Mutex<Vec<String>>,
}

impl Mock {
    pub fn with_models(ids: &[&str]) -> Arc<Self> {
        let mock = Self::default();
        *mock.models.lock().unwrap() = ids
            .iter()
            .map(|id| json!({ "id": id, "object": "model" }))
            .collect();
        Arc::new(mock)
    }

    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }

    pub fn count(&self, hit: &str) -> usize {
        self.hits.lock().unwrap().iter().filter(|h| *h == hit).count()
    }

    /// Index of the last recorded `hit`, if any.
    pub fn last_index(&self, hit: &str) -> Option<usize> {
        self.hits.lock().unwrap().iter().rposition(|h| h == hit)
    }

    pub fn loaded(&self) -> Option<String> {
        self.loaded.lock().unwrap().clone()
    }
}

async fn record(State(mock): State<Arc<Mock>>, req: Request, next: Next) -> Response {
    mock.hits
        .lock()
        .unwrap()
        .push(format!("{} {}", req.method(), req.uri().path()));
    next.run(req).await
}

async fn list_models(State(mock): State<Arc<Mock>>) -> Response {
    if mock.models_fail.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    let data = mock.models.lock().unwrap().clone();
    Json(json!({ "object": "list", "data": data })).into_response()
}

async fn chat_completions(State(mock): State<Arc<Mock>>, Json(body): Json<Value>) -> Response {
    let delay = mock.completion_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if mock.completions_fail.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "no model").into_response();
    }
    if let Some(requested) = body.get("model").and_then(Value::as_str) {
        *mock.loaded.lock().unwrap() = Some(requested.to_string());
    }
    let model = mock
        .completion_model
        .lock()
        .unwrap()
        .clone()
        .or_else(|| mock.loaded())
        .unwrap_or_else(|| "unknown".to_string());

    if body.get("stream").and_then(Value::as_bool) == Some(true) {
        let eol = if mock.stream_crlf.load(Ordering::SeqCst) {
            "\r\n"
        } else {
            "\n"
        };
        let mut sse = String::new();
        for piece in ["Hel", "lo", "!"] {
            let chunk = json!({ "model": model, "choices": [{ "index": 0, "delta": { "content": piece } }] });
            sse.push_str(&format!("data: {}{eol}{eol}", chunk));
        }
        sse.push_str(&format!("data: [DONE]{eol}{eol}"));
        return ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response();
    }

    let choices = if mock.completions_empty.load(Ordering::SeqCst) {
        json!([])
    } else {
        json!([{ "index": 0, "message": { "role": "assistant", "content": "ok" }, "finish_reason": "stop" }])
    };
    Json(json!({ "object": "chat.completion", "model": model, "choices": choices })).into_response()
}

async fn internal_load(State(mock): State<Arc<Mock>>, Json(body): Json<Value>) -> StatusCode {
    if !mock.direct_load_ok.load(Ordering::SeqCst) {
        return StatusCode::NOT_FOUND;
    }
    let id = body.get("model_name").and_then(Value::as_str).map(str::to_string);
    *mock.loaded.lock().unwrap() = id;
    StatusCode::OK
}

async fn internal_unload(State(mock): State<Arc<Mock>>) -> StatusCode {
    if !mock.unload_ok.load(Ordering::SeqCst) {
        return StatusCode::NOT_FOUND;
    }
    *mock.loaded.lock().unwrap() = None;
    StatusCode::OK
}

async fn unload_by_id(
    State(mock): State<Arc<Mock>>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> StatusCode {
    if !mock.unload_by_id_ok.load(Ordering::SeqCst) || mock.loaded().as_deref() != Some(id.as_str()) {
        return StatusCode::NOT_FOUND;
    }
    *mock.loaded.lock().unwrap() = None;
    StatusCode::OK
}

async fn internal_info(State(mock): State<Arc<Mock>>) -> Response {
    let delay = mock.info_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    match mock.info_model.lock().unwrap().clone() {
        Some(name) => Json(json!({ "model_name": name, "lora_names": [] })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn model_info(State(mock): State<Arc<Mock>>) -> Response {
    match mock.alt_info_model.lock().unwrap().clone() {
        Some(name) => Json(json!({ "model": name })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Serve `mock` on a free loopback port; returns the endpoint. The server task is left
/// running when the test ends.
pub async fn serve(mock: Arc<Mock>) -> ServerEndpoint {
    let app = Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/internal/model/load", post(internal_load))
        .route("/v1/internal/model/unload", post(internal_unload))
        .route("/v1/internal/model/info", get(internal_info))
        .route("/v1/model/info", get(model_info))
        .route("/v1/models/:id/unload", post(unload_by_id))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(mock.clone(), record))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let port = listener.local_addr().expect("local_addr").port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    ServerEndpoint::new("127.0.0.1", port)
}

/// Short timeouts and a fast verification loop so failure paths finish quickly.
pub fn fast_settings() -> ClientSettings {
    ClientSettings {
        models_timeout: Duration::from_secs(2),
        probe_timeout: Duration::from_secs(1),
        verify_timeout: Duration::from_secs(2),
        load_timeout: Duration::from_secs(2),
        unload_timeout: Duration::from_secs(2),
        force_load_timeout: Duration::from_secs(5),
        chat_timeout: Duration::from_secs(5),
        verify_attempts: 2,
        verify_backoff: Duration::from_millis(10),
        force_load_prompt: "Reply with OK.".to_string(),
    }
}

pub fn client(endpoint: &ServerEndpoint, cached: Option<&str>) -> ApiClient {
    client_with(endpoint, fast_settings(), cached)
}

pub fn client_with(
    endpoint: &ServerEndpoint,
    settings: ClientSettings,
    cached: Option<&str>,
) -> ApiClient {
    ApiClient::new(endpoint, settings, ModelState::with_cached(cached))
}

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}
