//! HTTP client for an OpenAI-compatible inference server (text-generation-webui style).
//!
//! Model management is best-effort: every request has its own timeout, and failures are
//! logged and turned into `false` / empty results. Nothing in this file returns an error
//! to the caller except the raw request helpers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::{Config, ServerEndpoint};
use crate::llm::endpoints::{
    self, reported_model_id, Endpoint, Expect, Verb, LOAD_ENDPOINTS, UNLOAD_BY_ID_ENDPOINTS,
    UNLOAD_ENDPOINTS,
};
use crate::state::{Confidence, LoadSource, LoadedModel, ModelState};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("server request failed: {0}")]
    Request(reqwest::Error),
    #[error("server did not respond within the timeout")]
    Timeout,
    #[error("server api error: {0}")]
    Api(String),
    #[error("unexpected server response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Protocol(e.to_string())
        } else {
            ApiError::Request(e)
        }
    }
}

/// Timeouts and retry policy for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub models_timeout: Duration,
    pub probe_timeout: Duration,
    pub verify_timeout: Duration,
    pub load_timeout: Duration,
    pub unload_timeout: Duration,
    pub force_load_timeout: Duration,
    pub chat_timeout: Duration,
    pub verify_attempts: u32,
    pub verify_backoff: Duration,
    pub force_load_prompt: String,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Self {
        let t = &config.timeouts;
        Self {
            models_timeout: Duration::from_millis(t.models_ms),
            probe_timeout: Duration::from_millis(t.probe_ms),
            verify_timeout: Duration::from_millis(t.verify_ms),
            load_timeout: Duration::from_millis(t.load_ms),
            unload_timeout: Duration::from_millis(t.unload_ms),
            force_load_timeout: Duration::from_millis(t.force_load_ms),
            chat_timeout: Duration::from_millis(t.chat_ms),
            verify_attempts: config.load.verify_attempts.max(1),
            verify_backoff: Duration::from_millis(config.load.verify_backoff_ms),
            force_load_prompt: config.load.force_load_prompt.clone(),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// One entry of `GET /v1/models`: the opaque id plus whichever status-like fields the server sent.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub id: String,
    pub status_fields: serde_json::Map<String, Value>,
}

pub(crate) const STATUS_FLAG_KEYS: [&str; 4] = ["ready", "loaded", "active", "current"];
pub(crate) const STATUS_TEXT_KEYS: [&str; 2] = ["status", "state"];
const STATUS_LOADED_VALUES: [&str; 6] = ["loaded", "ready", "active", "running", "current", "true"];

impl ModelDescriptor {
    /// Parse one list entry. Entries without a string `id` (or `name`) are skipped.
    pub fn from_value(entry: &Value) -> Option<Self> {
        let id = entry
            .get("id")
            .or_else(|| entry.get("name"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())?
            .to_string();
        let status_fields = STATUS_FLAG_KEYS
            .iter()
            .chain(STATUS_TEXT_KEYS.iter())
            .filter_map(|k| entry.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect();
        Some(Self { id, status_fields })
    }

    /// True when any status-like field says the model is loaded.
    pub fn reports_loaded(&self) -> bool {
        let flag = STATUS_FLAG_KEYS
            .iter()
            .filter_map(|k| self.status_fields.get(*k))
            .any(is_truthy);
        let text = STATUS_TEXT_KEYS
            .iter()
            .filter_map(|k| self.status_fields.get(*k))
            .any(|v| {
                is_truthy(v)
                    || v.as_str().is_some_and(|s| {
                        let s = s.trim();
                        STATUS_LOADED_VALUES.iter().any(|l| s.eq_ignore_ascii_case(l))
                    })
            });
        flag || text
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("true") || s == "1" || s.eq_ignore_ascii_case("yes")
        }
        _ => false,
    }
}

/// Parse a models list: `{"data": [...]}`, `{"models": [...]}` or a bare array.
pub(crate) fn parse_models_list(body: &Value) -> Result<Vec<ModelDescriptor>, ApiError> {
    let entries = body
        .get("data")
        .or_else(|| body.get("models"))
        .unwrap_or(body)
        .as_array()
        .ok_or_else(|| ApiError::Protocol("models list is not an array".to_string()))?;
    Ok(entries.iter().filter_map(ModelDescriptor::from_value).collect())
}

/// A successful probe from [`ApiClient::try_endpoints`].
#[derive(Debug, Clone)]
pub(crate) struct Hit {
    pub endpoint: &'static Endpoint,
    /// Set for [`Expect::ModelId`] endpoints.
    pub model_id: Option<String>,
}

// --- Chat completion wire types ---

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct WireMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionResponse {
    pub model: Option<String>,
    pub choices: Option<Vec<CompletionChoice>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionChoice {
    pub message: Option<CompletionMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionMessage {
    pub content: Option<String>,
}

impl CompletionResponse {
    pub fn has_choices(&self) -> bool {
        self.choices.as_ref().map(|c| !c.is_empty()).unwrap_or(false)
    }

    pub fn content(&self) -> String {
        self.choices
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.clone())
            .unwrap_or_default()
    }
}

const PROBE_PROMPT: &str = "hi";

/// One-token completion used to ask the server which model answers (or to verify a load).
pub(crate) fn probe_request(model: Option<&str>) -> CompletionRequest<'_> {
    CompletionRequest {
        model,
        messages: vec![WireMessage {
            role: "user",
            content: PROBE_PROMPT,
        }],
        max_tokens: Some(1),
        temperature: Some(0.0),
        stream: false,
    }
}

/// Client for model discovery, loading, ejecting and chat.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    state: ModelState,
    settings: ClientSettings,
}

impl ApiClient {
    pub fn new(endpoint: &ServerEndpoint, settings: ClientSettings, state: ModelState) -> Self {
        Self {
            base_url: endpoint.base_url(),
            client: reqwest::Client::new(),
            state,
            settings,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Shared loaded-model cell this client writes to.
    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub(crate) async fn send(
        &self,
        verb: Verb,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(verb.method(), &url).timeout(timeout);
        if let Some(body) = body {
            req = req.json(body);
        }
        Ok(req.send().await?)
    }

    /// Send and require a 2xx status.
    pub(crate) async fn send_ok(
        &self,
        verb: Verb,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<reqwest::Response, ApiError> {
        let res = self.send(verb, path, body, timeout).await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Api(format!("{} {}", status, body.trim())));
        }
        Ok(res)
    }

    /// GET /v1/models: the raw list, without deciding what is loaded.
    pub(crate) async fn list_models(&self) -> Result<Vec<ModelDescriptor>, ApiError> {
        let res = self
            .send_ok(
                endpoints::MODELS.verb,
                endpoints::MODELS.path,
                None,
                self.settings.models_timeout,
            )
            .await?;
        let body: Value = res.json().await?;
        parse_models_list(&body)
    }

    /// POST /v1/chat/completions; 2xx and a parseable body required.
    pub(crate) async fn complete(
        &self,
        request: &CompletionRequest<'_>,
        timeout: Duration,
    ) -> Result<CompletionResponse, ApiError> {
        let body = serde_json::to_value(request).map_err(|e| ApiError::Protocol(e.to_string()))?;
        let res = self
            .send_ok(
                endpoints::CHAT_COMPLETIONS.verb,
                endpoints::CHAT_COMPLETIONS.path,
                Some(&body),
                timeout,
            )
            .await?;
        Ok(res.json().await?)
    }

    /// Try `table` in order until one endpoint answers 2xx, satisfies its [`Expect`], and is
    /// accepted by `accept`. Strictly sequential; each attempt waits out its own timeout.
    pub(crate) async fn try_endpoints(
        &self,
        table: &'static [Endpoint],
        model_id: Option<&str>,
        body: Option<&Value>,
        timeout: Duration,
        accept: impl Fn(&Hit) -> bool,
    ) -> Option<Hit> {
        for endpoint in table {
            let Some(path) = endpoint.render(model_id) else {
                continue;
            };
            let res = match self.send(endpoint.verb, &path, body, timeout).await {
                Ok(res) => res,
                Err(e) => {
                    log::debug!("{} {} failed: {}", endpoint.verb.as_str(), path, e);
                    continue;
                }
            };
            if !res.status().is_success() {
                log::debug!("{} {} -> {}", endpoint.verb.as_str(), path, res.status());
                continue;
            }
            let hit = match endpoint.expect {
                Expect::Status => Hit {
                    endpoint,
                    model_id: None,
                },
                Expect::ModelId => {
                    let value: Value = match res.json().await {
                        Ok(v) => v,
                        Err(e) => {
                            log::debug!("{} {}: unreadable body: {}", endpoint.verb.as_str(), path, e);
                            continue;
                        }
                    };
                    match reported_model_id(&value) {
                        Some(id) => Hit {
                            endpoint,
                            model_id: Some(id),
                        },
                        None => {
                            log::debug!("{} {}: no model id in {}", endpoint.verb.as_str(), path, value);
                            continue;
                        }
                    }
                }
            };
            if accept(&hit) {
                log::debug!("{} {} accepted", endpoint.verb.as_str(), path);
                return Some(hit);
            }
            log::debug!("{} {} answered but was not accepted", endpoint.verb.as_str(), path);
        }
        None
    }

    /// GET /v1/models within the models timeout; reachability only.
    pub async fn is_server_running(&self) -> bool {
        match self
            .send(
                endpoints::MODELS.verb,
                endpoints::MODELS.path,
                None,
                self.settings.models_timeout,
            )
            .await
        {
            Ok(res) => res.status().is_success(),
            Err(e) => {
                log::debug!("server at {} not reachable: {}", self.base_url, e);
                false
            }
        }
    }

    /// Load `model_id`: direct load endpoints with completion verification, then force-load.
    /// On success the loaded-model cell is set and discovery runs to refresh the server view.
    pub async fn load_model(&self, model_id: &str) -> bool {
        let model_id = model_id.trim();
        if model_id.is_empty() {
            log::warn!("refusing to load an empty model id");
            return false;
        }
        let loaded = if self.direct_load(model_id).await {
            if self.verify_loaded(model_id).await {
                true
            } else {
                log::warn!(
                    "{} was accepted by a load endpoint but never answered; forcing load",
                    model_id
                );
                self.force_load(model_id).await
            }
        } else {
            log::debug!("no direct load endpoint accepted {}; forcing load", model_id);
            self.force_load(model_id).await
        };
        if !loaded {
            log::warn!("all attempts to load {} failed", model_id);
            return false;
        }
        self.state
            .set(LoadedModel::new(model_id, Confidence::Confirmed, LoadSource::Load));
        self.discover().await;
        true
    }

    async fn direct_load(&self, model_id: &str) -> bool {
        let body = json!({ "model_name": model_id, "model": model_id });
        self.try_endpoints(
            LOAD_ENDPOINTS,
            Some(model_id),
            Some(&body),
            self.settings.load_timeout,
            |_| true,
        )
        .await
        .is_some()
    }

    /// Poll one-token completions against `model_id`. Only a response with at least one
    /// choice counts; a bare 2xx does not.
    async fn verify_loaded(&self, model_id: &str) -> bool {
        let request = probe_request(Some(model_id));
        let attempts = self.settings.verify_attempts.max(1);
        for attempt in 1..=attempts {
            match self.complete(&request, self.settings.verify_timeout).await {
                Ok(res) if res.has_choices() => {
                    log::debug!("{} verified on attempt {}", model_id, attempt);
                    return true;
                }
                Ok(_) => log::debug!("verify {} attempt {}: no choices", model_id, attempt),
                Err(e) => log::debug!("verify {} attempt {}: {}", model_id, attempt, e),
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.verify_backoff).await;
            }
        }
        false
    }

    /// Full completion naming `model_id`, which makes the server page it in. HTTP 2xx is success.
    async fn force_load(&self, model_id: &str) -> bool {
        let request = CompletionRequest {
            model: Some(model_id),
            messages: vec![WireMessage {
                role: "user",
                content: &self.settings.force_load_prompt,
            }],
            max_tokens: Some(8),
            temperature: Some(0.0),
            stream: false,
        };
        let body = match serde_json::to_value(&request) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("force-load request for {} not serializable: {}", model_id, e);
                return false;
            }
        };
        match self
            .send(
                endpoints::CHAT_COMPLETIONS.verb,
                endpoints::CHAT_COMPLETIONS.path,
                Some(&body),
                self.settings.force_load_timeout,
            )
            .await
        {
            Ok(res) if res.status().is_success() => {
                log::debug!("force-load of {} succeeded", model_id);
                true
            }
            Ok(res) => {
                log::debug!("force-load of {} -> {}", model_id, res.status());
                false
            }
            Err(e) => {
                log::debug!("force-load of {} failed: {}", model_id, e);
                false
            }
        }
    }

    /// Unload whatever is loaded. Generic unload endpoints first, then the model-specific one
    /// once discovery has named the model. On failure discovery runs anyway so the state
    /// matches the server.
    pub async fn eject_model(&self) -> bool {
        let timeout = self.settings.unload_timeout;
        if let Some(hit) = self
            .try_endpoints(UNLOAD_ENDPOINTS, None, None, timeout, |_| true)
            .await
        {
            log::info!("model unloaded via {}", hit.endpoint.path);
            self.state.clear();
            return true;
        }

        if let Some(current) = self.discover().await.loaded {
            if let Some(hit) = self
                .try_endpoints(UNLOAD_BY_ID_ENDPOINTS, Some(&current.id), None, timeout, |_| true)
                .await
            {
                log::info!("{} unloaded via {}", current.id, hit.endpoint.path);
                self.state.clear();
                return true;
            }
        }

        log::warn!("no unload endpoint accepted the request");
        self.discover().await;
        false
    }
}
