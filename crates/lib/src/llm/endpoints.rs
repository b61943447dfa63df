//! Endpoint tables for the inference server.
//!
//! Server versions disagree on where load/unload/info live, so each intent is an ordered
//! list of candidate endpoints tried one after another by `ApiClient::try_endpoints`.
//! `{id}` in a path is replaced with the percent-encoded model id.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
}

impl Verb {
    pub fn method(self) -> reqwest::Method {
        match self {
            Verb::Get => reqwest::Method::GET,
            Verb::Post => reqwest::Method::POST,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
        }
    }
}

/// What a 2xx response must additionally carry to count as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Status alone.
    Status,
    /// A JSON body naming a model (see [`reported_model_id`]).
    ModelId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub verb: Verb,
    pub path: &'static str,
    pub expect: Expect,
}

impl Endpoint {
    pub const fn get(path: &'static str, expect: Expect) -> Self {
        Self {
            verb: Verb::Get,
            path,
            expect,
        }
    }

    pub const fn post(path: &'static str, expect: Expect) -> Self {
        Self {
            verb: Verb::Post,
            path,
            expect,
        }
    }

    pub fn needs_model_id(&self) -> bool {
        self.path.contains("{id}")
    }

    /// Concrete path, or `None` when the template needs an id and none was given.
    pub fn render(&self, model_id: Option<&str>) -> Option<String> {
        if !self.needs_model_id() {
            return Some(self.path.to_string());
        }
        let id = model_id?;
        Some(self.path.replace("{id}", &urlencoding::encode(id)))
    }
}

pub const MODELS: Endpoint = Endpoint::get("/v1/models", Expect::Status);

pub const CHAT_COMPLETIONS: Endpoint = Endpoint::post("/v1/chat/completions", Expect::Status);

pub const LOAD_ENDPOINTS: &[Endpoint] = &[
    Endpoint::post("/v1/internal/model/load", Expect::Status),
    Endpoint::post("/v1/model/load", Expect::Status),
    Endpoint::post("/v1/models/load", Expect::Status),
    Endpoint::post("/v1/models/{id}/load", Expect::Status),
];

pub const UNLOAD_ENDPOINTS: &[Endpoint] = &[
    Endpoint::post("/v1/internal/model/unload", Expect::Status),
    Endpoint::post("/v1/model/unload", Expect::Status),
    Endpoint::post("/v1/models/unload", Expect::Status),
];

/// Tried only once the loaded model is known.
pub const UNLOAD_BY_ID_ENDPOINTS: &[Endpoint] =
    &[Endpoint::post("/v1/models/{id}/unload", Expect::Status)];

pub const INFO_ENDPOINTS: &[Endpoint] = &[
    Endpoint::get("/v1/internal/model/info", Expect::ModelId),
    Endpoint::get("/v1/model/info", Expect::ModelId),
    Endpoint::get("/v1/models/info", Expect::ModelId),
    Endpoint::get("/v1/models/current", Expect::ModelId),
];

/// Model id from an info response: `model_name`, `model`, `id`, `name`, or `data.id`.
/// Placeholder names some servers report when nothing is loaded ("None", "") are rejected.
pub fn reported_model_id(body: &Value) -> Option<String> {
    const KEYS: [&str; 4] = ["model_name", "model", "id", "name"];
    let direct = KEYS
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str));
    let nested = || body.get("data").and_then(|d| d.get("id")).and_then(Value::as_str);
    direct
        .or_else(nested)
        .map(str::trim)
        .filter(|id| !id.is_empty() && !id.eq_ignore_ascii_case("none"))
        .map(str::to_string)
}
