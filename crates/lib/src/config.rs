//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.tether/config.json`) and environment.
//! The server endpoint here is only the default; the user's choice lives in the
//! preferences store and `TETHER_HOST` / `TETHER_PORT` override both.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::prefs::Preferences;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Default inference server endpoint.
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-request timeouts.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Model load verification and fallback settings.
    #[serde(default)]
    pub load: LoadConfig,

    /// Chat request defaults.
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Host and port of the inference server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Host name or address (default "127.0.0.1"). May carry a scheme, e.g. "https://box.lan".
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Port (default 5000).
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Timeouts in milliseconds. Every outbound request carries exactly one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutsConfig {
    /// GET /v1/models, for discovery and reachability checks.
    #[serde(default = "default_models_ms")]
    pub models_ms: u64,
    /// "What's loaded" info endpoints.
    #[serde(default = "default_probe_ms")]
    pub probe_ms: u64,
    /// One-token synthetic completions (discovery probe and load verification).
    #[serde(default = "default_verify_ms")]
    pub verify_ms: u64,
    /// Direct load endpoints. Servers often block until the model is paged in.
    #[serde(default = "default_load_ms")]
    pub load_ms: u64,
    /// Unload endpoints.
    #[serde(default = "default_unload_ms")]
    pub unload_ms: u64,
    /// Force-load completion.
    #[serde(default = "default_force_load_ms")]
    pub force_load_ms: u64,
    /// Normal chat requests.
    #[serde(default = "default_chat_ms")]
    pub chat_ms: u64,
}

fn default_models_ms() -> u64 {
    5_000
}

fn default_probe_ms() -> u64 {
    2_000
}

fn default_verify_ms() -> u64 {
    10_000
}

fn default_load_ms() -> u64 {
    60_000
}

fn default_unload_ms() -> u64 {
    10_000
}

fn default_force_load_ms() -> u64 {
    60_000
}

fn default_chat_ms() -> u64 {
    120_000
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            models_ms: default_models_ms(),
            probe_ms: default_probe_ms(),
            verify_ms: default_verify_ms(),
            load_ms: default_load_ms(),
            unload_ms: default_unload_ms(),
            force_load_ms: default_force_load_ms(),
            chat_ms: default_chat_ms(),
        }
    }
}

/// Load verification and failure display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadConfig {
    /// Completion attempts after a direct load endpoint reported success (default 5).
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,
    /// Fixed delay between verification attempts (default 2000 ms).
    #[serde(default = "default_verify_backoff_ms")]
    pub verify_backoff_ms: u64,
    /// How long a load error stays on screen before the UI reverts (default 3000 ms).
    #[serde(default = "default_error_revert_ms")]
    pub error_revert_ms: u64,
    /// Prompt sent with the force-load completion.
    #[serde(default = "default_force_load_prompt")]
    pub force_load_prompt: String,
}

fn default_verify_attempts() -> u32 {
    5
}

fn default_verify_backoff_ms() -> u64 {
    2_000
}

fn default_error_revert_ms() -> u64 {
    3_000
}

fn default_force_load_prompt() -> String {
    "Reply with OK.".to_string()
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            verify_attempts: default_verify_attempts(),
            verify_backoff_ms: default_verify_backoff_ms(),
            error_revert_ms: default_error_revert_ms(),
            force_load_prompt: default_force_load_prompt(),
        }
    }
}

impl LoadConfig {
    pub fn error_revert(&self) -> Duration {
        Duration::from_millis(self.error_revert_ms)
    }
}

/// Chat request defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// Sent as the first message of every request when set.
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Where requests go. Persisted in the preferences store under `serverHost` / `serverPort`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `http://host:port`, or `scheme://host:port` when the host already names a scheme.
    pub fn base_url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        if host.contains("://") {
            format!("{}:{}", host, self.port)
        } else {
            format!("http://{}:{}", host, self.port)
        }
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the server endpoint: env `TETHER_HOST` / `TETHER_PORT` override preferences, which override config.
pub fn resolve_endpoint(config: &Config, prefs: &Preferences) -> ServerEndpoint {
    let host = env_non_empty("TETHER_HOST")
        .or_else(|| prefs.server_host().map(str::to_string))
        .unwrap_or_else(|| config.server.host.clone());
    let port = env_non_empty("TETHER_PORT")
        .and_then(|p| match p.parse::<u16>() {
            Ok(p) => Some(p),
            Err(_) => {
                log::warn!("ignoring invalid TETHER_PORT {:?}", p);
                None
            }
        })
        .or_else(|| prefs.server_port())
        .unwrap_or(config.server.port);
    ServerEndpoint::new(host, port)
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("TETHER_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".tether").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Directory holding the config file.
pub fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Preferences file: `prefs.json` next to the config file.
pub fn prefs_path(config_path: &Path) -> PathBuf {
    config_dir(config_path).join("prefs.json")
}

/// Load config from the given path, or the default path (or TETHER_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the config directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
