//! Local key-value preferences (`prefs.json`): server endpoint, last known loaded model,
//! banner visibility.
//!
//! Values are stored as a flat JSON object so unknown keys written by other versions survive
//! a load/save cycle. Writes take an exclusive file lock.

use anyhow::{Context, Result};
use fs2::FileExt;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::ServerEndpoint;

pub const KEY_SERVER_HOST: &str = "serverHost";
pub const KEY_SERVER_PORT: &str = "serverPort";
pub const KEY_LOADED_MODEL: &str = "loadedModel";
pub const KEY_SHOW_BANNER: &str = "showBanner";

/// Preferences backed by a JSON file. Changes are kept in memory until [`Preferences::save`].
#[derive(Debug, Clone)]
pub struct Preferences {
    path: PathBuf,
    values: Map<String, Value>,
}

impl Preferences {
    /// Open the store at `path`. A missing file is an empty store; so is a file that is not a
    /// JSON object (logged, and replaced on the next save).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let s = std::fs::read_to_string(&path)
                .with_context(|| format!("reading preferences from {}", path.display()))?;
            match serde_json::from_str::<Value>(&s) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    log::warn!(
                        "preferences at {} are not a JSON object, starting empty",
                        path.display()
                    );
                    Map::new()
                }
            }
        } else {
            Map::new()
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn server_host(&self) -> Option<&str> {
        self.get_str(KEY_SERVER_HOST)
    }

    /// Port as a number or numeric string; anything else is ignored.
    pub fn server_port(&self) -> Option<u16> {
        match self.values.get(KEY_SERVER_PORT)? {
            Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn set_server_endpoint(&mut self, endpoint: &ServerEndpoint) {
        self.set(KEY_SERVER_HOST, endpoint.host.clone());
        self.set(KEY_SERVER_PORT, endpoint.port);
    }

    pub fn loaded_model(&self) -> Option<&str> {
        self.get_str(KEY_LOADED_MODEL)
    }

    pub fn set_loaded_model(&mut self, model_id: Option<&str>) {
        match model_id {
            Some(id) => self.set(KEY_LOADED_MODEL, id),
            None => {
                self.remove(KEY_LOADED_MODEL);
            }
        }
    }

    /// Banner is shown unless explicitly turned off.
    pub fn show_banner(&self) -> bool {
        self.values
            .get(KEY_SHOW_BANNER)
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub fn set_show_banner(&mut self, show: bool) {
        self.set(KEY_SHOW_BANNER, show);
    }

    /// Write the store to disk, creating parent dirs if needed.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let body = serde_json::to_vec_pretty(&self.values)?;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("opening preferences at {}", self.path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("locking preferences at {}", self.path.display()))?;
        let written = file
            .set_len(0)
            .and_then(|_| file.write_all(&body))
            .and_then(|_| file.flush());
        let _ = FileExt::unlock(&file);
        written.with_context(|| format!("writing preferences to {}", self.path.display()))?;
        log::debug!("saved preferences to {}", self.path.display());
        Ok(())
    }
}
