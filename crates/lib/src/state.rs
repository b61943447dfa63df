//! Best known loaded model: a single-writer, observable cell shared by the API client,
//! the load coordinator and the UI.
//!
//! Only this crate writes to the cell (discovery, load and eject results); everything else
//! reads or subscribes.

use std::sync::Arc;
use tokio::sync::watch;

/// How much a loaded-model value can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Confidence {
    /// A completion against the server answered with this model.
    Confirmed,
    /// The server said so (status field or info endpoint).
    Reported,
    /// Guessed: the server answered a probe but named a model we could not match.
    Assumed,
    /// Remembered from an earlier session and still listed by the server.
    Cached,
}

impl Confidence {
    pub fn label(&self) -> &'static str {
        match self {
            Confidence::Confirmed => "confirmed",
            Confidence::Reported => "reported",
            Confidence::Assumed => "assumed",
            Confidence::Cached => "cached",
        }
    }

    /// True when the server itself vouched for the value.
    pub fn is_verified(&self) -> bool {
        matches!(self, Confidence::Confirmed | Confidence::Reported)
    }
}

/// Which step produced a loaded-model value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadSource {
    StatusField,
    InfoEndpoint,
    CompletionProbe,
    FirstListed,
    Cache,
    Load,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModel {
    pub id: String,
    pub confidence: Confidence,
    pub source: LoadSource,
}

impl LoadedModel {
    pub fn new(id: impl Into<String>, confidence: Confidence, source: LoadSource) -> Self {
        Self {
            id: id.into(),
            confidence,
            source,
        }
    }
}

/// Shared handle to the loaded-model cell. Clones refer to the same cell.
#[derive(Clone)]
pub struct ModelState {
    tx: Arc<watch::Sender<Option<LoadedModel>>>,
}

impl Default for ModelState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ModelState").field(&*self.tx.borrow()).finish()
    }
}

impl ModelState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Seed the cell with a model id remembered from a previous run.
    pub fn with_cached(model_id: Option<&str>) -> Self {
        let initial = model_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| LoadedModel::new(id, Confidence::Cached, LoadSource::Cache));
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<LoadedModel> {
        self.tx.borrow().clone()
    }

    pub fn loaded_id(&self) -> Option<String> {
        self.tx.borrow().as_ref().map(|m| m.id.clone())
    }

    /// Receiver that sees every change to the cell.
    pub fn subscribe(&self) -> watch::Receiver<Option<LoadedModel>> {
        self.tx.subscribe()
    }

    pub(crate) fn set(&self, model: LoadedModel) {
        self.tx.send_if_modified(|current| {
            if current.as_ref() == Some(&model) {
                return false;
            }
            log::info!(
                "loaded model is now {} ({})",
                model.id,
                model.confidence.label()
            );
            *current = Some(model);
            true
        });
    }

    pub(crate) fn clear(&self) {
        self.tx.send_if_modified(|current| match current.take() {
            Some(previous) => {
                log::info!("loaded model cleared (was {})", previous.id);
                true
            }
            None => false,
        });
    }
}
