//! Which model is loaded? The server's own answer is unreliable across versions, so discovery
//! asks several ways and takes the first answer that matches the listed models:
//!
//! 1. status-like fields on the listed models
//! 2. the "current model" info endpoints
//! 3. a one-token completion, reading the `model` it answered with
//! 4. the previously known model, if the server still lists it
//!
//! At most one model is ever reported as loaded.

use crate::llm::client::{probe_request, ApiClient, ModelDescriptor};
use crate::llm::endpoints::INFO_ENDPOINTS;
use crate::state::{Confidence, LoadSource, LoadedModel};

/// Outcome of one discovery pass.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// False when the models list could not be fetched or parsed.
    pub reachable: bool,
    /// Every model the server listed, in server order.
    pub available: Vec<ModelDescriptor>,
    pub loaded: Option<LoadedModel>,
}

impl Discovery {
    /// Singleton list with the loaded model id, or empty.
    pub fn loaded_ids(&self) -> Vec<String> {
        self.loaded.iter().map(|m| m.id.clone()).collect()
    }

    pub fn lists(&self, model_id: &str) -> bool {
        self.available.iter().any(|m| m.id == model_id)
    }
}

fn listed(models: &[ModelDescriptor], model_id: &str) -> bool {
    models.iter().any(|m| m.id == model_id)
}

impl ApiClient {
    /// Discover the loaded model and return its id as a singleton list (empty when none).
    /// Updates the shared loaded-model cell; clears it when the server is unreachable.
    pub async fn fetch_available_models(&self) -> Vec<String> {
        self.discover().await.loaded_ids()
    }

    /// Fetch the model list and decide which one is loaded. Never fails; an unreachable
    /// server or a malformed list yields an unreachable, empty result.
    pub async fn discover(&self) -> Discovery {
        let available = match self.list_models().await {
            Ok(models) => models,
            Err(e) => {
                log::warn!("listing models at {} failed: {}", self.base_url(), e);
                self.state().clear();
                return Discovery::default();
            }
        };
        let loaded = self.find_loaded(&available).await;
        match &loaded {
            Some(model) => self.state().set(model.clone()),
            None => {
                log::debug!("no loaded model among {} listed", available.len());
                self.state().clear();
            }
        }
        Discovery {
            reachable: true,
            available,
            loaded,
        }
    }

    async fn find_loaded(&self, available: &[ModelDescriptor]) -> Option<LoadedModel> {
        if available.is_empty() {
            return None;
        }
        if let Some(m) = loaded_from_status_fields(available) {
            return Some(m);
        }
        if let Some(m) = self.loaded_from_info_endpoints(available).await {
            return Some(m);
        }
        if let Some(m) = self.loaded_from_completion_probe(available).await {
            return Some(m);
        }
        self.loaded_from_cache(available)
    }

    async fn loaded_from_info_endpoints(&self, available: &[ModelDescriptor]) -> Option<LoadedModel> {
        let hit = self
            .try_endpoints(
                INFO_ENDPOINTS,
                None,
                None,
                self.settings().probe_timeout,
                |hit| {
                    hit.model_id
                        .as_deref()
                        .map(|id| listed(available, id))
                        .unwrap_or(false)
                },
            )
            .await?;
        let id = hit.model_id?;
        Some(LoadedModel::new(id, Confidence::Reported, LoadSource::InfoEndpoint))
    }

    /// One-token completion without a model name; the server answers with whatever it has
    /// loaded. An unmatched answer is a guess: the still-listed cached model if there is one,
    /// otherwise the first listed model, marked [`Confidence::Assumed`].
    ///
    /// The cached id is checked before the first-listed fallback on purpose, so an unlisted
    /// answer does not replace a model this process saw loaded and the server still lists.
    async fn loaded_from_completion_probe(
        &self,
        available: &[ModelDescriptor],
    ) -> Option<LoadedModel> {
        let res = match self
            .complete(&probe_request(None), self.settings().verify_timeout)
            .await
        {
            Ok(res) => res,
            Err(e) => {
                log::debug!("completion probe failed: {}", e);
                return None;
            }
        };
        let answered = res.model.as_deref().map(str::trim).unwrap_or("");
        if !answered.is_empty() && listed(available, answered) {
            return Some(LoadedModel::new(
                answered,
                Confidence::Confirmed,
                LoadSource::CompletionProbe,
            ));
        }
        if let Some(cached) = self.loaded_from_cache(available) {
            log::debug!(
                "probe answered as {:?}, keeping cached {}",
                answered,
                cached.id
            );
            return Some(cached);
        }
        let first = &available[0];
        log::info!(
            "probe answered as {:?}, which is not listed; assuming {}",
            answered,
            first.id
        );
        Some(LoadedModel::new(
            first.id.clone(),
            Confidence::Assumed,
            LoadSource::FirstListed,
        ))
    }

    fn loaded_from_cache(&self, available: &[ModelDescriptor]) -> Option<LoadedModel> {
        let cached = self.state().current()?;
        if listed(available, &cached.id) {
            Some(LoadedModel::new(cached.id, Confidence::Cached, LoadSource::Cache))
        } else {
            None
        }
    }
}

fn loaded_from_status_fields(available: &[ModelDescriptor]) -> Option<LoadedModel> {
    available
        .iter()
        .find(|m| m.reports_loaded())
        .map(|m| LoadedModel::new(m.id.clone(), Confidence::Reported, LoadSource::StatusField))
}
