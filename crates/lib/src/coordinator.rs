//! Load coordinator: one model switch (or eject) at a time.
//!
//! A request arriving while another is in flight is dropped without touching the network.
//! The in-flight flag is claimed synchronously before the first await, and released by a
//! guard on every exit path, including cancellation and panics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::llm::ApiClient;
use crate::state::ModelState;

/// Progress of a coordinated operation, for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent {
    /// Controls disabled, spinner shown.
    Started { model_id: String },
    Succeeded { model_id: String },
    /// Shown inline for `revert_after`, then the UI returns to the prior state.
    Failed {
        model_id: String,
        message: String,
        revert_after: Duration,
    },
    EjectStarted,
    Ejected,
    EjectFailed {
        message: String,
        revert_after: Duration,
    },
    /// Flag cleared, controls enabled again. Always the last event of an operation.
    Finished,
}

pub struct LoadCoordinator {
    client: ApiClient,
    in_flight: AtomicBool,
    events: broadcast::Sender<LoadEvent>,
    error_revert: Duration,
}

/// Clears the in-flight flag and announces `Finished` when dropped.
struct InFlight<'a> {
    flag: &'a AtomicBool,
    events: &'a broadcast::Sender<LoadEvent>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        let _ = self.events.send(LoadEvent::Finished);
    }
}

impl LoadCoordinator {
    pub fn new(client: ApiClient, error_revert: Duration) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            client,
            in_flight: AtomicBool::new(false),
            events,
            error_revert,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn state(&self) -> &ModelState {
        self.client.state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoadEvent> {
        self.events.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether load/eject controls should accept input.
    pub fn controls_enabled(&self) -> bool {
        !self.is_busy()
    }

    fn claim(&self) -> Option<InFlight<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlight {
                flag: &self.in_flight,
                events: &self.events,
            })
    }

    fn emit(&self, event: LoadEvent) {
        let _ = self.events.send(event);
    }

    /// Switch the server to `model_id`. Returns false when another operation is in flight
    /// or every load strategy failed; on failure the loaded-model state is re-synced from
    /// the server.
    pub async fn load(&self, model_id: &str) -> bool {
        let Some(_guard) = self.claim() else {
            log::info!("ignoring load of {}: another operation is in flight", model_id);
            return false;
        };
        self.emit(LoadEvent::Started {
            model_id: model_id.to_string(),
        });

        if self.client.load_model(model_id).await {
            self.emit(LoadEvent::Succeeded {
                model_id: model_id.to_string(),
            });
            return true;
        }

        self.client.discover().await;
        self.emit(LoadEvent::Failed {
            model_id: model_id.to_string(),
            message: format!("Could not load {}. Is the server running?", model_id),
            revert_after: self.error_revert,
        });
        false
    }

    /// Eject the loaded model under the same one-at-a-time rule as [`LoadCoordinator::load`].
    pub async fn eject(&self) -> bool {
        let Some(_guard) = self.claim() else {
            log::info!("ignoring eject: another operation is in flight");
            return false;
        };
        self.emit(LoadEvent::EjectStarted);
        if self.client.eject_model().await {
            self.emit(LoadEvent::Ejected);
            true
        } else {
            self.emit(LoadEvent::EjectFailed {
                message: "Could not eject the model.".to_string(),
                revert_after: self.error_revert,
            });
            false
        }
    }
}
