//! Integration tests: loading models through the API client and the coordinator.

mod common;

use common::{client, client_with, fast_settings, serve, Mock};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tether::coordinator::{LoadCoordinator, LoadEvent};
use tether::llm::ClientSettings;
use tether::state::{Confidence, LoadSource};

const DIRECT_LOAD_PATHS: [&str; 4] = [
    "POST /v1/internal/model/load",
    "POST /v1/model/load",
    "POST /v1/models/load",
    "POST /v1/models/m2/load",
];

#[tokio::test]
async fn direct_endpoints_404_falls_back_to_force_load() {
    let mock = Mock::with_models(&["m1", "m2"]);
    let endpoint = serve(mock.clone()).await;
    let client = client(&endpoint, None);

    assert!(client.load_model("m2").await);
    assert_eq!(mock.loaded().as_deref(), Some("m2"));
    assert_eq!(client.state().loaded_id().as_deref(), Some("m2"));

    let hits = mock.hits();
    let mut last = 0;
    for path in DIRECT_LOAD_PATHS {
        let idx = hits.iter().position(|h| h == path).expect(path);
        assert!(idx >= last, "{} tried in order", path);
        last = idx;
    }
    let force = hits
        .iter()
        .position(|h| h == "POST /v1/chat/completions")
        .expect("force-load completion");
    assert!(force > last);
    // A discovery pass follows the successful load.
    assert!(mock.last_index("GET /v1/models").expect("discovery") > force);
}

#[tokio::test]
async fn direct_load_is_verified_by_completion() {
    let mock = Mock::with_models(&["m1", "m2"]);
    mock.direct_load_ok.store(true, Ordering::SeqCst);
    let endpoint = serve(mock.clone()).await;
    let client = client(&endpoint, Some("m1"));

    assert!(client.load_model("m2").await);
    // First endpoint accepted; the rest were never tried.
    assert_eq!(mock.count("POST /v1/internal/model/load"), 1);
    assert_eq!(mock.count("POST /v1/model/load"), 0);
    let loaded = client.state().current().unwrap();
    assert_eq!(loaded.id, "m2");
    assert_eq!(loaded.confidence, Confidence::Confirmed);
}

#[tokio::test]
async fn empty_completions_fail_verification_but_force_load_accepts_2xx() {
    let mock = Mock::with_models(&["m1", "m2"]);
    mock.direct_load_ok.store(true, Ordering::SeqCst);
    mock.completions_empty.store(true, Ordering::SeqCst);
    let endpoint = serve(mock.clone()).await;
    let client = client(&endpoint, None);

    assert!(client.load_model("m2").await);
    // Two verification attempts, one force-load, one discovery probe.
    assert_eq!(mock.count("POST /v1/chat/completions"), 4);
    assert_eq!(client.state().loaded_id().as_deref(), Some("m2"));
}

#[tokio::test]
async fn load_fails_when_nothing_answers() {
    let mock = Mock::with_models(&["m1", "m2"]);
    mock.direct_load_ok.store(true, Ordering::SeqCst);
    mock.completions_fail.store(true, Ordering::SeqCst);
    let endpoint = serve(mock.clone()).await;
    let client = client(&endpoint, None);

    assert!(!client.load_model("m2").await);
    assert_eq!(client.state().current(), None);
    // Two verification attempts and the force-load; no discovery after a failure.
    assert_eq!(mock.count("POST /v1/chat/completions"), 3);
    assert_eq!(mock.count("GET /v1/models"), 0);
}

#[tokio::test]
async fn blank_model_id_is_refused_without_requests() {
    let mock = Mock::with_models(&["m1"]);
    let endpoint = serve(mock.clone()).await;
    assert!(!client(&endpoint, None).load_model("  ").await);
    assert!(mock.hits().is_empty());
}

#[tokio::test]
async fn second_rapid_load_is_rejected() {
    let mock = Mock::with_models(&["m1", "m3"]);
    mock.completion_delay_ms.store(200, Ordering::SeqCst);
    let endpoint = serve(mock.clone()).await;
    let coordinator = LoadCoordinator::new(client(&endpoint, None), Duration::from_millis(50));

    let (first, second) = tokio::join!(coordinator.load("m3"), coordinator.load("m3"));
    assert!(first);
    assert!(!second);
    assert_eq!(mock.count("POST /v1/internal/model/load"), 1);
    assert!(coordinator.controls_enabled());
    assert_eq!(coordinator.state().loaded_id().as_deref(), Some("m3"));
}

#[tokio::test]
async fn coordinator_success_events() {
    let mock = Mock::with_models(&["m1", "m2"]);
    mock.direct_load_ok.store(true, Ordering::SeqCst);
    let endpoint = serve(mock).await;
    let coordinator = LoadCoordinator::new(client(&endpoint, None), Duration::from_millis(50));
    let mut rx = coordinator.subscribe();

    assert!(coordinator.load("m2").await);
    assert_eq!(
        rx.try_recv().unwrap(),
        LoadEvent::Started {
            model_id: "m2".to_string()
        }
    );
    assert_eq!(
        rx.try_recv().unwrap(),
        LoadEvent::Succeeded {
            model_id: "m2".to_string()
        }
    );
    assert_eq!(rx.try_recv().unwrap(), LoadEvent::Finished);
    assert!(coordinator.controls_enabled());
}

#[tokio::test]
async fn coordinator_failure_resyncs_from_server() {
    let mock = Mock::with_models(&[]);
    *mock.models.lock().unwrap() = vec![
        serde_json::json!({"id": "m1", "ready": true}),
        serde_json::json!({"id": "m2"}),
    ];
    mock.completions_fail.store(true, Ordering::SeqCst);
    let endpoint = serve(mock.clone()).await;
    let coordinator = LoadCoordinator::new(client(&endpoint, None), Duration::from_millis(50));
    let mut rx = coordinator.subscribe();

    assert!(!coordinator.load("m2").await);
    assert!(coordinator.controls_enabled());
    assert_eq!(mock.count("GET /v1/models"), 1);
    let loaded = coordinator.state().current().unwrap();
    assert_eq!(loaded.id, "m1");
    assert_eq!(loaded.source, LoadSource::StatusField);

    assert!(matches!(rx.try_recv().unwrap(), LoadEvent::Started { .. }));
    match rx.try_recv().unwrap() {
        LoadEvent::Failed { revert_after, .. } => {
            assert_eq!(revert_after, Duration::from_millis(50))
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(rx.try_recv().unwrap(), LoadEvent::Finished);
}

#[tokio::test]
async fn verification_timeouts_fall_back_to_force_load() {
    let mock = Mock::with_models(&["m1", "m2"]);
    mock.direct_load_ok.store(true, Ordering::SeqCst);
    mock.completion_delay_ms.store(600, Ordering::SeqCst);
    let endpoint = serve(mock.clone()).await;
    let settings = ClientSettings {
        verify_timeout: Duration::from_millis(150),
        force_load_timeout: Duration::from_secs(5),
        ..fast_settings()
    };
    let client = client_with(&endpoint, settings, None);

    assert!(client.load_model("m2").await);
    // Both verification attempts are cut off at 150 ms; the force-load has time to finish.
    // The follow-up discovery probe is cut off too and the state falls back to the cache.
    assert_eq!(mock.count("POST /v1/chat/completions"), 4);
    let loaded = client.state().current().expect("loaded model");
    assert_eq!(loaded.id, "m2");
    assert_eq!(loaded.confidence, Confidence::Cached);
}
