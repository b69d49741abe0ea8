//! End-to-end tests of the HTTP surface against a scripted executor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use rip_proto::model::{ItemRef, ResultRow};
use rip_proto::protocol::TrackStatus;

use rip_daemon::error::ExecutorError;
use rip_daemon::events::EventHub;
use rip_daemon::executor::{ExecRequest, ExecutorAdapter, ExecutorEvent, TrackEvent};
use rip_daemon::http::{create_router, AppState};
use rip_daemon::registry::RegistryCore;
use rip_daemon::sections::SectionStore;
use rip_daemon::settings::SettingsStore;
use rip_daemon::stores::{HistoryStore, SavedStore};
use rip_daemon::version::VersionService;

/// Scripted provider: search always finds two albums; anything whose id
/// starts with "bad" fails to transfer, everything else downloads one
/// track instantly.
struct ScriptedExecutor;

#[async_trait]
impl ExecutorAdapter for ScriptedExecutor {
    async fn search(
        &self,
        source: &str,
        media_type: &str,
        _query: &str,
        _limit: usize,
    ) -> Result<Vec<ResultRow>, ExecutorError> {
        Ok(vec![
            ResultRow {
                id: "good-1".to_string(),
                source: source.to_string(),
                media_type: media_type.to_string(),
                title: "First Album".to_string(),
                artist: Some("Artist A".to_string()),
                album_type: Some("album".to_string()),
                tracks: Some(10),
                year: Some("2019".to_string()),
                explicit: false,
                downloaded: false,
            },
            ResultRow {
                id: "good-2".to_string(),
                source: source.to_string(),
                media_type: media_type.to_string(),
                title: "Second Album".to_string(),
                artist: Some("Artist B".to_string()),
                album_type: Some("album".to_string()),
                tracks: Some(8),
                year: Some("2021".to_string()),
                explicit: true,
                downloaded: false,
            },
        ])
    }

    async fn resolve_url(&self, url: &str) -> Result<ItemRef, ExecutorError> {
        rip_daemon::executor::http::classify_url(url)
    }

    async fn execute(
        &self,
        request: ExecRequest,
        events: mpsc::Sender<ExecutorEvent>,
        _cancel: CancellationToken,
    ) -> Result<(), ExecutorError> {
        if request.item.id.starts_with("bad") {
            return Err(ExecutorError::Transfer("connection reset".to_string()));
        }
        let _ = events
            .send(ExecutorEvent {
                job_id: request.job_id.clone(),
                event: TrackEvent::Started {
                    track_id: "1".to_string(),
                    title: request.item.title.clone(),
                    total: 100,
                },
            })
            .await;
        let _ = events
            .send(ExecutorEvent {
                job_id: request.job_id.clone(),
                event: TrackEvent::Finished {
                    track_id: "1".to_string(),
                    status: TrackStatus::Downloaded,
                    message: None,
                },
            })
            .await;
        Ok(())
    }
}

struct TestApp {
    app: Router,
    debug_flag: Arc<AtomicBool>,
    _dir: tempfile::TempDir,
}

fn setup_test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let (events_tx, _) = broadcast::channel(1024);
    let hub = EventHub::new(events_tx.clone(), Duration::from_millis(0));
    let executor: Arc<dyn ExecutorAdapter> = Arc::new(ScriptedExecutor);

    let config = rip_proto::config::DownloadsConfig {
        max_concurrent: 2,
        max_attempts: 1,
        progress_interval_ms: 0,
        download_dir: dir.path().join("downloads"),
    };
    let saved = SavedStore::new(dir.path().join("saved_for_later.json"));
    let history = HistoryStore::new(dir.path().join("download_history.json"));
    let (core, registry) = RegistryCore::new(config, executor.clone(), hub, saved, history);
    tokio::spawn(core.run());

    let debug_flag = Arc::new(AtomicBool::new(false));
    let flag = debug_flag.clone();
    let state = AppState {
        registry,
        executor,
        events: events_tx,
        settings: Arc::new(SettingsStore::new(dir.path().join("app_settings.json"))),
        sections: Arc::new(SectionStore::new(dir.path().join("providers.toml"))),
        version: Arc::new(VersionService::new(dir.path().join("version_cache.json"))),
        log_control: Arc::new(move |debug| flag.store(debug, Ordering::Relaxed)),
    };
    TestApp {
        app: create_router(state),
        debug_flag,
        _dir: dir,
    }
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll `/api/queue` until the snapshot satisfies the predicate.
async fn wait_for_queue(app: &Router, pred: impl Fn(&Value) -> bool) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let response = app.clone().oneshot(get("/api/queue")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let snapshot = body_json(response).await;
            if pred(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue never reached expected state")
}

#[tokio::test]
async fn test_search_requires_fields() {
    let t = setup_test_app();
    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/search", json!({"source": "qobuz"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("Missing fields"));
}

#[tokio::test]
async fn test_search_then_download_marks_rows_downloaded() {
    let t = setup_test_app();
    let search = json!({"source": "qobuz", "media_type": "album", "query": "burial"});

    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/search", search.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let results = body["results"].as_array().unwrap().clone();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|row| row["downloaded"] == false));

    // Queue both; jobs come back queued with distinct ids.
    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/downloads", json!({ "items": results })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    let queue = snapshot["queue"].as_array().unwrap();
    assert_eq!(queue.len(), 2);
    assert_ne!(queue[0]["job_id"], queue[1]["job_id"]);
    assert!(queue.iter().all(|job| job["status"] == "queued"));

    // Both complete: queue drains, history gains two entries.
    wait_for_queue(&t.app, |snap| {
        snap["queue"].as_array().unwrap().is_empty()
            && snap["history"].as_array().unwrap().len() == 2
    })
    .await;

    // The same search now flags both rows.
    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/search", search))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert!(body["results"]
        .as_array()
        .unwrap()
        .iter()
        .all(|row| row["downloaded"] == true));
}

#[tokio::test]
async fn test_url_downloads_isolate_bad_urls() {
    let t = setup_test_app();
    let response = t
        .app
        .clone()
        .oneshot(post_json(
            "/api/url-downloads",
            json!({"urls": ["definitely not a url", "https://example.com/mix.mp3"]}),
        ))
        .await
        .unwrap();
    // The call itself succeeds; the bad URL is a failed job inside.
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    let queue = snapshot["queue"].as_array().unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[0]["status"], "failed");
    assert!(queue[0]["error"]
        .as_str()
        .unwrap()
        .contains("not an http(s) URL"));
    assert_ne!(queue[1]["status"], "failed");

    wait_for_queue(&t.app, |snap| {
        snap["history"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e["id"] == "https://example.com/mix.mp3")
    })
    .await;
}

#[tokio::test]
async fn test_url_downloads_reject_empty_list() {
    let t = setup_test_app();
    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/url-downloads", json!({"urls": []})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_downloads_reject_missing_items() {
    let t = setup_test_app();
    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/downloads", json!({"items": "nope"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_queue_action_on_unknown_job_is_404() {
    let t = setup_test_app();
    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/queue/ghost/retry", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_queue_action_is_400() {
    let t = setup_test_app();
    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/queue/ghost/explode", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_retry_of_failed_job_over_http() {
    let t = setup_test_app();
    let response = t
        .app
        .clone()
        .oneshot(post_json(
            "/api/downloads",
            json!({"items": [{"id": "bad-9", "source": "qobuz", "media_type": "album"}]}),
        ))
        .await
        .unwrap();
    let snapshot = body_json(response).await;
    let job_id = snapshot["queue"][0]["job_id"].as_str().unwrap().to_string();

    wait_for_queue(&t.app, |snap| snap["queue"][0]["status"] == "failed").await;

    let response = t
        .app
        .clone()
        .oneshot(post_json(&format!("/api/queue/{job_id}/retry"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    wait_for_queue(&t.app, |snap| {
        snap["queue"][0]["status"] == "failed" && snap["queue"][0]["attempts"] == 2
    })
    .await;
}

#[tokio::test]
async fn test_saved_roundtrip() {
    let t = setup_test_app();
    let payload = json!({"id": "s1", "source": "tidal", "media_type": "album", "title": "Kept"});

    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/saved", payload.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["saved"].as_array().unwrap().len(), 1);

    // Saving the same identity again does not duplicate it.
    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/saved", payload))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["saved"].as_array().unwrap().len(), 1);

    let response = t.app.clone().oneshot(get("/api/saved")).await.unwrap();
    assert_eq!(body_json(response).await["saved"].as_array().unwrap().len(), 1);

    let response = t
        .app
        .clone()
        .oneshot(post_json(
            "/api/saved/remove",
            json!({"id": "s1", "source": "tidal"}),
        ))
        .await
        .unwrap();
    assert!(body_json(response).await["saved"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_download_saved_drains_saved_list() {
    let t = setup_test_app();
    t.app
        .clone()
        .oneshot(post_json(
            "/api/saved",
            json!({"id": "good-s", "source": "qobuz", "media_type": "album", "title": "Later"}),
        ))
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/saved/download", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = t.app.clone().oneshot(get("/api/saved")).await.unwrap();
    assert!(body_json(response).await["saved"].as_array().unwrap().is_empty());
    wait_for_queue(&t.app, |snap| snap["history"].as_array().unwrap().len() == 1).await;
}

#[tokio::test]
async fn test_app_settings_toggle_applies_log_control() {
    let t = setup_test_app();
    let response = t.app.clone().oneshot(get("/api/app-settings")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["debugLogging"], false);
    assert_eq!(body["defaultSource"], "qobuz");

    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/app-settings", json!({"debugLogging": true})))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["debugLogging"], true);
    assert!(t.debug_flag.load(Ordering::Relaxed));
}

#[tokio::test]
async fn test_config_sections_roundtrip() {
    let t = setup_test_app();
    let response = t
        .app
        .clone()
        .oneshot(post_json(
            "/api/config",
            json!({"qobuz": {"quality": 3, "use_auth_token": true}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = t.app.clone().oneshot(get("/api/config")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["qobuz"]["quality"], 3);

    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/config", json!({"qobuz": {"quality": "max"}})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_event_stream_pushes_queue_updates() {
    let t = setup_test_app();
    let response = t
        .app
        .clone()
        .oneshot(get("/events/downloads"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("text/event-stream"));
    let mut body = response.into_body().into_data_stream();

    // Trigger a change after the subscription exists.
    t.app
        .clone()
        .oneshot(post_json(
            "/api/downloads",
            json!({"items": [{"id": "good-ev", "source": "qobuz", "media_type": "album"}]}),
        ))
        .await
        .unwrap();

    let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
        .await
        .expect("no SSE frame arrived")
        .unwrap()
        .unwrap();
    let frame = String::from_utf8_lossy(&chunk);
    assert!(frame.contains("event: queue"), "unexpected frame: {frame}");
    assert!(frame.contains("\"queue\""));
}
