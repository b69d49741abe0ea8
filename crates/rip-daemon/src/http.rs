//! HTTP + SSE surface.
//!
//! Handlers are thin: they validate the payload, talk to the registry
//! through its handle, and serialize the reply. No queue state lives here.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::warn;

use rip_proto::model::{stringify_artist, ItemRef};
use rip_proto::protocol::PushEvent;

use crate::error::{ApiError, ExecutorError};
use crate::executor::ExecutorAdapter;
use crate::registry::{ActionOutcome, EnqueueEntry, JobAction, RegistryHandle};
use crate::sections::SectionStore;
use crate::settings::SettingsStore;
use crate::version::VersionService;

/// Toggle applied when the user flips debug logging in the panel.
pub type LogControl = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryHandle,
    pub executor: Arc<dyn ExecutorAdapter>,
    pub events: broadcast::Sender<PushEvent>,
    pub settings: Arc<SettingsStore>,
    pub sections: Arc<SectionStore>,
    pub version: Arc<VersionService>,
    pub log_control: LogControl,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/search", post(search))
        .route("/api/downloads", post(start_downloads))
        .route("/api/url-downloads", post(start_url_downloads))
        .route("/api/queue", get(queue_state))
        .route("/api/queue/:job_id/:action", post(queue_action))
        .route("/api/saved", get(saved_items).post(save_item))
        .route("/api/saved/remove", post(remove_saved))
        .route("/api/saved/download", post(download_saved))
        .route("/api/config", get(get_config).post(update_config))
        .route(
            "/api/app-settings",
            get(get_app_settings).post(update_app_settings),
        )
        .route("/api/version", get(version_info))
        .route("/events/downloads", get(download_events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── search ────────────────────────────────────────────────────────────────

async fn search(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let body = payload
        .as_object()
        .ok_or_else(|| ApiError::Validation("body must be an object".to_string()))?;
    let missing: Vec<&str> = ["source", "media_type", "query"]
        .into_iter()
        .filter(|key| body.get(*key).and_then(|v| v.as_str()).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::Validation(format!(
            "Missing fields: {}",
            missing.join(", ")
        )));
    }
    let source = body["source"].as_str().unwrap_or_default();
    let media_type = body["media_type"].as_str().unwrap_or_default();
    let query = body["query"].as_str().unwrap_or_default();
    let limit = body
        .get("limit")
        .and_then(|v| v.as_u64())
        .unwrap_or(25)
        .min(200) as usize;

    tracing::info!(%source, %media_type, %query, limit, "search requested");
    let mut rows = state
        .executor
        .search(source, media_type, query, limit)
        .await
        .map_err(|e| match e {
            ExecutorError::Unsupported { .. } => ApiError::Validation(e.to_string()),
            other => ApiError::Internal(anyhow::anyhow!(other)),
        })?;

    // Flag rows the user already has, from the durable history.
    let snapshot = state.registry.snapshot().await?;
    let downloaded: std::collections::HashSet<(String, String)> =
        snapshot.history.iter().map(|entry| entry.key()).collect();
    for row in &mut rows {
        row.downloaded = downloaded.contains(&(row.source.clone(), row.id.clone()));
    }

    tracing::info!(%source, %query, results = rows.len(), "search finished");
    Ok(Json(json!({ "results": rows })))
}

// ── downloads ─────────────────────────────────────────────────────────────

async fn start_downloads(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let items = payload
        .get("items")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ApiError::Validation("items must be a list".to_string()))?;
    if items.is_empty() {
        return Err(ApiError::Validation("items must not be empty".to_string()));
    }
    let entries = items
        .iter()
        .map(parse_enqueue_item)
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!("download requested for {} item(s)", entries.len());
    let snapshot = state.registry.enqueue(entries).await?;
    Ok(Json(serde_json::to_value(snapshot).map_err(anyhow::Error::from)?))
}

async fn start_url_downloads(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let urls: Vec<String> = payload
        .get("urls")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .ok_or_else(|| ApiError::Validation("urls must be a list".to_string()))?;
    if urls.is_empty() {
        return Err(ApiError::Validation("urls must not be empty".to_string()));
    }

    tracing::info!("URL download requested for {} url(s)", urls.len());
    // One bad URL must not block the batch: each resolution failure rides
    // along as a failed job.
    let resolutions = join_all(urls.iter().map(|url| state.executor.resolve_url(url))).await;
    let entries = urls
        .into_iter()
        .zip(resolutions)
        .map(|(url, resolved)| match resolved {
            Ok(item) => EnqueueEntry::Item {
                item,
                force_no_db: false,
            },
            Err(e) => EnqueueEntry::FailedUrl {
                url,
                error: e.to_string(),
            },
        })
        .collect();

    let snapshot = state.registry.enqueue(entries).await?;
    Ok(Json(serde_json::to_value(snapshot).map_err(anyhow::Error::from)?))
}

// ── queue ─────────────────────────────────────────────────────────────────

async fn queue_state(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let snapshot = state.registry.snapshot().await?;
    Ok(Json(serde_json::to_value(snapshot).map_err(anyhow::Error::from)?))
}

async fn queue_action(
    State(state): State<AppState>,
    Path((job_id, action)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let action: JobAction = action
        .parse()
        .map_err(|_| ApiError::Validation(format!("unknown action '{action}'")))?;
    match state.registry.act(job_id, action).await? {
        ActionOutcome::Queue(snapshot) => Ok(Json(
            serde_json::to_value(snapshot).map_err(anyhow::Error::from)?,
        )),
        ActionOutcome::Saved(saved) => Ok(Json(json!({ "saved": saved }))),
    }
}

// ── saved ─────────────────────────────────────────────────────────────────

async fn saved_items(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(json!({ "saved": state.registry.saved_list().await? })))
}

async fn save_item(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let item = parse_item_ref(&payload)?;
    let saved = state.registry.save_item(item).await?;
    Ok(Json(json!({ "saved": saved })))
}

async fn remove_saved(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let id = require_str(&payload, "id")?;
    let source = require_str(&payload, "source")?;
    let saved = state.registry.remove_saved(source, id).await?;
    Ok(Json(json!({ "saved": saved })))
}

async fn download_saved(
    State(state): State<AppState>,
    payload: Option<Json<Value>>,
) -> Result<Json<Value>, ApiError> {
    let items = match payload.as_ref().and_then(|Json(v)| v.get("items")) {
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .map(parse_item_ref)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        _ => None,
    };
    let snapshot = state.registry.download_saved(items).await?;
    Ok(Json(serde_json::to_value(snapshot).map_err(anyhow::Error::from)?))
}

// ── config / settings / version ───────────────────────────────────────────

async fn get_config(State(state): State<AppState>) -> Json<Value> {
    Json(state.sections.export().await)
}

async fn update_config(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let updates = payload
        .as_object()
        .cloned()
        .ok_or_else(|| ApiError::Validation("body must be an object".to_string()))?;
    Ok(Json(state.sections.update(updates).await?))
}

async fn get_app_settings(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.settings.load().await))
}

async fn update_app_settings(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let patch = payload
        .as_object()
        .cloned()
        .ok_or_else(|| ApiError::Validation("body must be an object".to_string()))?;
    let settings = state.settings.update(patch).await?;
    (state.log_control)(settings.debug_logging);
    Ok(Json(json!(settings)))
}

async fn version_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.version.info().await))
}

// ── event stream ──────────────────────────────────────────────────────────

async fn download_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let registry = state.registry.clone();
    let stream = futures_util::stream::unfold((rx, registry), |(mut rx, registry)| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match event.payload_json() {
                    Ok(data) => {
                        let sse = Event::default().event(event.event_name()).data(data);
                        return Some((Ok(sse), (rx, registry)));
                    }
                    Err(e) => {
                        warn!("dropping unencodable push event: {e:#}");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // The subscriber fell behind; hand it a fresh snapshot
                    // instead of the lost deltas.
                    warn!("subscriber lagged by {n} events, resyncing");
                    if let Ok(snapshot) = registry.snapshot().await {
                        let event = PushEvent::Queue(snapshot);
                        if let Ok(data) = event.payload_json() {
                            let sse = Event::default().event(event.event_name()).data(data);
                            return Some((Ok(sse), (rx, registry)));
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── payload parsing ───────────────────────────────────────────────────────

fn require_str(payload: &Value, key: &str) -> Result<String, ApiError> {
    payload
        .get(key)
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::Validation(format!("'{key}' is required")))
}

fn parse_item_ref(payload: &Value) -> Result<ItemRef, ApiError> {
    let id = require_str(payload, "id")?;
    let source = require_str(payload, "source")?;
    let media_type = require_str(payload, "media_type").unwrap_or_default();
    let title = payload
        .get("title")
        .or_else(|| payload.get("name"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| id.clone());
    let artist = payload
        .get("artist")
        .and_then(stringify_artist);
    let url = payload
        .get("url")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    Ok(ItemRef {
        id,
        source,
        media_type,
        title,
        artist,
        url,
    })
}

fn parse_enqueue_item(payload: &Value) -> Result<EnqueueEntry, ApiError> {
    let item = parse_item_ref(payload)?;
    let force_no_db = payload
        .get("force_no_db")
        .or_else(|| payload.get("no_db"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    Ok(EnqueueEntry::Item { item, force_no_db })
}
