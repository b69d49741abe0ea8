//! Direct-URL executor.
//!
//! The bundled adapter for items submitted as plain URLs: streams the
//! response body to the download directory, reporting byte progress as it
//! goes. Provider catalogs (search, multi-track albums) need a provider
//! adapter and are reported as unsupported here.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rip_proto::model::{ItemRef, ResultRow};
use rip_proto::protocol::TrackStatus;

use crate::error::ExecutorError;

use super::{ExecRequest, ExecutorAdapter, ExecutorEvent, TrackEvent};

pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn send(
        &self,
        events: &mpsc::Sender<ExecutorEvent>,
        job_id: &str,
        event: TrackEvent,
    ) {
        let _ = events
            .send(ExecutorEvent {
                job_id: job_id.to_string(),
                event,
            })
            .await;
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutorAdapter for HttpExecutor {
    async fn search(
        &self,
        source: &str,
        _media_type: &str,
        _query: &str,
        _limit: usize,
    ) -> Result<Vec<ResultRow>, ExecutorError> {
        Err(ExecutorError::Unsupported {
            source_name: source.to_string(),
            operation: "catalog search",
        })
    }

    async fn resolve_url(&self, url: &str) -> Result<ItemRef, ExecutorError> {
        classify_url(url)
    }

    async fn execute(
        &self,
        request: ExecRequest,
        events: mpsc::Sender<ExecutorEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ExecutorError> {
        let url = request
            .item
            .url
            .clone()
            .unwrap_or_else(|| request.item.id.clone());

        if request.item.source == "lastfm" {
            return Err(ExecutorError::Unsupported {
                source_name: "lastfm".to_string(),
                operation: "playlist resolution (requires a provider backend)",
            });
        }

        // Single-track item: the URL itself is the track.
        let track_id = request.item.id.clone();
        let title = request.item.title.clone();
        let target = target_path(&request.download_dir, &title, &url);

        if target.exists() && !request.force_no_db {
            debug!(job_id = %request.job_id, path = %target.display(), "target exists, skipping");
            self.send(
                &events,
                &request.job_id,
                TrackEvent::Finished {
                    track_id,
                    status: TrackStatus::Skipped,
                    message: Some("already downloaded".to_string()),
                },
            )
            .await;
            return Ok(());
        }

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ExecutorError::Transfer(e.to_string()))?;
        let total = response.content_length().unwrap_or(0);

        self.send(
            &events,
            &request.job_id,
            TrackEvent::Started {
                track_id: track_id.clone(),
                title: title.clone(),
                total,
            },
        )
        .await;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ExecutorError::Transfer(e.to_string()))?;
        }
        let part = target.with_extension("part");
        let mut file = tokio::fs::File::create(&part)
            .await
            .map_err(|e| ExecutorError::Transfer(e.to_string()))?;

        info!(job_id = %request.job_id, url = %url, "transfer started ({} bytes)", total);

        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                _ = cancel.cancelled() => {
                    warn!(job_id = %request.job_id, "transfer cancelled, removing partial file");
                    drop(file);
                    let _ = tokio::fs::remove_file(&part).await;
                    return Err(ExecutorError::Cancelled);
                }
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| {
                let _ = std::fs::remove_file(&part);
                ExecutorError::Transfer(e.to_string())
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ExecutorError::Transfer(e.to_string()))?;
            received += chunk.len() as u64;
            self.send(
                &events,
                &request.job_id,
                TrackEvent::Bytes {
                    track_id: track_id.clone(),
                    received,
                    total,
                },
            )
            .await;
        }
        file.flush()
            .await
            .map_err(|e| ExecutorError::Transfer(e.to_string()))?;
        drop(file);
        tokio::fs::rename(&part, &target)
            .await
            .map_err(|e| ExecutorError::Transfer(e.to_string()))?;

        info!(job_id = %request.job_id, path = %target.display(), "transfer complete ({} bytes)", received);

        self.send(
            &events,
            &request.job_id,
            TrackEvent::Finished {
                track_id,
                status: TrackStatus::Downloaded,
                message: None,
            },
        )
        .await;
        Ok(())
    }
}

/// Map a raw URL to item metadata. last.fm playlist links get their own
/// source so a provider adapter can claim them; everything else is a direct
/// transfer.
pub fn classify_url(url: &str) -> Result<ItemRef, ExecutorError> {
    let host = host_of(url).ok_or_else(|| ExecutorError::Resolution {
        url: url.to_string(),
        reason: "not an http(s) URL".to_string(),
    })?;

    if host == "last.fm" || host == "www.last.fm" {
        // The playlist API only answers on the www host.
        let normalized = url.replacen("://last.fm", "://www.last.fm", 1);
        return Ok(ItemRef {
            id: normalized.clone(),
            source: "lastfm".to_string(),
            media_type: "lastfm".to_string(),
            title: normalized.clone(),
            artist: None,
            url: Some(normalized),
        });
    }

    Ok(ItemRef {
        id: url.to_string(),
        source: "url".to_string(),
        media_type: "url".to_string(),
        title: title_from_url(url),
        artist: None,
        url: Some(url.to_string()),
    })
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit('@').next()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Use the last path segment as a display title, falling back to the URL.
fn title_from_url(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.trim_end_matches('/').rsplit('/').next())
        .filter(|seg| !seg.is_empty() && !seg.contains("://"))
        .map(|seg| seg.to_string())
        .unwrap_or_else(|| url.to_string())
}

fn target_path(download_dir: &Path, title: &str, url: &str) -> PathBuf {
    let name = if title.is_empty() {
        title_from_url(url)
    } else {
        title.to_string()
    };
    download_dir.join(sanitize_file_name(&name))
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_direct_url() {
        let item = classify_url("https://example.com/mixes/show.mp3").unwrap();
        assert_eq!(item.source, "url");
        assert_eq!(item.media_type, "url");
        assert_eq!(item.title, "show.mp3");
        assert_eq!(item.url.as_deref(), Some("https://example.com/mixes/show.mp3"));
    }

    #[test]
    fn test_classify_lastfm_normalizes_host() {
        let item = classify_url("https://last.fm/user/someone/playlists/123").unwrap();
        assert_eq!(item.source, "lastfm");
        assert!(item.url.as_deref().unwrap().contains("://www.last.fm/"));
    }

    #[test]
    fn test_classify_www_lastfm() {
        let item = classify_url("https://www.last.fm/user/someone/playlists/123").unwrap();
        assert_eq!(item.source, "lastfm");
        assert_eq!(
            item.url.as_deref(),
            Some("https://www.last.fm/user/someone/playlists/123")
        );
    }

    #[test]
    fn test_classify_rejects_garbage() {
        assert!(classify_url("not a url at all").is_err());
        assert!(classify_url("ftp://example.com/x").is_err());
        assert!(classify_url("https://").is_err());
    }

    #[test]
    fn test_title_from_url() {
        assert_eq!(
            title_from_url("https://example.com/a/b/episode-12.flac?auth=x"),
            "episode-12.flac"
        );
        assert_eq!(title_from_url("https://example.com/"), "example.com");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a/b:c*d"), "a-b-c-d");
    }
}
