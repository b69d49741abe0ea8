//! Release update check, backing the panel's version badge.
//!
//! Queries the GitHub releases API at most once per day; the answer is
//! cached on disk so restarts stay quiet. Lookup failures are logged and
//! leave `latest` empty — the badge just stays hidden.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_REPO: &str = "ripdeck/ripdeck";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub checked_at: Option<DateTime<Utc>>,
    pub app: AppVersion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppVersion {
    pub version: String,
    pub latest: Option<String>,
    pub repo: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VersionCache {
    checked_at: Option<DateTime<Utc>>,
    latest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    tag_name: Option<String>,
}

pub struct VersionService {
    cache_path: PathBuf,
    repo: String,
    client: reqwest::Client,
}

impl VersionService {
    pub fn new(cache_path: PathBuf) -> Self {
        let repo = std::env::var("RIPDECK_REPO").unwrap_or_else(|_| DEFAULT_REPO.to_string());
        Self {
            cache_path,
            repo,
            client: reqwest::Client::new(),
        }
    }

    pub async fn info(&self) -> VersionInfo {
        let mut cache = self.read_cache().await;
        let stale = cache
            .checked_at
            .map(|at| Utc::now() - at >= Duration::hours(24))
            .unwrap_or(true);
        if stale {
            cache = self.refresh().await;
        }
        VersionInfo {
            checked_at: cache.checked_at,
            app: AppVersion {
                version: APP_VERSION.to_string(),
                latest: cache.latest,
                repo: self.repo.clone(),
            },
        }
    }

    async fn refresh(&self) -> VersionCache {
        let latest = match self.latest_release().await {
            Ok(tag) => tag,
            Err(e) => {
                warn!("release lookup failed: {e}");
                None
            }
        };
        let cache = VersionCache {
            checked_at: Some(Utc::now()),
            latest,
        };
        if let Err(e) = self.write_cache(&cache).await {
            warn!("could not persist version cache: {e:#}");
        }
        cache
    }

    async fn latest_release(&self) -> anyhow::Result<Option<String>> {
        let url = format!("https://api.github.com/repos/{}/releases/latest", self.repo);
        debug!(%url, "checking latest release");
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", format!("ripdeck/{APP_VERSION}"))
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?;
        let release: ReleaseResponse = response.json().await?;
        Ok(release.tag_name)
    }

    async fn read_cache(&self) -> VersionCache {
        match tokio::fs::read_to_string(&self.cache_path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => VersionCache::default(),
        }
    }

    async fn write_cache(&self, cache: &VersionCache) -> anyhow::Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.cache_path, serde_json::to_string_pretty(cache)?).await?;
        Ok(())
    }
}
