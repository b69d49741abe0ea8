//! Saved-for-later and download-history stores.
//!
//! Both are small pretty-printed JSON files in the data directory. They are
//! owned by the registry core, so file access is never concurrent.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

use rip_proto::model::{HistoryEntry, ItemRef};

/// Items the user set aside instead of downloading now. Identity is the
/// `(source, id)` pair; adding an existing identity overwrites it.
pub struct SavedStore {
    path: PathBuf,
}

impl SavedStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn list(&self) -> Vec<ItemRef> {
        read_json(&self.path).await
    }

    pub async fn add(&self, item: ItemRef) -> anyhow::Result<Vec<ItemRef>> {
        let mut items = self.list().await;
        items.retain(|existing| existing.key() != item.key());
        items.push(item);
        self.write(&items).await?;
        Ok(items)
    }

    pub async fn remove(&self, source: &str, id: &str) -> anyhow::Result<Vec<ItemRef>> {
        let mut items = self.list().await;
        items.retain(|existing| !(existing.source == source && existing.id == id));
        self.write(&items).await?;
        Ok(items)
    }

    async fn write(&self, items: &[ItemRef]) -> anyhow::Result<()> {
        write_json(&self.path, items).await
    }
}

/// Append-only log of successfully downloaded `(source, id)` pairs, kept to
/// mark search results as already downloaded across sessions.
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn list(&self) -> Vec<HistoryEntry> {
        read_json(&self.path).await
    }

    pub async fn index(&self) -> HashSet<(String, String)> {
        self.list().await.iter().map(|entry| entry.key()).collect()
    }

    /// Append an entry unless its identity is already recorded.
    pub async fn add(&self, entry: HistoryEntry) -> anyhow::Result<()> {
        let mut entries = self.list().await;
        if entries.iter().any(|existing| existing.key() == entry.key()) {
            return Ok(());
        }
        entries.push(entry);
        write_json(&self.path, &entries).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Vec<T> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(items) => items,
            Err(e) => {
                warn!("ignoring unreadable store {}: {}", path.display(), e);
                Vec::new()
            }
        },
        Err(_) => Vec::new(),
    }
}

async fn write_json<T: serde::Serialize>(path: &PathBuf, items: &[T]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(items)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(source: &str, id: &str) -> ItemRef {
        ItemRef {
            id: id.to_string(),
            source: source.to_string(),
            media_type: "album".to_string(),
            title: format!("title-{id}"),
            artist: None,
            url: None,
        }
    }

    #[tokio::test]
    async fn test_saved_add_is_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = SavedStore::new(dir.path().join("saved.json"));

        store.add(item("qobuz", "1")).await.unwrap();
        store.add(item("qobuz", "1")).await.unwrap();
        store.add(item("tidal", "1")).await.unwrap();

        let items = store.list().await;
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_saved_remove_by_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = SavedStore::new(dir.path().join("saved.json"));
        store.add(item("qobuz", "1")).await.unwrap();
        store.add(item("qobuz", "2")).await.unwrap();

        let remaining = store.remove("qobuz", "1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "2");
    }

    #[tokio::test]
    async fn test_history_dedups_on_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));

        let entry = HistoryEntry::from(&item("qobuz", "1"));
        store.add(entry.clone()).await.unwrap();
        store.add(entry).await.unwrap();

        assert_eq!(store.list().await.len(), 1);
        assert!(store
            .index()
            .await
            .contains(&("qobuz".to_string(), "1".to_string())));
    }

    #[tokio::test]
    async fn test_stores_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.json");
        SavedStore::new(path.clone())
            .add(item("deezer", "9"))
            .await
            .unwrap();

        let reloaded = SavedStore::new(path);
        assert_eq!(reloaded.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_store_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        assert!(SavedStore::new(path).list().await.is_empty());
    }
}
