use serde::{Deserialize, Serialize};

/// Opaque job identifier. Assigned once at enqueue time, never reused.
pub type JobId = String;

/// Generate a fresh job id: 32 hex chars from 128 random bits.
pub fn new_job_id() -> JobId {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let hi: u64 = rng.gen();
    let lo: u64 = rng.gen();
    format!("{:016x}{:016x}", hi, lo)
}

/// Lifecycle state of a queued download.
///
/// Transitions:
///   Queued -> InProgress -> {Completed, Partial, Failed}
///   InProgress -> Retrying -> InProgress   (backoff between attempts)
///   InProgress | Queued -> Aborted         (user abort)
///   any terminal -> Queued                 (user retry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Retrying,
    Completed,
    Partial,
    Failed,
    Aborted,
}

impl JobStatus {
    /// True for states that end an execution until the user acts again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed | JobStatus::Aborted
        )
    }

    /// Terminal and unsuccessful.
    pub fn is_failure(&self) -> bool {
        matches!(self, JobStatus::Failed)
    }
}

/// The media item a job downloads. Copied into the job at enqueue time —
/// search results may be discarded while the job is still running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: String,
    pub source: String,
    pub media_type: String,
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ItemRef {
    /// Identity within the saved list and the history log.
    pub fn key(&self) -> (String, String) {
        (self.source.clone(), self.id.clone())
    }

    pub fn display_label(&self) -> String {
        match &self.artist {
            Some(artist) => format!("{} — {}", self.title, artist),
            None => self.title.clone(),
        }
    }
}

/// One queued download unit, owned by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub item: ItemRef,
    pub status: JobStatus,
    pub attempts: u32,
    pub error: Option<String>,
    /// True once the terminal outcome covered every track.
    pub downloaded: bool,
    /// Ask the executor to ignore its already-downloaded cache this attempt.
    pub force_no_db: bool,
}

impl Job {
    pub fn new(item: ItemRef) -> Self {
        Self {
            job_id: new_job_id(),
            item,
            status: JobStatus::Queued,
            attempts: 0,
            error: None,
            downloaded: false,
            force_no_db: false,
        }
    }
}

/// A durable record marking an item as previously downloaded. Used to flag
/// search results across sessions; append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub source: String,
    pub media_type: String,
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl HistoryEntry {
    pub fn key(&self) -> (String, String) {
        (self.source.clone(), self.id.clone())
    }
}

impl From<&ItemRef> for HistoryEntry {
    fn from(item: &ItemRef) -> Self {
        Self {
            id: item.id.clone(),
            source: item.source.clone(),
            media_type: item.media_type.clone(),
            title: item.title.clone(),
            artist: item.artist.clone(),
            url: item.url.clone(),
        }
    }
}

/// One search result as shown in the results table. `downloaded` is derived
/// client- and server-side from history plus terminal job outcomes; it is
/// never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub id: String,
    pub source: String,
    pub media_type: String,
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album_type: Option<String>,
    #[serde(default)]
    pub tracks: Option<u32>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub downloaded: bool,
}

impl ResultRow {
    pub fn item(&self) -> ItemRef {
        ItemRef {
            id: self.id.clone(),
            source: self.source.clone(),
            media_type: self.media_type.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
            url: None,
        }
    }
}

/// Flatten the artist field of a provider payload to a display string.
/// Providers disagree on shape: plain string, `{name: ...}` objects, or
/// lists of either. Lists are comma-joined.
pub fn stringify_artist(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => ["name", "artist", "title"]
            .iter()
            .find_map(|k| map.get(*k).and_then(|v| v.as_str()))
            .map(|s| s.to_string()),
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(stringify_artist).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_ids_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(new_job_id()));
        }
    }

    #[test]
    fn test_status_terminal_set() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Partial.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Aborted.is_terminal());
        assert!(JobStatus::Failed.is_failure());
        assert!(!JobStatus::Partial.is_failure());
    }

    #[test]
    fn test_stringify_artist_shapes() {
        assert_eq!(
            stringify_artist(&json!("Four Tet")),
            Some("Four Tet".to_string())
        );
        assert_eq!(
            stringify_artist(&json!({"name": "Burial"})),
            Some("Burial".to_string())
        );
        assert_eq!(
            stringify_artist(&json!([{"name": "Burial"}, "Four Tet"])),
            Some("Burial, Four Tet".to_string())
        );
        assert_eq!(stringify_artist(&json!(null)), None);
        assert_eq!(stringify_artist(&json!([])), None);
    }

    #[test]
    fn test_display_label() {
        let mut item = ItemRef {
            id: "1".into(),
            source: "qobuz".into(),
            media_type: "album".into(),
            title: "Untrue".into(),
            artist: Some("Burial".into()),
            url: None,
        };
        assert_eq!(item.display_label(), "Untrue — Burial");
        item.artist = None;
        assert_eq!(item.display_label(), "Untrue");
    }
}
