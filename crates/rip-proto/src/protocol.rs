use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{HistoryEntry, ItemRef, Job, JobId};

/// State of a single track inside a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    Resolving,
    Ready,
    Downloading,
    Downloaded,
    Skipped,
    Failed,
}

impl TrackStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrackStatus::Downloaded | TrackStatus::Skipped | TrackStatus::Failed
        )
    }
}

/// Byte-level progress for the whole item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallProgress {
    pub received: u64,
    pub total: u64,
    /// Estimated seconds remaining. `None` when no rate is computable yet —
    /// an explicit unknown, never zero.
    pub eta: Option<f64>,
}

/// The track currently being processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub track_id: String,
    pub title: String,
}

/// Transfer progress for the current track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackProgress {
    pub track_id: String,
    pub desc: String,
    pub received: u64,
    pub total: u64,
    pub eta: Option<f64>,
    pub status: TrackStatus,
    pub message: Option<String>,
}

/// Per-track state as carried in the snapshot's track map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    pub received: u64,
    pub total: u64,
    pub status: TrackStatus,
    pub message: Option<String>,
    pub title: String,
}

/// Aggregated terminal counts across all tracks in the item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub total_tracks: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub all_downloaded: bool,
}

impl TrackSummary {
    /// Nonzero skipped/failed counts warrant a visible flag in the panel.
    pub fn needs_attention(&self) -> bool {
        self.failed > 0 || self.skipped > 0
    }
}

/// Full progress picture for one job. Each new executor event produces a
/// fresh snapshot that supersedes the previous one wholesale; consumers
/// never merge fields from different snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    pub overall: OverallProgress,
    pub track: Option<TrackDescriptor>,
    pub progress: Option<TrackProgress>,
    pub summary: TrackSummary,
    pub tracks: BTreeMap<String, TrackState>,
}

impl ProgressSnapshot {
    pub fn empty(job_id: JobId) -> Self {
        Self {
            job_id,
            overall: OverallProgress::default(),
            track: None,
            progress: None,
            summary: TrackSummary::default(),
            tracks: BTreeMap::new(),
        }
    }
}

/// A full, self-consistent read of queue + progress + history at one
/// instant. `rev` increments on every registry mutation; clients use it to
/// order snapshots arriving over different channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub rev: u64,
    pub queue: Vec<Job>,
    pub progress: BTreeMap<JobId, ProgressSnapshot>,
    pub history: Vec<HistoryEntry>,
}

/// Progress event payload: the job snapshot plus the registry revision it
/// was taken at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub rev: u64,
    #[serde(flatten)]
    pub snapshot: ProgressSnapshot,
}

/// One message on the `/events/downloads` stream. The variant maps to the
/// SSE event name, the payload to its data line.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Queue(QueueSnapshot),
    Progress(ProgressUpdate),
    Saved(Vec<ItemRef>),
}

impl PushEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            PushEvent::Queue(_) => "queue",
            PushEvent::Progress(_) => "progress",
            PushEvent::Saved(_) => "saved",
        }
    }

    pub fn payload_json(&self) -> anyhow::Result<String> {
        let json = match self {
            PushEvent::Queue(snap) => serde_json::to_string(snap)?,
            PushEvent::Progress(update) => serde_json::to_string(update)?,
            PushEvent::Saved(items) => serde_json::to_string(items)?,
        };
        Ok(json)
    }

    /// Reconstruct an event from an SSE frame (event name + data payload).
    pub fn decode(event: &str, data: &str) -> anyhow::Result<Self> {
        match event {
            "queue" => Ok(PushEvent::Queue(serde_json::from_str(data)?)),
            "progress" => Ok(PushEvent::Progress(serde_json::from_str(data)?)),
            "saved" => Ok(PushEvent::Saved(serde_json::from_str(data)?)),
            other => anyhow::bail!("unknown event '{}'", other),
        }
    }
}
