//! The panel's single reducer.
//!
//! Push frames and poll snapshots both land here as [`StoreEvent`]s; the
//! store keeps one canonical queue view and emits [`Effect`]s (toasts, the
//! back-to-results transition) for the shell to act on. Freshness is
//! decided by the server's monotonic snapshot revision: a snapshot older
//! than what the store already holds is discarded no matter which channel
//! it arrived on, which makes application commutative for equally-fresh
//! data.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use rip_proto::model::{HistoryEntry, ItemRef, Job, JobId, JobStatus, ResultRow};
use rip_proto::protocol::{ProgressSnapshot, ProgressUpdate, PushEvent, QueueSnapshot};

use crate::batch::BatchTracker;
use crate::toast::{Severity, ToastManager};

/// Which transport delivered a snapshot. Both are applied identically —
/// the field exists for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Push,
    Poll,
}

#[derive(Debug)]
pub enum StoreEvent {
    Queue {
        via: Channel,
        snapshot: QueueSnapshot,
    },
    Progress(ProgressUpdate),
    Saved(Vec<ItemRef>),
}

impl StoreEvent {
    pub fn from_push(event: PushEvent) -> Self {
        match event {
            PushEvent::Queue(snapshot) => StoreEvent::Queue {
                via: Channel::Push,
                snapshot,
            },
            PushEvent::Progress(update) => StoreEvent::Progress(update),
            PushEvent::Saved(items) => StoreEvent::Saved(items),
        }
    }
}

/// Side effects for the shell: show a toast, or navigate back to the
/// results table because the submitted batch finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Toast {
        severity: Severity,
        message: String,
    },
    ReturnToResults,
}

pub struct PanelStore {
    rev: u64,
    queue: Vec<Job>,
    progress: BTreeMap<JobId, ProgressSnapshot>,
    history: Vec<HistoryEntry>,
    history_index: HashSet<(String, String)>,
    saved: Vec<ItemRef>,
    batch: Option<BatchTracker>,
    last_status: HashMap<JobId, JobStatus>,
    pub toasts: ToastManager,
}

impl PanelStore {
    pub fn new() -> Self {
        Self {
            rev: 0,
            queue: Vec::new(),
            progress: BTreeMap::new(),
            history: Vec::new(),
            history_index: HashSet::new(),
            saved: Vec::new(),
            batch: None,
            last_status: HashMap::new(),
            toasts: ToastManager::new(),
        }
    }

    /// Register the jobs created by the user's latest submit action. The
    /// caller applies the enqueue response snapshot first, then registers
    /// the ids it contained.
    pub fn begin_batch(&mut self, job_ids: impl IntoIterator<Item = JobId>) {
        self.batch = Some(BatchTracker::new(job_ids));
    }

    pub fn apply(&mut self, event: StoreEvent) -> Vec<Effect> {
        match event {
            StoreEvent::Queue { via, snapshot } => self.apply_queue(via, snapshot),
            StoreEvent::Progress(update) => {
                self.apply_progress(update);
                Vec::new()
            }
            StoreEvent::Saved(items) => {
                self.saved = items;
                Vec::new()
            }
        }
    }

    fn apply_queue(&mut self, via: Channel, snapshot: QueueSnapshot) -> Vec<Effect> {
        if snapshot.rev < self.rev {
            debug!(
                ?via,
                incoming = snapshot.rev,
                current = self.rev,
                "discarding stale snapshot"
            );
            return Vec::new();
        }
        self.rev = snapshot.rev;

        let mut effects = Vec::new();

        // Whole-state replacement: queue, progress, and history all come
        // from this snapshot. Derived flags are recomputed, never merged.
        self.queue = snapshot.queue;
        self.progress = snapshot.progress;
        self.history = snapshot.history;
        self.history_index = self.history.iter().map(|entry| entry.key()).collect();

        // Edge-detect failures for error toasts; the toast manager
        // suppresses repeats of the same message.
        for job in &self.queue {
            let previous = self.last_status.get(&job.job_id).copied();
            if job.status == JobStatus::Failed && previous != Some(JobStatus::Failed) {
                let message = match &job.error {
                    Some(error) => format!("Download failed: {} ({error})", job.item.display_label()),
                    None => format!("Download failed: {}", job.item.display_label()),
                };
                self.toasts.error(message.clone());
                effects.push(Effect::Toast {
                    severity: Severity::Error,
                    message,
                });
            }
        }
        self.last_status = self
            .queue
            .iter()
            .map(|job| (job.job_id.clone(), job.status))
            .collect();

        if let Some(batch) = self.batch.as_mut() {
            if batch.observe(&self.queue) {
                let message = "Downloads complete".to_string();
                self.toasts.success(message.clone());
                effects.push(Effect::Toast {
                    severity: Severity::Success,
                    message,
                });
                effects.push(Effect::ReturnToResults);
                self.batch = None;
            }
        }

        effects
    }

    fn apply_progress(&mut self, update: ProgressUpdate) {
        if update.rev < self.rev {
            debug!(
                incoming = update.rev,
                current = self.rev,
                "discarding stale progress"
            );
            return;
        }
        let job_id = update.snapshot.job_id.clone();
        // Progress for a job the registry no longer lists is stale. Leave
        // the revision untouched so a queue snapshot that does list the job
        // is not mistaken for old data.
        if !self.queue.iter().any(|job| job.job_id == job_id) {
            debug!(%job_id, "discarding progress for unknown job");
            return;
        }
        self.rev = update.rev;
        // Snapshots supersede wholesale; no field-by-field merging.
        self.progress.insert(job_id, update.snapshot);
    }

    // ── view accessors ───────────────────────────────────────────────────

    pub fn rev(&self) -> u64 {
        self.rev
    }

    pub fn queue(&self) -> &[Job] {
        &self.queue
    }

    pub fn saved(&self) -> &[ItemRef] {
        &self.saved
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn progress_for(&self, job_id: &str) -> Option<&ProgressSnapshot> {
        self.progress.get(job_id)
    }

    pub fn status_of(&self, job_id: &str) -> Option<JobStatus> {
        self.queue
            .iter()
            .find(|job| job.job_id == job_id)
            .map(|job| job.status)
    }

    /// A job renders as actively in progress only while it has a live
    /// progress snapshot and a non-terminal status; otherwise the
    /// server-reported status governs.
    pub fn is_active(&self, job: &Job) -> bool {
        self.progress.contains_key(&job.job_id) && !job.status.is_terminal()
    }

    /// Nonzero skipped/failed track counts get a visible flag.
    pub fn needs_attention(&self, job: &Job) -> bool {
        job.status == JobStatus::Partial
            || self
                .progress
                .get(&job.job_id)
                .map(|snap| snap.summary.needs_attention())
                .unwrap_or(false)
    }

    /// Recompute the derived `downloaded` flags on search results from
    /// history. Applied after every snapshot; never overwritten by one.
    pub fn mark_rows(&self, rows: &mut [ResultRow]) {
        for row in rows {
            row.downloaded = self
                .history_index
                .contains(&(row.source.clone(), row.id.clone()));
        }
    }
}

impl Default for PanelStore {
    fn default() -> Self {
        Self::new()
    }
}
