//! Job registry — single-owner event loop for all queue state.
//!
//! Every mutation (enqueue, user actions, executor callbacks) arrives as a
//! [`RegistryEvent`] on one channel and is applied by [`RegistryCore::run`]
//! exclusively. HTTP handlers hold a [`RegistryHandle`] and never touch the
//! state directly; executor tasks report back over the same channel. Racing
//! inputs (an abort against a completion) therefore resolve in arrival
//! order, exactly once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rip_proto::config::DownloadsConfig;
use rip_proto::model::{HistoryEntry, ItemRef, Job, JobId, JobStatus};
use rip_proto::protocol::QueueSnapshot;

use crate::error::{ActionError, ApiError, ExecutorError};
use crate::events::EventHub;
use crate::executor::{ExecRequest, ExecutorAdapter, ExecutorEvent, TrackEvent};
use crate::progress::ProgressTracker;
use crate::stores::{HistoryStore, SavedStore};

/// User-initiated queue actions, as they appear in the route path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Retry,
    Abort,
    Save,
    Force,
}

impl std::str::FromStr for JobAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(JobAction::Retry),
            "abort" => Ok(JobAction::Abort),
            "save" => Ok(JobAction::Save),
            "force" => Ok(JobAction::Force),
            _ => Err(()),
        }
    }
}

/// One unit of an enqueue batch. URL resolution happens before the batch
/// reaches the registry, so a bad URL arrives as `FailedUrl` and becomes a
/// failed job without blocking its siblings.
#[derive(Debug, Clone)]
pub enum EnqueueEntry {
    Item { item: ItemRef, force_no_db: bool },
    FailedUrl { url: String, error: String },
}

/// What a queue action hands back to the HTTP layer.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Queue(QueueSnapshot),
    Saved(Vec<ItemRef>),
}

enum RegistryEvent {
    Enqueue {
        entries: Vec<EnqueueEntry>,
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Act {
        job_id: JobId,
        action: JobAction,
        reply: oneshot::Sender<Result<ActionOutcome, ActionError>>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    SavedList {
        reply: oneshot::Sender<Vec<ItemRef>>,
    },
    SaveItem {
        item: ItemRef,
        reply: oneshot::Sender<Vec<ItemRef>>,
    },
    RemoveSaved {
        source: String,
        id: String,
        reply: oneshot::Sender<Vec<ItemRef>>,
    },
    DownloadSaved {
        items: Option<Vec<ItemRef>>,
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Exec(ExecutorEvent),
    AttemptStarted {
        job_id: JobId,
        attempt: u32,
    },
    AttemptFailed {
        job_id: JobId,
        attempt: u32,
        error: String,
    },
    Finished {
        job_id: JobId,
        result: Result<(), ExecutorError>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap cloneable front door to the registry loop.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryEvent>,
}

impl RegistryHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RegistryEvent,
    ) -> anyhow::Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| anyhow::anyhow!("registry is not running"))?;
        reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("registry dropped the request"))
    }

    pub async fn enqueue(&self, entries: Vec<EnqueueEntry>) -> anyhow::Result<QueueSnapshot> {
        self.request(|reply| RegistryEvent::Enqueue { entries, reply })
            .await
    }

    pub async fn act(&self, job_id: JobId, action: JobAction) -> Result<ActionOutcome, ApiError> {
        self.request(|reply| RegistryEvent::Act {
            job_id,
            action,
            reply,
        })
        .await?
        .map_err(ApiError::from)
    }

    pub async fn snapshot(&self) -> anyhow::Result<QueueSnapshot> {
        self.request(|reply| RegistryEvent::Snapshot { reply }).await
    }

    pub async fn saved_list(&self) -> anyhow::Result<Vec<ItemRef>> {
        self.request(|reply| RegistryEvent::SavedList { reply }).await
    }

    pub async fn save_item(&self, item: ItemRef) -> anyhow::Result<Vec<ItemRef>> {
        self.request(|reply| RegistryEvent::SaveItem { item, reply })
            .await
    }

    pub async fn remove_saved(&self, source: String, id: String) -> anyhow::Result<Vec<ItemRef>> {
        self.request(|reply| RegistryEvent::RemoveSaved { source, id, reply })
            .await
    }

    pub async fn download_saved(
        &self,
        items: Option<Vec<ItemRef>>,
    ) -> anyhow::Result<QueueSnapshot> {
        self.request(|reply| RegistryEvent::DownloadSaved { items, reply })
            .await
    }

    /// Cancel in-flight jobs and stop the loop once they have drained.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.request(|reply| RegistryEvent::Shutdown { reply }).await
    }
}

pub struct RegistryCore {
    config: DownloadsConfig,
    executor: Arc<dyn ExecutorAdapter>,
    hub: EventHub,
    tracker: ProgressTracker,
    saved: SavedStore,
    history: HistoryStore,

    jobs: HashMap<JobId, Job>,
    /// Presentation order of the active queue.
    display_order: Vec<JobId>,
    /// Jobs waiting for an execution slot.
    pending: VecDeque<JobId>,
    /// Cancellation token per executing job.
    running: HashMap<JobId, CancellationToken>,
    /// Monotonic snapshot revision, incremented on every mutation.
    rev: u64,
    /// In-memory mirror of the history log.
    history_entries: Vec<HistoryEntry>,
    downloaded_index: HashSet<(String, String)>,

    tx: mpsc::Sender<RegistryEvent>,
    rx: mpsc::Receiver<RegistryEvent>,
    shutdown_reply: Option<oneshot::Sender<()>>,
}

impl RegistryCore {
    pub fn new(
        config: DownloadsConfig,
        executor: Arc<dyn ExecutorAdapter>,
        hub: EventHub,
        saved: SavedStore,
        history: HistoryStore,
    ) -> (Self, RegistryHandle) {
        let (tx, rx) = mpsc::channel(256);
        let handle = RegistryHandle { tx: tx.clone() };
        let core = Self {
            config,
            executor,
            hub,
            tracker: ProgressTracker::new(),
            saved,
            history,
            jobs: HashMap::new(),
            display_order: Vec::new(),
            pending: VecDeque::new(),
            running: HashMap::new(),
            rev: 1,
            history_entries: Vec::new(),
            downloaded_index: HashSet::new(),
            tx,
            rx,
            shutdown_reply: None,
        };
        (core, handle)
    }

    /// Run the event loop until shutdown. All state lives behind `&mut
    /// self` here; nothing else ever mutates it.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.history_entries = self.history.list().await;
        self.downloaded_index = self.history_entries.iter().map(|e| e.key()).collect();
        info!(
            "registry: starting event loop ({} history entries)",
            self.history_entries.len()
        );

        while let Some(event) = self.rx.recv().await {
            self.handle_event(event).await;
            if self.shutdown_reply.is_some() && self.running.is_empty() {
                break;
            }
        }

        if let Some(reply) = self.shutdown_reply.take() {
            let _ = reply.send(());
        }
        info!("registry: event loop stopped");
        Ok(())
    }

    async fn handle_event(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::Enqueue { entries, reply } => {
                self.enqueue_entries(entries);
                self.publish_queue();
                self.schedule();
                let _ = reply.send(self.queue_snapshot());
            }
            RegistryEvent::Act {
                job_id,
                action,
                reply,
            } => {
                let outcome = self.act(job_id, action).await;
                let _ = reply.send(outcome);
            }
            RegistryEvent::Snapshot { reply } => {
                let _ = reply.send(self.queue_snapshot());
            }
            RegistryEvent::SavedList { reply } => {
                let _ = reply.send(self.saved.list().await);
            }
            RegistryEvent::SaveItem { item, reply } => {
                info!(id = %item.id, source = %item.source, "saving item for later");
                let list = match self.saved.add(item).await {
                    Ok(list) => list,
                    Err(e) => {
                        error!("saved store write failed: {e:#}");
                        self.saved.list().await
                    }
                };
                self.hub.saved(list.clone());
                let _ = reply.send(list);
            }
            RegistryEvent::RemoveSaved { source, id, reply } => {
                info!(%id, %source, "removing saved item");
                let list = match self.saved.remove(&source, &id).await {
                    Ok(list) => list,
                    Err(e) => {
                        error!("saved store write failed: {e:#}");
                        self.saved.list().await
                    }
                };
                self.hub.saved(list.clone());
                let _ = reply.send(list);
            }
            RegistryEvent::DownloadSaved { items, reply } => {
                let entries = match items {
                    Some(items) => items,
                    None => self.saved.list().await,
                };
                info!("downloading {} saved item(s)", entries.len());
                let batch = entries
                    .iter()
                    .cloned()
                    .map(|item| EnqueueEntry::Item {
                        item,
                        force_no_db: false,
                    })
                    .collect();
                self.enqueue_entries(batch);
                for item in &entries {
                    if let Err(e) = self.saved.remove(&item.source, &item.id).await {
                        error!("saved store write failed: {e:#}");
                    }
                }
                self.hub.saved(self.saved.list().await);
                self.publish_queue();
                self.schedule();
                let _ = reply.send(self.queue_snapshot());
            }
            RegistryEvent::Exec(event) => self.on_exec_event(event),
            RegistryEvent::AttemptStarted { job_id, attempt } => {
                self.on_attempt_started(job_id, attempt);
            }
            RegistryEvent::AttemptFailed {
                job_id,
                attempt,
                error,
            } => {
                self.on_attempt_failed(job_id, attempt, error);
            }
            RegistryEvent::Finished { job_id, result } => {
                self.on_finished(job_id, result).await;
            }
            RegistryEvent::Shutdown { reply } => {
                info!(
                    "registry: shutdown requested, cancelling {} running job(s)",
                    self.running.len()
                );
                for token in self.running.values() {
                    token.cancel();
                }
                self.pending.clear();
                self.shutdown_reply = Some(reply);
            }
        }
    }

    // ── enqueue ───────────────────────────────────────────────────────────

    fn enqueue_entries(&mut self, entries: Vec<EnqueueEntry>) {
        for entry in entries {
            match entry {
                EnqueueEntry::Item { item, force_no_db } => self.enqueue_item(item, force_no_db),
                EnqueueEntry::FailedUrl { url, error } => {
                    let item = ItemRef {
                        id: url.clone(),
                        source: "url".to_string(),
                        media_type: "url".to_string(),
                        title: url.clone(),
                        artist: None,
                        url: Some(url.clone()),
                    };
                    let mut job = Job::new(item);
                    job.status = JobStatus::Failed;
                    job.error = Some(error.clone());
                    warn!(job_id = %job.job_id, %url, %error, "URL resolution failed");
                    self.display_order.push(job.job_id.clone());
                    self.jobs.insert(job.job_id.clone(), job);
                }
            }
        }
    }

    fn enqueue_item(&mut self, item: ItemRef, force_no_db: bool) {
        // One live job per item identity; a duplicate submit just
        // re-surfaces the existing job.
        let existing = self
            .jobs
            .values()
            .find(|job| job.item.key() == item.key())
            .map(|job| job.job_id.clone());
        if let Some(job_id) = existing {
            if !self.display_order.contains(&job_id) {
                self.display_order.push(job_id.clone());
            }
            info!(
                %job_id,
                source = %item.source,
                item_id = %item.id,
                "skipping duplicate enqueue"
            );
            return;
        }

        let mut job = Job::new(item);
        job.force_no_db = force_no_db;
        info!(
            job_id = %job.job_id,
            source = %job.item.source,
            media_type = %job.item.media_type,
            item_id = %job.item.id,
            title = %job.item.title,
            "enqueued item"
        );
        self.pending.push_back(job.job_id.clone());
        self.display_order.push(job.job_id.clone());
        self.jobs.insert(job.job_id.clone(), job);
    }

    // ── scheduling / execution ────────────────────────────────────────────

    /// Start queued jobs while execution slots are free.
    fn schedule(&mut self) {
        if self.shutdown_reply.is_some() {
            return;
        }
        let mut deferred: Vec<JobId> = Vec::new();
        while self.running.len() < self.config.max_concurrent.max(1) {
            let Some(job_id) = self.pending.pop_front() else {
                break;
            };
            let eligible = self
                .jobs
                .get(&job_id)
                .map(|job| job.status == JobStatus::Queued)
                .unwrap_or(false);
            if !eligible {
                continue;
            }
            if self.running.contains_key(&job_id) {
                // Retried while its previous execution is still draining;
                // it restarts when that execution reports in.
                deferred.push(job_id);
                continue;
            }
            self.start_job(job_id);
        }
        for job_id in deferred {
            self.pending.push_back(job_id);
        }
    }

    fn start_job(&mut self, job_id: JobId) {
        let Some(job) = self.jobs.get(&job_id) else {
            return;
        };
        debug!(%job_id, "starting execution");
        self.tracker.start_job(&job_id, Instant::now());

        let cancel = CancellationToken::new();
        self.running.insert(job_id.clone(), cancel.clone());

        let request = ExecRequest {
            job_id: job_id.clone(),
            item: job.item.clone(),
            force_no_db: job.force_no_db,
            download_dir: self.config.download_dir.clone(),
        };
        tokio::spawn(run_execution(
            self.executor.clone(),
            request,
            self.config.max_attempts.max(1),
            self.tx.clone(),
            cancel,
        ));
    }

    fn on_attempt_started(&mut self, job_id: JobId, attempt: u32) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        if job.status == JobStatus::Aborted {
            return;
        }
        info!(%job_id, attempt, "attempt started");
        job.status = JobStatus::InProgress;
        job.attempts += 1;
        job.error = None;
        self.publish_queue();
    }

    fn on_attempt_failed(&mut self, job_id: JobId, attempt: u32, error: String) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        if job.status == JobStatus::Aborted {
            return;
        }
        warn!(%job_id, attempt, %error, "attempt failed, backing off");
        job.status = JobStatus::Retrying;
        job.error = Some(error);
        self.publish_queue();
    }

    fn on_exec_event(&mut self, event: ExecutorEvent) {
        // Progress for a job that is not executing is stale.
        if !self.running.contains_key(&event.job_id) {
            return;
        }
        if self
            .jobs
            .get(&event.job_id)
            .map(|job| job.status == JobStatus::Aborted)
            .unwrap_or(true)
        {
            return;
        }
        let now = Instant::now();
        let terminal = matches!(event.event, TrackEvent::Finished { .. });
        if let Some(snapshot) = self.tracker.apply(&event.job_id, &event.event, now) {
            self.rev += 1;
            self.hub.progress(self.rev, snapshot, terminal, now);
        }
    }

    async fn on_finished(&mut self, job_id: JobId, result: Result<(), ExecutorError>) {
        self.running.remove(&job_id);

        let Some(status) = self.jobs.get(&job_id).map(|job| job.status) else {
            self.tracker.discard(&job_id);
            self.hub.forget(&job_id);
            self.schedule();
            return;
        };

        if !matches!(status, JobStatus::InProgress | JobStatus::Retrying) {
            // An abort (or a retry queued behind one) was applied first;
            // the execution outcome loses.
            debug!(%job_id, ?status, "stale execution outcome discarded");
            self.tracker.finish_job(&job_id);
            self.schedule();
            return;
        }

        let summary = self.tracker.finish_job(&job_id);
        match result {
            Ok(()) if summary.all_downloaded => {
                let item = {
                    let job = self.jobs.get_mut(&job_id).expect("job checked above");
                    job.status = JobStatus::Completed;
                    job.downloaded = true;
                    job.force_no_db = false;
                    job.error = None;
                    info!(%job_id, attempts = job.attempts, ?summary, "job completed");
                    job.item.clone()
                };
                self.record_download(&item).await;
                self.remove_saved_entry(&item).await;
                // Terminal state goes out before the job leaves the active
                // set, so subscribers always see it.
                self.publish_queue();
                self.drop_job(&job_id);
                self.publish_queue();
            }
            Ok(()) => {
                let item = {
                    let job = self.jobs.get_mut(&job_id).expect("job checked above");
                    job.status = JobStatus::Partial;
                    job.downloaded = false;
                    job.error = Some(format!(
                        "Tracks failed: {}; skipped: {}",
                        summary.failed, summary.skipped
                    ));
                    info!(%job_id, attempts = job.attempts, ?summary, "job partially completed");
                    job.item.clone()
                };
                self.remove_saved_entry(&item).await;
                self.publish_queue();
            }
            Err(ExecutorError::Cancelled) => {
                // Token fired without a user abort (shutdown path).
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.status = JobStatus::Aborted;
                }
                warn!(%job_id, "execution cancelled");
                self.publish_queue();
            }
            Err(e) => {
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.status = JobStatus::Failed;
                    job.downloaded = false;
                    job.error = Some(e.to_string());
                    error!(%job_id, attempts = job.attempts, error = %e, "job failed");
                }
                self.publish_queue();
            }
        }
        self.schedule();
    }

    // ── user actions ──────────────────────────────────────────────────────

    async fn act(
        &mut self,
        job_id: JobId,
        action: JobAction,
    ) -> Result<ActionOutcome, ActionError> {
        match action {
            JobAction::Retry | JobAction::Force => {
                let job = self
                    .jobs
                    .get_mut(&job_id)
                    .ok_or_else(|| ActionError::NotFound(job_id.clone()))?;
                if matches!(job.status, JobStatus::InProgress | JobStatus::Retrying) {
                    return Err(ActionError::Conflict(
                        "job is currently in progress".to_string(),
                    ));
                }
                info!(%job_id, ?action, attempts = job.attempts, "retrying job");
                job.status = JobStatus::Queued;
                job.error = None;
                job.downloaded = false;
                if action == JobAction::Force {
                    job.force_no_db = true;
                }
                if !self.pending.contains(&job_id) {
                    self.pending.push_back(job_id);
                }
                self.publish_queue();
                self.schedule();
                Ok(ActionOutcome::Queue(self.queue_snapshot()))
            }
            JobAction::Abort => {
                let job = self
                    .jobs
                    .get_mut(&job_id)
                    .ok_or_else(|| ActionError::NotFound(job_id.clone()))?;
                match job.status {
                    JobStatus::InProgress | JobStatus::Retrying => {
                        warn!(%job_id, "aborting running job");
                        if let Some(token) = self.running.get(&job_id) {
                            token.cancel();
                        }
                        job.status = JobStatus::Aborted;
                        self.publish_queue();
                    }
                    JobStatus::Queued => {
                        warn!(%job_id, "aborting queued job");
                        job.status = JobStatus::Aborted;
                        self.pending.retain(|id| id != &job_id);
                        self.publish_queue();
                    }
                    _ => {
                        // Aborting a terminal job dismisses it.
                        info!(%job_id, "dismissing terminal job");
                        self.drop_job(&job_id);
                        self.publish_queue();
                    }
                }
                Ok(ActionOutcome::Queue(self.queue_snapshot()))
            }
            JobAction::Save => {
                let job = self
                    .jobs
                    .get(&job_id)
                    .ok_or_else(|| ActionError::NotFound(job_id.clone()))?;
                let item = job.item.clone();
                info!(%job_id, id = %item.id, source = %item.source, "saving job for later");
                if let Some(token) = self.running.get(&job_id) {
                    token.cancel();
                }
                let list = self
                    .saved
                    .add(item)
                    .await
                    .map_err(|e| ActionError::Storage(e.to_string()))?;
                self.hub.saved(list.clone());
                self.drop_job(&job_id);
                self.publish_queue();
                Ok(ActionOutcome::Saved(list))
            }
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────

    async fn record_download(&mut self, item: &ItemRef) {
        if !self.downloaded_index.insert(item.key()) {
            return;
        }
        let entry = HistoryEntry::from(item);
        self.history_entries.push(entry.clone());
        if let Err(e) = self.history.add(entry).await {
            error!("history store write failed: {e:#}");
        }
    }

    async fn remove_saved_entry(&mut self, item: &ItemRef) {
        let before = self.saved.list().await.len();
        match self.saved.remove(&item.source, &item.id).await {
            Ok(list) => {
                if list.len() != before {
                    self.hub.saved(list);
                }
            }
            Err(e) => error!("saved store write failed: {e:#}"),
        }
    }

    fn drop_job(&mut self, job_id: &JobId) {
        self.jobs.remove(job_id);
        self.display_order.retain(|id| id != job_id);
        self.pending.retain(|id| id != job_id);
        self.tracker.discard(job_id);
        self.hub.forget(job_id);
    }

    fn queue_snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            rev: self.rev,
            queue: self
                .display_order
                .iter()
                .filter_map(|id| self.jobs.get(id))
                .cloned()
                .collect(),
            progress: self.tracker.latest_map(),
            history: self.history_entries.clone(),
        }
    }

    fn publish_queue(&mut self) {
        self.rev += 1;
        self.hub.queue(self.queue_snapshot());
    }
}

/// One job's execution: attempt loop with exponential backoff, forwarding
/// track events into the registry channel. Lives in its own task so the
/// core never blocks on the adapter.
async fn run_execution(
    executor: Arc<dyn ExecutorAdapter>,
    request: ExecRequest,
    max_attempts: u32,
    tx: mpsc::Sender<RegistryEvent>,
    cancel: CancellationToken,
) {
    let job_id = request.job_id.clone();
    let (track_tx, mut track_rx) = mpsc::channel::<ExecutorEvent>(64);
    let forward_tx = tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = track_rx.recv().await {
            if forward_tx.send(RegistryEvent::Exec(event)).await.is_err() {
                break;
            }
        }
    });

    let mut backoff = 1.0f64;
    let mut result: Result<(), ExecutorError> = Err(ExecutorError::Cancelled);
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            result = Err(ExecutorError::Cancelled);
            break;
        }
        let _ = tx
            .send(RegistryEvent::AttemptStarted {
                job_id: job_id.clone(),
                attempt,
            })
            .await;

        let attempt_result = tokio::select! {
            res = executor.execute(request.clone(), track_tx.clone(), cancel.clone()) => res,
            _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
        };

        match attempt_result {
            Ok(()) => {
                result = Ok(());
                break;
            }
            Err(ExecutorError::Cancelled) => {
                result = Err(ExecutorError::Cancelled);
                break;
            }
            // Resolution and capability errors will not improve on retry.
            Err(e @ (ExecutorError::Resolution { .. } | ExecutorError::Unsupported { .. })) => {
                result = Err(e);
                break;
            }
            Err(e) if attempt < max_attempts => {
                let _ = tx
                    .send(RegistryEvent::AttemptFailed {
                        job_id: job_id.clone(),
                        attempt,
                        error: e.to_string(),
                    })
                    .await;
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs_f64(backoff)) => {}
                    _ = cancel.cancelled() => {
                        result = Err(ExecutorError::Cancelled);
                        break;
                    }
                }
                backoff *= 1.5;
                result = Err(e);
            }
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    // Close our side of the track channel and let the forwarder drain, so
    // every progress event precedes the terminal message.
    drop(track_tx);
    let _ = forwarder.await;
    let _ = tx.send(RegistryEvent::Finished { job_id, result }).await;
}
