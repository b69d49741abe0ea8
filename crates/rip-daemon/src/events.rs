//! Fan-out of registry changes to streaming subscribers.
//!
//! Delivery is at-least-once and best-effort over a tokio broadcast
//! channel: a lagged or disconnected subscriber resynchronizes with a full
//! poll. Rapid progress updates for one job are coalesced to a minimum
//! inter-emission interval; terminal updates always go out.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::debug;

use rip_proto::model::{ItemRef, JobId};
use rip_proto::protocol::{ProgressSnapshot, ProgressUpdate, PushEvent, QueueSnapshot};

pub const BROADCAST_CAPACITY: usize = 256;

pub struct EventHub {
    tx: broadcast::Sender<PushEvent>,
    min_progress_interval: Duration,
    last_progress: HashMap<JobId, Instant>,
}

impl EventHub {
    pub fn new(tx: broadcast::Sender<PushEvent>, min_progress_interval: Duration) -> Self {
        Self {
            tx,
            min_progress_interval,
            last_progress: HashMap::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.tx.subscribe()
    }

    pub fn queue(&self, snapshot: QueueSnapshot) {
        debug!(rev = snapshot.rev, jobs = snapshot.queue.len(), "push queue");
        let _ = self.tx.send(PushEvent::Queue(snapshot));
    }

    pub fn saved(&self, items: Vec<ItemRef>) {
        debug!(count = items.len(), "push saved");
        let _ = self.tx.send(PushEvent::Saved(items));
    }

    /// Emit a progress update unless one for the same job went out within
    /// the coalescing window. `force` bypasses the window — used for track
    /// and job terminal states, which must never be coalesced away.
    pub fn progress(&mut self, rev: u64, snapshot: ProgressSnapshot, force: bool, now: Instant) {
        if !force {
            if let Some(last) = self.last_progress.get(&snapshot.job_id) {
                if now.saturating_duration_since(*last) < self.min_progress_interval {
                    return;
                }
            }
        }
        self.last_progress.insert(snapshot.job_id.clone(), now);
        let _ = self.tx.send(PushEvent::Progress(ProgressUpdate { rev, snapshot }));
    }

    pub fn forget(&mut self, job_id: &JobId) {
        self.last_progress.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub(interval_ms: u64) -> (EventHub, broadcast::Receiver<PushEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (
            EventHub::new(tx, Duration::from_millis(interval_ms)),
            rx,
        )
    }

    fn snapshot(job: &str) -> ProgressSnapshot {
        ProgressSnapshot::empty(job.to_string())
    }

    #[test]
    fn test_progress_coalesced_within_window() {
        let (mut hub, mut rx) = hub(100);
        let t0 = Instant::now();
        hub.progress(1, snapshot("j"), false, t0);
        hub.progress(2, snapshot("j"), false, t0 + Duration::from_millis(10));
        hub.progress(3, snapshot("j"), false, t0 + Duration::from_millis(150));

        assert!(matches!(rx.try_recv().unwrap(), PushEvent::Progress(u) if u.rev == 1));
        assert!(matches!(rx.try_recv().unwrap(), PushEvent::Progress(u) if u.rev == 3));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_terminal_progress_bypasses_window() {
        let (mut hub, mut rx) = hub(100);
        let t0 = Instant::now();
        hub.progress(1, snapshot("j"), false, t0);
        hub.progress(2, snapshot("j"), true, t0 + Duration::from_millis(1));

        assert!(matches!(rx.try_recv().unwrap(), PushEvent::Progress(u) if u.rev == 1));
        assert!(matches!(rx.try_recv().unwrap(), PushEvent::Progress(u) if u.rev == 2));
    }

    #[test]
    fn test_jobs_throttled_independently() {
        let (mut hub, mut rx) = hub(100);
        let t0 = Instant::now();
        hub.progress(1, snapshot("a"), false, t0);
        hub.progress(2, snapshot("b"), false, t0 + Duration::from_millis(1));

        assert!(matches!(rx.try_recv().unwrap(), PushEvent::Progress(u) if u.snapshot.job_id == "a"));
        assert!(matches!(rx.try_recv().unwrap(), PushEvent::Progress(u) if u.snapshot.job_id == "b"));
    }

    #[test]
    fn test_queue_and_saved_always_emitted() {
        let (hub, mut rx) = hub(1000);
        hub.queue(QueueSnapshot::default());
        hub.queue(QueueSnapshot::default());
        hub.saved(Vec::new());
        assert!(matches!(rx.try_recv().unwrap(), PushEvent::Queue(_)));
        assert!(matches!(rx.try_recv().unwrap(), PushEvent::Queue(_)));
        assert!(matches!(rx.try_recv().unwrap(), PushEvent::Saved(_)));
    }
}
