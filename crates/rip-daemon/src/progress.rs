//! Progress aggregation.
//!
//! Turns the executor's raw track events into the two-level snapshot the
//! panel renders: per-track transfer state, item-level byte totals with an
//! ETA, and the terminal counts summary. Summaries are derived from the
//! current track states, so a re-emitted terminal event can never double
//! count a track.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use rip_proto::model::JobId;
use rip_proto::protocol::{
    OverallProgress, ProgressSnapshot, TrackDescriptor, TrackProgress, TrackState, TrackStatus,
    TrackSummary,
};

use crate::executor::TrackEvent;

/// Time constant for the decayed rate average, in seconds.
const RATE_TAU_SECS: f64 = 5.0;

/// Decayed rolling average of transfer rate, fed cumulative byte counts.
#[derive(Debug, Clone)]
struct RateEstimate {
    rate: f64,
    last_update: Instant,
    last_received: u64,
}

impl RateEstimate {
    fn new(now: Instant) -> Self {
        Self {
            rate: 0.0,
            last_update: now,
            last_received: 0,
        }
    }

    fn observe(&mut self, now: Instant, received: u64) {
        let dt = now.saturating_duration_since(self.last_update).as_secs_f64();
        if dt <= 0.0 {
            return;
        }
        let delta = received.saturating_sub(self.last_received) as f64;
        let instantaneous = delta / dt;
        let alpha = (-dt / RATE_TAU_SECS).exp();
        self.rate = self.rate * alpha + instantaneous * (1.0 - alpha);
        self.last_update = now;
        self.last_received = received;
    }

    /// Seconds to transfer `remaining` bytes, `None` when no usable rate
    /// has been observed. Never negative.
    fn eta(&self, remaining: u64) -> Option<f64> {
        if self.rate > f64::EPSILON {
            Some((remaining as f64 / self.rate).max(0.0))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
struct TrackAccum {
    received: u64,
    total: u64,
    status: TrackStatus,
    message: Option<String>,
    title: String,
    rate: RateEstimate,
}

impl TrackAccum {
    fn new(title: String, total: u64, now: Instant) -> Self {
        Self {
            received: 0,
            total,
            status: TrackStatus::Downloading,
            message: None,
            title,
            rate: RateEstimate::new(now),
        }
    }

    /// Total that is safe to sum: at least the bytes already received, and
    /// never zero once the track exists.
    fn effective_total(&self) -> u64 {
        self.total.max(self.received).max(1)
    }
}

#[derive(Debug)]
struct JobProgress {
    tracks: BTreeMap<String, TrackAccum>,
    current: Option<String>,
    overall_rate: RateEstimate,
}

impl JobProgress {
    fn new(now: Instant) -> Self {
        Self {
            tracks: BTreeMap::new(),
            current: None,
            overall_rate: RateEstimate::new(now),
        }
    }

    fn summary(&self) -> TrackSummary {
        let mut summary = TrackSummary {
            total_tracks: self.tracks.len(),
            ..TrackSummary::default()
        };
        for track in self.tracks.values() {
            match track.status {
                TrackStatus::Downloaded => summary.downloaded += 1,
                TrackStatus::Skipped => summary.skipped += 1,
                TrackStatus::Failed => summary.failed += 1,
                _ => {}
            }
        }
        summary.all_downloaded = summary.failed == 0
            && summary.downloaded + summary.skipped == summary.total_tracks
            && summary.total_tracks > 0;
        summary
    }
}

/// Per-job aggregation state plus the last built snapshot for each job.
/// Owned by the registry core; never touched outside its event loop.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    live: HashMap<JobId, JobProgress>,
    latest: HashMap<JobId, ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking an execution. Clears any snapshot left over from a
    /// previous attempt of the same job.
    pub fn start_job(&mut self, job_id: &JobId, now: Instant) {
        self.live.insert(job_id.clone(), JobProgress::new(now));
        self.latest.remove(job_id);
    }

    /// Fold one executor event in and build the superseding snapshot.
    /// Events for jobs that are not live are stale and yield `None`.
    pub fn apply(
        &mut self,
        job_id: &JobId,
        event: &TrackEvent,
        now: Instant,
    ) -> Option<ProgressSnapshot> {
        let job = self.live.get_mut(job_id)?;
        match event {
            TrackEvent::Started {
                track_id,
                title,
                total,
            } => {
                let track = job
                    .tracks
                    .entry(track_id.clone())
                    .or_insert_with(|| TrackAccum::new(title.clone(), *total, now));
                track.title = title.clone();
                track.total = *total;
                if !track.status.is_terminal() {
                    track.status = TrackStatus::Downloading;
                }
                job.current = Some(track_id.clone());
            }
            TrackEvent::Bytes {
                track_id,
                received,
                total,
            } => {
                let track = job
                    .tracks
                    .entry(track_id.clone())
                    .or_insert_with(|| TrackAccum::new(track_id.clone(), *total, now));
                track.total = (*total).max(track.total);
                track.received = if track.total > 0 {
                    (*received).min(track.total)
                } else {
                    *received
                };
                track.rate.observe(now, track.received);
                job.current = Some(track_id.clone());
            }
            TrackEvent::Finished {
                track_id,
                status,
                message,
            } => {
                let track = job
                    .tracks
                    .entry(track_id.clone())
                    .or_insert_with(|| TrackAccum::new(track_id.clone(), 0, now));
                track.status = *status;
                track.message = message.clone();
                // Terminal tracks read as complete in the byte totals.
                if track.total == 0 {
                    track.total = track.received.max(1);
                }
                track.received = track.total;
            }
        }

        let received_sum: u64 = job.tracks.values().map(|t| t.received).sum();
        job.overall_rate.observe(now, received_sum);

        let snapshot = build_snapshot(job_id, job);
        self.latest.insert(job_id.clone(), snapshot.clone());
        Some(snapshot)
    }

    /// Summary for a live job; empty when not tracked.
    pub fn summary(&self, job_id: &JobId) -> TrackSummary {
        self.live
            .get(job_id)
            .map(|job| job.summary())
            .unwrap_or_default()
    }

    /// Stop live tracking and freeze the final snapshot for poll payloads.
    pub fn finish_job(&mut self, job_id: &JobId) -> TrackSummary {
        let Some(job) = self.live.remove(job_id) else {
            return self
                .latest
                .get(job_id)
                .map(|snap| snap.summary.clone())
                .unwrap_or_default();
        };
        let snapshot = build_snapshot(job_id, &job);
        let summary = snapshot.summary.clone();
        self.latest.insert(job_id.clone(), snapshot);
        summary
    }

    /// Drop all state for a job that left the active set.
    pub fn discard(&mut self, job_id: &JobId) {
        self.live.remove(job_id);
        self.latest.remove(job_id);
    }

    /// Latest snapshot per job, for the full queue snapshot.
    pub fn latest_map(&self) -> BTreeMap<JobId, ProgressSnapshot> {
        self.latest
            .iter()
            .map(|(id, snap)| (id.clone(), snap.clone()))
            .collect()
    }
}

fn build_snapshot(job_id: &JobId, job: &JobProgress) -> ProgressSnapshot {
    let received_sum: u64 = job.tracks.values().map(|t| t.received).sum();
    let total_sum: u64 = job.tracks.values().map(|t| t.effective_total()).sum();
    let overall = OverallProgress {
        received: received_sum,
        total: total_sum,
        eta: job.overall_rate.eta(total_sum.saturating_sub(received_sum)),
    };

    let current = job
        .current
        .as_ref()
        .and_then(|id| job.tracks.get(id).map(|t| (id.clone(), t)));
    let track = current
        .as_ref()
        .map(|(id, accum)| TrackDescriptor {
            track_id: id.clone(),
            title: accum.title.clone(),
        });
    let progress = current.map(|(id, accum)| TrackProgress {
        track_id: id.clone(),
        desc: accum.title.clone(),
        received: accum.received,
        total: accum.total,
        eta: accum
            .rate
            .eta(accum.total.saturating_sub(accum.received)),
        status: accum.status,
        message: accum.message.clone(),
    });

    let tracks = job
        .tracks
        .iter()
        .map(|(id, accum)| {
            (
                id.clone(),
                TrackState {
                    received: accum.received,
                    total: accum.total,
                    status: accum.status,
                    message: accum.message.clone(),
                    title: accum.title.clone(),
                },
            )
        })
        .collect();

    ProgressSnapshot {
        job_id: job_id.clone(),
        overall,
        track,
        progress,
        summary: job.summary(),
        tracks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn finished(track: &str, status: TrackStatus) -> TrackEvent {
        TrackEvent::Finished {
            track_id: track.to_string(),
            status,
            message: None,
        }
    }

    fn started(track: &str, total: u64) -> TrackEvent {
        TrackEvent::Started {
            track_id: track.to_string(),
            title: format!("Track {track}"),
            total,
        }
    }

    #[test]
    fn test_all_downloaded_counts_skips() {
        let mut tracker = ProgressTracker::new();
        let job: JobId = "j1".into();
        let now = Instant::now();
        tracker.start_job(&job, now);
        for (i, status) in [
            TrackStatus::Downloaded,
            TrackStatus::Downloaded,
            TrackStatus::Downloaded,
            TrackStatus::Skipped,
        ]
        .iter()
        .enumerate()
        {
            tracker.apply(&job, &started(&i.to_string(), 10), now);
            tracker.apply(&job, &finished(&i.to_string(), *status), now);
        }
        let summary = tracker.summary(&job);
        assert_eq!(summary.total_tracks, 4);
        assert_eq!(summary.downloaded, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
        assert!(summary.all_downloaded);
    }

    #[test]
    fn test_failed_track_blocks_all_downloaded() {
        let mut tracker = ProgressTracker::new();
        let job: JobId = "j1".into();
        let now = Instant::now();
        tracker.start_job(&job, now);
        tracker.apply(&job, &finished("a", TrackStatus::Downloaded), now);
        tracker.apply(&job, &finished("b", TrackStatus::Downloaded), now);
        tracker.apply(&job, &finished("c", TrackStatus::Failed), now);
        let summary = tracker.summary(&job);
        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.failed, 1);
        assert!(!summary.all_downloaded);
        assert!(summary.needs_attention());
    }

    #[test]
    fn test_reemitted_terminal_event_counts_once() {
        let mut tracker = ProgressTracker::new();
        let job: JobId = "j1".into();
        let now = Instant::now();
        tracker.start_job(&job, now);
        tracker.apply(&job, &finished("a", TrackStatus::Downloaded), now);
        tracker.apply(&job, &finished("a", TrackStatus::Downloaded), now);
        let summary = tracker.summary(&job);
        assert_eq!(summary.total_tracks, 1);
        assert_eq!(summary.downloaded, 1);
        assert!(summary.all_downloaded);
    }

    #[test]
    fn test_empty_job_is_not_all_downloaded() {
        let mut tracker = ProgressTracker::new();
        let job: JobId = "j1".into();
        tracker.start_job(&job, Instant::now());
        assert!(!tracker.summary(&job).all_downloaded);
    }

    #[test]
    fn test_overall_received_never_exceeds_total() {
        let mut tracker = ProgressTracker::new();
        let job: JobId = "j1".into();
        let now = Instant::now();
        tracker.start_job(&job, now);
        tracker.apply(&job, &started("a", 0), now);
        // Unknown total: bytes keep arriving.
        let snap = tracker
            .apply(
                &job,
                &TrackEvent::Bytes {
                    track_id: "a".into(),
                    received: 500,
                    total: 0,
                },
                now + Duration::from_secs(1),
            )
            .unwrap();
        assert!(snap.overall.received <= snap.overall.total);
    }

    #[test]
    fn test_eta_unknown_without_rate_then_positive() {
        let mut tracker = ProgressTracker::new();
        let job: JobId = "j1".into();
        let t0 = Instant::now();
        tracker.start_job(&job, t0);
        tracker.apply(&job, &started("a", 1000), t0);
        let snap = tracker
            .apply(
                &job,
                &TrackEvent::Bytes {
                    track_id: "a".into(),
                    received: 0,
                    total: 1000,
                },
                t0,
            )
            .unwrap();
        assert_eq!(snap.overall.eta, None);

        let snap = tracker
            .apply(
                &job,
                &TrackEvent::Bytes {
                    track_id: "a".into(),
                    received: 100,
                    total: 1000,
                },
                t0 + Duration::from_secs(1),
            )
            .unwrap();
        let eta = snap.overall.eta.expect("rate observed, eta computable");
        assert!(eta >= 0.0);
    }

    #[test]
    fn test_stale_event_for_unknown_job_discarded() {
        let mut tracker = ProgressTracker::new();
        let snap = tracker.apply(
            &"ghost".to_string(),
            &finished("a", TrackStatus::Downloaded),
            Instant::now(),
        );
        assert!(snap.is_none());
    }

    #[test]
    fn test_finish_freezes_snapshot_and_start_clears_it() {
        let mut tracker = ProgressTracker::new();
        let job: JobId = "j1".into();
        let now = Instant::now();
        tracker.start_job(&job, now);
        tracker.apply(&job, &finished("a", TrackStatus::Downloaded), now);
        let summary = tracker.finish_job(&job);
        assert!(summary.all_downloaded);
        assert!(tracker.latest_map().contains_key(&job));

        tracker.start_job(&job, now);
        assert!(!tracker.latest_map().contains_key(&job));
    }
}
