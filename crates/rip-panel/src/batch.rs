//! Batch completion tracking.
//!
//! Each user-initiated submit registers the exact job ids it created; the
//! tracker watches successive snapshots and reports completion exactly
//! once, when every tracked job has reached a terminal, non-failure state.
//! This is deliberately first-class state — inferring it from whatever
//! happens to be in the queue misses completions and duplicates toasts.

use std::collections::HashMap;

use rip_proto::model::{Job, JobId, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Pending,
    Done,
    Failed,
}

#[derive(Debug)]
pub struct BatchTracker {
    states: HashMap<JobId, JobOutcome>,
    fired: bool,
}

impl BatchTracker {
    pub fn new(job_ids: impl IntoIterator<Item = JobId>) -> Self {
        Self {
            states: job_ids
                .into_iter()
                .map(|id| (id, JobOutcome::Pending))
                .collect(),
            fired: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Fold a queue snapshot in. Returns `true` exactly once: on the
    /// observation where the whole batch first reads complete.
    pub fn observe(&mut self, queue: &[Job]) -> bool {
        for (job_id, outcome) in self.states.iter_mut() {
            match queue.iter().find(|job| &job.job_id == job_id) {
                Some(job) => {
                    *outcome = match job.status {
                        JobStatus::Failed => JobOutcome::Failed,
                        status if status.is_terminal() => JobOutcome::Done,
                        _ => JobOutcome::Pending,
                    };
                }
                // Jobs leave the queue once completed (or dismissed);
                // absence is a terminal success from the batch's view.
                None => *outcome = JobOutcome::Done,
            }
        }

        if self.fired || self.states.is_empty() {
            return false;
        }
        let complete = self
            .states
            .values()
            .all(|outcome| *outcome == JobOutcome::Done);
        if complete {
            self.fired = true;
        }
        complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rip_proto::model::ItemRef;

    fn job(id: &str, status: JobStatus) -> Job {
        let mut job = Job::new(ItemRef {
            id: id.to_string(),
            source: "qobuz".to_string(),
            media_type: "album".to_string(),
            title: id.to_string(),
            artist: None,
            url: None,
        });
        job.job_id = id.to_string();
        job.status = status;
        job
    }

    #[test]
    fn test_fires_exactly_once_across_many_updates() {
        let mut batch = BatchTracker::new(["a".to_string(), "b".to_string(), "c".to_string()]);

        assert!(!batch.observe(&[
            job("a", JobStatus::Queued),
            job("b", JobStatus::Queued),
            job("c", JobStatus::Queued),
        ]));
        assert!(!batch.observe(&[
            job("a", JobStatus::Completed),
            job("b", JobStatus::InProgress),
            job("c", JobStatus::Queued),
        ]));
        assert!(!batch.observe(&[
            job("a", JobStatus::Completed),
            job("b", JobStatus::Completed),
            job("c", JobStatus::InProgress),
        ]));
        // All three terminal: fires here, once.
        assert!(batch.observe(&[
            job("a", JobStatus::Completed),
            job("b", JobStatus::Completed),
            job("c", JobStatus::Completed),
        ]));
        // Later identical snapshots stay quiet.
        assert!(!batch.observe(&[
            job("a", JobStatus::Completed),
            job("b", JobStatus::Completed),
            job("c", JobStatus::Completed),
        ]));
        assert!(!batch.observe(&[]));
    }

    #[test]
    fn test_failed_job_blocks_completion_until_retried() {
        let mut batch = BatchTracker::new(["a".to_string(), "b".to_string()]);
        assert!(!batch.observe(&[
            job("a", JobStatus::Completed),
            job("b", JobStatus::Failed),
        ]));
        // The user retries b and it completes.
        assert!(!batch.observe(&[
            job("a", JobStatus::Completed),
            job("b", JobStatus::InProgress),
        ]));
        assert!(batch.observe(&[
            job("a", JobStatus::Completed),
            job("b", JobStatus::Completed),
        ]));
    }

    #[test]
    fn test_dropped_completed_jobs_count_as_done() {
        let mut batch = BatchTracker::new(["a".to_string(), "b".to_string()]);
        assert!(!batch.observe(&[job("a", JobStatus::InProgress)]));
        // Both gone from the queue (completed and dropped server-side).
        assert!(batch.observe(&[]));
    }

    #[test]
    fn test_partial_counts_as_terminal_non_failure() {
        let mut batch = BatchTracker::new(["a".to_string()]);
        assert!(batch.observe(&[job("a", JobStatus::Partial)]));
    }
}
