//! Executor adapter seam.
//!
//! The registry drives downloads through [`ExecutorAdapter`] without
//! knowing anything about providers. Adapters report per-track lifecycle
//! through a channel of immutable [`ExecutorEvent`] messages; the terminal
//! outcome is the return value of [`ExecutorAdapter::execute`].

pub mod http;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rip_proto::model::{ItemRef, JobId, ResultRow};
use rip_proto::protocol::TrackStatus;

use crate::error::ExecutorError;

/// Everything an adapter needs to run one job attempt.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub job_id: JobId,
    pub item: ItemRef,
    /// Skip the adapter's already-downloaded cache for this attempt.
    pub force_no_db: bool,
    pub download_dir: PathBuf,
}

/// Per-track lifecycle events emitted during execution.
#[derive(Debug, Clone)]
pub enum TrackEvent {
    /// A track is about to transfer. `total` is the expected byte count,
    /// 0 when unknown.
    Started {
        track_id: String,
        title: String,
        total: u64,
    },
    /// Cumulative bytes received for a track.
    Bytes {
        track_id: String,
        received: u64,
        total: u64,
    },
    /// A track reached a terminal state. Adapters may re-emit this for the
    /// same track; the aggregator counts it once.
    Finished {
        track_id: String,
        status: TrackStatus,
        message: Option<String>,
    },
}

/// A track event tagged with the job it belongs to.
#[derive(Debug, Clone)]
pub struct ExecutorEvent {
    pub job_id: JobId,
    pub event: TrackEvent,
}

/// The opaque job executor. Provider backends implement this; the daemon
/// ships [`http::HttpExecutor`] for direct-URL transfers.
#[async_trait]
pub trait ExecutorAdapter: Send + Sync {
    /// Query a provider catalog.
    async fn search(
        &self,
        source: &str,
        media_type: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ResultRow>, ExecutorError>;

    /// Map a raw URL to item metadata. Called once per URL at enqueue time;
    /// a failure here becomes a failed job, never a failed batch.
    async fn resolve_url(&self, url: &str) -> Result<ItemRef, ExecutorError>;

    /// Run one download attempt. Progress goes out on `events`; the caller
    /// owns retry policy. Cancellation is best-effort: the adapter should
    /// stop at the next await point and clean up partial output.
    async fn execute(
        &self,
        request: ExecRequest,
        events: mpsc::Sender<ExecutorEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ExecutorError>;
}
