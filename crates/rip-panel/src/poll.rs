//! Snapshot polling — the authoritative fallback behind the push feed.
//!
//! Polling pauses while the tab is hidden and resumes immediately on
//! visibility. Every poll gets its own cancellation token; starting a new
//! one cancels the previous request so a stale response can never be
//! applied after a fresher one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rip_proto::protocol::QueueSnapshot;

use crate::store::{Channel, StoreEvent};

pub struct PollScheduler {
    interval: Duration,
    visible: bool,
    in_flight: Option<CancellationToken>,
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            visible: true,
            in_flight: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Track tab visibility. Returns `true` when a poll should run right
    /// now (the tab just became visible again).
    pub fn set_visible(&mut self, visible: bool) -> bool {
        let resume = visible && !self.visible;
        self.visible = visible;
        if !visible {
            self.cancel_in_flight();
        }
        resume
    }

    /// Begin a poll: the previous in-flight request is superseded and
    /// cancelled. `None` while the tab is hidden.
    pub fn begin(&mut self) -> Option<CancellationToken> {
        if !self.visible {
            return None;
        }
        self.cancel_in_flight();
        let token = CancellationToken::new();
        self.in_flight = Some(token.clone());
        Some(token)
    }

    pub fn finish(&mut self) {
        self.in_flight = None;
    }

    pub fn cancel_in_flight(&mut self) {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
    }
}

/// One poll round-trip. `Ok(None)` means the request was superseded and
/// its (possibly stale) response discarded.
pub async fn fetch_snapshot(
    client: &reqwest::Client,
    base_url: &str,
    cancel: CancellationToken,
) -> anyhow::Result<Option<QueueSnapshot>> {
    let url = format!("{base_url}/api/queue");
    let fetch = async {
        let response = client.get(&url).send().await?.error_for_status()?;
        let snapshot: QueueSnapshot = response.json().await?;
        anyhow::Ok(snapshot)
    };
    tokio::select! {
        _ = cancel.cancelled() => Ok(None),
        result = fetch => result.map(Some),
    }
}

/// Poll loop feeding the store's event channel until `stop` fires.
pub async fn run_poll_loop(
    base_url: String,
    scheduler: Arc<Mutex<PollScheduler>>,
    events: mpsc::Sender<StoreEvent>,
    stop: CancellationToken,
) {
    let client = reqwest::Client::new();
    loop {
        let token = scheduler.lock().expect("scheduler lock").begin();
        if let Some(token) = token {
            match fetch_snapshot(&client, &base_url, token).await {
                Ok(Some(snapshot)) => {
                    let event = StoreEvent::Queue {
                        via: Channel::Poll,
                        snapshot,
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Ok(None) => debug!("poll superseded"),
                Err(e) => debug!("poll failed: {e}"),
            }
            scheduler.lock().expect("scheduler lock").finish();
        }

        let interval = scheduler.lock().expect("scheduler lock").interval();
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.cancelled() => return,
        }
    }
}
