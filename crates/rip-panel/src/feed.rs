//! The push feed: `/events/downloads` as an SSE client.
//!
//! An incremental parser turns body chunks into SSE frames; frames decode
//! into [`PushEvent`]s via the shared protocol. The connection task
//! reconnects with backoff — missed events are the poll loop's problem,
//! which is exactly the contract the server offers.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use rip_proto::protocol::PushEvent;

use crate::store::StoreEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental server-sent-events parser. Feed it raw body chunks; frames
/// come out whenever a blank line completes one.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buf.push_str(chunk);
        let mut frames = Vec::new();
        while let Some(boundary) = self.buf.find("\n\n") {
            let raw: String = self.buf.drain(..boundary + 2).collect();
            if let Some(frame) = parse_frame(&raw) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut event = "message".to_string();
    let mut data_lines: Vec<&str> = Vec::new();
    for line in raw.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') {
            continue; // keep-alive comment
        }
        if let Some(value) = line.strip_prefix("event:") {
            event = value.trim_start().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

pub fn decode_frame(frame: &SseFrame) -> anyhow::Result<PushEvent> {
    PushEvent::decode(&frame.event, &frame.data)
}

/// Long-lived feed connection. Each received event lands on the store's
/// channel; connection loss backs off and retries until `stop` fires.
pub async fn run_feed(
    base_url: String,
    events: mpsc::Sender<StoreEvent>,
    stop: CancellationToken,
) {
    let client = reqwest::Client::new();
    let url = format!("{base_url}/events/downloads");
    let mut backoff = Duration::from_secs(1);

    loop {
        if stop.is_cancelled() {
            return;
        }
        match client.get(&url).send().await {
            Ok(response) => {
                debug!(%url, "feed connected");
                backoff = Duration::from_secs(1);
                let mut parser = SseParser::new();
                let mut stream = response.bytes_stream();
                loop {
                    let chunk = tokio::select! {
                        chunk = stream.next() => chunk,
                        _ = stop.cancelled() => return,
                    };
                    let Some(chunk) = chunk else { break };
                    let Ok(chunk) = chunk else { break };
                    for frame in parser.feed(&String::from_utf8_lossy(&chunk)) {
                        match decode_frame(&frame) {
                            Ok(event) => {
                                if events.send(StoreEvent::from_push(event)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => debug!("ignoring undecodable frame: {e}"),
                        }
                    }
                }
                warn!("feed disconnected, reconnecting");
            }
            Err(e) => {
                warn!("feed connection failed: {e}");
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = stop.cancelled() => return,
        }
        backoff = (backoff * 3 / 2).min(Duration::from_secs(30));
    }
}
