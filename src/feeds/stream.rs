//! Persistent WebSocket stream (AISStream)
//!
//! See: https://aisstream.io/documentation
//!
//! The subscription handshake is resent after every reconnect; the server
//! forgets it when the socket drops. A rejected key is answered with an
//! error frame and a close, so only a delivered vessel frame counts as a
//! healthy session for backoff purposes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{log_connection_failure, FeedStats, IntakeSender};
use crate::{
    config::{BoundingBox, StreamConfig},
    errors::{FeedConnectionError, MapError},
    mapper::{map_stream_frame, STREAM_MESSAGE_TYPES},
};

const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Why a connected session ended
enum SessionEnd {
    Cancelled,
    IntakeClosed,
    Disconnected(FeedConnectionError),
}

/// Exponential backoff for reconnect attempt `attempt` (zero-based), capped
pub fn calculate_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let backoff_secs =
        initial.as_secs_f64() * BACKOFF_MULTIPLIER.powi(attempt.min(i32::MAX as u32) as i32);
    let capped_secs = backoff_secs.min(max.as_secs_f64());
    Duration::from_secs_f64(capped_secs)
}

/// Subscription handshake. Boxes are `[[lat, lon], [lat, lon]]`.
pub fn subscription_message(api_key: &str, bbox: &BoundingBox, message_types: &[String]) -> String {
    let types: Vec<&str> = if message_types.is_empty() {
        STREAM_MESSAGE_TYPES.to_vec()
    } else {
        message_types.iter().map(String::as_str).collect()
    };
    json!({
        "APIKey": api_key,
        "BoundingBoxes": [[[bbox.lat_min, bbox.lon_min], [bbox.lat_max, bbox.lon_max]]],
        "FilterMessageTypes": types,
    })
    .to_string()
}

pub struct StreamFeed {
    url: String,
    subscription: String,
    initial_backoff: Duration,
    max_backoff: Duration,
    tx: IntakeSender,
    stats: Arc<FeedStats>,
}

impl StreamFeed {
    pub fn new(
        config: &StreamConfig,
        bbox: &BoundingBox,
        tx: IntakeSender,
        stats: Arc<FeedStats>,
    ) -> Self {
        let api_key = config.api_key.as_deref().unwrap_or_default();
        Self {
            url: config.url.clone(),
            subscription: subscription_message(api_key, bbox, &config.message_types),
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            tx,
            stats,
        }
    }

    /// Connect, stream, reconnect, until cancelled or the intake closes
    pub async fn run(self, cancel: CancellationToken) {
        let mut failures = 0u32;

        loop {
            let end = tokio::select! {
                _ = cancel.cancelled() => SessionEnd::Cancelled,
                end = self.session(&mut failures, &cancel) => end,
            };

            match end {
                SessionEnd::Cancelled => {
                    info!("Stream feed stopping");
                    return;
                }
                SessionEnd::IntakeClosed => {
                    error!("Intake channel closed, stream feed stopping");
                    return;
                }
                SessionEnd::Disconnected(e) => {
                    failures += 1;
                    log_connection_failure("stream", failures, &e);
                }
            }

            let backoff = calculate_backoff(failures - 1, self.initial_backoff, self.max_backoff);
            debug!("Reconnecting stream in {:?}", backoff);
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Stream feed stopping");
                    return;
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    /// One connection lifetime
    async fn session(&self, failures: &mut u32, cancel: &CancellationToken) -> SessionEnd {
        let (mut ws, _) = match connect_async(self.url.as_str()).await {
            Ok(connected) => connected,
            Err(e) => return SessionEnd::Disconnected(e.into()),
        };
        if let Err(e) = ws.send(Message::Text(self.subscription.clone())).await {
            return SessionEnd::Disconnected(e.into());
        }
        info!("Subscribed to stream at {}", self.url);

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return SessionEnd::Cancelled;
                }
                frame = ws.next() => frame,
            };

            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => {
                        debug!("Dropped non-UTF-8 stream frame");
                        self.stats.record_dropped(1);
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!("Stream closed by server: {:?}", frame);
                    return SessionEnd::Disconnected(FeedConnectionError::Closed);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return SessionEnd::Disconnected(e.into()),
                None => return SessionEnd::Disconnected(FeedConnectionError::Closed),
            };

            match map_stream_frame(&text, Utc::now()) {
                Ok(message) => {
                    *failures = 0;
                    self.stats.record_accepted();
                    if self.tx.send(message).await.is_err() {
                        return SessionEnd::IntakeClosed;
                    }
                }
                Err(MapError::Upstream(message)) => {
                    warn!("Stream reported an error: {}", message);
                    self.stats.record_dropped(1);
                }
                Err(e) => {
                    debug!("Dropped stream frame: {}", e);
                    self.stats.record_dropped(1);
                }
            }
        }
    }
}
