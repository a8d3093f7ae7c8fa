//! Polled HTTP aggregator (AISHub, SeaVision)
//!
//! One GET per poll interval. A failed poll is logged and retried on the
//! next tick; the interval is the backoff.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{log_connection_failure, FeedStats, IntakeSender};
use crate::{
    config::{AggregatorConfig, BoundingBox},
    errors::{FeedConnectionError, MapError},
    mapper::{aggregator_records, map_aggregator_record},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// What happened to one batch
#[derive(Debug, PartialEq, Eq)]
enum BatchOutcome {
    Delivered,
    /// Intake full, remainder of the batch dropped
    Truncated,
    /// Intake closed, the adapter should stop
    Closed,
}

pub struct AggregatorFeed {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    poll_interval: Duration,
    tx: IntakeSender,
    stats: Arc<FeedStats>,
}

impl AggregatorFeed {
    pub fn new(
        config: &AggregatorConfig,
        bbox: &BoundingBox,
        tx: IntakeSender,
        stats: Arc<FeedStats>,
    ) -> Result<Self, FeedConnectionError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            url: config.request_url(bbox),
            api_key: config.api_key.clone(),
            poll_interval: config.poll_interval,
            tx,
            stats,
        })
    }

    /// Poll until cancelled or the intake channel closes
    pub async fn run(self, cancel: CancellationToken) {
        info!("Polling aggregator every {:?}", self.poll_interval);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Aggregator feed stopping");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let body = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Aggregator feed stopping");
                    break;
                }
                body = self.fetch() => body,
            };

            match body {
                Ok(body) => {
                    failures = 0;
                    if self.push_batch(&body, Utc::now()) == BatchOutcome::Closed {
                        error!("Intake channel closed, aggregator feed stopping");
                        break;
                    }
                }
                Err(e) => {
                    failures += 1;
                    log_connection_failure("aggregator", failures, &e);
                }
            }
        }
    }

    async fn fetch(&self) -> Result<String, FeedConnectionError> {
        let mut request = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let body = request.send().await?.error_for_status()?.text().await?;
        Ok(body)
    }

    /// Map every record and push without waiting. A full channel drops the
    /// rest of the batch; the next poll supersedes it.
    fn push_batch(&self, body: &str, received_at: DateTime<Utc>) -> BatchOutcome {
        let records = match aggregator_records(body) {
            Ok(records) => records,
            Err(MapError::Upstream(message)) => {
                error!("Aggregator returned an error: {}", message);
                return BatchOutcome::Delivered;
            }
            Err(e) => {
                warn!("Malformed aggregator response: {}", e);
                self.stats.record_dropped(1);
                return BatchOutcome::Delivered;
            }
        };
        debug!("Retrieved {} vessels", records.len());

        let total = records.len();
        for (index, record) in records.into_iter().enumerate() {
            let message = match map_aggregator_record(record, received_at) {
                Ok(message) => message,
                Err(e) => {
                    debug!("Dropped aggregator record: {}", e);
                    self.stats.record_dropped(1);
                    continue;
                }
            };
            match self.tx.try_send(message) {
                Ok(()) => self.stats.record_accepted(),
                Err(TrySendError::Full(_)) => {
                    let remaining = (total - index) as u64;
                    warn!("Intake full, dropped {} aggregator records", remaining);
                    self.stats.record_dropped(remaining);
                    return BatchOutcome::Truncated;
                }
                Err(TrySendError::Closed(_)) => return BatchOutcome::Closed,
            }
        }
        BatchOutcome::Delivered
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::*;

    const RESPONSE: &str = r#"[{"ERROR":false,"USERNAME":"AH_TEST","FORMAT":"HUMAN","RECORDS":3},
        [{"MMSI":366892000,"LATITUDE":37.8,"LONGITUDE":-122.5,"NAME":"TACO BOAT"},
         {"LATITUDE":37.9},
         {"MMSI":338123456,"LATITUDE":37.7,"LONGITUDE":-122.4}]]"#;

    fn feed(url: String, tx: IntakeSender, stats: Arc<FeedStats>) -> AggregatorFeed {
        let config = AggregatorConfig {
            enabled: true,
            url,
            username: Some("AH_TEST".to_string()),
            api_key: Some("secret".to_string()),
            poll_interval: Duration::from_secs(61),
        };
        AggregatorFeed::new(&config, &BoundingBox::default(), tx, stats).unwrap()
    }

    #[tokio::test]
    async fn test_push_batch_counts_records() {
        let (tx, mut rx) = mpsc::channel(8);
        let stats = FeedStats::new();
        let feed = feed("http://localhost/".to_string(), tx, stats.clone());

        assert_eq!(feed.push_batch(RESPONSE, Utc::now()), BatchOutcome::Delivered);
        assert_eq!(stats.accepted(), 2);
        assert_eq!(stats.dropped(), 1);
        assert_eq!(rx.recv().await.unwrap().source_id.value(), 366_892_000);
        assert_eq!(rx.recv().await.unwrap().source_id.value(), 338_123_456);
    }

    #[tokio::test]
    async fn test_full_intake_drops_rest_of_batch() {
        let (tx, _rx) = mpsc::channel(1);
        let stats = FeedStats::new();
        let feed = feed("http://localhost/".to_string(), tx, stats.clone());

        assert_eq!(feed.push_batch(RESPONSE, Utc::now()), BatchOutcome::Truncated);
        assert_eq!(stats.accepted(), 1);
        // Invalid record plus the one that did not fit
        assert_eq!(stats.dropped(), 2);
    }

    #[tokio::test]
    async fn test_upstream_error_is_not_fatal() {
        let (tx, _rx) = mpsc::channel(1);
        let feed = feed("http://localhost/".to_string(), tx, FeedStats::new());
        let body = r#"[{"ERROR":true,"ERROR_MESSAGE":"Too frequent requests!"}]"#;
        assert_eq!(feed.push_batch(body, Utc::now()), BatchOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_closed_intake_stops() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let feed = feed("http://localhost/".to_string(), tx, FeedStats::new());
        assert_eq!(feed.push_batch(RESPONSE, Utc::now()), BatchOutcome::Closed);
    }

    #[tokio::test]
    async fn test_poll_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let len = socket.read(&mut request).await.unwrap();
            let request = String::from_utf8_lossy(&request[..len]).to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                RESPONSE.len(),
                RESPONSE
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            request
        });

        let (tx, mut rx) = mpsc::channel(8);
        let url = format!("http://{}/ws.php?username={{username}}&latmin={{latmin}}", addr);
        let feed = feed(url, tx, FeedStats::new());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(feed.run(cancel.clone()));

        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.vessel_name.as_deref(), Some("TACO BOAT"));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /ws.php?username=AH_TEST&latmin=-90 "));
        assert!(request.to_lowercase().contains("x-api-key: secret"));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
