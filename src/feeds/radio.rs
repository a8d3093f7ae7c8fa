//! UDP radio listener
//!
//! Receives AIVDM/AIVDO sentences from a local receiver (for example
//! `rtl_ais` or an AIS transponder's NMEA-over-UDP output). A datagram may
//! carry several newline-separated sentences.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{FeedStats, IntakeSender};
use crate::{
    config::RadioConfig,
    decoder::{SentenceDecoder, DEFAULT_FRAGMENT_TIMEOUT_SECS},
    models::RawAisMessage,
};

/// Largest datagram we accept
const MAX_DATAGRAM_SIZE: usize = 65_536;

pub struct RadioFeed {
    socket: UdpSocket,
    decoder: SentenceDecoder,
    fragment_timeout: std::time::Duration,
    tx: IntakeSender,
    stats: Arc<FeedStats>,
}

impl RadioFeed {
    /// Bind the listening socket
    pub async fn bind(
        config: &RadioConfig,
        tx: IntakeSender,
        stats: Arc<FeedStats>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(config.listen_addr).await?;
        info!("Listening for AIS on udp://{}", socket.local_addr()?);

        let timeout = chrono::Duration::from_std(config.fragment_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_FRAGMENT_TIMEOUT_SECS));

        Ok(Self {
            socket,
            decoder: SentenceDecoder::new(timeout),
            fragment_timeout: config.fragment_timeout,
            tx,
            stats,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive until cancelled or the intake channel closes
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        // Groups whose last fragment never arrives are swept even when the
        // feed goes quiet.
        let mut sweep =
            tokio::time::interval(self.fragment_timeout.max(std::time::Duration::from_secs(1)));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Radio feed stopping");
                    break;
                }
                _ = sweep.tick() => {
                    let expired = self.decoder.expire(Utc::now());
                    if !expired.is_empty() {
                        debug!("Discarded {} incomplete fragment groups", expired.len());
                        self.stats.record_dropped(expired.len() as u64);
                    }
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            warn!("Radio socket receive failed: {}", e);
                            continue;
                        }
                    };
                    let messages = self.handle_datagram(&buf[..len], peer, Utc::now());
                    for message in messages {
                        if self.tx.send(message).await.is_err() {
                            error!("Intake channel closed, radio feed stopping");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Decode every sentence in one datagram
    fn handle_datagram(
        &mut self,
        datagram: &[u8],
        peer: SocketAddr,
        now: DateTime<Utc>,
    ) -> Vec<RawAisMessage> {
        let text = String::from_utf8_lossy(datagram);
        let mut messages = Vec::new();

        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            match self.decoder.decode(line, now) {
                Ok(Some(message)) => {
                    self.stats.record_accepted();
                    messages.push(message);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(%peer, "Dropped sentence: {}", e);
                    self.stats.record_dropped(1);
                }
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    const POSITION: &str = "!AIVDM,1,1,,B,139`n:0P0;o>Qm@EUc838wvj2<25,0*4E";
    const STATIC_1: &str = "!AIVDM,2,1,3,B,55P5TL01VIaAL@7WKO@mBplU@<PDhh000000001S;AJ::4A80?4i@E53,0*3E";
    const STATIC_2: &str = "!AIVDM,2,2,3,B,1@0000000000000,2*55";

    fn config() -> RadioConfig {
        RadioConfig {
            enabled: true,
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            fragment_timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_multi_sentence_datagram() {
        let (tx, _rx) = mpsc::channel(8);
        let stats = FeedStats::new();
        let mut feed = RadioFeed::bind(&config(), tx, stats.clone()).await.unwrap();

        let datagram = format!("{}\r\n{}\r\n{}\r\n!AIVDM,garbage*00\n", POSITION, STATIC_1, STATIC_2);
        let peer = "127.0.0.1:9".parse().unwrap();
        let messages = feed.handle_datagram(datagram.as_bytes(), peer, Utc::now());

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].source_id.value(), 211_433_000);
        assert_eq!(messages[1].vessel_name.as_deref(), Some("MT.MITCHELL"));
        assert_eq!(stats.accepted(), 2);
        assert_eq!(stats.dropped(), 1);
    }

    #[tokio::test]
    async fn test_receive_and_forward() {
        let (tx, mut rx) = mpsc::channel(8);
        let stats = FeedStats::new();
        let feed = RadioFeed::bind(&config(), tx, stats.clone()).await.unwrap();
        let addr = feed.local_addr().unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(feed.run(cancel.clone()));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(POSITION.as_bytes(), addr).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.source_id.value(), 211_433_000);
        assert!(message.has_position());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
