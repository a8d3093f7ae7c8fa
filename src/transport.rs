//! Outbound event delivery
//!
//! The pipeline hands each finished event to an [`EventSink`]. Delivery
//! guarantees are the sink's business; the coordinator only logs failures.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{cot, errors::TransportError, synthesizer::OutboundEvent};

/// Largest datagram we send without warning (1500 MTU - IP - UDP headers)
const MAX_UDP_PACKET_SIZE: usize = 1472;

#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: OutboundEvent) -> Result<(), TransportError>;
}

/// One CoT XML datagram per event
pub struct UdpSink {
    socket: UdpSocket,
    remote_addr: SocketAddr,
}

impl UdpSink {
    pub async fn bind(remote_addr: SocketAddr) -> Result<Self, TransportError> {
        let local_addr = if remote_addr.is_ipv4() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local_addr).await?;
        info!("Sending CoT to udp://{}", remote_addr);
        Ok(Self {
            socket,
            remote_addr,
        })
    }
}

#[async_trait]
impl EventSink for UdpSink {
    async fn send(&mut self, event: OutboundEvent) -> Result<(), TransportError> {
        let xml = cot::render(&event);
        if xml.len() > MAX_UDP_PACKET_SIZE {
            warn!(
                uid = %event.uid,
                size = xml.len(),
                "CoT event exceeds single packet size"
            );
        }
        let sent = self.socket.send_to(xml.as_bytes(), self.remote_addr).await?;
        debug!(uid = %event.uid, size = sent, "Sent CoT event");
        Ok(())
    }
}

/// Forwards events into a channel, for tests and embedding
pub struct ChannelSink {
    tx: mpsc::Sender<OutboundEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<OutboundEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, event: OutboundEvent) -> Result<(), TransportError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::synthesizer::EventDetail;

    fn event() -> OutboundEvent {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        OutboundEvent {
            uid: "MMSI-123456789".to_string(),
            event_type: "a-u-S-X-M".to_string(),
            generated_at: now,
            stale_at: now,
            latitude: 10.0,
            longitude: 20.0,
            height_above_ellipsoid: 0.0,
            circular_error: 9_999_999.0,
            linear_error: 9_999_999.0,
            detail: EventDetail {
                callsign: "TESTSHIP".to_string(),
                track_course: None,
                track_speed: None,
                remarks: String::new(),
                icon_ref: None,
            },
        }
    }

    #[tokio::test]
    async fn test_udp_sink_sends_rendered_event() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut sink = UdpSink::bind(receiver.local_addr().unwrap()).await.unwrap();

        sink.send(event()).await.unwrap();

        let mut buf = vec![0u8; 2048];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        let xml = String::from_utf8_lossy(&buf[..len]);
        assert!(xml.contains(r#"uid="MMSI-123456789""#));
        assert!(xml.contains(r#"<contact callsign="TESTSHIP"/>"#));
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);

        sink.send(event()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().uid, "MMSI-123456789");

        drop(rx);
        assert!(matches!(
            sink.send(event()).await,
            Err(TransportError::Closed)
        ));
    }
}
