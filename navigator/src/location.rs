//! Location source — raw fix ingestion over UDP.
//!
//! The in-vehicle GPS forwarder sends one JSON envelope per fix. Each
//! envelope carries a source id and a sequence number; we track the highest
//! sequence seen per source and drop duplicates and replays, since UDP
//! happily delivers both. Malformed datagrams are logged and skipped. The
//! ingestion loop never crashes: any recv error is logged and the loop
//! continues.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use nav_types::Fix;
use serde::Deserialize;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const MAX_DATAGRAM: usize = 2048;

/// One datagram from the GPS forwarder.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixEnvelope {
    source: String,
    seq: u64,
    fix: Fix,
}

/// Highest sequence number seen per source id.
#[derive(Debug, Default)]
struct SeqTracker {
    last_seq: HashMap<String, u64>,
}

impl SeqTracker {
    /// Returns false for a duplicate or replayed envelope.
    fn accept(&mut self, envelope: &FixEnvelope) -> bool {
        match self.last_seq.get(&envelope.source) {
            Some(&last) if envelope.seq <= last => false,
            _ => {
                self.last_seq.insert(envelope.source.clone(), envelope.seq);
                true
            }
        }
    }
}

/// Fix stream boundary. The run loop only ever sees clean `Fix` values;
/// transport details stay here.
pub struct LocationSource {
    rx: mpsc::Receiver<Fix>,
}

impl LocationSource {
    /// Bind the UDP listener and start the ingestion task.
    pub async fn bind_udp(addr: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Listening for GPS fixes on udp://{}", socket.local_addr()?);
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(ingest_loop(socket, tx));
        Ok(Self { rx })
    }

    /// Test/simulation entry: wrap an existing channel.
    pub fn from_channel(rx: mpsc::Receiver<Fix>) -> Self {
        Self { rx }
    }

    /// Wait for the first fix of a run. `None` on timeout — fatal-to-start
    /// for navigation, the caller decides.
    pub async fn first_fix(&mut self, timeout: Duration) -> Option<Fix> {
        tokio::time::timeout(timeout, self.rx.recv()).await.ok().flatten()
    }

    pub async fn recv(&mut self) -> Option<Fix> {
        self.rx.recv().await
    }
}

async fn ingest_loop(socket: UdpSocket, tx: mpsc::Sender<Fix>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut tracker = SeqTracker::default();

    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!("UDP recv error: {e}");
                continue;
            }
        };

        let envelope: FixEnvelope = match serde_json::from_slice(&buf[..len]) {
            Ok(env) => env,
            Err(e) => {
                warn!("Malformed fix datagram from {peer}: {e}");
                continue;
            }
        };

        if !tracker.accept(&envelope) {
            debug!(
                "Dropped replayed fix from {} (seq {})",
                envelope.source, envelope.seq
            );
            continue;
        }

        if tx.send(envelope.fix).await.is_err() {
            // Receiver gone: the run ended, stop listening.
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(source: &str, seq: u64) -> FixEnvelope {
        let raw = format!(
            r#"{{ "source": "{source}", "seq": {seq},
                 "fix": {{ "lat": 45.5, "lon": -73.6, "accuracyM": 4.0,
                           "speedMps": 8.5, "timestampMs": 1700000000000 }} }}"#
        );
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn envelope_parses_with_optional_fields_missing() {
        let env = envelope("bus-12", 7);
        assert_eq!(env.source, "bus-12");
        assert_eq!(env.seq, 7);
        assert_eq!(env.fix.speed_mps, Some(8.5));
        assert!(env.fix.heading_deg.is_none());
    }

    #[test]
    fn replays_and_duplicates_are_dropped() {
        let mut t = SeqTracker::default();
        assert!(t.accept(&envelope("bus-12", 5)));
        assert!(!t.accept(&envelope("bus-12", 5)), "duplicate");
        assert!(!t.accept(&envelope("bus-12", 3)), "replay");
        assert!(t.accept(&envelope("bus-12", 6)));
    }

    #[test]
    fn sources_are_tracked_independently() {
        let mut t = SeqTracker::default();
        assert!(t.accept(&envelope("bus-12", 10)));
        assert!(t.accept(&envelope("bus-13", 1)));
        assert!(!t.accept(&envelope("bus-13", 1)));
    }

    #[tokio::test]
    async fn udp_round_trip_delivers_a_fix() {
        let recv = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = recv.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(ingest_loop(recv, tx));
        let mut source = LocationSource::from_channel(rx);

        let send = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        // Malformed datagram first: must be skipped, not kill the loop.
        send.send_to(b"not json", addr).await.unwrap();
        let payload = r#"{ "source": "bus-12", "seq": 1,
            "fix": { "lat": 45.5, "lon": -73.6, "timestampMs": 0 } }"#;
        send.send_to(payload.as_bytes(), addr).await.unwrap();

        let fix = source
            .first_fix(Duration::from_secs(2))
            .await
            .expect("fix within timeout");
        assert_eq!(fix.lat, 45.5);
    }

    #[tokio::test(start_paused = true)]
    async fn first_fix_times_out_when_nothing_arrives() {
        let (_tx, rx) = mpsc::channel::<Fix>(1);
        let mut source = LocationSource::from_channel(rx);
        assert!(source.first_fix(Duration::from_secs(5)).await.is_none());
    }
}
