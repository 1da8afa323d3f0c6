//! udp_tx.rs — UDP transmitter for fix envelopes
//!
//! Sends one JSON envelope per GPS sample to the navigator's UDP listener,
//! matching the envelope location.rs expects: a source id, a monotonically
//! increasing sequence number, and the fix itself. Send errors are logged
//! but never crash the simulator.

use std::net::UdpSocket;

use nav_types::Fix;
use tracing::{debug, warn};

pub struct FixTransmitter {
    socket: UdpSocket,
    target_addr: String,
    source: String,
    seq: u64,
}

impl FixTransmitter {
    pub fn new(target_addr: &str, source: &str) -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket,
            target_addr: target_addr.to_string(),
            source: source.to_string(),
            seq: 0,
        })
    }

    /// Send one fix. The sequence number advances even on failure so the
    /// receiver's replay tracking stays coherent.
    pub fn send_fix(&mut self, fix: &Fix) {
        self.seq += 1;
        let payload = serde_json::json!({
            "source": self.source,
            "seq": self.seq,
            "fix": fix,
        });

        let bytes = match serde_json::to_vec(&payload) {
            Ok(b) => b,
            Err(e) => {
                warn!("UDP: serialize failed: {e}");
                return;
            }
        };

        match self.socket.send_to(&bytes, &self.target_addr) {
            Ok(_) => debug!(
                "UDP → {} seq={} {:.5},{:.5}",
                self.target_addr, self.seq, fix.lat, fix.lon
            ),
            Err(e) => warn!("UDP: send failed: {e}"),
        }
    }
}
