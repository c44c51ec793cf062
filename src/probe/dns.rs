//! DNS resolver probe, shipped as the built-in `dns` plugin.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use super::{Execution, ProbeError, ProbePlugin};
use crate::db::{ProbeConfig, ProbeType};

/// Sends an A query for `example.com` to the resolver named by the target.
pub struct DnsPlugin;

#[async_trait]
impl ProbePlugin for DnsPlugin {
    fn name(&self) -> &str {
        "dns"
    }

    fn probe_type(&self) -> ProbeType {
        ProbeType::Plugin
    }

    fn description(&self) -> &str {
        "Queries a DNS resolver over UDP and checks for a successful answer"
    }

    async fn execute(&self, token: CancellationToken, target: &str, timeout: Duration) -> Execution {
        let start = Instant::now();
        let result = tokio::select! {
            _ = token.cancelled() => Err(ProbeError::Timeout(timeout)),
            r = tokio::time::timeout(timeout, run_dns_query(target)) => {
                r.unwrap_or_else(|_| Err(ProbeError::Timeout(timeout)))
            }
        };

        match result {
            Ok(message) => Execution::up(message),
            Err(e) => Execution::from(e),
        }
        .with_response_time(start.elapsed())
    }

    fn validate_config(&self, config: &ProbeConfig) -> Result<(), ProbeError> {
        if config.target.trim().is_empty() {
            return Err(ProbeError::Config("dns target must be a resolver address".to_string()));
        }
        Ok(())
    }
}

/// Query the resolver at `address` and check the answer header.
async fn run_dns_query(address: &str) -> Result<String, ProbeError> {
    // Ensure address has port
    let target_addr = if address.contains(':') {
        address.to_string()
    } else {
        format!("{}:53", address)
    };

    let packet = build_dns_query();
    let tx_id = u16::from_be_bytes([packet[0], packet[1]]);

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| ProbeError::Network(format!("failed to bind socket: {}", e)))?;

    socket
        .connect(&target_addr)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;

    socket
        .send(&packet)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to send: {}", e)))?;

    let mut response = [0u8; 512];
    let n = socket
        .recv(&mut response)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to recv: {}", e)))?;

    if n < 12 {
        return Err(ProbeError::Network(format!("response too short: {} bytes", n)));
    }

    let resp_tx_id = u16::from_be_bytes([response[0], response[1]]);
    if resp_tx_id != tx_id {
        return Err(ProbeError::Network(format!(
            "transaction ID mismatch: got {}, expected {}",
            resp_tx_id, tx_id
        )));
    }

    // RCODE is the lower 4 bits of byte 3
    let rcode = response[3] & 0x0F;
    if rcode != 0 {
        return Err(ProbeError::Network(format!("DNS error RCODE: {}", rcode)));
    }

    Ok(format!("DNS answer from {}", target_addr))
}

/// Build a minimal DNS query packet for "example.com" A record.
fn build_dns_query() -> Vec<u8> {
    let tx_id: u16 = rand::random();
    let flags: u16 = 0x0100; // Standard query, recursion desired
    let qd_count: u16 = 1;

    let mut packet = Vec::with_capacity(64);
    packet.extend_from_slice(&tx_id.to_be_bytes());
    packet.extend_from_slice(&flags.to_be_bytes());
    packet.extend_from_slice(&qd_count.to_be_bytes());
    // AN, NS and AR counts
    packet.extend_from_slice(&[0, 0, 0, 0, 0, 0]);

    packet.extend_from_slice(&[7, b'e', b'x', b'a', b'm', b'p', b'l', b'e']);
    packet.extend_from_slice(&[3, b'c', b'o', b'm']);
    packet.push(0);

    // QTYPE A, QCLASS IN
    packet.extend_from_slice(&1u16.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes());

    packet
}
