//! TCP connect probe.

use std::time::Duration;
use tokio::net::TcpStream;

use super::{Execution, ProbeError};

/// Try to open a TCP connection to `address` within `timeout`.
pub async fn run_tcp_check(address: &str, timeout: Duration) -> Result<Execution, ProbeError> {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_stream)) => Ok(Execution::up("TCP connection successful")),
        Ok(Err(e)) => Err(ProbeError::Network(format!("connection failed: {}", e))),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}
