//! Transport layer for byte-stream connections to a device
//!
//! Supports:
//! - Raw TCP connections (meter gateways, terminal servers)
//! - Serial ports (RS-232 and optical heads)
//!
//! The protocol engine only needs "send bytes" and "receive up to N bytes
//! within a timeout"; message boundaries come from the frame layer.

mod serial;
mod stream;
mod tcp;

pub use serial::{open_serial, SerialConfig, SerialFlowControl, SerialParity, SerialTransport};
pub use stream::StreamTransport;
pub use tcp::{open_tcp, TcpConfig, TcpTransport};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Raw TCP connection
    Tcp(TcpConfig),
    /// Serial port connection
    Serial(SerialConfig),
}

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Raw TCP
    Tcp,
    /// Serial port
    Serial,
    /// In-process simulated device
    Simulated,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Serial => write!(f, "Serial"),
            Self::Simulated => write!(f, "Simulated"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Nothing arrived within the timeout
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Transport was closed locally
    #[error("Not connected")]
    NotConnected,

    /// Peer closed the connection
    #[error("Disconnected")]
    Disconnected,
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Send calls
    pub packets_sent: u64,
    /// Receive calls that returned data
    pub packets_received: u64,
    /// Errors count
    pub errors: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// Byte-stream transport owned by one session
#[async_trait]
pub trait Transport: Send {
    /// Send all of `data`
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive between 1 and `max` bytes, waiting at most `timeout`
    async fn receive(&mut self, max: usize, timeout: Duration) -> Result<Bytes, TransportError>;

    /// Release the underlying connection. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats;

    /// Receive exactly `len` bytes; `timeout` bounds the whole read
    async fn receive_exact(
        &mut self,
        len: usize,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut buffer = BytesMut::with_capacity(len);

        while buffer.len() < len {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout(timeout));
            }
            let chunk = self.receive(len - buffer.len(), remaining).await?;
            buffer.extend_from_slice(&chunk);
        }

        Ok(buffer.freeze())
    }
}

/// Open a transport from configuration
pub async fn open(config: &TransportConfig) -> Result<Box<dyn Transport>, TransportError> {
    match config {
        TransportConfig::Tcp(cfg) => Ok(Box::new(open_tcp(cfg).await?)),
        TransportConfig::Serial(cfg) => Ok(Box::new(open_serial(cfg)?)),
    }
}
