//! TCP transport implementation

use super::{StreamTransport, TransportError, TransportType};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::info;

/// TCP transport
pub type TcpTransport = StreamTransport<TcpStream>;

/// TCP connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Connection timeout in seconds
    pub timeout_secs: u64,
}

impl TcpConfig {
    /// Create a new TCP configuration
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout_secs: 10,
        }
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self::new("localhost", 8000)
    }
}

/// Connect to a device or terminal server over TCP
pub async fn open_tcp(config: &TcpConfig) -> Result<TcpTransport, TransportError> {
    let addr = config.address();

    let stream = tokio::time::timeout(
        Duration::from_secs(config.timeout_secs),
        TcpStream::connect(&addr),
    )
    .await
    .map_err(|_| TransportError::Timeout(Duration::from_secs(config.timeout_secs)))?
    .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;

    // Set TCP_NODELAY for lower latency
    stream.set_nodelay(true)?;

    info!("Connected to {}", addr);
    Ok(StreamTransport::new(stream, TransportType::Tcp, addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::Transport;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_loopback_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 3];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let mut transport = open_tcp(&TcpConfig::new("127.0.0.1", port)).await.unwrap();
        assert_eq!(transport.connection_info(), format!("127.0.0.1:{port}"));

        transport.send(&[0, 0, 0]).await.unwrap();
        let echo = transport
            .receive_exact(3, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(&echo[..], &[0, 0, 0]);

        transport.close().await.unwrap();
        server.await.unwrap();
    }
}
