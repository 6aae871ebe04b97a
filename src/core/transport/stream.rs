//! Transport over any tokio byte stream

use super::{Transport, TransportError, TransportStats, TransportType};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Stream transport shared by TCP and serial connections
pub struct StreamTransport<S> {
    stream: Option<S>,
    kind: TransportType,
    info: String,
    stats: Arc<RwLock<TransportStats>>,
    connected_at: Instant,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already connected stream
    pub fn new(stream: S, kind: TransportType, info: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            kind,
            info: info.into(),
            stats: Arc::new(RwLock::new(TransportStats::default())),
            connected_at: Instant::now(),
        }
    }

    /// Check if the stream is still open
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stream_mut(&mut self) -> Result<&mut S, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }

    fn count_error(&self) {
        self.stats.write().errors += 1;
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream_mut()?;

        let result = async {
            stream.write_all(data).await?;
            stream.flush().await
        }
        .await;

        if let Err(e) = result {
            self.count_error();
            return Err(TransportError::IoError(e));
        }

        debug!(info = %self.info, "TX {}", hex::encode(data));
        let mut stats = self.stats.write();
        stats.bytes_sent += data.len() as u64;
        stats.packets_sent += 1;

        Ok(())
    }

    async fn receive(&mut self, max: usize, timeout: Duration) -> Result<Bytes, TransportError> {
        let stream = self.stream_mut()?;
        let mut buffer = vec![0u8; max.max(1)];

        let result = tokio::time::timeout(timeout, stream.read(&mut buffer)).await;
        match result {
            Err(_) => Err(TransportError::Timeout(timeout)),
            Ok(Ok(0)) => {
                self.count_error();
                Err(TransportError::Disconnected)
            }
            Ok(Ok(n)) => {
                buffer.truncate(n);
                debug!(info = %self.info, "RX {}", hex::encode(&buffer));

                let mut stats = self.stats.write();
                stats.bytes_received += n as u64;
                stats.packets_received += 1;

                Ok(Bytes::from(buffer))
            }
            Ok(Err(e)) => {
                self.count_error();
                Err(TransportError::IoError(e))
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
            debug!(info = %self.info, "Stream closed");
        }
        Ok(())
    }

    fn transport_type(&self) -> TransportType {
        self.kind
    }

    fn connection_info(&self) -> String {
        self.info.clone()
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.read().clone();
        if self.stream.is_some() {
            stats.uptime_secs = self.connected_at.elapsed().as_secs();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn transport(mock: tokio_test::io::Mock) -> StreamTransport<tokio_test::io::Mock> {
        StreamTransport::new(mock, TransportType::Tcp, "mock")
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let mock = Builder::new().write(b"/?!\r\n").read(b"/ABC5\r\n").build();
        let mut transport = transport(mock);

        transport.send(b"/?!\r\n").await.unwrap();
        let data = transport
            .receive(64, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(&data[..], b"/ABC5\r\n");

        let stats = transport.stats();
        assert_eq!(stats.bytes_sent, 5);
        assert_eq!(stats.bytes_received, 7);
    }

    #[tokio::test]
    async fn test_receive_respects_max() {
        let mock = Builder::new().read(b"abcdef").build();
        let mut transport = transport(mock);

        let first = transport.receive(4, Duration::from_millis(100)).await.unwrap();
        let rest = transport.receive(10, Duration::from_millis(100)).await.unwrap();
        assert_eq!(&first[..], b"abcd");
        assert_eq!(&rest[..], b"ef");
    }

    #[tokio::test]
    async fn test_receive_exact_spans_reads() {
        let mock = Builder::new().read(b"\x01\x02").read(b"\x03").build();
        let mut transport = transport(mock);

        let data = transport
            .receive_exact(3, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(&data[..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let mock = Builder::new().wait(Duration::from_millis(500)).build();
        let mut transport = transport(mock);

        let result = transport.receive(1, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_peer_close_is_disconnect() {
        let mock = Builder::new().build();
        let mut transport = transport(mock);

        let result = transport.receive(1, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(TransportError::Disconnected)));
        assert_eq!(transport.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mock = Builder::new().build();
        let mut transport = transport(mock);

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send(b"x").await,
            Err(TransportError::NotConnected)
        ));
    }
}
