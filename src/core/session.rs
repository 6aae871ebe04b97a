//! Session management for one device conversation
//!
//! A Session owns its transport exclusively, runs the sign-on handshake and
//! carries one request at a time. Parameter and database operations are
//! implemented in [`super::parameter`] and [`super::database`].

use super::database::DatabaseLayout;
use super::error::{IflagError, Result};
use super::parameter::{ParameterCatalog, ParameterIdMap};
use super::protocol::corus::{self, DEFAULT_FIELD_MASK, DEFAULT_WAKEUP_LENGTH};
use super::protocol::framing::{self, ACK, MAX_PAYLOAD, NAK, RESPONSE_HEADER_LEN, SOH};
use super::protocol::{ChecksumType, Response};
use super::state_machine::{CloseReason, SessionState, SessionStateMachine, StateTransition};
use super::transport::{Transport, TransportError, TransportStats};
use bytes::{Bytes, BytesMut};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Smallest usable payload limit; one value of the widest kind plus its id
pub const MIN_PAYLOAD: usize = 10;

/// Reads allowed when clearing stale input before a request
const MAX_STALE_READS: usize = 16;

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Per-receive timeout
    pub timeout: Duration,
    /// Number of NUL bytes in the wake-up burst
    pub wakeup_length: usize,
    /// Largest request payload and response data per frame
    pub max_payload: usize,
    /// Frame checksum algorithm
    pub checksum: ChecksumType,
    /// Database field selection mask
    pub field_mask: [u8; 4],
    /// Pulse weight to use instead of reading it from the device
    pub input_pulse_weight: Option<Decimal>,
    /// Parameter id maps by firmware
    pub catalog: ParameterCatalog,
    /// Id map to use instead of resolving the firmware
    pub id_map_override: Option<ParameterIdMap>,
    /// Database record layouts
    pub layout: DatabaseLayout,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            wakeup_length: DEFAULT_WAKEUP_LENGTH,
            max_payload: MAX_PAYLOAD,
            checksum: ChecksumType::default(),
            field_mask: DEFAULT_FIELD_MASK,
            input_pulse_weight: None,
            catalog: ParameterCatalog::default(),
            id_map_override: None,
            layout: DatabaseLayout::default(),
        }
    }
}

impl SessionConfig {
    /// Set the per-receive timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the payload limit
    #[must_use]
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Set the parameter catalog
    #[must_use]
    pub fn with_catalog(mut self, catalog: ParameterCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Use a fixed id map
    #[must_use]
    pub fn with_id_map(mut self, map: ParameterIdMap) -> Self {
        self.id_map_override = Some(map);
        self
    }

    /// Set the database layouts
    #[must_use]
    pub fn with_layout(mut self, layout: DatabaseLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Use a fixed pulse weight
    #[must_use]
    pub fn with_pulse_weight(mut self, weight: Decimal) -> Self {
        self.input_pulse_weight = Some(weight);
        self
    }

    /// Payload limit clamped to what a frame can carry
    pub fn effective_max_payload(&self) -> usize {
        self.max_payload.clamp(MIN_PAYLOAD, MAX_PAYLOAD)
    }
}

/// Outcome of [`Session::shutdown`]
#[derive(Debug)]
pub struct ShutdownReport {
    /// State before shutdown
    pub previous_state: SessionState,
    /// Logoff message was written
    pub logoff_sent: bool,
    /// Logoff failure, if any
    pub logoff_error: Option<IflagError>,
    /// Transport close failure, if any
    pub close_error: Option<TransportError>,
}

impl ShutdownReport {
    /// Nothing went wrong
    pub fn is_clean(&self) -> bool {
        self.logoff_error.is_none() && self.close_error.is_none()
    }
}

/// Conversation with one device
pub struct Session {
    pub(crate) transport: Option<Box<dyn Transport>>,
    pub(crate) state: SessionStateMachine,
    pub(crate) config: SessionConfig,
    pub(crate) ident: Option<String>,
    pub(crate) firmware: Option<String>,
    pub(crate) id_map: Option<ParameterIdMap>,
    pub(crate) pulse_weight: Option<Decimal>,
}

impl Session {
    /// Create an idle session over a connected transport
    pub fn new<T: Transport + 'static>(transport: T, config: SessionConfig) -> Self {
        Self::from_boxed(Box::new(transport), config)
    }

    /// Create an idle session over a boxed transport
    pub fn from_boxed(transport: Box<dyn Transport>, config: SessionConfig) -> Self {
        Self {
            transport: Some(transport),
            state: SessionStateMachine::new(),
            config,
            ident: None,
            firmware: None,
            id_map: None,
            pulse_weight: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.state.state()
    }

    /// Get state history
    pub fn history(&self) -> &[StateTransition] {
        self.state.history()
    }

    /// Get configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Identification line received at sign-on
    pub fn ident(&self) -> Option<&str> {
        self.ident.as_deref()
    }

    /// Firmware string, once read
    pub fn firmware(&self) -> Option<&str> {
        self.firmware.as_deref()
    }

    /// Get transport statistics
    pub fn transport_stats(&self) -> Option<TransportStats> {
        self.transport.as_ref().map(|t| t.stats())
    }

    /// Get connection info string
    pub fn connection_info(&self) -> Option<String> {
        self.transport.as_ref().map(|t| t.connection_info())
    }

    /// Wake the device and sign on.
    ///
    /// On failure the session stays `Idle` and `startup` may be retried.
    pub async fn startup(&mut self) -> Result<()> {
        match self.state.state() {
            SessionState::Active => return Ok(()),
            SessionState::Closed => return Err(IflagError::SessionNotActive(SessionState::Closed)),
            SessionState::Idle => {}
        }

        match self.handshake().await {
            Ok(ident) => {
                info!(ident = %ident, "Signed on");
                self.ident = Some(ident);
                self.state
                    .transition(SessionState::Active, Some("startup"))
                    .map_err(IflagError::Protocol)?;
                Ok(())
            }
            Err(e) => {
                let message = match e {
                    IflagError::HandshakeFailed(message) => message,
                    other => other.to_string(),
                };
                warn!("Sign-on failed: {}", message);
                let _ = self.state.transition_with_error(
                    SessionState::Idle,
                    Some("startup"),
                    Some(&message),
                );
                Err(IflagError::HandshakeFailed(message))
            }
        }
    }

    async fn handshake(&mut self) -> Result<String> {
        let timeout = self.config.timeout;
        let algorithm = self.config.checksum;
        let wakeup = corus::wakeup(self.config.wakeup_length);
        let transport = self
            .transport
            .as_mut()
            .ok_or(IflagError::Transport(TransportError::NotConnected))?;

        transport.send(&wakeup).await?;
        let reply = transport.receive_exact(corus::WAKEUP_REPLY.len(), timeout).await?;
        if reply[..] != corus::WAKEUP_REPLY {
            return Err(IflagError::HandshakeFailed(format!(
                "unexpected wake-up reply {}",
                hex::encode(&reply)
            )));
        }

        transport.send(corus::SIGN_ON).await?;
        let ident = read_ident(&mut **transport, timeout).await?;

        transport.send(corus::OPTION_SELECT).await?;
        let challenge_len = corus::PASSWORD_CHALLENGE.len() + algorithm.size();
        let challenge = transport.receive_exact(challenge_len, timeout).await?;
        if !corus::verify_password_challenge(&challenge, algorithm) {
            return Err(IflagError::HandshakeFailed(format!(
                "invalid password challenge {}",
                hex::encode(&challenge)
            )));
        }
        transport.send(&challenge).await?;

        let ack = transport.receive_exact(1, timeout).await?;
        match ack[0] {
            ACK => Ok(ident),
            NAK => Err(IflagError::HandshakeFailed("device rejected sign-on".into())),
            other => Err(IflagError::HandshakeFailed(format!(
                "expected ACK after sign-on, got 0x{other:02X}"
            ))),
        }
    }

    /// Log off and release the transport.
    ///
    /// Always ends in `Closed`. Logoff and close failures are reported in
    /// the returned [`ShutdownReport`].
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let previous_state = self.state.state();
        let mut report = ShutdownReport {
            previous_state,
            logoff_sent: false,
            logoff_error: None,
            close_error: None,
        };

        if let Some(mut transport) = self.transport.take() {
            if previous_state == SessionState::Active {
                match transport.send(&corus::logoff()).await {
                    Ok(()) => report.logoff_sent = true,
                    Err(e) => {
                        warn!("Logoff failed: {}", e);
                        report.logoff_error = Some(e.into());
                    }
                }
            }

            if let Err(e) = transport.close().await {
                warn!("Transport close failed: {}", e);
                report.close_error = Some(e);
            }
        }

        let error = report.logoff_error.as_ref().map(ToString::to_string);
        let _ = self.state.close(CloseReason::Shutdown, error.as_deref());
        info!(from = %previous_state, "Session closed");

        report
    }

    // ============ Exchange helpers ============

    pub(crate) fn ensure_active(&self) -> Result<()> {
        let state = self.state.state();
        if state.can_send() {
            Ok(())
        } else {
            Err(IflagError::SessionNotActive(state))
        }
    }

    fn transport_mut(&mut self) -> Result<&mut Box<dyn Transport>> {
        self.transport
            .as_mut()
            .ok_or(IflagError::Transport(TransportError::NotConnected))
    }

    /// Send raw bytes
    pub(crate) async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        debug!("TX {}", framing::format_frame(data));
        self.transport_mut()?.send(data).await?;
        Ok(())
    }

    /// Read one ACK, NAK or checked frame
    pub(crate) async fn read_response(&mut self) -> Result<Response> {
        let timeout = self.config.timeout;
        let algorithm = self.config.checksum;
        let transport = self.transport_mut()?;

        let first = transport.receive_exact(1, timeout).await?;
        match first[0] {
            ACK => {
                debug!("RX ACK");
                Ok(Response::Ack)
            }
            NAK => {
                debug!("RX NAK");
                Ok(Response::Nak(NAK))
            }
            SOH => {
                let len = transport.receive_exact(1, timeout).await?;
                let total = framing::response_len(len[0], algorithm);
                let mut frame = BytesMut::with_capacity(total);
                frame.extend_from_slice(&[SOH, len[0]]);

                // A body cut short by the timeout is handed to the frame
                // check, which reports it as corrupt
                let deadline = tokio::time::Instant::now() + timeout;
                while frame.len() < total {
                    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                    let chunk = if remaining.is_zero() {
                        Err(TransportError::Timeout(timeout))
                    } else {
                        transport.receive(total - frame.len(), remaining).await
                    };
                    match chunk {
                        Ok(chunk) => frame.extend_from_slice(&chunk),
                        Err(TransportError::Timeout(_)) if frame.len() > RESPONSE_HEADER_LEN => {
                            debug!(have = frame.len(), need = total, "Response frame cut short");
                            break;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                debug!("RX {}", framing::format_frame(&frame));

                let (response, _) = framing::decode_response(&frame, algorithm)?;
                Ok(response)
            }
            other => Err(IflagError::Protocol(format!(
                "unexpected start byte 0x{other:02X}"
            ))),
        }
    }

    /// Drop bytes left on the link by an earlier exchange, such as a reply
    /// that arrived after its timeout
    async fn discard_stale_input(&mut self) -> Result<()> {
        let transport = self.transport_mut()?;
        for _ in 0..MAX_STALE_READS {
            match transport.receive(MAX_PAYLOAD, Duration::ZERO).await {
                Ok(stale) => warn!("Discarding {} stale bytes: {}", stale.len(), hex::encode(&stale)),
                Err(TransportError::Timeout(_)) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Send a request frame and read its response
    pub(crate) async fn exchange(&mut self, frame: &[u8]) -> Result<Response> {
        self.discard_stale_input().await?;
        self.send_raw(frame).await?;
        self.read_response().await
    }

    /// Send a request frame and require a data frame back
    pub(crate) async fn exchange_data(&mut self, frame: &[u8]) -> Result<Bytes> {
        let response = self.exchange(frame).await?;
        expect_data(response)
    }
}

/// Unwrap a data frame; NAK becomes `DeviceRejected`
pub(crate) fn expect_data(response: Response) -> Result<Bytes> {
    match response {
        Response::Frame(payload) => Ok(payload),
        Response::Nak(code) => Err(IflagError::DeviceRejected(code)),
        Response::Ack => Err(IflagError::Protocol("expected data frame, got ACK".into())),
    }
}

/// Read the identification line, `/` up to and including `\n`
async fn read_ident<T: Transport + ?Sized>(transport: &mut T, timeout: Duration) -> Result<String> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut line = Vec::new();
    let mut started = false;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(IflagError::TransportTimeout(timeout));
        }
        let chunk = transport.receive(1, remaining).await?;
        for &b in chunk.iter() {
            if !started {
                started = b == corus::IDENT_START;
                continue;
            }
            if b == corus::IDENT_END {
                let text: String = line.iter().map(|&c| char::from(c)).collect();
                return Ok(text.trim_end_matches('\r').to_string());
            }
            line.push(b);
            if line.len() > corus::MAX_IDENT_LEN {
                return Err(IflagError::HandshakeFailed(
                    "identification line too long".into(),
                ));
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        let was_active = self.state.state() == SessionState::Active;
        let _ = self.state.close(CloseReason::Dropped, None);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if was_active {
                        if let Err(e) = transport.send(&corus::logoff()).await {
                            debug!("Logoff on drop failed: {}", e);
                        }
                    }
                    if let Err(e) = transport.close().await {
                        debug!("Close on drop failed: {}", e);
                    }
                });
            }
            Err(_) => debug!("No runtime available, dropping transport without logoff"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::{Value, ValueKind};
    use crate::core::parameter::ParameterRef;
    use crate::core::transport::TransportType;
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        pub Link {}

        #[async_trait]
        impl Transport for Link {
            async fn send(&mut self, data: &[u8]) -> std::result::Result<(), TransportError>;
            async fn receive(
                &mut self,
                max: usize,
                timeout: Duration,
            ) -> std::result::Result<Bytes, TransportError>;
            async fn close(&mut self) -> std::result::Result<(), TransportError>;
            fn transport_type(&self) -> TransportType;
            fn connection_info(&self) -> String;
            fn stats(&self) -> TransportStats;
        }
    }

    fn silent_link() -> MockLink {
        let mut link = MockLink::new();
        link.expect_send().never();
        link.expect_receive().never();
        link
    }

    #[tokio::test]
    async fn test_operations_before_startup_do_no_io() {
        let mut link = silent_link();
        link.expect_close().times(1).returning(|| Ok(()));
        let mut session = Session::new(link, SessionConfig::default());

        let refs = [ParameterRef::new(0x5E, ValueKind::String)];
        assert!(matches!(
            session.read_parameters(&refs).await,
            Err(IflagError::SessionNotActive(SessionState::Idle))
        ));
        assert!(matches!(
            session
                .write_parameters(&[(ParameterRef::new(1, ValueKind::Byte), Value::Byte(1))])
                .await,
            Err(IflagError::SessionNotActive(SessionState::Idle))
        ));
        assert!(matches!(
            session.read_parameter_id_map(false).await,
            Err(IflagError::SessionNotActive(SessionState::Idle))
        ));
        assert!(matches!(
            session.read_database("hourly", None, None, None).await,
            Err(IflagError::SessionNotActive(SessionState::Idle))
        ));

        // Idle sessions close without a logoff
        let report = session.shutdown().await;
        assert!(!report.logoff_sent);
        assert!(report.is_clean());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_operations_after_shutdown_do_no_io() {
        let mut link = silent_link();
        link.expect_close().times(1).returning(|| Ok(()));
        let mut session = Session::new(link, SessionConfig::default());
        session.shutdown().await;

        let refs = [ParameterRef::new(0x5E, ValueKind::String)];
        assert!(matches!(
            session.read_parameters(&refs).await,
            Err(IflagError::SessionNotActive(SessionState::Closed))
        ));
        assert!(matches!(
            session.startup().await,
            Err(IflagError::SessionNotActive(SessionState::Closed))
        ));

        // second shutdown touches nothing
        let report = session.shutdown().await;
        assert_eq!(report.previous_state, SessionState::Closed);
        assert!(!report.logoff_sent);
    }

    #[tokio::test]
    async fn test_wakeup_timeout_leaves_session_idle() {
        let mut link = MockLink::new();
        link.expect_send()
            .withf(|data| data.len() == 200 && data.iter().all(|&b| b == 0))
            .times(1)
            .returning(|_| Ok(()));
        link.expect_receive()
            .returning(|_, timeout| Err(TransportError::Timeout(timeout)));
        link.expect_close().returning(|| Ok(()));

        let mut session = Session::new(link, SessionConfig::default());
        let result = session.startup().await;

        assert!(matches!(result, Err(IflagError::HandshakeFailed(_))));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.history().len(), 1);
        assert!(session.history()[0].error.is_some());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_close_failure_is_reported() {
        let mut link = silent_link();
        link.expect_close()
            .times(1)
            .returning(|| Err(TransportError::Disconnected));
        let mut session = Session::new(link, SessionConfig::default());

        let report = session.shutdown().await;
        assert!(!report.is_clean());
        assert!(matches!(report.close_error, Some(TransportError::Disconnected)));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_expect_data() {
        assert!(matches!(
            expect_data(Response::Nak(NAK)),
            Err(IflagError::DeviceRejected(0x15))
        ));
        assert!(matches!(
            expect_data(Response::Ack),
            Err(IflagError::Protocol(_))
        ));
        assert_eq!(
            expect_data(Response::Frame(Bytes::from_static(b"ok"))).unwrap(),
            Bytes::from_static(b"ok")
        );
    }

    #[test]
    fn test_payload_limit_is_clamped() {
        assert_eq!(SessionConfig::default().with_max_payload(1).effective_max_payload(), MIN_PAYLOAD);
        assert_eq!(SessionConfig::default().with_max_payload(4096).effective_max_payload(), MAX_PAYLOAD);
    }
}
