//! Virtual Corus Device
//!
//! An in-process device that speaks the sign-on handshake, parameter
//! reads and writes, and paged database reads. [`SimulatedTransport`]
//! plugs it into a [`Session`](super::session::Session) for tests and
//! offline development.

use super::codec::{self, CodecError, Value, ValueKind};
use super::protocol::checksum;
use super::protocol::corus::{
    self, DatabaseId, PageHeader, NEXT_PAGE, OPTION_SELECT, SIGN_ON, WAKEUP_BYTE, WAKEUP_REPLY,
};
use super::protocol::framing::{self, Command, ACK, ETX, MAX_PAYLOAD, NAK, SOH};
use super::protocol::ChecksumType;
use super::transport::{Transport, TransportError, TransportStats, TransportType};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Page header bytes on the first page: number (2) and record length (1)
const FIRST_PAGE_HEADER_LEN: usize = 3;

/// Error injection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorInjectionConfig {
    /// Ignore wake-up bytes
    pub silent: bool,
    /// Answer the password echo with NAK
    pub reject_sign_on: bool,
    /// Flip a checksum bit in this many upcoming response frames
    pub corrupt_responses: usize,
    /// Flip the low bit of the length byte in this many upcoming response frames
    pub corrupt_length: usize,
    /// Hold back this many upcoming replies until the host's read times out
    pub late_responses: usize,
}

/// Response latency
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyConfig {
    /// Delay before each chunk is delivered, in ms
    pub base_latency_ms: u64,
}

/// A database as stored in the device, newest record first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDatabase {
    /// Record length reported on the first page
    pub record_length: u8,
    /// Raw records
    pub records: Vec<Vec<u8>>,
    /// Records per page; `None` fills each page
    pub records_per_page: Option<usize>,
}

impl DeviceDatabase {
    fn pages(&self) -> Vec<Vec<u8>> {
        let length = usize::from(self.record_length).max(1);
        let capacity = ((MAX_PAYLOAD - FIRST_PAGE_HEADER_LEN) / length).max(1);
        let per_page = self.records_per_page.unwrap_or(capacity).clamp(1, capacity);

        let chunks: Vec<&[Vec<u8>]> = if self.records.is_empty() {
            vec![&self.records[..]]
        } else {
            self.records.chunks(per_page).collect()
        };
        let count = chunks.len();

        chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let header = PageHeader {
                    number: index as u16,
                    last: index + 1 == count,
                    record_length: (index == 0).then_some(self.record_length),
                };
                header.encode(&chunk.concat())
            })
            .collect()
    }
}

/// Counters kept by the device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    /// Wake-up bursts seen
    pub wakeups: u64,
    /// Completed sign-ons
    pub sign_ons: u64,
    /// Request frames accepted
    pub requests: u64,
    /// NAKs sent
    pub naks_sent: u64,
    /// Database pages sent
    pub pages_sent: u64,
    /// Logoff messages seen
    pub logoffs: u64,
    /// Bytes received from the host
    pub bytes_received: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Asleep,
    Awake,
    Identified,
    Challenged,
    Ready,
}

/// Device memory and protocol position
#[derive(Debug)]
pub struct DeviceState {
    phase: Phase,
    ident: String,
    checksum: ChecksumType,
    parameters: HashMap<u8, Vec<u8>>,
    read_only: HashSet<u8>,
    databases: HashMap<u8, DeviceDatabase>,
    pending_pages: VecDeque<Vec<u8>>,
    last_database_request: Option<Vec<u8>>,
    writes: Vec<(u8, Vec<u8>)>,
    errors: ErrorInjectionConfig,
    stats: DeviceStats,
}

impl DeviceState {
    fn new(ident: &str) -> Self {
        Self {
            phase: Phase::Asleep,
            ident: ident.to_string(),
            checksum: ChecksumType::default(),
            parameters: HashMap::new(),
            read_only: HashSet::new(),
            databases: HashMap::new(),
            pending_pages: VecDeque::new(),
            last_database_request: None,
            writes: Vec::new(),
            errors: ErrorInjectionConfig::default(),
            stats: DeviceStats::default(),
        }
    }

    fn process(&mut self, input: &[u8]) -> Vec<u8> {
        self.stats.bytes_received += input.len() as u64;

        match self.phase {
            Phase::Asleep => {
                if input.is_empty() || input.iter().any(|&b| b != WAKEUP_BYTE) {
                    return Vec::new();
                }
                self.stats.wakeups += 1;
                if self.errors.silent {
                    return Vec::new();
                }
                self.phase = Phase::Awake;
                WAKEUP_REPLY.to_vec()
            }
            Phase::Awake if input == SIGN_ON => {
                self.phase = Phase::Identified;
                format!("/{}\r\n", self.ident).into_bytes()
            }
            Phase::Identified if input == OPTION_SELECT => {
                self.phase = Phase::Challenged;
                corus::password_challenge(self.checksum)
            }
            Phase::Challenged => {
                if !self.errors.reject_sign_on && input == corus::password_challenge(self.checksum) {
                    self.phase = Phase::Ready;
                    self.stats.sign_ons += 1;
                    vec![ACK]
                } else {
                    self.phase = Phase::Asleep;
                    self.nak()
                }
            }
            Phase::Ready => self.process_request(input),
            _ => Vec::new(),
        }
    }

    fn process_request(&mut self, input: &[u8]) -> Vec<u8> {
        if input == corus::logoff() {
            self.stats.logoffs += 1;
            self.phase = Phase::Asleep;
            self.pending_pages.clear();
            return Vec::new();
        }

        if input == [NEXT_PAGE] {
            return match self.pending_pages.pop_front() {
                Some(page) => self.page(&page),
                None => Vec::new(),
            };
        }

        let Some((command, payload)) = self.parse_request(input) else {
            return self.nak();
        };
        self.stats.requests += 1;
        self.pending_pages.clear();

        match command {
            Command::ReadParameters => {
                let mut data = Vec::new();
                for id in &payload {
                    match self.parameters.get(id) {
                        Some(bytes) => data.extend_from_slice(bytes),
                        None => return self.nak(),
                    }
                }
                self.frame(&data)
            }
            Command::WriteParameters => {
                let Some((&id, value)) = payload.split_first() else {
                    return self.nak();
                };
                let width = self.parameters.get(&id).map(Vec::len);
                if self.read_only.contains(&id) || width != Some(value.len()) {
                    return self.nak();
                }
                self.parameters.insert(id, value.to_vec());
                self.writes.push((id, value.to_vec()));
                vec![ACK]
            }
            Command::ReadDatabase => {
                let Some(database) = payload.first().and_then(|code| self.databases.get(code))
                else {
                    return self.nak();
                };
                self.pending_pages = database.pages().into();
                self.last_database_request = Some(payload);
                match self.pending_pages.pop_front() {
                    Some(page) => self.page(&page),
                    None => self.nak(),
                }
            }
        }
    }

    fn parse_request(&self, input: &[u8]) -> Option<(Command, Vec<u8>)> {
        let crc_len = self.checksum.size();
        if input.len() < 4 + crc_len || input[0] != SOH {
            return None;
        }
        let command = Command::from_u8(input[1])?;
        let len = usize::from(input[2]);
        let etx = 3 + len;
        if input.len() != etx + 1 + crc_len || input[etx] != ETX {
            return None;
        }
        if !checksum::verify(&input[..=etx], &input[etx + 1..], self.checksum) {
            debug!("Simulator: request checksum mismatch");
            return None;
        }
        Some((command, input[3..etx].to_vec()))
    }

    fn page(&mut self, page: &[u8]) -> Vec<u8> {
        self.stats.pages_sent += 1;
        self.frame(page)
    }

    fn frame(&mut self, payload: &[u8]) -> Vec<u8> {
        let Ok(mut frame) = framing::encode_response(payload, self.checksum) else {
            return self.nak();
        };
        if self.errors.corrupt_responses > 0 {
            self.errors.corrupt_responses -= 1;
            if let Some(last) = frame.last_mut() {
                *last ^= 0x01;
            }
        }
        if self.errors.corrupt_length > 0 {
            self.errors.corrupt_length -= 1;
            frame[1] ^= 0x01;
        }
        frame
    }

    fn hold_back(&mut self) -> bool {
        if self.errors.late_responses == 0 {
            return false;
        }
        self.errors.late_responses -= 1;
        true
    }

    fn nak(&mut self) -> Vec<u8> {
        self.stats.naks_sent += 1;
        vec![NAK]
    }
}

/// Scriptable Corus device, cheap to clone; clones share state
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    state: Arc<RwLock<DeviceState>>,
    latency: LatencyConfig,
}

impl VirtualDevice {
    /// Create a device answering sign-on with `ident`
    pub fn new(ident: &str) -> Self {
        Self {
            state: Arc::new(RwLock::new(DeviceState::new(ident))),
            latency: LatencyConfig::default(),
        }
    }

    /// Use a different checksum algorithm
    #[must_use]
    pub fn with_checksum(self, algorithm: ChecksumType) -> Self {
        self.state.write().checksum = algorithm;
        self
    }

    /// Store raw parameter bytes
    #[must_use]
    pub fn with_parameter(self, id: u8, bytes: Vec<u8>) -> Self {
        self.state.write().parameters.insert(id, bytes);
        self
    }

    /// Store an encoded parameter value
    pub fn with_value(self, id: u8, kind: ValueKind, value: &Value) -> Result<Self, CodecError> {
        let bytes = codec::encode(kind, value)?;
        Ok(self.with_parameter(id, bytes))
    }

    /// Store the "no value" marker for a parameter
    #[must_use]
    pub fn with_unavailable(self, id: u8, kind: ValueKind) -> Self {
        self.with_parameter(id, vec![0xFF; kind.width()])
    }

    /// Reject writes to a parameter
    #[must_use]
    pub fn with_read_only(self, id: u8) -> Self {
        self.state.write().read_only.insert(id);
        self
    }

    /// Install a database
    #[must_use]
    pub fn with_database(self, database: DatabaseId, contents: DeviceDatabase) -> Self {
        self.state.write().databases.insert(database.code(), contents);
        self
    }

    /// Set error injection
    #[must_use]
    pub fn with_errors(self, errors: ErrorInjectionConfig) -> Self {
        self.state.write().errors = errors;
        self
    }

    /// Set response latency
    #[must_use]
    pub fn with_latency(mut self, latency: LatencyConfig) -> Self {
        self.latency = latency;
        self
    }

    /// Update error injection on a running device
    pub fn set_errors(&self, errors: ErrorInjectionConfig) {
        self.state.write().errors = errors;
    }

    /// Feed host bytes and collect the device's reply
    pub fn process(&self, input: &[u8]) -> Vec<u8> {
        self.state.write().process(input)
    }

    /// Get counters
    pub fn stats(&self) -> DeviceStats {
        self.state.read().stats.clone()
    }

    /// Current raw bytes of a parameter
    pub fn parameter(&self, id: u8) -> Option<Vec<u8>> {
        self.state.read().parameters.get(&id).cloned()
    }

    /// Accepted writes in order
    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.state.read().writes.clone()
    }

    /// Payload of the most recent database request
    pub fn last_database_request(&self) -> Option<Vec<u8>> {
        self.state.read().last_database_request.clone()
    }

    /// Check if a host is signed on
    pub fn is_signed_on(&self) -> bool {
        self.state.read().phase == Phase::Ready
    }

    /// Create a transport connected to this device
    pub fn connect(&self) -> SimulatedTransport {
        SimulatedTransport {
            device: self.clone(),
            outbox: BytesMut::new(),
            late: BytesMut::new(),
            connected: true,
            stats: TransportStats::default(),
        }
    }
}

/// Transport backed by a [`VirtualDevice`]
pub struct SimulatedTransport {
    device: VirtualDevice,
    outbox: BytesMut,
    late: BytesMut,
    connected: bool,
    stats: TransportStats,
}

impl SimulatedTransport {
    /// The device behind this transport
    pub fn device(&self) -> &VirtualDevice {
        &self.device
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.stats.bytes_sent += data.len() as u64;
        self.stats.packets_sent += 1;

        let reply = self.device.process(data);
        if !reply.is_empty() && self.device.state.write().hold_back() {
            debug!("Simulator: holding back {} reply bytes", reply.len());
            self.late.extend_from_slice(&reply);
        } else {
            self.outbox.extend_from_slice(&reply);
        }
        Ok(())
    }

    async fn receive(&mut self, max: usize, timeout: Duration) -> Result<Bytes, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.outbox.is_empty() {
            if timeout.is_zero() {
                return Err(TransportError::Timeout(timeout));
            }
            tokio::time::sleep(timeout).await;
            self.stats.errors += 1;
            // Held-back replies turn up once the host has given up on them
            let late = self.late.split();
            self.outbox.extend_from_slice(&late);
            return Err(TransportError::Timeout(timeout));
        }
        if self.device.latency.base_latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.device.latency.base_latency_ms)).await;
        }

        let chunk = self.outbox.split_to(max.min(self.outbox.len())).freeze();
        self.stats.bytes_received += chunk.len() as u64;
        self.stats.packets_received += 1;
        Ok(chunk)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.outbox.clear();
        self.late.clear();
        Ok(())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Simulated
    }

    fn connection_info(&self) -> String {
        format!("simulated:{}", self.device.state.read().ident)
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Pre-built devices
pub struct DeviceTemplates;

impl DeviceTemplates {
    /// A Corus answering the firmware query with `firmware`
    pub fn corus(firmware: &str) -> Result<VirtualDevice, CodecError> {
        VirtualDevice::new("ELS5\\Corus").with_value(
            corus::FIRMWARE_PARAMETER_ID,
            ValueKind::String,
            &Value::String(firmware.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::framing::{decode_response, Response};

    fn signed_on(device: &VirtualDevice) {
        assert_eq!(device.process(&corus::wakeup(200)), WAKEUP_REPLY.to_vec());
        assert_eq!(device.process(SIGN_ON), b"/ELS5\\Corus\r\n".to_vec());
        let challenge = device.process(OPTION_SELECT);
        assert_eq!(device.process(&challenge), vec![ACK]);
        assert!(device.is_signed_on());
    }

    #[test]
    fn test_handshake_and_logoff() {
        let device = DeviceTemplates::corus("FL_b0040").unwrap();
        signed_on(&device);

        assert!(device.process(&corus::logoff()).is_empty());
        assert!(!device.is_signed_on());
        assert_eq!(device.stats().logoffs, 1);
    }

    #[test]
    fn test_read_firmware_frame() {
        let device = DeviceTemplates::corus("FL_b0040").unwrap();
        signed_on(&device);

        let request =
            corus::read_request(&[corus::FIRMWARE_PARAMETER_ID], ChecksumType::Crc16Buypass).unwrap();
        let reply = device.process(&request);
        let (response, used) = decode_response(&reply, ChecksumType::Crc16Buypass).unwrap();
        assert_eq!(used, reply.len());
        match response {
            Response::Frame(data) => assert_eq!(&data[..8], b"FL_b0040"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bad_request_checksum_is_nak() {
        let device = DeviceTemplates::corus("FL_b0040").unwrap();
        signed_on(&device);

        let mut request = corus::read_request(&[0x5E], ChecksumType::Crc16Buypass).unwrap();
        let last = request.len() - 1;
        request[last] ^= 0xFF;
        assert_eq!(device.process(&request), vec![NAK]);
        assert_eq!(device.stats().naks_sent, 1);
    }

    #[test]
    fn test_database_pages() {
        let database = DeviceDatabase {
            record_length: 4,
            records: (0u32..5).map(|n| n.to_le_bytes().to_vec()).collect(),
            records_per_page: Some(2),
        };
        let pages = database.pages();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0][..3], [0x00, 0x00, 4]);
        assert_eq!(pages[2][..2], [0x02, 0x80]);
        assert_eq!(pages[2].len(), 2 + 4);
    }

    #[test]
    fn test_empty_database_is_one_last_page() {
        let database = DeviceDatabase {
            record_length: 4,
            records: Vec::new(),
            records_per_page: None,
        };
        assert_eq!(database.pages(), vec![vec![0x00, 0x80, 4]]);
    }

    #[tokio::test]
    async fn test_late_reply_turns_up_after_a_timeout() {
        let device = DeviceTemplates::corus("FL_b0040").unwrap();
        signed_on(&device);
        device.set_errors(ErrorInjectionConfig {
            late_responses: 1,
            ..Default::default()
        });

        let mut transport = device.connect();
        let request =
            corus::read_request(&[corus::FIRMWARE_PARAMETER_ID], ChecksumType::Crc16Buypass).unwrap();
        transport.send(&request).await.unwrap();

        // a zero-wait poll does not release it
        assert!(matches!(
            transport.receive(64, Duration::ZERO).await,
            Err(TransportError::Timeout(_))
        ));
        assert!(matches!(
            transport.receive(64, Duration::from_millis(10)).await,
            Err(TransportError::Timeout(_))
        ));
        let reply = transport.receive(64, Duration::from_millis(10)).await.unwrap();
        assert_eq!(reply.len(), 13);
        assert_eq!(reply[0], SOH);
    }

    #[test]
    fn test_length_corruption() {
        let device = DeviceTemplates::corus("FL_b0040").unwrap();
        signed_on(&device);
        device.set_errors(ErrorInjectionConfig {
            corrupt_length: 1,
            ..Default::default()
        });

        let request =
            corus::read_request(&[corus::FIRMWARE_PARAMETER_ID], ChecksumType::Crc16Buypass).unwrap();
        assert_eq!(device.process(&request)[1], 9);
        assert_eq!(device.process(&request)[1], 8);
    }

    #[tokio::test]
    async fn test_transport_times_out_when_idle() {
        let device = VirtualDevice::new("X");
        let mut transport = device.connect();
        let err = transport
            .receive(1, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }
}
