//! Corus Single Address Mode messages
//!
//! Handshake byte strings, request payload builders and the database page
//! header. Frames are assembled by [`super::framing`].

use super::checksum::{self, ChecksumType};
use super::framing::{self, Command, FrameError, ACK, ETX, SOH};
use crate::core::codec::{self, CodecError};
use crate::core::parameter::ParameterId;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte repeated to wake the optical/serial interface
pub const WAKEUP_BYTE: u8 = 0x00;
/// Default wake-up length; the device needs at least 12
pub const DEFAULT_WAKEUP_LENGTH: usize = 200;
/// Device reply to a wake-up
pub const WAKEUP_REPLY: [u8; 3] = [0x00, 0x00, 0x00];

/// Sign-on request without meter address
pub const SIGN_ON: &[u8] = b"/?!\r\n";
/// First byte of the identification line
pub const IDENT_START: u8 = b'/';
/// Last byte of the identification line
pub const IDENT_END: u8 = b'\n';
/// Longest identification line accepted before giving up
pub const MAX_IDENT_LEN: usize = 128;

/// Option select: ACK, protocol mode "0", baud "7", mode "0"
pub const OPTION_SELECT: &[u8] = b"\x06070\r\n";

/// Password challenge text
pub const PASSWORD_CHALLENGE: &[u8] = b"PASS";
/// Password challenge length including its CRC
pub const PASSWORD_MESSAGE_LEN: usize = 6;

/// Parameter holding the firmware identifier (String)
pub const FIRMWARE_PARAMETER_ID: ParameterId = 0x5E;

/// Default database field selection: every field
pub const DEFAULT_FIELD_MASK: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xF9];

/// Bit 15 of a page number marks the final page
const LAST_PAGE_FLAG: u16 = 0x8000;
/// Page number bits
pub const PAGE_NUMBER_MASK: u16 = 0x7FFF;

/// Build the wake-up burst
pub fn wakeup(length: usize) -> Vec<u8> {
    vec![WAKEUP_BYTE; length]
}

/// Build the IEC 62056-21 break message that ends the session
pub fn logoff() -> Vec<u8> {
    let mut message = vec![SOH, b'B', b'0', ETX];
    let bcc = checksum::xor_checksum(&message[1..]);
    message.push(bcc);
    message
}

/// Check a received password challenge: `"PASS"` followed by its CRC
pub fn verify_password_challenge(message: &[u8], algorithm: ChecksumType) -> bool {
    message.len() == PASSWORD_CHALLENGE.len() + algorithm.size()
        && message.starts_with(PASSWORD_CHALLENGE)
        && checksum::verify(
            PASSWORD_CHALLENGE,
            &message[PASSWORD_CHALLENGE.len()..],
            algorithm,
        )
}

/// Password challenge as the device sends it
pub fn password_challenge(algorithm: ChecksumType) -> Vec<u8> {
    let mut message = PASSWORD_CHALLENGE.to_vec();
    message.extend(checksum::calculate(PASSWORD_CHALLENGE, algorithm));
    message
}

/// Build a read-parameters frame
pub fn read_request(ids: &[ParameterId], algorithm: ChecksumType) -> Result<Vec<u8>, FrameError> {
    framing::encode_request(Command::ReadParameters, ids, algorithm)
}

/// Build a write-parameters frame for one already encoded value
pub fn write_request(
    id: ParameterId,
    value: &[u8],
    algorithm: ChecksumType,
) -> Result<Vec<u8>, FrameError> {
    let mut payload = Vec::with_capacity(value.len() + 1);
    payload.push(id);
    payload.extend_from_slice(value);
    framing::encode_request(Command::WriteParameters, &payload, algorithm)
}

/// Device log databases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseId {
    /// Interval log
    Interval,
    /// Hourly log
    Hourly,
    /// Daily log
    Daily,
    /// Monthly log
    Monthly,
    /// Parameter change log
    Parameter,
}

impl DatabaseId {
    /// Get all readable databases
    pub fn all() -> &'static [DatabaseId] {
        &[
            DatabaseId::Interval,
            DatabaseId::Hourly,
            DatabaseId::Daily,
            DatabaseId::Monthly,
            DatabaseId::Parameter,
        ]
    }

    /// Wire code
    pub fn code(&self) -> u8 {
        match self {
            DatabaseId::Interval => 0,
            DatabaseId::Hourly => 1,
            DatabaseId::Daily => 2,
            DatabaseId::Monthly => 3,
            DatabaseId::Parameter => 5,
        }
    }

    /// Get name of database
    pub fn name(&self) -> &'static str {
        match self {
            DatabaseId::Interval => "interval",
            DatabaseId::Hourly => "hourly",
            DatabaseId::Daily => "daily",
            DatabaseId::Monthly => "monthly",
            DatabaseId::Parameter => "parameter",
        }
    }

    /// Look up a database by name
    pub fn from_name(name: &str) -> Option<Self> {
        DatabaseId::all().iter().copied().find(|db| db.name() == name)
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-database window request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseRequest {
    /// Database to read
    pub database: DatabaseId,
    /// Field selection bitmask, sent as is
    pub field_mask: [u8; 4],
    /// Newest record to include
    pub start: Option<NaiveDateTime>,
    /// Oldest record to include
    pub stop: Option<NaiveDateTime>,
}

impl DatabaseRequest {
    /// Create a request for the whole window between two optional bounds
    pub fn new(
        database: DatabaseId,
        start: Option<NaiveDateTime>,
        stop: Option<NaiveDateTime>,
    ) -> Self {
        Self {
            database,
            field_mask: DEFAULT_FIELD_MASK,
            start,
            stop,
        }
    }

    /// Set the field mask
    pub fn with_field_mask(mut self, mask: [u8; 4]) -> Self {
        self.field_mask = mask;
        self
    }

    /// Request payload: `db | mask | start | stop`
    pub fn payload(&self) -> Result<Vec<u8>, CodecError> {
        let bound = |date: &Option<NaiveDateTime>| match date {
            Some(dt) => codec::pack_date(dt),
            None => Ok([0u8; 4]),
        };

        let mut payload = Vec::with_capacity(13);
        payload.push(self.database.code());
        payload.extend_from_slice(&self.field_mask);
        payload.extend_from_slice(&bound(&self.start)?);
        payload.extend_from_slice(&bound(&self.stop)?);
        Ok(payload)
    }
}

/// Header of one database response page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// Page sequence number (15 bits)
    pub number: u16,
    /// No further pages follow
    pub last: bool,
    /// Record length, carried by the first page only
    pub record_length: Option<u8>,
}

impl PageHeader {
    /// Split a page payload into header and record bytes
    pub fn parse(payload: &[u8], first: bool) -> Result<(PageHeader, &[u8]), FrameError> {
        let header_len = if first { 3 } else { 2 };
        if payload.len() < header_len {
            return Err(FrameError::Incomplete {
                needed: header_len,
                available: payload.len(),
            });
        }

        let raw = u16::from_le_bytes([payload[0], payload[1]]);
        let header = PageHeader {
            number: raw & PAGE_NUMBER_MASK,
            last: raw & LAST_PAGE_FLAG != 0,
            record_length: first.then(|| payload[2]),
        };
        Ok((header, &payload[header_len..]))
    }

    /// Encode a page payload (device side)
    pub fn encode(&self, records: &[u8]) -> Vec<u8> {
        let mut raw = self.number & PAGE_NUMBER_MASK;
        if self.last {
            raw |= LAST_PAGE_FLAG;
        }
        let mut payload = raw.to_le_bytes().to_vec();
        if let Some(length) = self.record_length {
            payload.push(length);
        }
        payload.extend_from_slice(records);
        payload
    }
}

/// Byte the host sends to request the next page
pub const NEXT_PAGE: u8 = ACK;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_logoff_message() {
        assert_eq!(logoff(), b"\x01B0\x03q".to_vec());
    }

    #[test]
    fn test_password_challenge() {
        let message = password_challenge(ChecksumType::Crc16Buypass);
        assert_eq!(message, b"PASS\xe0\xae".to_vec());
        assert!(verify_password_challenge(&message, ChecksumType::Crc16Buypass));
        assert!(!verify_password_challenge(b"PASS\xe0\xaf", ChecksumType::Crc16Buypass));
        assert!(!verify_password_challenge(b"PASX\xe0\xae", ChecksumType::Crc16Buypass));
    }

    #[test]
    fn test_open_window_payload() {
        let request = DatabaseRequest::new(DatabaseId::Interval, None, None)
            .with_field_mask([0xF9, 0xFF, 0x0F, 0x38]);
        assert_eq!(
            hex::encode(request.payload().unwrap()),
            "00f9ff0f380000000000000000"
        );
    }

    #[test]
    fn test_window_bounds() {
        let start = NaiveDate::from_ymd_opt(2019, 10, 17)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let request = DatabaseRequest::new(DatabaseId::Hourly, Some(start), None);
        let payload = request.payload().unwrap();
        assert_eq!(payload[0], 1);
        assert_eq!(&payload[1..5], &DEFAULT_FIELD_MASK);
        assert_eq!(&payload[5..9], &codec::pack_date(&start).unwrap());
        assert_eq!(&payload[9..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_page_header() {
        let first = PageHeader {
            number: 0,
            last: false,
            record_length: Some(19),
        };
        let payload = first.encode(&[1, 2, 3]);
        let (header, rest) = PageHeader::parse(&payload, true).unwrap();
        assert_eq!(header, first);
        assert_eq!(rest, &[1, 2, 3]);

        let (header, rest) = PageHeader::parse(&[0x02, 0x80, 9], false).unwrap();
        assert_eq!(header.number, 2);
        assert!(header.last);
        assert_eq!(header.record_length, None);
        assert_eq!(rest, &[9]);
    }

    #[test]
    fn test_database_names() {
        assert_eq!(DatabaseId::from_name("monthly"), Some(DatabaseId::Monthly));
        assert_eq!(DatabaseId::from_name("event"), None);
        assert_eq!(DatabaseId::Parameter.code(), 5);
    }
}
