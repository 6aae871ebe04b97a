//! Corus frame layout
//!
//! Request:  `SOH | command | len | payload | ETX | checksum`
//! Response: `SOH | len | payload | ETX | checksum`, or a single ACK / NAK
//!
//! `len` counts payload bytes only. The checksum covers SOH through ETX.

use super::checksum::{self, ChecksumType};
use bytes::Bytes;
use thiserror::Error;

/// Start of heading
pub const SOH: u8 = 0x01;
/// End of text
pub const ETX: u8 = 0x03;
/// Positive acknowledgement
pub const ACK: u8 = 0x06;
/// Negative acknowledgement
pub const NAK: u8 = 0x15;

/// Largest payload a one-byte length field can describe
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Bytes of a response frame before the payload (SOH, len)
pub const RESPONSE_HEADER_LEN: usize = 2;

/// Corus command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Read database window (0xBE)
    ReadDatabase = 0xBE,
    /// Read parameters (0xBF)
    ReadParameters = 0xBF,
    /// Write parameters (0xCF)
    WriteParameters = 0xCF,
}

impl Command {
    /// Get command from u8
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0xBE => Some(Command::ReadDatabase),
            0xBF => Some(Command::ReadParameters),
            0xCF => Some(Command::WriteParameters),
            _ => None,
        }
    }

    /// Get name of command
    pub fn name(&self) -> &'static str {
        match self {
            Command::ReadDatabase => "Read Database",
            Command::ReadParameters => "Read Parameters",
            Command::WriteParameters => "Write Parameters",
        }
    }
}

/// Frame errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Checksum does not match the frame contents
    #[error("Checksum mismatch: calculated {calculated}, received {received}")]
    ChecksumMismatch {
        /// Hex of the locally calculated checksum
        calculated: String,
        /// Hex of the checksum on the wire
        received: String,
    },

    /// Fewer bytes than the header announces
    #[error("Incomplete frame: need {needed} bytes, have {available}")]
    Incomplete {
        /// Bytes the frame occupies
        needed: usize,
        /// Bytes available
        available: usize,
    },

    /// Leading byte is not SOH, ACK or NAK
    #[error("Unexpected start byte 0x{0:02X}")]
    UnexpectedStart(u8),

    /// Byte after the payload is not ETX
    #[error("Expected ETX, found 0x{0:02X}")]
    MissingEtx(u8),

    /// Payload does not fit the length field
    #[error("Payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),
}

/// A validated inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Single ACK byte
    Ack,
    /// Single NAK byte (device-side rejection)
    Nak(u8),
    /// Checked data frame
    Frame(Bytes),
}

/// Build a request frame
pub fn encode_request(
    command: Command,
    payload: &[u8],
    algorithm: ChecksumType,
) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(payload.len() + 4 + algorithm.size());
    frame.push(SOH);
    frame.push(command as u8);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(ETX);

    let sum = checksum::calculate(&frame, algorithm);
    frame.extend_from_slice(&sum);

    Ok(frame)
}

/// Build a response frame (device side, used by the simulator)
pub fn encode_response(payload: &[u8], algorithm: ChecksumType) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(payload.len() + 3 + algorithm.size());
    frame.push(SOH);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(ETX);

    let sum = checksum::calculate(&frame, algorithm);
    frame.extend_from_slice(&sum);

    Ok(frame)
}

/// Total length of a response frame given its length byte
pub fn response_len(payload_len: u8, algorithm: ChecksumType) -> usize {
    RESPONSE_HEADER_LEN + payload_len as usize + 1 + algorithm.size()
}

/// Parse one complete response from the start of `data`.
///
/// Returns the response and the number of bytes it occupied. Once SOH is
/// seen, a frame that disagrees with its own length byte or ETX position
/// is reported as a checksum mismatch.
pub fn decode_response(
    data: &[u8],
    algorithm: ChecksumType,
) -> Result<(Response, usize), FrameError> {
    let first = *data.first().ok_or(FrameError::Incomplete {
        needed: 1,
        available: 0,
    })?;

    match first {
        ACK => Ok((Response::Ack, 1)),
        NAK => Ok((Response::Nak(NAK), 1)),
        SOH => {
            if data.len() < RESPONSE_HEADER_LEN {
                return Err(FrameError::Incomplete {
                    needed: RESPONSE_HEADER_LEN,
                    available: data.len(),
                });
            }
            let payload_len = data[1] as usize;
            let total = response_len(data[1], algorithm);
            if data.len() < total {
                // Shorter than announced: the length byte or the tail is damaged
                let split = data.len().saturating_sub(algorithm.size()).max(RESPONSE_HEADER_LEN);
                return Err(mismatch(&data[..split], &data[split..], algorithm));
            }

            let etx_pos = RESPONSE_HEADER_LEN + payload_len;
            let body = &data[..=etx_pos];
            let received = &data[etx_pos + 1..total];
            if !checksum::verify(body, received, algorithm) {
                return Err(mismatch(body, received, algorithm));
            }
            if data[etx_pos] != ETX {
                return Err(FrameError::MissingEtx(data[etx_pos]));
            }

            let payload = Bytes::copy_from_slice(&data[RESPONSE_HEADER_LEN..etx_pos]);
            Ok((Response::Frame(payload), total))
        }
        other => Err(FrameError::UnexpectedStart(other)),
    }
}

fn mismatch(body: &[u8], received: &[u8], algorithm: ChecksumType) -> FrameError {
    FrameError::ChecksumMismatch {
        calculated: hex::encode(checksum::calculate(body, algorithm)),
        received: hex::encode(received),
    }
}

/// Format a raw frame for logging
pub fn format_frame(data: &[u8]) -> String {
    match data.first() {
        Some(&SOH) if data.len() >= 3 => match Command::from_u8(data[1]) {
            Some(command) => format!(
                "{} len={} data={}",
                command.name(),
                data[2],
                hex::encode(&data[3..])
            ),
            None => format!("Frame len={} data={}", data[1], hex::encode(&data[2..])),
        },
        Some(&ACK) if data.len() == 1 => "ACK".to_string(),
        Some(&NAK) if data.len() == 1 => "NAK".to_string(),
        _ => hex::encode(data),
    }
}
