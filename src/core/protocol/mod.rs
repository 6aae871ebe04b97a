//! Corus protocol layers
//!
//! - Checksum algorithms (CRC-16/BUYPASS and alternatives)
//! - Framing (SOH/ETX frames, ACK/NAK)
//! - Corus messages (handshake, requests, database pages)

pub mod checksum;
pub mod corus;
pub mod framing;

pub use checksum::{calculate as calc_checksum, ChecksumType};
pub use corus::{DatabaseId, DatabaseRequest, PageHeader};
pub use framing::{
    decode_response, encode_request, encode_response, format_frame, Command, FrameError, Response,
};
