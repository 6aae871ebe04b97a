//! Error type for session operations

use super::codec::CodecError;
use super::parameter::ParameterId;
use super::protocol::FrameError;
use super::state_machine::SessionState;
use super::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by session operations
#[derive(Error, Debug)]
pub enum IflagError {
    /// No response within the timeout; the session stays usable
    #[error("Timeout after {0:?}")]
    TransportTimeout(Duration),

    /// Connection-level failure
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// Response failed checksum verification
    #[error("Checksum error: calculated {calculated}, received {received}")]
    ChecksumError {
        /// Hex of the locally calculated checksum
        calculated: String,
        /// Hex of the checksum on the wire
        received: String,
    },

    /// Device answered NAK
    #[error("Device rejected the request (code 0x{0:02X})")]
    DeviceRejected(u8),

    /// Operation requires an active session
    #[error("Session not active (state: {0})")]
    SessionNotActive(SessionState),

    /// Wake-up or sign-on failed
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Device has no value for this id
    #[error("Unknown parameter 0x{0:02X}")]
    UnknownParameter(ParameterId),

    /// Name not present in the parameter id map
    #[error("Unknown parameter name: {0}")]
    UnknownParameterName(String),

    /// Firmware string not present in the parameter catalog
    #[error("Unknown firmware: {0}")]
    UnknownFirmware(String),

    /// No record layout for a database or record length
    #[error("Unknown record layout for {database} (record length {record_length:?})")]
    UnknownRecordLayout {
        /// Database name
        database: String,
        /// Device-reported record length, when known
        record_length: Option<usize>,
    },

    /// Database name not known to the protocol
    #[error("Unknown database: {0}")]
    UnknownDatabase(String),

    /// Malformed or unexpected response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Value encoding or decoding failed
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl IflagError {
    /// Whether the session is still usable after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, IflagError::Transport(_))
    }
}

impl From<TransportError> for IflagError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout(after) => IflagError::TransportTimeout(after),
            other => IflagError::Transport(other),
        }
    }
}

impl From<FrameError> for IflagError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::ChecksumMismatch {
                calculated,
                received,
            } => IflagError::ChecksumError {
                calculated,
                received,
            },
            other => IflagError::Protocol(other.to_string()),
        }
    }
}

/// Result alias for session operations
pub type Result<T> = std::result::Result<T, IflagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_maps_to_recoverable() {
        let err = IflagError::from(TransportError::Timeout(Duration::from_secs(2)));
        assert!(matches!(err, IflagError::TransportTimeout(_)));
        assert!(err.is_recoverable());

        let err = IflagError::from(TransportError::Disconnected);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_frame_errors() {
        let err = IflagError::from(FrameError::ChecksumMismatch {
            calculated: "0000".into(),
            received: "0001".into(),
        });
        assert!(matches!(err, IflagError::ChecksumError { .. }));

        let err = IflagError::from(FrameError::MissingEtx(0x42));
        assert!(matches!(err, IflagError::Protocol(_)));
    }
}
