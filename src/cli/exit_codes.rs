//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::ConfigError;
use crate::core::error::IflagError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// No answer within the timeout
    pub const TIMEOUT: u8 = 4;

    /// Wake-up or sign-on failed
    pub const HANDSHAKE_FAILED: u8 = 5;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Checksum or framing error
    pub const PROTOCOL_ERROR: u8 = 9;

    /// Device answered NAK
    pub const DEVICE_REJECTED: u8 = 10;

    /// Parameter, firmware, database or layout not known
    pub const UNKNOWN_ITEM: u8 = 12;

    /// Some items of a batch failed
    pub const PARTIAL_FAILURE: u8 = 13;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Value could not be encoded or decoded
    pub const VALIDATION_FAILED: u8 = 17;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Invalid command-line input
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::INVALID_ARGS, msg.into())
    }

    /// Some items failed
    pub fn partial(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::PARTIAL_FAILURE, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<TransportError> for CliResult {
    fn from(err: TransportError) -> Self {
        let code = match &err {
            TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
            TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
            TransportError::Timeout(_) => ExitCodes::TIMEOUT,
            _ => ExitCodes::CONNECTION_FAILED,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<IflagError> for CliResult {
    fn from(err: IflagError) -> Self {
        let code = match &err {
            IflagError::TransportTimeout(_) => ExitCodes::TIMEOUT,
            IflagError::Transport(_) => ExitCodes::CONNECTION_FAILED,
            IflagError::ChecksumError { .. } | IflagError::Protocol(_) => {
                ExitCodes::PROTOCOL_ERROR
            }
            IflagError::DeviceRejected(_) => ExitCodes::DEVICE_REJECTED,
            IflagError::SessionNotActive(_) | IflagError::HandshakeFailed(_) => {
                ExitCodes::HANDSHAKE_FAILED
            }
            IflagError::UnknownParameter(_)
            | IflagError::UnknownParameterName(_)
            | IflagError::UnknownFirmware(_)
            | IflagError::UnknownRecordLayout { .. }
            | IflagError::UnknownDatabase(_) => ExitCodes::UNKNOWN_ITEM,
            IflagError::Codec(_) => ExitCodes::VALIDATION_FAILED,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Timeout",
        5 => "Handshake failed",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Protocol error",
        10 => "Device rejected request",
        12 => "Unknown parameter, firmware, database or layout",
        13 => "Partial failure",
        14 => "Port not found",
        17 => "Validation failed",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 5, 7, 8, 9, 10, 12, 13, 14, 17, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);

        let error = CliResult::error(3, "Connection failed");
        assert!(!error.is_success());
        assert_eq!(error.code(), 3);
        assert_eq!(error.message(), Some("Connection failed"));
    }

    #[test]
    fn test_from_iflag_error() {
        let result = CliResult::from(IflagError::TransportTimeout(Duration::from_secs(1)));
        assert_eq!(result.code(), ExitCodes::TIMEOUT);

        let result = CliResult::from(IflagError::DeviceRejected(0x15));
        assert_eq!(result.code(), ExitCodes::DEVICE_REJECTED);

        let result = CliResult::from(IflagError::UnknownFirmware("FL_x".into()));
        assert_eq!(result.code(), ExitCodes::UNKNOWN_ITEM);
        assert_ne!(exit_code_description(result.code()), "Unknown error");
    }

    #[test]
    fn test_from_transport_error() {
        let result = CliResult::from(TransportError::PortNotFound("/dev/ttyX".into()));
        assert_eq!(result.code(), ExitCodes::PORT_NOT_FOUND);
    }
}
