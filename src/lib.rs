//! # Iflag Core Library
//!
//! A client for the IFLAG / Corus protocol spoken by gas volume conversion
//! devices in Single Address Mode:
//! - Serial ports (optical heads, RS-232)
//! - TCP/IP connections (meter gateways, terminal servers)
//!
//! ## Features
//!
//! - Wake-up, sign-on and logoff handshake
//! - Batched parameter reads and per-parameter writes
//! - Firmware-specific parameter name maps
//! - Paged database reads with pulse-weight scaling
//! - Simulated device for tests
//! - CLI with exit codes and JSON output
//!
//! ## Example
//!
//! ```rust,no_run
//! use iflag_core::{Session, SessionConfig, TcpConfig};
//! use iflag_core::core::transport::open_tcp;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = open_tcp(&TcpConfig::new("10.0.0.5", 4000)).await?;
//!     let mut session = Session::new(transport, SessionConfig::default());
//!
//!     session.startup().await?;
//!     println!("Firmware: {}", session.read_firmware().await?);
//!
//!     let mut cursor = session.read_database("hourly", None, None, None).await?;
//!     while let Some(record) = cursor.next().await {
//!         println!("{:?}", record?);
//!     }
//!     drop(cursor);
//!
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::ClientConfig;
pub use crate::core::codec::{Value, ValueKind};
pub use crate::core::database::{
    DatabaseCursor, DatabaseLayout, DatabaseRecord, DatabaseRecordField, PulseScaling,
};
pub use crate::core::error::{IflagError, Result};
pub use crate::core::parameter::{
    ParameterCatalog, ParameterId, ParameterIdMap, ParameterReadout, ParameterRef, WriteOutcome,
    WriteReport,
};
pub use crate::core::protocol::{ChecksumType, DatabaseId};
pub use crate::core::session::{Session, SessionConfig, ShutdownReport};
pub use crate::core::state_machine::SessionState;
pub use crate::core::transport::{
    SerialConfig, SerialFlowControl, TcpConfig, Transport, TransportConfig, TransportType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
