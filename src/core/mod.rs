//! Core module containing the protocol engine
//!
//! This module provides:
//! - Codec for the device's fixed-width value encodings
//! - Frame protocol (SOH/ETX framing, CRC-16/BUYPASS, Corus messages)
//! - Transport layer for TCP and serial connections
//! - Session management with state machine
//! - Parameter exchange and firmware id maps
//! - Database (log) reader with pulse-weight scaling
//! - Virtual device simulation

pub mod codec;
pub mod database;
pub mod error;
pub mod parameter;
pub mod protocol;
pub mod session;
pub mod simulator;
pub mod state_machine;
pub mod transport;

pub use error::{IflagError, Result};
