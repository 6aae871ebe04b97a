//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Text and JSON rendering of results
//! - Parsing of parameter arguments

pub mod args;
pub mod exit_codes;
pub mod output;

pub use args::{parse_assignment, parse_datetime, parse_parameter_ref, parse_value};
pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
pub use output::{render_readout, render_record, render_write_report, OutputFormat};
