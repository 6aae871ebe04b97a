//! Iflag CLI - Command-line interface
//!
//! Signs on to a Corus device, runs one operation and logs off.

use anyhow::Context;
use chrono::NaiveDateTime;
use clap::{ArgAction, Parser, Subcommand};
use iflag_core::cli::{
    parse_assignment, parse_datetime, parse_parameter_ref, print_exit_codes, render_readout,
    render_record, render_write_report, CliResult, ExitCodes, OutputFormat,
};
use iflag_core::config::{ClientConfig, LoggingConfig};
use iflag_core::core::transport::{self, SerialConfig, TcpConfig, TransportConfig};
use iflag_core::{IflagError, ParameterRef, Session, Value};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Iflag CLI
#[derive(Parser, Debug)]
#[command(
    name = "iflag-cli",
    version,
    about = "Client for IFLAG / Corus gas volume conversion devices",
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to the per-user config)
    #[arg(short, long, env = "IFLAG_CONFIG")]
    config: Option<PathBuf>,

    /// Device or gateway host
    #[arg(short = 'H', long, conflicts_with = "serial")]
    host: Option<String>,

    /// TCP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Serial port (e.g., /dev/ttyUSB0, COM3)
    #[arg(short, long)]
    serial: Option<String>,

    /// Serial baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Per-receive timeout (ms)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output (-v info, -vv debug with raw frames)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign on and show identification and firmware
    Ident,

    /// Read parameters by id
    Read {
        /// Parameters as ID:KIND, e.g. 0x5E:string
        #[arg(required = true, value_parser = parse_parameter_ref)]
        parameters: Vec<ParameterRef>,
    },

    /// Read parameters by name through the firmware's id map
    ReadNames {
        /// Parameter names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Write parameters
    Write {
        /// Assignments as ID:KIND=VALUE, e.g. 106:date=2019-10-17T13:00:00
        #[arg(required = true, value_parser = parse_assignment)]
        assignments: Vec<(ParameterRef, Value)>,
    },

    /// Read a database window, newest record first
    Database {
        /// interval, hourly, daily, monthly or parameter
        name: String,

        /// Newest record to include
        #[arg(long, value_parser = parse_datetime)]
        start: Option<NaiveDateTime>,

        /// Oldest record to include
        #[arg(long, value_parser = parse_datetime)]
        stop: Option<NaiveDateTime>,

        /// Pulse weight, skips reading it from the device
        #[arg(long)]
        pulse_weight: Option<Decimal>,

        /// Stop after this many records
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print the exit code table
    ExitCodes,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::ExitCodes) {
        print_exit_codes();
        return ExitCode::SUCCESS;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => return finish(&CliResult::error(ExitCodes::CONFIG_ERROR, format!("{e:#}"))),
    };
    init_logging(&cli, &config.logging);

    let result = match run(&cli, &config).await {
        Ok(result) | Err(result) => result,
    };
    finish(&result)
}

fn finish(result: &CliResult) -> ExitCode {
    if let CliResult::Error(code, msg) = result {
        eprintln!("Error: {} ({})", msg, code);
    }
    result.to_exit_code()
}

fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::load().context("loading default config")?,
    };

    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(port) = &cli.serial {
        config.transport = TransportConfig::Serial(SerialConfig::new(port, cli.baud));
    } else if let Some(host) = &cli.host {
        let port = cli.port.unwrap_or(TcpConfig::default().port);
        config.transport = TransportConfig::Tcp(TcpConfig::new(host, port));
    } else if let (Some(port), TransportConfig::Tcp(tcp)) = (cli.port, &mut config.transport) {
        tcp.port = port;
    }

    Ok(config)
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) {
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => logging.level.as_str(),
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: &Cli, config: &ClientConfig) -> Result<CliResult, CliResult> {
    let session_config = config.session_config()?;
    let link = transport::open(&config.transport).await?;
    info!("Connected to {}", link.connection_info());

    let mut session = Session::from_boxed(link, session_config);
    let outcome = match session.startup().await {
        Ok(()) => execute(cli, &mut session).await,
        Err(e) => Err(e.into()),
    };

    let report = session.shutdown().await;
    if !report.is_clean() {
        warn!(
            logoff = ?report.logoff_error,
            close = ?report.close_error,
            "Shutdown was not clean"
        );
    }
    outcome
}

async fn execute(cli: &Cli, session: &mut Session) -> Result<CliResult, CliResult> {
    match &cli.command {
        Commands::Ident => {
            let firmware = session.read_firmware().await?;
            let ident = session.ident().unwrap_or_default();
            match cli.format {
                OutputFormat::Text => println!("ident: {ident}\nfirmware: {firmware}"),
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "ident": ident, "firmware": firmware }));
                }
            }
            Ok(CliResult::success())
        }

        Commands::Read { parameters } => {
            let readout = session.read_parameters(parameters).await?;
            println!("{}", render_readout(&readout, cli.format));
            Ok(readout_result(readout.errors().count(), readout.len()))
        }

        Commands::ReadNames { names } => {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            let readout = session.read_parameters_by_name(&names).await?;
            println!("{}", render_readout(&readout, cli.format));
            Ok(readout_result(readout.errors().count(), readout.len()))
        }

        Commands::Write { assignments } => {
            let report = session.write_parameters(assignments).await?;
            println!("{}", render_write_report(&report, cli.format));
            if report.all_acknowledged() {
                Ok(CliResult::success())
            } else {
                Ok(CliResult::partial(format!(
                    "{} of {} writes rejected",
                    report.rejected().count(),
                    report.outcomes().len()
                )))
            }
        }

        Commands::Database {
            name,
            start,
            stop,
            pulse_weight,
            limit,
        } => {
            let mut cursor = session
                .read_database(name, *start, *stop, *pulse_weight)
                .await?;
            let mut records = 0usize;
            let mut skipped = 0usize;

            while let Some(item) = cursor.next().await {
                match item {
                    Ok(record) => {
                        println!("{}", render_record(&record, cli.format));
                        records += 1;
                        if limit.is_some_and(|limit| records >= limit) {
                            break;
                        }
                    }
                    Err(IflagError::Codec(e)) => {
                        warn!("Skipped record: {}", e);
                        skipped += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if skipped == 0 {
                Ok(CliResult::success())
            } else {
                Ok(CliResult::partial(format!(
                    "{skipped} records could not be decoded"
                )))
            }
        }

        Commands::ExitCodes => Ok(CliResult::success()),
    }
}

fn readout_result(failed: usize, total: usize) -> CliResult {
    if failed == 0 {
        CliResult::success()
    } else {
        CliResult::partial(format!("{failed} of {total} parameters failed"))
    }
}
