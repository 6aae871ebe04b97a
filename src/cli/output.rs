//! Rendering of results for the terminal

use crate::core::database::DatabaseRecord;
use crate::core::parameter::{ParameterReadout, WriteOutcome, WriteReport};
use clap::ValueEnum;
use serde_json::json;

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON for scripting
    Json,
}

/// Render a parameter readout
pub fn render_readout(readout: &ParameterReadout, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => readout
            .entries()
            .iter()
            .map(|entry| {
                let label = entry.name.as_deref().unwrap_or("");
                match &entry.result {
                    Ok(value) => format!("0x{:02X} {:<24} {}", entry.parameter.id, label, value),
                    Err(e) => format!("0x{:02X} {:<24} ERROR: {}", entry.parameter.id, label, e),
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Json => {
            let items: Vec<serde_json::Value> = readout
                .entries()
                .iter()
                .map(|entry| {
                    let mut item = json!({
                        "id": entry.parameter.id,
                        "kind": entry.parameter.kind,
                    });
                    if let Some(name) = &entry.name {
                        item["name"] = json!(name);
                    }
                    match &entry.result {
                        Ok(value) => item["value"] = json!(value),
                        Err(e) => item["error"] = json!(e.to_string()),
                    }
                    item
                })
                .collect();
            serde_json::Value::Array(items).to_string()
        }
    }
}

/// Render a write report
pub fn render_write_report(report: &WriteReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => report
            .outcomes()
            .iter()
            .map(|(parameter, outcome)| match outcome {
                WriteOutcome::Acknowledged => format!("0x{:02X} OK", parameter.id),
                WriteOutcome::Rejected { code } => {
                    format!("0x{:02X} REJECTED (0x{:02X})", parameter.id, code)
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Json => {
            let items: Vec<serde_json::Value> = report
                .outcomes()
                .iter()
                .map(|(parameter, outcome)| {
                    let mut item = json!(outcome);
                    item["id"] = json!(parameter.id);
                    item
                })
                .collect();
            serde_json::Value::Array(items).to_string()
        }
    }
}

/// Render one database record; JSON output is one object per line
pub fn render_record(record: &DatabaseRecord, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => record
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(" "),
        OutputFormat::Json => json!(record).to_string(),
    }
}
