//! Parsing of parameter and value arguments

use crate::core::codec::{Value, ValueKind};
use crate::core::parameter::{ParameterId, ParameterRef};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::str::FromStr;

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

fn parse_id(text: &str) -> Result<ParameterId, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => ParameterId::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid parameter id '{text}': {e}"))
}

/// Parse `ID:KIND`, e.g. `0x5E:string` or `106:date`
pub fn parse_parameter_ref(text: &str) -> Result<ParameterRef, String> {
    let (id, kind) = text
        .split_once(':')
        .ok_or_else(|| format!("expected ID:KIND, got '{text}'"))?;
    let kind = ValueKind::from_str(kind.trim()).map_err(|e| e.to_string())?;
    Ok(ParameterRef::new(parse_id(id)?, kind))
}

/// Parse a date and time; a bare date means midnight
pub fn parse_datetime(text: &str) -> Result<NaiveDateTime, String> {
    let text = text.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| format!("invalid date '{text}', expected YYYY-MM-DDTHH:MM:SS"))
}

/// Parse text into a value of `kind`
pub fn parse_value(kind: ValueKind, text: &str) -> Result<Value, String> {
    let text = text.trim();
    let invalid = |e: &dyn std::fmt::Display| format!("invalid {kind} value '{text}': {e}");

    match kind {
        ValueKind::Byte => text.parse().map(Value::Byte).map_err(|e| invalid(&e)),
        ValueKind::Word => text.parse().map(Value::Word).map_err(|e| invalid(&e)),
        ValueKind::EWord => text.parse().map(Value::EWord).map_err(|e| invalid(&e)),
        ValueKind::ULong => text.parse().map(Value::ULong).map_err(|e| invalid(&e)),
        ValueKind::EULong => text.parse().map(Value::EULong).map_err(|e| invalid(&e)),
        ValueKind::Float1 | ValueKind::Float2 | ValueKind::Float3 | ValueKind::Index
        | ValueKind::Index9 => {
            let number = Decimal::from_str(text).map_err(|e| invalid(&e))?;
            Ok(match kind {
                ValueKind::Float1 => Value::Float1(number),
                ValueKind::Float2 => Value::Float2(number),
                ValueKind::Float3 => Value::Float3(number),
                ValueKind::Index9 => Value::Index9(number),
                _ => Value::Index(number),
            })
        }
        ValueKind::Date => parse_datetime(text).map(Value::Date),
        ValueKind::String => Ok(Value::String(text.to_string())),
        ValueKind::Null2 | ValueKind::Null4 => Err(format!("{kind} values cannot be written")),
    }
}

/// Parse `ID:KIND=VALUE`, e.g. `106:date=2019-10-17T13:00:00`
pub fn parse_assignment(text: &str) -> Result<(ParameterRef, Value), String> {
    let (target, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected ID:KIND=VALUE, got '{text}'"))?;
    let parameter = parse_parameter_ref(target)?;
    let value = parse_value(parameter.kind, value)?;
    Ok((parameter, value))
}
