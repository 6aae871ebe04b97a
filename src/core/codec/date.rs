//! Packed date/time encoding
//!
//! Four bytes, big-endian, bit fields from the most significant end:
//! year - 2000 (6 bits), month (4), day (5), hour (5), minute (6), second (6).

use super::CodecError;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// First year the packed format can hold
pub const MIN_ENCODABLE_YEAR: i32 = 2000;
/// Last year the packed format can hold
pub const MAX_ENCODABLE_YEAR: i32 = MIN_ENCODABLE_YEAR + 63;

const YEAR_SHIFT: u32 = 26;
const MONTH_SHIFT: u32 = 22;
const DAY_SHIFT: u32 = 17;
const HOUR_SHIFT: u32 = 12;
const MINUTE_SHIFT: u32 = 6;

const YEAR_MASK: u32 = 0x3F;
const MONTH_MASK: u32 = 0x0F;
const DAY_MASK: u32 = 0x1F;
const HOUR_MASK: u32 = 0x1F;
const MINUTE_MASK: u32 = 0x3F;
const SECOND_MASK: u32 = 0x3F;

/// Decode a packed date. Fails with [`CodecError::MalformedDate`] when a
/// field is outside the calendar (month 0, day 31 in April, hour 24, ...).
pub fn unpack_date(data: &[u8]) -> Result<NaiveDateTime, CodecError> {
    if data.len() < 4 {
        return Err(CodecError::ShortBuffer {
            expected: 4,
            actual: data.len(),
        });
    }
    let raw = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);

    let year = MIN_ENCODABLE_YEAR + ((raw >> YEAR_SHIFT) & YEAR_MASK) as i32;
    let month = (raw >> MONTH_SHIFT) & MONTH_MASK;
    let day = (raw >> DAY_SHIFT) & DAY_MASK;
    let hour = (raw >> HOUR_SHIFT) & HOUR_MASK;
    let minute = (raw >> MINUTE_SHIFT) & MINUTE_MASK;
    let second = raw & SECOND_MASK;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .ok_or(CodecError::MalformedDate(raw))
}

/// Encode a date into the packed format. Sub-second precision is dropped.
pub fn pack_date(value: &NaiveDateTime) -> Result<[u8; 4], CodecError> {
    if !(MIN_ENCODABLE_YEAR..=MAX_ENCODABLE_YEAR).contains(&value.year()) {
        return Err(CodecError::DateOutOfRange(*value));
    }

    let raw = ((value.year() - MIN_ENCODABLE_YEAR) as u32) << YEAR_SHIFT
        | value.month() << MONTH_SHIFT
        | value.day() << DAY_SHIFT
        | value.hour() << HOUR_SHIFT
        | value.minute() << MINUTE_SHIFT
        | value.second();

    Ok(raw.to_be_bytes())
}
