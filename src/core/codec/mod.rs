//! Value codec for the IFLAG / Corus data representations
//!
//! Every parameter and database field on the device has a fixed wire width
//! and one of a closed set of encodings:
//! - Unsigned integers (Byte, Word, EWord, ULong, EULong)
//! - Fixed-point decimals (Float1, Float2, Float3)
//! - Packed date/time
//! - Fixed-width latin-1 strings
//! - Padding (Null2, Null4)
//! - Counter indexes (Index, Index9)
//!
//! Decimal kinds decode to [`Decimal`], never to binary floating point.

mod date;
mod numeric;
mod text;

pub use date::{pack_date, unpack_date, MAX_ENCODABLE_YEAR, MIN_ENCODABLE_YEAR};

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire representation of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// 8 bit unsigned integer
    Byte,
    /// 16 bit unsigned integer
    Word,
    /// 24 bit unsigned integer
    #[serde(rename = "eword")]
    EWord,
    /// 32 bit unsigned integer
    #[serde(rename = "ulong")]
    ULong,
    /// 40 bit unsigned integer
    #[serde(rename = "eulong")]
    EULong,
    /// Signed 16 bit integer with two implicit decimals
    Float1,
    /// 15 bit mantissa, 1 bit exponent
    Float2,
    /// 14 bit mantissa, 2 bit exponent
    Float3,
    /// Packed date and time
    Date,
    /// 8 character latin-1 string
    String,
    /// 2 bytes of padding
    Null2,
    /// 4 bytes of padding
    Null4,
    /// 4 byte integer part, 4 byte fraction
    Index,
    /// 5 byte integer part, 4 byte fraction
    Index9,
}

impl ValueKind {
    /// Get all value kinds
    pub fn all() -> &'static [ValueKind] {
        &[
            ValueKind::Byte,
            ValueKind::Word,
            ValueKind::EWord,
            ValueKind::ULong,
            ValueKind::EULong,
            ValueKind::Float1,
            ValueKind::Float2,
            ValueKind::Float3,
            ValueKind::Date,
            ValueKind::String,
            ValueKind::Null2,
            ValueKind::Null4,
            ValueKind::Index,
            ValueKind::Index9,
        ]
    }

    /// Get name of value kind
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Byte => "byte",
            ValueKind::Word => "word",
            ValueKind::EWord => "eword",
            ValueKind::ULong => "ulong",
            ValueKind::EULong => "eulong",
            ValueKind::Float1 => "float1",
            ValueKind::Float2 => "float2",
            ValueKind::Float3 => "float3",
            ValueKind::Date => "date",
            ValueKind::String => "string",
            ValueKind::Null2 => "null2",
            ValueKind::Null4 => "null4",
            ValueKind::Index => "index",
            ValueKind::Index9 => "index9",
        }
    }

    /// Get wire width in bytes
    pub fn width(&self) -> usize {
        match self {
            ValueKind::Byte => 1,
            ValueKind::Word | ValueKind::Float1 | ValueKind::Float2 | ValueKind::Float3 => 2,
            ValueKind::Null2 => 2,
            ValueKind::EWord => 3,
            ValueKind::ULong | ValueKind::Date | ValueKind::Null4 => 4,
            ValueKind::EULong => 5,
            ValueKind::String | ValueKind::Index => 8,
            ValueKind::Index9 => 9,
        }
    }

    /// Whether values of this kind are numbers
    pub fn is_numeric(&self) -> bool {
        !matches!(
            self,
            ValueKind::Date | ValueKind::String | ValueKind::Null2 | ValueKind::Null4
        )
    }

    /// Whether this kind is padding without a value
    pub fn is_null(&self) -> bool {
        matches!(self, ValueKind::Null2 | ValueKind::Null4)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ValueKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        ValueKind::all()
            .iter()
            .copied()
            .find(|kind| kind.name() == lower)
            .ok_or_else(|| CodecError::UnknownKind(s.to_string()))
    }
}

/// A decoded protocol value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// 8 bit unsigned integer
    Byte(u8),
    /// 16 bit unsigned integer
    Word(u16),
    /// 24 bit unsigned integer
    EWord(u32),
    /// 32 bit unsigned integer
    ULong(u32),
    /// 40 bit unsigned integer
    EULong(u64),
    /// Float1 decimal
    Float1(Decimal),
    /// Float2 decimal
    Float2(Decimal),
    /// Float3 decimal
    Float3(Decimal),
    /// Date and time (device local time)
    Date(NaiveDateTime),
    /// Text
    String(String),
    /// Padding, no value
    Null,
    /// Index counter
    Index(Decimal),
    /// Index9 counter
    Index9(Decimal),
}

impl Value {
    /// Get the kind this value was decoded from.
    ///
    /// `Null` reports `Null2`; both padding kinds decode to the same value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Byte(_) => ValueKind::Byte,
            Value::Word(_) => ValueKind::Word,
            Value::EWord(_) => ValueKind::EWord,
            Value::ULong(_) => ValueKind::ULong,
            Value::EULong(_) => ValueKind::EULong,
            Value::Float1(_) => ValueKind::Float1,
            Value::Float2(_) => ValueKind::Float2,
            Value::Float3(_) => ValueKind::Float3,
            Value::Date(_) => ValueKind::Date,
            Value::String(_) => ValueKind::String,
            Value::Null => ValueKind::Null2,
            Value::Index(_) => ValueKind::Index,
            Value::Index9(_) => ValueKind::Index9,
        }
    }

    /// Numeric value as an exact decimal
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Byte(v) => Some(Decimal::from(*v)),
            Value::Word(v) => Some(Decimal::from(*v)),
            Value::EWord(v) | Value::ULong(v) => Some(Decimal::from(*v)),
            Value::EULong(v) => Some(Decimal::from(*v)),
            Value::Float1(d)
            | Value::Float2(d)
            | Value::Float3(d)
            | Value::Index(d)
            | Value::Index9(d) => Some(*d),
            Value::Date(_) | Value::String(_) | Value::Null => None,
        }
    }

    /// Rebuild a numeric value of the same kind from a scaled decimal.
    ///
    /// Integer kinds cannot hold fractions, so they come back as `Index`.
    pub fn with_decimal(&self, value: Decimal) -> Result<Value, CodecError> {
        match self {
            Value::Float1(_) => Ok(Value::Float1(value)),
            Value::Float2(_) => Ok(Value::Float2(value)),
            Value::Float3(_) => Ok(Value::Float3(value)),
            Value::Index9(_) => Ok(Value::Index9(value)),
            Value::Byte(_)
            | Value::Word(_)
            | Value::EWord(_)
            | Value::ULong(_)
            | Value::EULong(_)
            | Value::Index(_) => Ok(Value::Index(value)),
            Value::Date(_) | Value::String(_) | Value::Null => {
                Err(CodecError::NotNumeric(self.kind()))
            }
        }
    }

    /// Check for the padding value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Byte(v) => write!(f, "{v}"),
            Value::Word(v) => write!(f, "{v}"),
            Value::EWord(v) | Value::ULong(v) => write!(f, "{v}"),
            Value::EULong(v) => write!(f, "{v}"),
            Value::Float1(d)
            | Value::Float2(d)
            | Value::Float3(d)
            | Value::Index(d)
            | Value::Index9(d) => write!(f, "{d}"),
            Value::Date(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            Value::String(s) => f.write_str(s),
            Value::Null => f.write_str("null"),
        }
    }
}

/// Codec errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    /// Fewer bytes than the kind's width
    #[error("Short buffer: expected {expected} bytes, got {actual}")]
    ShortBuffer {
        /// Declared width
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Packed date with a field outside the calendar
    #[error("Malformed date: 0x{0:08X}")]
    MalformedDate(u32),

    /// Date outside the encodable years
    #[error("Date out of range: {0}")]
    DateOutOfRange(NaiveDateTime),

    /// Padding cannot be written
    #[error("Kind {0} is not writable")]
    NotWritable(ValueKind),

    /// String wider than the field
    #[error("Value too long: {actual} bytes, maximum {max}")]
    ValueTooLong {
        /// Field width
        max: usize,
        /// Encoded length
        actual: usize,
    },

    /// Value not representable in the kind
    #[error("Value out of range for {kind}: {value}")]
    ValueOutOfRange {
        /// Target kind
        kind: ValueKind,
        /// Offending value
        value: String,
    },

    /// Value variant does not fit the target kind
    #[error("Cannot encode {value:?} as {kind}")]
    KindMismatch {
        /// Target kind
        kind: ValueKind,
        /// Offending value
        value: Value,
    },

    /// Arithmetic applied to a non-numeric kind
    #[error("Kind {0} is not numeric")]
    NotNumeric(ValueKind),

    /// Unknown kind name
    #[error("Unknown value kind: {0}")]
    UnknownKind(String),
}

/// Decode exactly `kind.width()` bytes from the start of `data`.
///
/// Extra trailing bytes are ignored; fewer bytes fail with
/// [`CodecError::ShortBuffer`].
pub fn decode(kind: ValueKind, data: &[u8]) -> Result<Value, CodecError> {
    let width = kind.width();
    if data.len() < width {
        return Err(CodecError::ShortBuffer {
            expected: width,
            actual: data.len(),
        });
    }
    let data = &data[..width];

    match kind {
        ValueKind::Byte => Ok(Value::Byte(data[0])),
        ValueKind::Word => Ok(Value::Word(numeric::le_uint(data) as u16)),
        ValueKind::EWord => Ok(Value::EWord(numeric::le_uint(data) as u32)),
        ValueKind::ULong => Ok(Value::ULong(numeric::le_uint(data) as u32)),
        ValueKind::EULong => Ok(Value::EULong(numeric::le_uint(data))),
        ValueKind::Float1 => Ok(Value::Float1(numeric::decode_float1(data))),
        ValueKind::Float2 => Ok(Value::Float2(numeric::decode_float2(data))),
        ValueKind::Float3 => Ok(Value::Float3(numeric::decode_float3(data))),
        ValueKind::Date => unpack_date(data).map(Value::Date),
        ValueKind::String => Ok(Value::String(text::decode_latin1(data))),
        ValueKind::Null2 | ValueKind::Null4 => Ok(Value::Null),
        ValueKind::Index => Ok(Value::Index(numeric::decode_index(data, 4))),
        ValueKind::Index9 => Ok(Value::Index9(numeric::decode_index(data, 5))),
    }
}

/// Encode a value into exactly `kind.width()` bytes
pub fn encode(kind: ValueKind, value: &Value) -> Result<Vec<u8>, CodecError> {
    let mismatch = || CodecError::KindMismatch {
        kind,
        value: value.clone(),
    };

    match kind {
        ValueKind::Null2 | ValueKind::Null4 => Err(CodecError::NotWritable(kind)),
        ValueKind::Date => match value {
            Value::Date(dt) => Ok(pack_date(dt)?.to_vec()),
            _ => Err(mismatch()),
        },
        ValueKind::String => match value {
            Value::String(s) => text::encode_latin1(s, kind.width()),
            _ => Err(mismatch()),
        },
        ValueKind::Byte
        | ValueKind::Word
        | ValueKind::EWord
        | ValueKind::ULong
        | ValueKind::EULong => {
            let number = value.as_decimal().ok_or_else(mismatch)?;
            numeric::encode_unsigned(kind, number)
        }
        ValueKind::Float1 => numeric::encode_float1(value.as_decimal().ok_or_else(mismatch)?),
        ValueKind::Float2 => numeric::encode_float2(value.as_decimal().ok_or_else(mismatch)?),
        ValueKind::Float3 => numeric::encode_float3(value.as_decimal().ok_or_else(mismatch)?),
        ValueKind::Index => {
            numeric::encode_index(kind, value.as_decimal().ok_or_else(mismatch)?, 4)
        }
        ValueKind::Index9 => {
            numeric::encode_index(kind, value.as_decimal().ok_or_else(mismatch)?, 5)
        }
    }
}

/// Check for the device's "no value" marker (every byte `0xFF`)
pub fn is_unavailable(data: &[u8]) -> bool {
    !data.is_empty() && data.iter().all(|&b| b == 0xFF)
}
