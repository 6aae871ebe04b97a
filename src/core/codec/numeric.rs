//! Integer, fixed-point and index encodings

use super::{CodecError, ValueKind};
use rust_decimal::Decimal;

/// Index fractions are stored as units of 10^-8
const INDEX_FRACTION_SCALE: u32 = 8;
const INDEX_FRACTION_DIVISOR: i128 = 100_000_000;

/// Little-endian unsigned integer of up to 8 bytes
pub(super) fn le_uint(data: &[u8]) -> u64 {
    data.iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

fn le_bytes(value: u64, width: usize) -> Vec<u8> {
    value.to_le_bytes()[..width].to_vec()
}

fn out_of_range(kind: ValueKind, value: Decimal) -> CodecError {
    CodecError::ValueOutOfRange {
        kind,
        value: value.to_string(),
    }
}

/// Integer `n` such that `value == n * 10^-scale`, if one exists
fn scaled_integer(value: Decimal, scale: u32) -> Option<i128> {
    let normalized = value.normalize();
    if normalized.scale() > scale {
        return None;
    }
    10i128
        .checked_pow(scale - normalized.scale())
        .and_then(|factor| normalized.mantissa().checked_mul(factor))
}

/// Integer `n` such that `value == n * 10^exponent`, if one exists
fn mantissa_for_exponent(value: Decimal, exponent: i32) -> Option<i128> {
    if exponent <= 0 {
        return scaled_integer(value, exponent.unsigned_abs());
    }
    let whole = scaled_integer(value, 0)?;
    let factor = 10i128.pow(exponent.unsigned_abs());
    (whole % factor == 0).then_some(whole / factor)
}

pub(super) fn encode_unsigned(kind: ValueKind, value: Decimal) -> Result<Vec<u8>, CodecError> {
    let width = kind.width();
    let max = (1i128 << (width * 8)) - 1;
    match scaled_integer(value, 0) {
        Some(n) if (0..=max).contains(&n) => Ok(le_bytes(n as u64, width)),
        _ => Err(out_of_range(kind, value)),
    }
}

// ============ Float1: signed, two implicit decimals ============

pub(super) fn decode_float1(data: &[u8]) -> Decimal {
    let raw = i16::from_le_bytes([data[0], data[1]]);
    Decimal::new(i64::from(raw), 2)
}

pub(super) fn encode_float1(value: Decimal) -> Result<Vec<u8>, CodecError> {
    match scaled_integer(value, 2) {
        Some(n) if (i128::from(i16::MIN)..=i128::from(i16::MAX)).contains(&n) => {
            Ok((n as i16).to_le_bytes().to_vec())
        }
        _ => Err(out_of_range(ValueKind::Float1, value)),
    }
}

// ============ Float2: 15 bit mantissa, exponent bit ============

const FLOAT2_MANTISSA: u16 = 0x7FFF;

pub(super) fn decode_float2(data: &[u8]) -> Decimal {
    let raw = u16::from_le_bytes([data[0], data[1]]);
    let mantissa = raw & FLOAT2_MANTISSA;
    let exponent = u32::from(raw >> 15);
    // mantissa * 10^(exponent - 3)
    Decimal::new(i64::from(mantissa), 3 - exponent)
}

pub(super) fn encode_float2(value: Decimal) -> Result<Vec<u8>, CodecError> {
    for exponent in 0u16..=1 {
        let power = i32::from(exponent) - 3;
        if let Some(n) = mantissa_for_exponent(value, power) {
            if (0..=i128::from(FLOAT2_MANTISSA)).contains(&n) {
                let raw = (n as u16) | (exponent << 15);
                return Ok(raw.to_le_bytes().to_vec());
            }
        }
    }
    Err(out_of_range(ValueKind::Float2, value))
}

// ============ Float3: 14 bit mantissa, 2 exponent bits ============

const FLOAT3_MANTISSA: u16 = 0x3FFF;

pub(super) fn decode_float3(data: &[u8]) -> Decimal {
    let raw = u16::from_le_bytes([data[0], data[1]]);
    let mantissa = i64::from(raw & FLOAT3_MANTISSA);
    // mantissa * 10^(exponent - 1)
    match raw >> 14 {
        0 => Decimal::new(mantissa, 1),
        1 => Decimal::from(mantissa),
        2 => Decimal::from(mantissa * 10),
        _ => Decimal::from(mantissa * 100),
    }
}

pub(super) fn encode_float3(value: Decimal) -> Result<Vec<u8>, CodecError> {
    for exponent in 0u16..=3 {
        let power = i32::from(exponent) - 1;
        if let Some(n) = mantissa_for_exponent(value, power) {
            if (0..=i128::from(FLOAT3_MANTISSA)).contains(&n) {
                let raw = (n as u16) | (exponent << 14);
                return Ok(raw.to_le_bytes().to_vec());
            }
        }
    }
    Err(out_of_range(ValueKind::Float3, value))
}

// ============ Index: integer part + fraction in 10^-8 ============

pub(super) fn decode_index(data: &[u8], integer_width: usize) -> Decimal {
    let integer = le_uint(&data[..integer_width]);
    let fraction = le_uint(&data[integer_width..integer_width + 4]);
    let fraction = Decimal::new(fraction as i64, INDEX_FRACTION_SCALE);
    (Decimal::from(integer) + fraction).normalize()
}

pub(super) fn encode_index(
    kind: ValueKind,
    value: Decimal,
    integer_width: usize,
) -> Result<Vec<u8>, CodecError> {
    let max_integer = (1i128 << (integer_width * 8)) - 1;
    let n = scaled_integer(value, INDEX_FRACTION_SCALE)
        .filter(|n| *n >= 0)
        .ok_or_else(|| out_of_range(kind, value))?;

    let integer = n / INDEX_FRACTION_DIVISOR;
    let fraction = n % INDEX_FRACTION_DIVISOR;
    if integer > max_integer {
        return Err(out_of_range(kind, value));
    }

    let mut out = le_bytes(integer as u64, integer_width);
    out.extend_from_slice(&(fraction as u32).to_le_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_from_device_bytes() {
        let data = b"\x14.\x00\x00\x80\x1d,\x04";
        assert_eq!(decode_index(data, 4), Decimal::new(117_967, 1));
    }

    #[test]
    fn test_index9_from_device_bytes() {
        let data = b"\x14.\x00\x00\x00\x80\x1d,\x04";
        assert_eq!(decode_index(data, 5), Decimal::new(117_967, 1));
    }

    #[test]
    fn test_float1_negative_temperature() {
        let raw = (-1612i16).to_le_bytes();
        assert_eq!(decode_float1(&raw), Decimal::new(-1612, 2));
    }

    #[test]
    fn test_float2_exponent_bit() {
        // mantissa 1013, exponent 0 -> 1.013
        assert_eq!(decode_float2(&1013u16.to_le_bytes()), Decimal::new(1013, 3));
        // mantissa 1013, exponent 1 -> 10.13
        assert_eq!(
            decode_float2(&(1013u16 | 0x8000).to_le_bytes()),
            Decimal::new(1013, 2)
        );
        assert_eq!(
            encode_float2(Decimal::new(1013, 2)).unwrap(),
            (1013u16 | 0x8000).to_le_bytes().to_vec()
        );
    }

    #[test]
    fn test_float3_exponents() {
        assert_eq!(decode_float3(&12u16.to_le_bytes()), Decimal::new(12, 1));
        assert_eq!(decode_float3(&(12u16 | 0x4000).to_le_bytes()), Decimal::from(12));
        assert_eq!(decode_float3(&(12u16 | 0x8000).to_le_bytes()), Decimal::from(120));
        assert_eq!(decode_float3(&(12u16 | 0xC000).to_le_bytes()), Decimal::from(1200));
        // smallest exponent that still fits the mantissa wins
        assert_eq!(
            encode_float3(Decimal::from(1200)).unwrap(),
            12_000u16.to_le_bytes().to_vec()
        );
        assert_eq!(
            encode_float3(Decimal::from(20_000)).unwrap(),
            (2_000u16 | 0x8000).to_le_bytes().to_vec()
        );
    }

    #[test]
    fn test_scaled_integer() {
        assert_eq!(scaled_integer(Decimal::new(1500, 3), 1), Some(15));
        assert_eq!(scaled_integer(Decimal::new(15, 2), 1), None);
        assert_eq!(mantissa_for_exponent(Decimal::from(1200), 2), Some(12));
        assert_eq!(mantissa_for_exponent(Decimal::from(1210), 2), None);
    }

    #[test]
    fn test_unsigned_bounds() {
        assert_eq!(
            encode_unsigned(ValueKind::EWord, Decimal::from(0x00FF_FFFFu32)).unwrap(),
            vec![0xFF, 0xFF, 0xFF]
        );
        assert!(encode_unsigned(ValueKind::EWord, Decimal::from(0x0100_0000u32)).is_err());
        assert!(encode_unsigned(ValueKind::Byte, Decimal::from(-1)).is_err());
    }
}
