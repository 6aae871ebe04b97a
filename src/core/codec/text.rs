//! Fixed-width latin-1 strings

use super::{CodecError, ValueKind};

const PADDING: u8 = 0x00;

/// Decode latin-1 bytes, dropping trailing NUL padding
pub(super) fn decode_latin1(data: &[u8]) -> String {
    let end = data
        .iter()
        .rposition(|&b| b != PADDING)
        .map_or(0, |pos| pos + 1);
    data[..end].iter().map(|&b| char::from(b)).collect()
}

/// Encode into exactly `width` latin-1 bytes, NUL padded
pub(super) fn encode_latin1(value: &str, width: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(width);
    for c in value.chars() {
        let b = u8::try_from(u32::from(c)).map_err(|_| CodecError::ValueOutOfRange {
            kind: ValueKind::String,
            value: value.to_string(),
        })?;
        out.push(b);
    }

    if out.len() > width {
        return Err(CodecError::ValueTooLong {
            max: width,
            actual: out.len(),
        });
    }

    out.resize(width, PADDING);
    Ok(out)
}
