//! Conversion between unsigned big integers and byte buffers.
//!
//! All encodings are big-endian. The minimal form never carries a leading
//! zero byte; the fixed form is left-padded with zeros to the width of a
//! protocol field.

use num_bigint::BigUint;
use thiserror::Error;

/// Width of every DH value and of the shared secret on the wire.
pub const DH_WIRE_LEN: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BigIntError {
    #[error("value needs {needed} bytes but the field is {width} bytes wide")]
    TooWide { needed: usize, width: usize },
}

/// Minimal big-endian encoding. Zero encodes as `[0]`.
pub fn to_bytes_be(value: &BigUint) -> Vec<u8> {
    value.to_bytes_be()
}

/// Big-endian encoding left-padded with zero bytes to exactly `width` bytes.
pub fn to_padded_vec(value: &BigUint, width: usize) -> Result<Vec<u8>, BigIntError> {
    let minimal = value.to_bytes_be();
    // BigUint encodes zero as a single zero byte, which still fits any width.
    let significant = if minimal == [0] { &[][..] } else { &minimal[..] };
    if significant.len() > width {
        return Err(BigIntError::TooWide {
            needed: significant.len(),
            width,
        });
    }
    let mut out = vec![0u8; width];
    out[width - significant.len()..].copy_from_slice(significant);
    Ok(out)
}

/// Same as [`to_padded_vec`] but into a fixed-size array.
pub fn to_fixed_be<const N: usize>(value: &BigUint) -> Result<[u8; N], BigIntError> {
    let padded = to_padded_vec(value, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(&padded);
    Ok(out)
}

/// Decode a big-endian buffer. Leading zero bytes are ignored.
pub fn from_bytes_be(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_encoding_has_no_leading_zero() {
        let value = from_bytes_be(&[0, 0, 1, 2, 3]);
        assert_eq!(to_bytes_be(&value), vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_encodes_as_single_byte() {
        assert_eq!(to_bytes_be(&BigUint::from(0u32)), vec![0]);
        assert_eq!(to_padded_vec(&BigUint::from(0u32), 4).unwrap(), vec![0; 4]);
    }

    #[test]
    fn test_padding_is_on_the_left() {
        let value = BigUint::from(0x0102u32);
        assert_eq!(to_padded_vec(&value, 4).unwrap(), vec![0, 0, 1, 2]);

        let fixed: [u8; 3] = to_fixed_be(&value).unwrap();
        assert_eq!(fixed, [0, 1, 2]);
    }

    #[test]
    fn test_value_wider_than_field_is_rejected() {
        let value = BigUint::from(0x010203u32);
        assert_eq!(
            to_padded_vec(&value, 2),
            Err(BigIntError::TooWide {
                needed: 3,
                width: 2
            })
        );
    }

    #[test]
    fn test_full_width_value_is_untouched() {
        let bytes = [0xffu8; DH_WIRE_LEN];
        let value = from_bytes_be(&bytes);
        let fixed: [u8; DH_WIRE_LEN] = to_fixed_be(&value).unwrap();
        assert_eq!(fixed, bytes);
    }
}
