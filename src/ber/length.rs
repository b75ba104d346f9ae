//! BER length octets.
//!
//! Only the definite form is used (X.690 8.1.3):
//! - Short form: one octet, bit 8 clear, value 0-127
//! - Long form: initial octet with bit 8 set and the count of length octets, then the octets
//! - Indefinite form (0x80) is rejected

use super::DecodeError;

/// Largest content length accepted by the decoder.
///
/// Directory entries with large binary attributes (certificates, photos) can run to
/// several megabytes; anything above this is treated as a corrupt stream.
pub const MAX_LENGTH: usize = 0x0400_0000; // 64MB

/// Append `len` in the shortest definite form
pub fn encode_length(len: usize, dst: &mut Vec<u8>) {
    if len <= 127 {
        dst.push(len as u8);
        return;
    }
    let octets = (usize::BITS as usize / 8) - (len.leading_zeros() as usize / 8);
    dst.push(0x80 | octets as u8);
    for i in (0..octets).rev() {
        dst.push((len >> (8 * i)) as u8);
    }
}

/// Number of octets [`encode_length`] emits for `len`
pub fn encoded_length_len(len: usize) -> usize {
    if len <= 127 {
        1
    } else {
        1 + (usize::BITS as usize / 8) - (len.leading_zeros() as usize / 8)
    }
}

/// Decode a length, returning (length, octets consumed).
///
/// `base_offset` is the position of `data` inside the enclosing buffer and is only used
/// for error reporting.
pub fn decode_length(data: &[u8], base_offset: usize) -> Result<(usize, usize), DecodeError> {
    let first = *data.first().ok_or(DecodeError::Truncated {
        offset: base_offset,
        needed: 1,
        available: 0,
    })?;

    if first == 0x80 {
        return Err(DecodeError::IndefiniteLength { offset: base_offset });
    }

    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }

    let octets = (first & 0x7F) as usize;
    if octets > 4 {
        return Err(DecodeError::LengthTooLong {
            offset: base_offset,
            octets,
        });
    }
    if data.len() < 1 + octets {
        return Err(DecodeError::Truncated {
            offset: base_offset + 1,
            needed: octets,
            available: data.len() - 1,
        });
    }

    let len = data[1..=octets].iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
    if len > MAX_LENGTH {
        return Err(DecodeError::LengthExceedsMax {
            offset: base_offset,
            length: len,
            max: MAX_LENGTH,
        });
    }

    Ok((len, 1 + octets))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(len: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_length(len, &mut buf);
        buf
    }

    #[test]
    fn test_short_form() {
        assert_eq!(decode_length(&[0], 0).unwrap(), (0, 1));
        assert_eq!(decode_length(&[127], 0).unwrap(), (127, 1));
        assert_eq!(encoded(127), [127]);
    }

    #[test]
    fn test_long_form() {
        assert_eq!(encoded(128), [0x81, 0x80]);
        assert_eq!(encoded(256), [0x82, 0x01, 0x00]);
        assert_eq!(encoded(0x010000), [0x83, 0x01, 0x00, 0x00]);
        assert_eq!(encoded_length_len(0x010000), 4);
        assert_eq!(decode_length(&[0x82, 0xFF, 0xFF], 0).unwrap(), (65535, 3));
    }

    #[test]
    fn test_non_minimal_accepted() {
        assert_eq!(decode_length(&[0x82, 0x00, 0x05], 0).unwrap(), (5, 3));
    }

    #[test]
    fn test_indefinite_rejected() {
        assert_eq!(
            decode_length(&[0x80], 7),
            Err(DecodeError::IndefiniteLength { offset: 7 })
        );
    }

    #[test]
    fn test_truncated_long_form() {
        assert!(matches!(
            decode_length(&[0x82, 0x01], 0),
            Err(DecodeError::Truncated { needed: 2, available: 1, .. })
        ));
    }

    #[test]
    fn test_max_length_enforced() {
        let over = MAX_LENGTH + 1;
        let data = [0x84, (over >> 24) as u8, (over >> 16) as u8, (over >> 8) as u8, over as u8];
        assert!(matches!(
            decode_length(&data, 0),
            Err(DecodeError::LengthExceedsMax { .. })
        ));
    }
}
