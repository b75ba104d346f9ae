//! BER decoding.
//!
//! Content octets are sliced out of the input `Bytes` without copying.

use bytes::Bytes;
use log::debug;

use super::{
    length::decode_length,
    tag::{universal, Identifier, TagClass},
    value::{Asn1Value, Tagged},
    DecodeError,
};

/// BER decoder reading consecutive values from a byte buffer
pub struct Decoder {
    data: Bytes,
    offset: usize,
    base: usize,
}

impl Decoder {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            offset: 0,
            base: 0,
        }
    }

    /// Create a decoder for a nested content region; `base` is its position in the outer buffer
    fn nested(data: Bytes, base: usize) -> Self {
        Self { data, offset: 0, base }
    }

    /// Current offset, relative to the start of the outermost buffer
    pub fn offset(&self) -> usize {
        self.base + self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    /// Read the identifier and length octets of the next value
    pub fn read_header(&mut self) -> Result<(Identifier, usize), DecodeError> {
        let start = self.offset();
        let id = match Identifier::parse(&self.data[self.offset..]) {
            Some(Ok((id, consumed))) => {
                self.offset += consumed;
                id
            }
            Some(Err(())) => return Err(DecodeError::InvalidTag { offset: start }),
            None => {
                return Err(DecodeError::Truncated {
                    offset: start,
                    needed: 1,
                    available: self.remaining(),
                })
            }
        };
        let (len, consumed) = decode_length(&self.data[self.offset..], self.offset())?;
        self.offset += consumed;
        Ok((id, len))
    }

    /// Read exactly `len` content octets
    fn read_content(&mut self, len: usize) -> Result<Bytes, DecodeError> {
        if self.offset.saturating_add(len) > self.data.len() {
            debug!(
                "Truncated content at offset {}: needed {}, available {}",
                self.offset(),
                len,
                self.remaining()
            );
            return Err(DecodeError::Truncated {
                offset: self.offset(),
                needed: len,
                available: self.remaining(),
            });
        }
        let content = self.data.slice(self.offset..self.offset + len);
        self.offset += len;
        Ok(content)
    }

    /// Decode the next complete value
    pub fn decode(&mut self) -> Result<Asn1Value, DecodeError> {
        let start = self.offset();
        let (id, len) = self.read_header()?;
        let content_offset = self.offset();
        let content = self.read_content(len)?;

        if id.class != TagClass::Universal {
            return Ok(Asn1Value::Tagged(Tagged::new(id, content)));
        }

        let expects_constructed = id.tag == universal::SEQUENCE || id.tag == universal::SET;
        let known = matches!(
            id.tag,
            universal::BOOLEAN
                | universal::INTEGER
                | universal::OCTET_STRING
                | universal::NULL
                | universal::ENUMERATED
                | universal::SEQUENCE
                | universal::SET
        );
        if !known {
            debug!("Unsupported universal tag {} at offset {}", id.tag, start);
            return Err(DecodeError::UnsupportedTag {
                offset: start,
                tag: id.tag,
            });
        }
        if id.constructed != expects_constructed {
            return Err(DecodeError::InvalidForm {
                offset: start,
                tag: id.tag,
            });
        }

        let value = match id.tag {
            universal::BOOLEAN => {
                if content.len() != 1 {
                    return Err(DecodeError::InvalidBoolean {
                        offset: content_offset,
                        length: content.len(),
                    });
                }
                // lenient: any non-zero octet is TRUE, although we only ever emit 0xFF
                Asn1Value::Boolean(content[0] != 0)
            }
            universal::INTEGER => Asn1Value::Integer(integer_from_content(&content, content_offset)?),
            universal::ENUMERATED => Asn1Value::Enumerated(integer_from_content(&content, content_offset)?),
            universal::OCTET_STRING => Asn1Value::OctetString(content),
            universal::NULL => {
                if !content.is_empty() {
                    return Err(DecodeError::InvalidNull {
                        offset: content_offset,
                    });
                }
                Asn1Value::Null
            }
            universal::SEQUENCE => Asn1Value::Sequence(Decoder::nested(content, content_offset).decode_rest()?),
            _ => Asn1Value::Set(Decoder::nested(content, content_offset).decode_rest()?),
        };
        Ok(value)
    }

    /// Decode values until the buffer is exhausted
    pub fn decode_rest(&mut self) -> Result<Vec<Asn1Value>, DecodeError> {
        let mut values = Vec::new();
        while !self.is_empty() {
            values.push(self.decode()?);
        }
        Ok(values)
    }
}

/// Decode one value from the start of `data`, returning it and the number of octets consumed
pub fn decode(data: &[u8]) -> Result<(Asn1Value, usize), DecodeError> {
    let mut decoder = Decoder::new(Bytes::copy_from_slice(data));
    let value = decoder.decode()?;
    Ok((value, decoder.offset()))
}

/// Decode a content region holding zero or more consecutive values
pub fn decode_all(data: Bytes) -> Result<Vec<Asn1Value>, DecodeError> {
    Decoder::new(data).decode_rest()
}

/// Interpret two's-complement big-endian content octets.
///
/// Content wider than 8 octets is rejected instead of being truncated to its low bytes.
pub(crate) fn integer_from_content(content: &[u8], offset: usize) -> Result<i64, DecodeError> {
    let first = *content.first().ok_or(DecodeError::ZeroLengthInteger { offset })?;
    if content.len() > 8 {
        return Err(DecodeError::IntegerOverflow {
            offset,
            length: content.len(),
        });
    }
    let seed: i64 = if first & 0x80 != 0 { -1 } else { 0 };
    Ok(content.iter().fold(seed, |acc, &b| (acc << 8) | b as i64))
}

/// Total size of the first complete value in `data`, or `None` if more input is needed
pub fn frame_length(data: &[u8]) -> Result<Option<usize>, DecodeError> {
    let (id_len, rest) = match Identifier::parse(data) {
        Some(Ok((_, consumed))) => (consumed, &data[consumed..]),
        Some(Err(())) => return Err(DecodeError::InvalidTag { offset: 0 }),
        None => return Ok(None),
    };
    match decode_length(rest, id_len) {
        Ok((len, len_len)) => {
            let total = id_len + len_len + len;
            Ok((data.len() >= total).then_some(total))
        }
        Err(DecodeError::Truncated { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}
