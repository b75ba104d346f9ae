//! Basic Encoding Rules for the ASN.1 subset used by LDAP.
//!
//! Supported universal types are BOOLEAN, INTEGER, OCTET STRING, NULL, ENUMERATED, SEQUENCE
//! and SET. Everything carrying an APPLICATION, CONTEXT or PRIVATE identifier decodes to a
//! [`Tagged`] value whose content is interpreted later by the message layer.

pub mod decode;
pub mod encode;
pub mod length;
pub mod tag;
pub mod value;

pub use decode::{decode, decode_all, frame_length, Decoder};
pub use encode::encode_into;
pub use tag::{Identifier, TagClass};
pub use value::{Asn1Value, Tagged};

/// BER decoding errors. Offsets are relative to the start of the decoded buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated input at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("unsupported universal tag {tag} at offset {offset}")]
    UnsupportedTag { offset: usize, tag: u32 },
    #[error("invalid primitive/constructed form for universal tag {tag} at offset {offset}")]
    InvalidForm { offset: usize, tag: u32 },
    #[error("invalid identifier octets at offset {offset}")]
    InvalidTag { offset: usize },
    #[error("indefinite length at offset {offset}")]
    IndefiniteLength { offset: usize },
    #[error("length with {octets} octets at offset {offset} is not supported")]
    LengthTooLong { offset: usize, octets: usize },
    #[error("length {length} at offset {offset} exceeds maximum {max}")]
    LengthExceedsMax { offset: usize, length: usize, max: usize },
    #[error("zero-length integer at offset {offset}")]
    ZeroLengthInteger { offset: usize },
    #[error("integer of {length} octets at offset {offset} does not fit in 64 bits")]
    IntegerOverflow { offset: usize, length: usize },
    #[error("boolean with {length} content octets at offset {offset}")]
    InvalidBoolean { offset: usize, length: usize },
    #[error("NULL with content at offset {offset}")]
    InvalidNull { offset: usize },
    #[error("invalid UTF-8 string")]
    InvalidUtf8,
}
