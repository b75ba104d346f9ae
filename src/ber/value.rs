//! Generic BER values.

use bytes::Bytes;

use super::{
    decode::{decode_all, integer_from_content},
    encode::encode_into,
    tag::{universal, Identifier, TagClass},
    DecodeError,
};

/// A decoded BER value.
///
/// Universal types of the LDAP subset have their own variants. APPLICATION, CONTEXT and
/// PRIVATE values are kept as [`Tagged`] raw content: LDAP tags implicitly, so their
/// meaning depends on the position in the enclosing PDU and is resolved by the message layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Asn1Value {
    Boolean(bool),
    Integer(i64),
    Enumerated(i64),
    OctetString(Bytes),
    Null,
    Sequence(Vec<Asn1Value>),
    /// Order is not significant to ASN.1 but arrival order is kept and re-encoded as is.
    Set(Vec<Asn1Value>),
    Tagged(Tagged),
}

impl Asn1Value {
    /// Identifier this value is encoded with
    pub fn identifier(&self) -> Identifier {
        match self {
            Asn1Value::Boolean(_) => Identifier::universal(universal::BOOLEAN),
            Asn1Value::Integer(_) => Identifier::universal(universal::INTEGER),
            Asn1Value::Enumerated(_) => Identifier::universal(universal::ENUMERATED),
            Asn1Value::OctetString(_) => Identifier::universal(universal::OCTET_STRING),
            Asn1Value::Null => Identifier::universal(universal::NULL),
            Asn1Value::Sequence(_) => Identifier::universal(universal::SEQUENCE),
            Asn1Value::Set(_) => Identifier::universal(universal::SET),
            Asn1Value::Tagged(tagged) => tagged.id,
        }
    }

    /// Convenience constructor for an OCTET STRING
    pub fn octets<B: Into<Bytes>>(value: B) -> Self {
        Asn1Value::OctetString(value.into())
    }

    /// Encode into a fresh buffer
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_into(self, &mut buf);
        buf
    }

    /// Encode into a fresh `Bytes`
    pub fn to_bytes(&self) -> Bytes {
        self.to_vec().into()
    }

    pub fn as_tagged(&self) -> Option<&Tagged> {
        match self {
            Asn1Value::Tagged(tagged) => Some(tagged),
            _ => None,
        }
    }
}

/// A value with a non-universal identifier whose content has not been interpreted yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged {
    pub(crate) id: Identifier,
    pub(crate) content: Bytes,
}

impl Tagged {
    pub fn new(id: Identifier, content: Bytes) -> Self {
        Self { id, content }
    }

    /// Primitive value with raw content octets, e.g. `[0] IMPLICIT OCTET STRING`
    pub fn primitive<B: Into<Bytes>>(class: TagClass, tag: u32, content: B) -> Self {
        Self::new(Identifier::new(class, false, tag), content.into())
    }

    /// Constructed value whose content is the concatenated encoding of `children`,
    /// e.g. `[APPLICATION 3] IMPLICIT SEQUENCE`
    pub fn constructed(class: TagClass, tag: u32, children: &[Asn1Value]) -> Self {
        let mut content = Vec::new();
        for child in children {
            encode_into(child, &mut content);
        }
        Self::new(Identifier::new(class, true, tag), content.into())
    }

    pub fn identifier(&self) -> Identifier {
        self.id
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn into_content(self) -> Bytes {
        self.content
    }

    /// Decode the content region as a series of BER values (implicit SEQUENCE / SET)
    pub fn children(&self) -> Result<Vec<Asn1Value>, DecodeError> {
        decode_all(self.content.clone())
    }

    /// Reinterpret the content as an implicitly tagged INTEGER or ENUMERATED
    pub fn integer(&self) -> Result<i64, DecodeError> {
        integer_from_content(&self.content, 0)
    }

    /// Reinterpret the content as an implicitly tagged BOOLEAN (any non-zero octet is true)
    pub fn boolean(&self) -> Result<bool, DecodeError> {
        match self.content.as_ref() {
            [b] => Ok(*b != 0),
            other => Err(DecodeError::InvalidBoolean {
                offset: 0,
                length: other.len(),
            }),
        }
    }
}
