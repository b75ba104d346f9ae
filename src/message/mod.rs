//! LDAP protocol messages (RFC 4511 section 4.2).
//!
//! ```text
//! LDAPMessage ::= SEQUENCE {
//!      messageID       MessageID,
//!      protocolOp      CHOICE { ... },
//!      controls       [0] Controls OPTIONAL }
//! ```
//!
//! Decoding is done in two passes: the BER layer yields the operation and the controls as
//! [`Tagged`] values, and the tag number of the operation selects the decoder that is run on
//! its content octets.

use std::iter::Peekable;

use bytes::Bytes;

use crate::{
    ber::{self, Asn1Value, Identifier, TagClass, Tagged},
    controls::Control,
    error::{Error, Result},
    filter::Filter,
    msgid::MessageIds,
};

pub mod ops;
pub mod result;

pub use ops::*;
pub use result::{LdapResult, ResultCode};

/// Errors in the shape of a decoded PDU
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid operation tag {0}")]
    InvalidOperationTag(Identifier),
    #[error("missing element in {0}")]
    MissingElement(&'static str),
    #[error("unexpected {found} in {context}")]
    UnexpectedElement { context: &'static str, found: Identifier },
    #[error("invalid value {value} in {context}")]
    InvalidValue { context: &'static str, value: i64 },
    #[error("message id {0} is out of range")]
    InvalidMessageId(i64),
    #[error("{0} is not a request")]
    NotARequest(&'static str),
}

/// LDAP message
#[derive(Debug, Clone, PartialEq)]
pub struct LdapMessage {
    pub message_id: i32,
    pub protocol_op: ProtocolOp,
    pub controls: Option<Vec<Control>>,
}

impl LdapMessage {
    /// Create message with an identifier previously obtained from a [`MessageIds`] generator
    pub fn new(message_id: i32, protocol_op: ProtocolOp) -> Self {
        Self {
            message_id,
            protocol_op,
            controls: None,
        }
    }

    /// Create message with a fresh identifier from `ids`
    pub fn with_next_id(ids: &MessageIds, protocol_op: ProtocolOp) -> Self {
        Self::new(ids.next_id(), protocol_op)
    }

    /// Attach request or response controls. An empty list clears them.
    pub fn with_controls(mut self, controls: Vec<Control>) -> Self {
        self.controls = if controls.is_empty() { None } else { Some(controls) };
        self
    }

    pub fn message_id(&self) -> i32 {
        self.message_id
    }

    pub fn protocol_op(&self) -> &ProtocolOp {
        &self.protocol_op
    }

    /// Controls attached to the message, empty if there are none
    pub fn controls(&self) -> &[Control] {
        self.controls.as_deref().unwrap_or_default()
    }

    /// Target DN of a request, used to report which request a referral or an error relates to
    pub fn target_dn(&self) -> Option<String> {
        self.protocol_op
            .target_dn()
            .map(|dn| String::from_utf8_lossy(dn).into_owned())
    }

    /// Decode a message from a generic BER value
    pub fn from_asn1(value: Asn1Value) -> Result<Self> {
        let mut elements = match value {
            Asn1Value::Sequence(values) => Elements::new(values, "LDAPMessage"),
            other => {
                return Err(ProtocolError::UnexpectedElement {
                    context: "LDAPMessage",
                    found: other.identifier(),
                }
                .into())
            }
        };

        let id = elements.integer()?;
        let message_id = i32::try_from(id)
            .ok()
            .filter(|id| *id >= 0)
            .ok_or(ProtocolError::InvalidMessageId(id))?;

        let protocol_op = match elements.next()? {
            Asn1Value::Tagged(tagged) => ProtocolOp::decode(&tagged)?,
            other => return Err(ProtocolError::InvalidOperationTag(other.identifier()).into()),
        };

        let controls = match elements.context(0) {
            Some(tagged) => Some(Control::decode_list(&tagged)?),
            None => None,
        };
        if !elements.is_empty() {
            let extra = elements.next()?;
            return Err(elements.unexpected(&extra));
        }

        Ok(Self {
            message_id,
            protocol_op,
            controls,
        })
    }

    /// Decode one message from the front of `data`, returning it and the number of octets used
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let (value, consumed) = ber::decode(data)?;
        Ok((Self::from_asn1(value)?, consumed))
    }

    pub fn to_asn1(&self) -> Asn1Value {
        let mut elements = vec![
            Asn1Value::Integer(self.message_id as i64),
            Asn1Value::Tagged(self.protocol_op.encode()),
        ];
        if let Some(ref controls) = self.controls {
            elements.push(Asn1Value::Tagged(Control::encode_list(controls)));
        }
        Asn1Value::Sequence(elements)
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_asn1().to_vec()
    }

    /// Duplicate a request under a new message identifier for reissuing it to a referred server.
    ///
    /// Only the addressing fields change: `base_dn` replaces the target DN, `filter` the search
    /// filter. When `is_reference` is set a single-level search is narrowed to the base object,
    /// since a continuation reference names the subordinate entry itself. Controls are kept.
    pub fn dup_request(
        &self,
        message_id: i32,
        base_dn: Option<&str>,
        filter: Option<Filter>,
        is_reference: bool,
    ) -> Result<Self> {
        let base = base_dn.map(|dn| Bytes::copy_from_slice(dn.as_bytes()));
        let protocol_op = match &self.protocol_op {
            ProtocolOp::SearchRequest(req) => {
                let mut req = req.clone();
                if let Some(base) = base {
                    req.base_object = base;
                }
                if let Some(filter) = filter {
                    req.filter = filter;
                }
                if is_reference && req.scope == SearchScope::SingleLevel {
                    req.scope = SearchScope::BaseObject;
                }
                ProtocolOp::SearchRequest(req)
            }
            ProtocolOp::ModifyRequest(req) => {
                let mut req = req.clone();
                if let Some(base) = base {
                    req.object = base;
                }
                ProtocolOp::ModifyRequest(req)
            }
            ProtocolOp::AddRequest(req) => {
                let mut req = req.clone();
                if let Some(base) = base {
                    req.entry = base;
                }
                ProtocolOp::AddRequest(req)
            }
            ProtocolOp::DelRequest(dn) => ProtocolOp::DelRequest(base.unwrap_or_else(|| dn.clone())),
            ProtocolOp::ModDnRequest(req) => {
                let mut req = req.clone();
                if let Some(base) = base {
                    req.entry = base;
                }
                ProtocolOp::ModDnRequest(req)
            }
            ProtocolOp::CompareRequest(req) => {
                let mut req = req.clone();
                if let Some(base) = base {
                    req.entry = base;
                }
                ProtocolOp::CompareRequest(req)
            }
            op @ (ProtocolOp::BindRequest(_)
            | ProtocolOp::UnbindRequest
            | ProtocolOp::AbandonRequest(_)
            | ProtocolOp::ExtendedReq(_)) => op.clone(),
            other => return Err(ProtocolError::NotARequest(other.name()).into()),
        };
        Ok(Self {
            message_id,
            protocol_op,
            controls: self.controls.clone(),
        })
    }
}

/// Sequential reader over the components of a constructed value
pub(crate) struct Elements {
    inner: Peekable<std::vec::IntoIter<Asn1Value>>,
    context: &'static str,
}

impl Elements {
    pub(crate) fn new(values: Vec<Asn1Value>, context: &'static str) -> Self {
        Self {
            inner: values.into_iter().peekable(),
            context,
        }
    }

    /// Decode the content of an implicitly tagged SEQUENCE or SET
    pub(crate) fn from_tagged(tagged: &Tagged, context: &'static str) -> Result<Self> {
        Ok(Self::new(tagged.children()?, context))
    }

    pub(crate) fn next(&mut self) -> Result<Asn1Value> {
        self.inner
            .next()
            .ok_or_else(|| ProtocolError::MissingElement(self.context).into())
    }

    pub(crate) fn is_empty(&mut self) -> bool {
        self.inner.peek().is_none()
    }

    pub(crate) fn rest(self) -> Vec<Asn1Value> {
        self.inner.collect()
    }

    pub(crate) fn unexpected(&self, found: &Asn1Value) -> Error {
        ProtocolError::UnexpectedElement {
            context: self.context,
            found: found.identifier(),
        }
        .into()
    }

    pub(crate) fn invalid_value(&self, value: i64) -> Error {
        ProtocolError::InvalidValue {
            context: self.context,
            value,
        }
        .into()
    }

    pub(crate) fn octets(&mut self) -> Result<Bytes> {
        match self.next()? {
            Asn1Value::OctetString(s) => Ok(s),
            other => Err(self.unexpected(&other)),
        }
    }

    pub(crate) fn integer(&mut self) -> Result<i64> {
        match self.next()? {
            Asn1Value::Integer(i) => Ok(i),
            other => Err(self.unexpected(&other)),
        }
    }

    pub(crate) fn enumerated(&mut self) -> Result<i64> {
        match self.next()? {
            Asn1Value::Enumerated(i) => Ok(i),
            other => Err(self.unexpected(&other)),
        }
    }

    pub(crate) fn boolean(&mut self) -> Result<bool> {
        match self.next()? {
            Asn1Value::Boolean(b) => Ok(b),
            other => Err(self.unexpected(&other)),
        }
    }

    /// BOOLEAN DEFAULT FALSE
    pub(crate) fn optional_boolean(&mut self) -> bool {
        match self.inner.next_if(|v| matches!(v, Asn1Value::Boolean(_))) {
            Some(Asn1Value::Boolean(b)) => b,
            _ => false,
        }
    }

    pub(crate) fn optional_octets(&mut self) -> Option<Bytes> {
        match self.inner.next_if(|v| matches!(v, Asn1Value::OctetString(_))) {
            Some(Asn1Value::OctetString(s)) => Some(s),
            _ => None,
        }
    }

    /// SEQUENCE OF / SET OF
    pub(crate) fn collection(&mut self) -> Result<Vec<Asn1Value>> {
        match self.next()? {
            Asn1Value::Sequence(values) | Asn1Value::Set(values) => Ok(values),
            other => Err(self.unexpected(&other)),
        }
    }

    /// Next element if it carries the given context-specific tag
    pub(crate) fn context(&mut self, tag: u32) -> Option<Tagged> {
        match self
            .inner
            .next_if(|v| matches!(v, Asn1Value::Tagged(t) if t.id.is(TagClass::Context, tag)))
        {
            Some(Asn1Value::Tagged(tagged)) => Some(tagged),
            _ => None,
        }
    }
}

pub(crate) fn expect_octets(value: Asn1Value, context: &'static str) -> Result<Bytes> {
    match value {
        Asn1Value::OctetString(s) => Ok(s),
        other => Err(ProtocolError::UnexpectedElement {
            context,
            found: other.identifier(),
        }
        .into()),
    }
}

pub(crate) fn expect_sequence(value: Asn1Value, context: &'static str) -> Result<Elements> {
    match value {
        Asn1Value::Sequence(values) => Ok(Elements::new(values, context)),
        other => Err(ProtocolError::UnexpectedElement {
            context,
            found: other.identifier(),
        }
        .into()),
    }
}

/// Strict UTF-8 interpretation of an LDAPString
pub(crate) fn utf8(bytes: &Bytes) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| ber::DecodeError::InvalidUtf8.into())
}
