//! Protocol operations carried in the `protocolOp` CHOICE.

use bytes::Bytes;

use super::{expect_octets, expect_sequence, result::LdapResult, Elements, ProtocolError};
use crate::{
    ber::{Asn1Value, TagClass, Tagged},
    error::Result,
    filter::{AttributeValueAssertion, Filter},
};

/// Application tag numbers of the protocol operations
pub mod tag {
    pub const BIND_REQUEST: u32 = 0;
    pub const BIND_RESPONSE: u32 = 1;
    pub const UNBIND_REQUEST: u32 = 2;
    pub const SEARCH_REQUEST: u32 = 3;
    pub const SEARCH_RESULT_ENTRY: u32 = 4;
    pub const SEARCH_RESULT_DONE: u32 = 5;
    pub const MODIFY_REQUEST: u32 = 6;
    pub const MODIFY_RESPONSE: u32 = 7;
    pub const ADD_REQUEST: u32 = 8;
    pub const ADD_RESPONSE: u32 = 9;
    pub const DEL_REQUEST: u32 = 10;
    pub const DEL_RESPONSE: u32 = 11;
    pub const MODIFY_DN_REQUEST: u32 = 12;
    pub const MODIFY_DN_RESPONSE: u32 = 13;
    pub const COMPARE_REQUEST: u32 = 14;
    pub const COMPARE_RESPONSE: u32 = 15;
    pub const ABANDON_REQUEST: u32 = 16;
    pub const SEARCH_RESULT_REFERENCE: u32 = 19;
    pub const EXTENDED_REQUEST: u32 = 23;
    pub const EXTENDED_RESPONSE: u32 = 24;
    pub const INTERMEDIATE_RESPONSE: u32 = 25;
}

/// Protocol operation
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolOp {
    BindRequest(BindRequest),
    BindResponse(BindResponse),
    UnbindRequest,
    SearchRequest(SearchRequest),
    SearchResEntry(SearchResultEntry),
    SearchResRef(SearchResultReference),
    SearchResDone(LdapResult),
    ModifyRequest(ModifyRequest),
    ModifyResponse(LdapResult),
    AddRequest(AddRequest),
    AddResponse(LdapResult),
    DelRequest(Bytes),
    DelResponse(LdapResult),
    ModDnRequest(ModifyDnRequest),
    ModDnResponse(LdapResult),
    CompareRequest(CompareRequest),
    CompareResponse(LdapResult),
    AbandonRequest(i32),
    ExtendedReq(ExtendedRequest),
    ExtendedResp(ExtendedResponse),
    IntermediateResponse(IntermediateResponse),
}

impl ProtocolOp {
    /// Application tag number of the operation
    pub fn tag(&self) -> u32 {
        match self {
            ProtocolOp::BindRequest(_) => tag::BIND_REQUEST,
            ProtocolOp::BindResponse(_) => tag::BIND_RESPONSE,
            ProtocolOp::UnbindRequest => tag::UNBIND_REQUEST,
            ProtocolOp::SearchRequest(_) => tag::SEARCH_REQUEST,
            ProtocolOp::SearchResEntry(_) => tag::SEARCH_RESULT_ENTRY,
            ProtocolOp::SearchResRef(_) => tag::SEARCH_RESULT_REFERENCE,
            ProtocolOp::SearchResDone(_) => tag::SEARCH_RESULT_DONE,
            ProtocolOp::ModifyRequest(_) => tag::MODIFY_REQUEST,
            ProtocolOp::ModifyResponse(_) => tag::MODIFY_RESPONSE,
            ProtocolOp::AddRequest(_) => tag::ADD_REQUEST,
            ProtocolOp::AddResponse(_) => tag::ADD_RESPONSE,
            ProtocolOp::DelRequest(_) => tag::DEL_REQUEST,
            ProtocolOp::DelResponse(_) => tag::DEL_RESPONSE,
            ProtocolOp::ModDnRequest(_) => tag::MODIFY_DN_REQUEST,
            ProtocolOp::ModDnResponse(_) => tag::MODIFY_DN_RESPONSE,
            ProtocolOp::CompareRequest(_) => tag::COMPARE_REQUEST,
            ProtocolOp::CompareResponse(_) => tag::COMPARE_RESPONSE,
            ProtocolOp::AbandonRequest(_) => tag::ABANDON_REQUEST,
            ProtocolOp::ExtendedReq(_) => tag::EXTENDED_REQUEST,
            ProtocolOp::ExtendedResp(_) => tag::EXTENDED_RESPONSE,
            ProtocolOp::IntermediateResponse(_) => tag::INTERMEDIATE_RESPONSE,
        }
    }

    /// ASN.1 name of the operation
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolOp::BindRequest(_) => "BindRequest",
            ProtocolOp::BindResponse(_) => "BindResponse",
            ProtocolOp::UnbindRequest => "UnbindRequest",
            ProtocolOp::SearchRequest(_) => "SearchRequest",
            ProtocolOp::SearchResEntry(_) => "SearchResultEntry",
            ProtocolOp::SearchResRef(_) => "SearchResultReference",
            ProtocolOp::SearchResDone(_) => "SearchResultDone",
            ProtocolOp::ModifyRequest(_) => "ModifyRequest",
            ProtocolOp::ModifyResponse(_) => "ModifyResponse",
            ProtocolOp::AddRequest(_) => "AddRequest",
            ProtocolOp::AddResponse(_) => "AddResponse",
            ProtocolOp::DelRequest(_) => "DelRequest",
            ProtocolOp::DelResponse(_) => "DelResponse",
            ProtocolOp::ModDnRequest(_) => "ModifyDNRequest",
            ProtocolOp::ModDnResponse(_) => "ModifyDNResponse",
            ProtocolOp::CompareRequest(_) => "CompareRequest",
            ProtocolOp::CompareResponse(_) => "CompareResponse",
            ProtocolOp::AbandonRequest(_) => "AbandonRequest",
            ProtocolOp::ExtendedReq(_) => "ExtendedRequest",
            ProtocolOp::ExtendedResp(_) => "ExtendedResponse",
            ProtocolOp::IntermediateResponse(_) => "IntermediateResponse",
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(
            self,
            ProtocolOp::BindRequest(_)
                | ProtocolOp::UnbindRequest
                | ProtocolOp::SearchRequest(_)
                | ProtocolOp::ModifyRequest(_)
                | ProtocolOp::AddRequest(_)
                | ProtocolOp::DelRequest(_)
                | ProtocolOp::ModDnRequest(_)
                | ProtocolOp::CompareRequest(_)
                | ProtocolOp::AbandonRequest(_)
                | ProtocolOp::ExtendedReq(_)
        )
    }

    /// True for responses that are followed by more responses to the same request
    pub fn is_intermediate(&self) -> bool {
        matches!(
            self,
            ProtocolOp::SearchResEntry(_) | ProtocolOp::SearchResRef(_) | ProtocolOp::IntermediateResponse(_)
        )
    }

    /// Result component of a final response
    pub fn result(&self) -> Option<&LdapResult> {
        match self {
            ProtocolOp::BindResponse(resp) => Some(&resp.result),
            ProtocolOp::ExtendedResp(resp) => Some(&resp.result),
            ProtocolOp::SearchResDone(result)
            | ProtocolOp::ModifyResponse(result)
            | ProtocolOp::AddResponse(result)
            | ProtocolOp::DelResponse(result)
            | ProtocolOp::ModDnResponse(result)
            | ProtocolOp::CompareResponse(result) => Some(result),
            _ => None,
        }
    }

    pub(crate) fn target_dn(&self) -> Option<&Bytes> {
        match self {
            ProtocolOp::BindRequest(req) => Some(&req.name),
            ProtocolOp::SearchRequest(req) => Some(&req.base_object),
            ProtocolOp::ModifyRequest(req) => Some(&req.object),
            ProtocolOp::AddRequest(req) => Some(&req.entry),
            ProtocolOp::DelRequest(dn) => Some(dn),
            ProtocolOp::ModDnRequest(req) => Some(&req.entry),
            ProtocolOp::CompareRequest(req) => Some(&req.entry),
            _ => None,
        }
    }

    /// Decode the operation from its implicitly tagged APPLICATION value
    pub fn decode(tagged: &Tagged) -> Result<Self> {
        let id = tagged.identifier();
        if id.class != TagClass::Application {
            return Err(ProtocolError::InvalidOperationTag(id).into());
        }

        let op = match id.tag {
            tag::BIND_REQUEST => ProtocolOp::BindRequest(BindRequest::read(elements(tagged, "BindRequest")?)?),
            tag::BIND_RESPONSE => ProtocolOp::BindResponse(BindResponse::read(elements(tagged, "BindResponse")?)?),
            tag::UNBIND_REQUEST => ProtocolOp::UnbindRequest,
            tag::SEARCH_REQUEST => {
                ProtocolOp::SearchRequest(SearchRequest::read(elements(tagged, "SearchRequest")?)?)
            }
            tag::SEARCH_RESULT_ENTRY => {
                ProtocolOp::SearchResEntry(SearchResultEntry::read(elements(tagged, "SearchResultEntry")?)?)
            }
            tag::SEARCH_RESULT_REFERENCE => {
                ProtocolOp::SearchResRef(SearchResultReference::read(elements(tagged, "SearchResultReference")?)?)
            }
            tag::SEARCH_RESULT_DONE => ProtocolOp::SearchResDone(read_result(tagged, "SearchResultDone")?),
            tag::MODIFY_REQUEST => {
                ProtocolOp::ModifyRequest(ModifyRequest::read(elements(tagged, "ModifyRequest")?)?)
            }
            tag::MODIFY_RESPONSE => ProtocolOp::ModifyResponse(read_result(tagged, "ModifyResponse")?),
            tag::ADD_REQUEST => ProtocolOp::AddRequest(AddRequest::read(elements(tagged, "AddRequest")?)?),
            tag::ADD_RESPONSE => ProtocolOp::AddResponse(read_result(tagged, "AddResponse")?),
            tag::DEL_REQUEST => ProtocolOp::DelRequest(tagged.content().clone()),
            tag::DEL_RESPONSE => ProtocolOp::DelResponse(read_result(tagged, "DelResponse")?),
            tag::MODIFY_DN_REQUEST => {
                ProtocolOp::ModDnRequest(ModifyDnRequest::read(elements(tagged, "ModifyDNRequest")?)?)
            }
            tag::MODIFY_DN_RESPONSE => ProtocolOp::ModDnResponse(read_result(tagged, "ModifyDNResponse")?),
            tag::COMPARE_REQUEST => {
                ProtocolOp::CompareRequest(CompareRequest::read(elements(tagged, "CompareRequest")?)?)
            }
            tag::COMPARE_RESPONSE => ProtocolOp::CompareResponse(read_result(tagged, "CompareResponse")?),
            tag::ABANDON_REQUEST => {
                let id = tagged.integer()?;
                ProtocolOp::AbandonRequest(
                    i32::try_from(id).map_err(|_| ProtocolError::InvalidMessageId(id))?,
                )
            }
            tag::EXTENDED_REQUEST => {
                ProtocolOp::ExtendedReq(ExtendedRequest::read(elements(tagged, "ExtendedRequest")?)?)
            }
            tag::EXTENDED_RESPONSE => {
                ProtocolOp::ExtendedResp(ExtendedResponse::read(elements(tagged, "ExtendedResponse")?)?)
            }
            tag::INTERMEDIATE_RESPONSE => ProtocolOp::IntermediateResponse(IntermediateResponse::read(elements(
                tagged,
                "IntermediateResponse",
            )?)?),
            _ => return Err(ProtocolError::InvalidOperationTag(id).into()),
        };
        Ok(op)
    }

    /// Encode as an implicitly tagged APPLICATION value
    pub fn encode(&self) -> Tagged {
        let tag = self.tag();
        let children = match self {
            ProtocolOp::UnbindRequest => return Tagged::primitive(TagClass::Application, tag, Bytes::new()),
            ProtocolOp::DelRequest(dn) => return Tagged::primitive(TagClass::Application, tag, dn.clone()),
            ProtocolOp::AbandonRequest(id) => {
                let encoded = Asn1Value::Integer(*id as i64).to_bytes();
                // keep only the content octets of the universal INTEGER encoding
                return Tagged::primitive(TagClass::Application, tag, encoded.slice(2..));
            }
            ProtocolOp::BindRequest(req) => req.write(),
            ProtocolOp::BindResponse(resp) => resp.write(),
            ProtocolOp::SearchRequest(req) => req.write(),
            ProtocolOp::SearchResEntry(entry) => entry.write(),
            ProtocolOp::SearchResRef(reference) => reference.write(),
            ProtocolOp::ModifyRequest(req) => req.write(),
            ProtocolOp::AddRequest(req) => req.write(),
            ProtocolOp::ModDnRequest(req) => req.write(),
            ProtocolOp::CompareRequest(req) => req.write(),
            ProtocolOp::ExtendedReq(req) => req.write(),
            ProtocolOp::ExtendedResp(resp) => resp.write(),
            ProtocolOp::IntermediateResponse(resp) => resp.write(),
            ProtocolOp::SearchResDone(result)
            | ProtocolOp::ModifyResponse(result)
            | ProtocolOp::AddResponse(result)
            | ProtocolOp::DelResponse(result)
            | ProtocolOp::ModDnResponse(result)
            | ProtocolOp::CompareResponse(result) => {
                let mut out = Vec::new();
                result.write(&mut out);
                out
            }
        };
        Tagged::constructed(TagClass::Application, tag, &children)
    }
}

fn elements(tagged: &Tagged, context: &'static str) -> Result<Elements> {
    Elements::from_tagged(tagged, context)
}

fn read_result(tagged: &Tagged, context: &'static str) -> Result<LdapResult> {
    LdapResult::read(&mut elements(tagged, context)?)
}

fn enum_value<T>(elements: &mut Elements, convert: fn(i64) -> Option<T>) -> Result<T> {
    let value = elements.enumerated()?;
    convert(value).ok_or_else(|| elements.invalid_value(value))
}

fn limit(elements: &mut Elements) -> Result<u32> {
    let value = elements.integer()?;
    u32::try_from(value).map_err(|_| elements.invalid_value(value))
}

fn octets_list(values: Vec<Asn1Value>, context: &'static str) -> Result<Vec<Bytes>> {
    values.into_iter().map(|v| expect_octets(v, context)).collect()
}

fn octets_seq(values: &[Bytes]) -> Vec<Asn1Value> {
    values.iter().cloned().map(Asn1Value::OctetString).collect()
}

/// Search scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchScope {
    BaseObject = 0,
    SingleLevel = 1,
    WholeSubtree = 2,
}

impl SearchScope {
    fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(SearchScope::BaseObject),
            1 => Some(SearchScope::SingleLevel),
            2 => Some(SearchScope::WholeSubtree),
            _ => None,
        }
    }
}

/// Alias dereferencing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerefAliases {
    NeverDerefAliases = 0,
    DerefInSearching = 1,
    DerefFindingBaseObj = 2,
    DerefAlways = 3,
}

impl DerefAliases {
    fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(DerefAliases::NeverDerefAliases),
            1 => Some(DerefAliases::DerefInSearching),
            2 => Some(DerefAliases::DerefFindingBaseObj),
            3 => Some(DerefAliases::DerefAlways),
            _ => None,
        }
    }
}

/// Modify operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOperation {
    Add = 0,
    Delete = 1,
    Replace = 2,
    Increment = 3,
}

impl ChangeOperation {
    fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(ChangeOperation::Add),
            1 => Some(ChangeOperation::Delete),
            2 => Some(ChangeOperation::Replace),
            3 => Some(ChangeOperation::Increment),
            _ => None,
        }
    }
}

/// PartialAttribute ::= SEQUENCE { type AttributeDescription, vals SET OF value }
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialAttribute {
    pub r#type: Bytes,
    pub vals: Vec<Bytes>,
}

impl PartialAttribute {
    pub fn new<T: Into<Bytes>>(r#type: T, vals: Vec<Bytes>) -> Self {
        Self {
            r#type: r#type.into(),
            vals,
        }
    }

    fn read(value: Asn1Value) -> Result<Self> {
        let mut elements = expect_sequence(value, "PartialAttribute")?;
        let r#type = elements.octets()?;
        let vals = octets_list(elements.collection()?, "PartialAttribute")?;
        Ok(Self { r#type, vals })
    }

    fn write(&self) -> Asn1Value {
        Asn1Value::Sequence(vec![
            Asn1Value::OctetString(self.r#type.clone()),
            Asn1Value::Set(octets_seq(&self.vals)),
        ])
    }
}

fn attribute_list(elements: &mut Elements) -> Result<Vec<PartialAttribute>> {
    elements.collection()?.into_iter().map(PartialAttribute::read).collect()
}

fn write_attribute_list(attributes: &[PartialAttribute]) -> Asn1Value {
    Asn1Value::Sequence(attributes.iter().map(PartialAttribute::write).collect())
}

/// Authentication choice of a bind request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationChoice {
    /// `[0] OCTET STRING`
    Simple(Bytes),
    /// `[3] SaslCredentials`
    Sasl(SaslCredentials),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslCredentials {
    pub mechanism: Bytes,
    pub credentials: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub version: i64,
    pub name: Bytes,
    pub authentication: AuthenticationChoice,
}

impl BindRequest {
    /// LDAPv3 simple bind
    pub fn simple<N: Into<Bytes>, P: Into<Bytes>>(name: N, password: P) -> Self {
        Self {
            version: 3,
            name: name.into(),
            authentication: AuthenticationChoice::Simple(password.into()),
        }
    }

    fn read(mut elements: Elements) -> Result<Self> {
        let version = elements.integer()?;
        let name = elements.octets()?;
        let authentication = match elements.next()? {
            Asn1Value::Tagged(tagged) if tagged.identifier().is(TagClass::Context, 0) => {
                AuthenticationChoice::Simple(tagged.into_content())
            }
            Asn1Value::Tagged(tagged) if tagged.identifier().is(TagClass::Context, 3) => {
                let mut sasl = Elements::from_tagged(&tagged, "SaslCredentials")?;
                AuthenticationChoice::Sasl(SaslCredentials {
                    mechanism: sasl.octets()?,
                    credentials: sasl.optional_octets(),
                })
            }
            other => return Err(elements.unexpected(&other)),
        };
        Ok(Self {
            version,
            name,
            authentication,
        })
    }

    fn write(&self) -> Vec<Asn1Value> {
        let auth = match self.authentication {
            AuthenticationChoice::Simple(ref password) => Tagged::primitive(TagClass::Context, 0, password.clone()),
            AuthenticationChoice::Sasl(ref sasl) => {
                let mut children = vec![Asn1Value::OctetString(sasl.mechanism.clone())];
                if let Some(ref credentials) = sasl.credentials {
                    children.push(Asn1Value::OctetString(credentials.clone()));
                }
                Tagged::constructed(TagClass::Context, 3, &children)
            }
        };
        vec![
            Asn1Value::Integer(self.version),
            Asn1Value::OctetString(self.name.clone()),
            Asn1Value::Tagged(auth),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindResponse {
    pub result: LdapResult,
    pub server_sasl_creds: Option<Bytes>,
}

impl BindResponse {
    fn read(mut elements: Elements) -> Result<Self> {
        let result = LdapResult::read(&mut elements)?;
        let server_sasl_creds = elements.context(7).map(Tagged::into_content);
        Ok(Self {
            result,
            server_sasl_creds,
        })
    }

    fn write(&self) -> Vec<Asn1Value> {
        let mut out = Vec::new();
        self.result.write(&mut out);
        if let Some(ref creds) = self.server_sasl_creds {
            out.push(Asn1Value::Tagged(Tagged::primitive(TagClass::Context, 7, creds.clone())));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub base_object: Bytes,
    pub scope: SearchScope,
    pub deref_aliases: DerefAliases,
    pub size_limit: u32,
    pub time_limit: u32,
    pub types_only: bool,
    pub filter: Filter,
    pub attributes: Vec<Bytes>,
}

impl SearchRequest {
    fn read(mut elements: Elements) -> Result<Self> {
        Ok(Self {
            base_object: elements.octets()?,
            scope: enum_value(&mut elements, SearchScope::from_i64)?,
            deref_aliases: enum_value(&mut elements, DerefAliases::from_i64)?,
            size_limit: limit(&mut elements)?,
            time_limit: limit(&mut elements)?,
            types_only: elements.boolean()?,
            filter: Filter::from_asn1(elements.next()?)?,
            attributes: octets_list(elements.collection()?, "AttributeSelection")?,
        })
    }

    fn write(&self) -> Vec<Asn1Value> {
        vec![
            Asn1Value::OctetString(self.base_object.clone()),
            Asn1Value::Enumerated(self.scope as i64),
            Asn1Value::Enumerated(self.deref_aliases as i64),
            Asn1Value::Integer(self.size_limit as i64),
            Asn1Value::Integer(self.time_limit as i64),
            Asn1Value::Boolean(self.types_only),
            self.filter.to_asn1(),
            Asn1Value::Sequence(octets_seq(&self.attributes)),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResultEntry {
    pub object_name: Bytes,
    pub attributes: Vec<PartialAttribute>,
}

impl SearchResultEntry {
    fn read(mut elements: Elements) -> Result<Self> {
        Ok(Self {
            object_name: elements.octets()?,
            attributes: attribute_list(&mut elements)?,
        })
    }

    fn write(&self) -> Vec<Asn1Value> {
        vec![
            Asn1Value::OctetString(self.object_name.clone()),
            write_attribute_list(&self.attributes),
        ]
    }
}

/// SearchResultReference ::= [APPLICATION 19] SEQUENCE SIZE (1..MAX) OF uri URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResultReference(pub Vec<Bytes>);

impl SearchResultReference {
    /// Reference URLs as strings
    pub fn urls(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|url| String::from_utf8_lossy(url).into_owned())
            .collect()
    }

    fn read(elements: Elements) -> Result<Self> {
        Ok(Self(octets_list(elements.rest(), "SearchResultReference")?))
    }

    fn write(&self) -> Vec<Asn1Value> {
        octets_seq(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub operation: ChangeOperation,
    pub modification: PartialAttribute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyRequest {
    pub object: Bytes,
    pub changes: Vec<Change>,
}

impl ModifyRequest {
    fn read(mut elements: Elements) -> Result<Self> {
        let object = elements.octets()?;
        let changes = elements
            .collection()?
            .into_iter()
            .map(|value| {
                let mut change = expect_sequence(value, "Change")?;
                Ok(Change {
                    operation: enum_value(&mut change, ChangeOperation::from_i64)?,
                    modification: PartialAttribute::read(change.next()?)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { object, changes })
    }

    fn write(&self) -> Vec<Asn1Value> {
        let changes = self
            .changes
            .iter()
            .map(|change| {
                Asn1Value::Sequence(vec![
                    Asn1Value::Enumerated(change.operation as i64),
                    change.modification.write(),
                ])
            })
            .collect();
        vec![Asn1Value::OctetString(self.object.clone()), Asn1Value::Sequence(changes)]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    pub entry: Bytes,
    pub attributes: Vec<PartialAttribute>,
}

impl AddRequest {
    fn read(mut elements: Elements) -> Result<Self> {
        Ok(Self {
            entry: elements.octets()?,
            attributes: attribute_list(&mut elements)?,
        })
    }

    fn write(&self) -> Vec<Asn1Value> {
        vec![
            Asn1Value::OctetString(self.entry.clone()),
            write_attribute_list(&self.attributes),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyDnRequest {
    pub entry: Bytes,
    pub newrdn: Bytes,
    pub delete_old_rdn: bool,
    pub new_superior: Option<Bytes>,
}

impl ModifyDnRequest {
    fn read(mut elements: Elements) -> Result<Self> {
        Ok(Self {
            entry: elements.octets()?,
            newrdn: elements.octets()?,
            delete_old_rdn: elements.boolean()?,
            new_superior: elements.context(0).map(Tagged::into_content),
        })
    }

    fn write(&self) -> Vec<Asn1Value> {
        let mut out = vec![
            Asn1Value::OctetString(self.entry.clone()),
            Asn1Value::OctetString(self.newrdn.clone()),
            Asn1Value::Boolean(self.delete_old_rdn),
        ];
        if let Some(ref superior) = self.new_superior {
            out.push(Asn1Value::Tagged(Tagged::primitive(TagClass::Context, 0, superior.clone())));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareRequest {
    pub entry: Bytes,
    pub ava: AttributeValueAssertion,
}

impl CompareRequest {
    fn read(mut elements: Elements) -> Result<Self> {
        let entry = elements.octets()?;
        let mut ava = expect_sequence(elements.next()?, "AttributeValueAssertion")?;
        Ok(Self {
            entry,
            ava: AttributeValueAssertion::new(ava.octets()?, ava.octets()?),
        })
    }

    fn write(&self) -> Vec<Asn1Value> {
        vec![
            Asn1Value::OctetString(self.entry.clone()),
            Asn1Value::Sequence(self.ava.to_elements()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedRequest {
    pub request_name: Bytes,
    pub request_value: Option<Bytes>,
}

impl ExtendedRequest {
    fn read(mut elements: Elements) -> Result<Self> {
        let request_name = match elements.context(0) {
            Some(tagged) => tagged.into_content(),
            None => return Err(ProtocolError::MissingElement("ExtendedRequest").into()),
        };
        Ok(Self {
            request_name,
            request_value: elements.context(1).map(Tagged::into_content),
        })
    }

    fn write(&self) -> Vec<Asn1Value> {
        let mut out = vec![Asn1Value::Tagged(Tagged::primitive(
            TagClass::Context,
            0,
            self.request_name.clone(),
        ))];
        if let Some(ref value) = self.request_value {
            out.push(Asn1Value::Tagged(Tagged::primitive(TagClass::Context, 1, value.clone())));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedResponse {
    pub result: LdapResult,
    pub response_name: Option<Bytes>,
    pub response_value: Option<Bytes>,
}

impl ExtendedResponse {
    fn read(mut elements: Elements) -> Result<Self> {
        let result = LdapResult::read(&mut elements)?;
        Ok(Self {
            result,
            response_name: elements.context(10).map(Tagged::into_content),
            response_value: elements.context(11).map(Tagged::into_content),
        })
    }

    fn write(&self) -> Vec<Asn1Value> {
        let mut out = Vec::new();
        self.result.write(&mut out);
        if let Some(ref name) = self.response_name {
            out.push(Asn1Value::Tagged(Tagged::primitive(TagClass::Context, 10, name.clone())));
        }
        if let Some(ref value) = self.response_value {
            out.push(Asn1Value::Tagged(Tagged::primitive(TagClass::Context, 11, value.clone())));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntermediateResponse {
    pub response_name: Option<Bytes>,
    pub response_value: Option<Bytes>,
}

impl IntermediateResponse {
    fn read(mut elements: Elements) -> Result<Self> {
        Ok(Self {
            response_name: elements.context(0).map(Tagged::into_content),
            response_value: elements.context(1).map(Tagged::into_content),
        })
    }

    fn write(&self) -> Vec<Asn1Value> {
        let mut out = Vec::new();
        if let Some(ref name) = self.response_name {
            out.push(Asn1Value::Tagged(Tagged::primitive(TagClass::Context, 0, name.clone())));
        }
        if let Some(ref value) = self.response_value {
            out.push(Asn1Value::Tagged(Tagged::primitive(TagClass::Context, 1, value.clone())));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{LdapMessage, ResultCode};

    fn roundtrip(op: ProtocolOp) {
        let msg = LdapMessage::new(5, op);
        let (decoded, _) = LdapMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_operations_roundtrip() {
        let attr = PartialAttribute::new("mail", vec!["a@example.com".into(), "b@example.com".into()]);
        let ops = vec![
            ProtocolOp::BindRequest(BindRequest::simple("cn=admin", "secret")),
            ProtocolOp::BindRequest(BindRequest {
                version: 3,
                name: Bytes::new(),
                authentication: AuthenticationChoice::Sasl(SaslCredentials {
                    mechanism: "EXTERNAL".into(),
                    credentials: None,
                }),
            }),
            ProtocolOp::BindResponse(BindResponse {
                result: LdapResult::new(ResultCode::SaslBindInProgress, "", ""),
                server_sasl_creds: Some("challenge".into()),
            }),
            ProtocolOp::SearchResEntry(SearchResultEntry {
                object_name: "cn=a,dc=example".into(),
                attributes: vec![attr.clone()],
            }),
            ProtocolOp::SearchResRef(SearchResultReference(vec!["ldap://dc2/".into()])),
            ProtocolOp::ModifyRequest(ModifyRequest {
                object: "cn=a,dc=example".into(),
                changes: vec![Change {
                    operation: ChangeOperation::Replace,
                    modification: attr.clone(),
                }],
            }),
            ProtocolOp::AddRequest(AddRequest {
                entry: "cn=b,dc=example".into(),
                attributes: vec![attr],
            }),
            ProtocolOp::DelRequest("cn=b,dc=example".into()),
            ProtocolOp::ModDnRequest(ModifyDnRequest {
                entry: "cn=b,dc=example".into(),
                newrdn: "cn=c".into(),
                delete_old_rdn: true,
                new_superior: Some("ou=moved,dc=example".into()),
            }),
            ProtocolOp::CompareRequest(CompareRequest {
                entry: "cn=c,dc=example".into(),
                ava: AttributeValueAssertion::new("sn", "Jensen"),
            }),
            ProtocolOp::CompareResponse(LdapResult::new(ResultCode::CompareTrue, "", "")),
            ProtocolOp::AbandonRequest(300),
            ProtocolOp::ExtendedReq(ExtendedRequest {
                request_name: "1.3.6.1.4.1.4203.1.11.3".into(),
                request_value: None,
            }),
            ProtocolOp::ExtendedResp(ExtendedResponse {
                result: LdapResult::success(),
                response_name: None,
                response_value: Some("dn:cn=admin".into()),
            }),
            ProtocolOp::IntermediateResponse(IntermediateResponse {
                response_name: Some("1.3.6.1.4.1.4203.1.9.1.4".into()),
                response_value: None,
            }),
        ];
        for op in ops {
            roundtrip(op);
        }
    }

    #[test]
    fn test_abandon_wire_format() {
        let msg = LdapMessage::new(6, ProtocolOp::AbandonRequest(5));
        assert_eq!(msg.encode(), [0x30, 0x06, 0x02, 0x01, 0x06, 0x50, 0x01, 0x05]);
    }

    #[test]
    fn test_invalid_scope_rejected() {
        let mut children = SearchRequest {
            base_object: Bytes::new(),
            scope: SearchScope::BaseObject,
            deref_aliases: DerefAliases::NeverDerefAliases,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter: Filter::Present("objectClass".into()),
            attributes: Vec::new(),
        }
        .write();
        children[1] = Asn1Value::Enumerated(9);
        let tagged = Tagged::constructed(TagClass::Application, tag::SEARCH_REQUEST, &children);
        assert!(matches!(
            ProtocolOp::decode(&tagged),
            Err(crate::error::Error::Protocol(ProtocolError::InvalidValue { value: 9, .. }))
        ));
    }

    #[test]
    fn test_request_classification() {
        assert!(ProtocolOp::DelRequest(Bytes::new()).is_request());
        assert!(!ProtocolOp::SearchResDone(LdapResult::success()).is_request());
        assert!(ProtocolOp::SearchResRef(SearchResultReference(Vec::new())).is_intermediate());
        assert!(ProtocolOp::SearchResDone(LdapResult::success()).result().is_some());
    }
}
