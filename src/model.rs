//! Data structures

use bytes::Bytes;

pub use crate::message::{ChangeOperation, DerefAliases, ResultCode, SearchScope};
use crate::{
    error::Error,
    message::{utf8, PartialAttribute, SearchResultEntry},
    SearchRequestBuilder,
};

/// Search request
#[derive(Clone, Debug, PartialEq)]
pub struct SearchRequest(pub(crate) crate::message::SearchRequest);

impl SearchRequest {
    /// Create search request builder
    pub fn builder() -> SearchRequestBuilder {
        SearchRequestBuilder::new()
    }

    /// Create search request to query root DSE object
    pub fn root_dse() -> Self {
        Self(crate::message::SearchRequest {
            base_object: Bytes::new(),
            scope: SearchScope::BaseObject,
            deref_aliases: DerefAliases::NeverDerefAliases,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter: crate::filter::Filter::Present("objectClass".into()),
            attributes: Vec::new(),
        })
    }
}

impl From<SearchRequest> for crate::message::SearchRequest {
    fn from(req: SearchRequest) -> Self {
        req.0
    }
}

/// LDAP attribute definition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name
    pub name: String,
    /// Attribute values
    pub values: Vec<Bytes>,
}

pub type Attributes = Vec<Attribute>;

impl TryFrom<PartialAttribute> for Attribute {
    type Error = Error;

    fn try_from(raw: PartialAttribute) -> Result<Self, Self::Error> {
        Ok(Attribute {
            name: utf8(&raw.r#type)?,
            values: raw.vals,
        })
    }
}

/// Directory entry returned by a search
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchEntry {
    /// Distinguished name
    pub dn: String,
    pub attributes: Attributes,
}

impl SearchEntry {
    /// Values of the first attribute with the given name, compared case-insensitively
    pub fn values(&self, name: &str) -> Option<&[Bytes]> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.values.as_slice())
    }
}

impl TryFrom<SearchResultEntry> for SearchEntry {
    type Error = Error;

    fn try_from(raw: SearchResultEntry) -> Result<Self, Self::Error> {
        Ok(SearchEntry {
            dn: utf8(&raw.object_name)?,
            attributes: raw
                .attributes
                .into_iter()
                .map(Attribute::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}
