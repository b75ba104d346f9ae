use std::time::Duration;

use crate::{
    error::Error,
    filter::{parse_filter, Filter},
    message,
    model::{DerefAliases, SearchRequest, SearchScope},
};

/// Builds a [`SearchRequest`], starting from the root DSE query
pub struct SearchRequestBuilder {
    request: message::SearchRequest,
    // reported by `build`; a later valid filter replaces it
    filter_error: Option<Error>,
}

impl Default for SearchRequestBuilder {
    fn default() -> Self {
        Self {
            request: SearchRequest::root_dse().into(),
            filter_error: None,
        }
    }
}

impl SearchRequestBuilder {
    pub fn new() -> Self {
        SearchRequestBuilder::default()
    }

    pub fn base_dn<S: AsRef<str>>(mut self, base_dn: S) -> Self {
        self.request.base_object = base_dn.as_ref().to_owned().into();
        self
    }

    pub fn scope(mut self, scope: SearchScope) -> Self {
        self.request.scope = scope;
        self
    }

    pub fn deref_aliases(mut self, deref_aliases: DerefAliases) -> Self {
        self.request.deref_aliases = deref_aliases;
        self
    }

    pub fn size_limit(mut self, size_limit: u32) -> Self {
        self.request.size_limit = size_limit;
        self
    }

    /// Server-side time limit, sent with second granularity
    pub fn time_limit(mut self, time_limit: Duration) -> Self {
        self.request.time_limit = u32::try_from(time_limit.as_secs()).unwrap_or(u32::MAX);
        self
    }

    pub fn types_only(mut self, types_only: bool) -> Self {
        self.request.types_only = types_only;
        self
    }

    /// RFC 4515 filter string. Parse errors are returned by [`build`](Self::build).
    pub fn filter<S: AsRef<str>>(mut self, filter: S) -> Self {
        match parse_filter(filter) {
            Ok(filter) => return self.filter_expr(filter),
            Err(e) => self.filter_error = Some(e),
        }
        self
    }

    pub fn filter_expr(mut self, filter: Filter) -> Self {
        self.request.filter = filter;
        self.filter_error = None;
        self
    }

    pub fn attributes<I, T>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.request.attributes = attributes
            .into_iter()
            .map(|a| a.as_ref().to_owned().into())
            .collect();
        self
    }

    pub fn build(self) -> Result<SearchRequest, Error> {
        match self.filter_error {
            Some(e) => Err(e),
            None => Ok(SearchRequest(self.request)),
        }
    }
}
