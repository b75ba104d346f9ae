//! LDAP errors

use std::{error, fmt, io};

use futures::channel::mpsc::SendError;

use crate::{
    ber::{DecodeError, Identifier},
    channel::ChannelError,
    filter::Rule,
    message::{LdapResult, ProtocolError, ProtocolOp, ResultCode},
};

/// Referral URLs and the server address a failed result came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralContext {
    pub urls: Vec<String>,
    pub address: String,
}

/// LDAP operation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationError {
    /// Result code
    pub result_code: ResultCode,
    /// Matched DN
    pub matched_dn: String,
    /// Diagnostic message
    pub diagnostic_message: String,
    /// Referral URLs carried by the result
    pub referral: Vec<String>,
    /// Set when the result was received over a chased referral
    pub referral_context: Option<ReferralContext>,
}

impl OperationError {
    pub fn with_referral_context(self, referral_context: ReferralContext) -> Self {
        Self {
            referral_context: Some(referral_context),
            ..self
        }
    }
}

impl From<LdapResult> for OperationError {
    fn from(r: LdapResult) -> Self {
        OperationError {
            result_code: r.result_code,
            matched_dn: String::from_utf8_lossy(&r.matched_dn).into_owned(),
            diagnostic_message: String::from_utf8_lossy(&r.diagnostic_message).into_owned(),
            referral: r.referral_urls(),
            referral_context: None,
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.result_code)?;
        if !self.diagnostic_message.is_empty() {
            write!(f, ": {}", self.diagnostic_message)?;
        }
        if !self.matched_dn.is_empty() {
            write!(f, " (matched {})", self.matched_dn)?;
        }
        if let Some(ref context) = self.referral_context {
            write!(f, " via referral to {}", context.address)?;
        }
        Ok(())
    }
}

/// Why a referral did not produce results
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferralFailure {
    /// Following is disabled
    NotFollowed,
    /// Chasing would exceed the hop limit
    HopLimitExceeded,
    /// None of the URLs could be followed
    ChaseFailed(String),
}

/// Referral or search continuation reference that was not turned into results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralError {
    pub urls: Vec<String>,
    pub failed_url: Option<String>,
    pub reason: ReferralFailure,
}

impl ReferralError {
    pub fn not_followed(urls: Vec<String>) -> Self {
        Self {
            urls,
            failed_url: None,
            reason: ReferralFailure::NotFollowed,
        }
    }
}

impl fmt::Display for ReferralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            ReferralFailure::NotFollowed => write!(f, "referral not followed: {}", self.urls.join(" "))?,
            ReferralFailure::HopLimitExceeded => write!(f, "referral hop limit exceeded: {}", self.urls.join(" "))?,
            ReferralFailure::ChaseFailed(ref reason) => write!(f, "referral chasing failed: {}", reason)?,
        }
        if let Some(ref url) = self.failed_url {
            write!(f, " (at {})", url)?;
        }
        Ok(())
    }
}

/// Misuse of a search result stream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("no more search results")]
    NoMoreEntries,
    #[error("no entry available and search not complete")]
    NoEntryAndNotComplete,
}

/// LDAP errors
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Decode(DecodeError),
    Protocol(ProtocolError),
    Channel(ChannelError),
    Send(SendError),
    OperationFailed(OperationError),
    Referral(ReferralError),
    /// A single response could not be converted; the operation itself continues
    InvalidResponse { message_id: i32, source: Box<Error> },
    Timeout,
    Usage(UsageError),
    Cancelled,
    InvalidFilter(pest::error::Error<Rule>),
    InvalidUrl(String),
    ConnectionClosed,
}

impl Error {
    /// Response of the wrong kind for the operation named by `context`
    pub(crate) fn unexpected_response(message_id: i32, op: &ProtocolOp, context: &'static str) -> Self {
        Error::InvalidResponse {
            message_id,
            source: Box::new(Error::Protocol(ProtocolError::UnexpectedElement {
                context,
                found: Identifier::application(true, op.tag()),
            })),
        }
    }

    /// Failures that end a search rather than a single item of it
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Decode(_)
                | Error::Protocol(_)
                | Error::Channel(_)
                | Error::Send(_)
                | Error::Usage(_)
                | Error::ConnectionClosed
        )
    }

    /// Result code reported for this error, if it maps onto one
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            Error::OperationFailed(e) => Some(e.result_code),
            Error::Referral(e) if e.reason == ReferralFailure::HopLimitExceeded => Some(ResultCode::ReferralLimitExceeded),
            Error::Referral(_) => Some(ResultCode::Referral),
            Error::Timeout => Some(ResultCode::Timeout),
            Error::Decode(_) | Error::Protocol(_) => Some(ResultCode::DecodingError),
            Error::Io(_) | Error::Channel(_) | Error::ConnectionClosed => Some(ResultCode::ServerDown),
            _ => None,
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Channel(e) => Some(e),
            Error::InvalidResponse { source, .. } => Some(source.as_ref()),
            Error::Usage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<ChannelError> for Error {
    fn from(e: ChannelError) -> Self {
        Error::Channel(e)
    }
}

impl From<SendError> for Error {
    fn from(e: SendError) -> Self {
        Error::Send(e)
    }
}

impl From<UsageError> for Error {
    fn from(e: UsageError) -> Self {
        Error::Usage(e)
    }
}

impl From<OperationError> for Error {
    fn from(e: OperationError) -> Self {
        Error::OperationFailed(e)
    }
}

impl From<ReferralError> for Error {
    fn from(e: ReferralError) -> Self {
        Error::Referral(e)
    }
}

impl From<pest::error::Error<Rule>> for Error {
    fn from(e: pest::error::Error<Rule>) -> Self {
        Error::InvalidFilter(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "{}", e),
            Error::Decode(e) => write!(f, "{}", e),
            Error::Protocol(e) => write!(f, "{}", e),
            Error::Channel(e) => write!(f, "{}", e),
            Error::Send(e) => write!(f, "{}", e),
            Error::OperationFailed(e) => write!(f, "LDAP operation failed: {}", e),
            Error::Referral(e) => write!(f, "{}", e),
            Error::InvalidResponse { message_id, source } => {
                write!(f, "Invalid response to message {}: {}", message_id, source)
            }
            Error::Timeout => write!(f, "Timed out waiting for a response"),
            Error::Usage(e) => write!(f, "{}", e),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::InvalidFilter(e) => write!(f, "{}", e),
            Error::InvalidUrl(url) => write!(f, "Invalid LDAP URL: {}", url),
            Error::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Decode(DecodeError::InvalidUtf8).is_fatal());
        assert!(Error::Usage(UsageError::NoMoreEntries).is_fatal());
        assert!(!Error::Timeout.is_fatal());
        assert!(!Error::Cancelled.is_fatal());
        assert!(!Error::Referral(ReferralError::not_followed(vec!["ldap://dc2/".to_owned()])).is_fatal());
        assert!(!Error::InvalidResponse {
            message_id: 1,
            source: Box::new(Error::Decode(DecodeError::InvalidUtf8)),
        }
        .is_fatal());
    }

    #[test]
    fn test_operation_error_display() {
        let result = LdapResult::new(ResultCode::NoSuchObject, "dc=example", "no such entry");
        let error = OperationError::from(result).with_referral_context(ReferralContext {
            urls: vec!["ldap://dc2/dc=example".to_owned()],
            address: "dc2:389".to_owned(),
        });
        assert_eq!(
            error.to_string(),
            "NoSuchObject (32): no such entry (matched dc=example) via referral to dc2:389"
        );
    }
}
