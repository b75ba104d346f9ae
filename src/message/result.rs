//! LDAP result codes and the common LDAPResult component.

use std::fmt;

use bytes::Bytes;

use super::Elements;
use crate::{
    ber::{Asn1Value, TagClass, Tagged},
    error::Result,
};

macro_rules! result_codes {
    ($($(#[$doc:meta])* $name:ident = $code:literal,)*) => {
        /// LDAP result code (RFC 4511 section 4.1.9 plus client-side codes)
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ResultCode {
            $($(#[$doc])* $name,)*
            /// Code not known to this crate
            Unknown(u32),
        }

        impl ResultCode {
            /// Numeric value as sent on the wire
            pub fn code(self) -> u32 {
                match self {
                    $(ResultCode::$name => $code,)*
                    ResultCode::Unknown(code) => code,
                }
            }
        }

        impl From<u32> for ResultCode {
            fn from(code: u32) -> Self {
                match code {
                    $($code => ResultCode::$name,)*
                    other => ResultCode::Unknown(other),
                }
            }
        }
    };
}

result_codes! {
    Success = 0,
    OperationsError = 1,
    ProtocolError = 2,
    TimeLimitExceeded = 3,
    SizeLimitExceeded = 4,
    CompareFalse = 5,
    CompareTrue = 6,
    AuthMethodNotSupported = 7,
    StrongerAuthRequired = 8,
    Referral = 10,
    AdminLimitExceeded = 11,
    UnavailableCriticalExtension = 12,
    ConfidentialityRequired = 13,
    SaslBindInProgress = 14,
    NoSuchAttribute = 16,
    UndefinedAttributeType = 17,
    InappropriateMatching = 18,
    ConstraintViolation = 19,
    AttributeOrValueExists = 20,
    InvalidAttributeSyntax = 21,
    NoSuchObject = 32,
    AliasProblem = 33,
    InvalidDnSyntax = 34,
    AliasDereferencingProblem = 36,
    InappropriateAuthentication = 48,
    InvalidCredentials = 49,
    InsufficientAccessRights = 50,
    Busy = 51,
    Unavailable = 52,
    UnwillingToPerform = 53,
    LoopDetect = 54,
    NamingViolation = 64,
    ObjectClassViolation = 65,
    NotAllowedOnNonLeaf = 66,
    NotAllowedOnRdn = 67,
    EntryAlreadyExists = 68,
    ObjectClassModsProhibited = 69,
    AffectsMultipleDsas = 71,
    Other = 80,
    /// Client side: the server connection was lost
    ServerDown = 81,
    /// Client side: local failure
    LocalError = 82,
    /// Client side: request could not be encoded
    EncodingError = 83,
    /// Client side: response could not be decoded
    DecodingError = 84,
    /// Client side: no response within the time limit
    Timeout = 85,
    /// Client side: connection to the server failed
    ConnectError = 91,
    /// Client side: referral hop limit reached
    ReferralLimitExceeded = 97,
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Unknown(code) => write!(f, "unknown ({})", code),
            other => write!(f, "{:?} ({})", other, other.code()),
        }
    }
}

/// LDAPResult
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapResult {
    pub result_code: ResultCode,
    pub matched_dn: Bytes,
    pub diagnostic_message: Bytes,
    /// Referral URLs, only meaningful with [`ResultCode::Referral`]
    pub referral: Option<Vec<Bytes>>,
}

impl LdapResult {
    pub fn new<D, M>(result_code: ResultCode, matched_dn: D, diagnostic_message: M) -> Self
    where
        D: Into<Bytes>,
        M: Into<Bytes>,
    {
        Self {
            result_code,
            matched_dn: matched_dn.into(),
            diagnostic_message: diagnostic_message.into(),
            referral: None,
        }
    }

    pub fn success() -> Self {
        Self::new(ResultCode::Success, Bytes::new(), Bytes::new())
    }

    pub fn with_referral<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Bytes>,
    {
        self.referral = Some(urls.into_iter().map(Into::into).collect());
        self
    }

    /// Referral URLs as strings
    pub fn referral_urls(&self) -> Vec<String> {
        self.referral
            .iter()
            .flatten()
            .map(|url| String::from_utf8_lossy(url).into_owned())
            .collect()
    }

    /// Read the LDAPResult components from the front of `elements`
    pub(crate) fn read(elements: &mut Elements) -> Result<Self> {
        let code = elements.enumerated()?;
        let result_code = u32::try_from(code)
            .map(ResultCode::from)
            .map_err(|_| elements.invalid_value(code))?;
        let matched_dn = elements.octets()?;
        let diagnostic_message = elements.octets()?;
        let referral = match elements.context(3) {
            Some(tagged) => Some(
                Elements::from_tagged(&tagged, "Referral")?
                    .rest()
                    .into_iter()
                    .map(|v| super::expect_octets(v, "Referral"))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };
        Ok(Self {
            result_code,
            matched_dn,
            diagnostic_message,
            referral,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<Asn1Value>) {
        out.push(Asn1Value::Enumerated(self.result_code.code() as i64));
        out.push(Asn1Value::OctetString(self.matched_dn.clone()));
        out.push(Asn1Value::OctetString(self.diagnostic_message.clone()));
        if let Some(ref urls) = self.referral {
            let urls = urls.iter().cloned().map(Asn1Value::OctetString).collect::<Vec<_>>();
            out.push(Asn1Value::Tagged(Tagged::constructed(TagClass::Context, 3, &urls)));
        }
    }
}
