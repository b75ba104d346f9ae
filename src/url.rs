//! LDAP URLs (RFC 4516) as found in referrals and continuation references

use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{error::Error, model::SearchScope};

pub const DEFAULT_PORT: u16 = 389;
pub const DEFAULT_SECURE_PORT: u16 = 636;

/// Parsed `ldap://host[:port]/dn[?attrs[?scope[?filter]]]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LdapUrl {
    pub secure: bool,
    /// Empty when the URL refers to the server that returned it
    pub host: String,
    pub port: u16,
    pub dn: Option<String>,
    pub attributes: Vec<String>,
    pub scope: Option<SearchScope>,
    pub filter: Option<String>,
}

impl LdapUrl {
    pub fn parse(url: &str) -> Result<Self, Error> {
        static URL_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(
                r"^(?i:(ldaps?))://(\[[^\]]*\]|[^/:?]*)(?::(\d{1,5}))?(?:/([^?]*)(?:\?([^?]*)(?:\?([^?]*)(?:\?([^?]*))?)?)?)?$",
            )
            .expect("valid url pattern")
        });

        let invalid = || Error::InvalidUrl(url.to_owned());
        let caps = URL_RE.captures(url).ok_or_else(invalid)?;

        let secure = caps[1].eq_ignore_ascii_case("ldaps");
        let host = caps[2].trim_start_matches('[').trim_end_matches(']').to_owned();
        let port = match caps.get(3) {
            Some(port) => port.as_str().parse().map_err(|_| invalid())?,
            None if secure => DEFAULT_SECURE_PORT,
            None => DEFAULT_PORT,
        };
        let dn = match caps.get(4) {
            Some(dn) if !dn.as_str().is_empty() => Some(percent_decode(dn.as_str()).ok_or_else(invalid)?),
            _ => None,
        };
        let attributes = match caps.get(5) {
            Some(attrs) if !attrs.as_str().is_empty() => attrs
                .as_str()
                .split(',')
                .map(|a| percent_decode(a).ok_or_else(invalid))
                .collect::<Result<_, _>>()?,
            _ => Vec::new(),
        };
        let scope = match caps.get(6).map(|s| s.as_str().to_ascii_lowercase()) {
            None => None,
            Some(s) if s.is_empty() => None,
            Some(s) if s == "base" => Some(SearchScope::BaseObject),
            Some(s) if s == "one" => Some(SearchScope::SingleLevel),
            Some(s) if s == "sub" => Some(SearchScope::WholeSubtree),
            Some(_) => return Err(invalid()),
        };
        let filter = match caps.get(7) {
            Some(filter) if !filter.as_str().is_empty() => Some(percent_decode(filter.as_str()).ok_or_else(invalid)?),
            _ => None,
        };

        Ok(Self {
            secure,
            host,
            port,
            dn,
            attributes,
            scope,
            filter,
        })
    }

    /// `host:port` socket address string
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for LdapUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LdapUrl::parse(s)
    }
}

impl fmt::Display for LdapUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "ldaps" } else { "ldap" };
        write!(f, "{}://{}/", scheme, self.address())?;
        if let Some(ref dn) = self.dn {
            write!(f, "{}", percent_encode(dn))?;
        }
        Ok(())
    }
}

fn percent_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn percent_encode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'?' | b'%' | b' ' | b'#' | b'/' => format!("%{:02X}", b),
            b if b.is_ascii_graphic() => (b as char).to_string(),
            b => format!("%{:02X}", b),
        })
        .collect()
}
