//! Search filters: RFC 4515 string representation and the `Filter` CHOICE of RFC 4511.

use std::fmt;

use bytes::Bytes;
use once_cell::sync::Lazy;
use pest::{
    iterators::{Pair, Pairs},
    Parser,
};
use pest_derive::Parser;
use regex::bytes::{Captures, Regex};

use crate::{
    ber::{Asn1Value, TagClass, Tagged},
    error::{Error, Result},
    message::{Elements, ProtocolError},
};

type RulePair<'a> = Pair<'a, Rule>;
type RulePairs<'a> = Pairs<'a, Rule>;

/// AttributeValueAssertion ::= SEQUENCE { attributeDesc, assertionValue }
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeValueAssertion {
    pub attribute_desc: Bytes,
    pub assertion_value: Bytes,
}

impl AttributeValueAssertion {
    pub fn new<A: Into<Bytes>, V: Into<Bytes>>(attribute_desc: A, assertion_value: V) -> Self {
        Self {
            attribute_desc: attribute_desc.into(),
            assertion_value: assertion_value.into(),
        }
    }

    pub(crate) fn to_elements(&self) -> Vec<Asn1Value> {
        vec![
            Asn1Value::OctetString(self.attribute_desc.clone()),
            Asn1Value::OctetString(self.assertion_value.clone()),
        ]
    }

    fn read(tagged: &Tagged) -> Result<Self> {
        let mut elements = Elements::from_tagged(tagged, "AttributeValueAssertion")?;
        Ok(Self::new(elements.octets()?, elements.octets()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubstringChoice {
    Initial(Bytes),
    Any(Bytes),
    Final(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubstringFilter {
    pub r#type: Bytes,
    pub substrings: Vec<SubstringChoice>,
}

impl SubstringFilter {
    pub fn new<T: Into<Bytes>>(r#type: T, substrings: Vec<SubstringChoice>) -> Self {
        Self {
            r#type: r#type.into(),
            substrings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchingRuleAssertion {
    pub matching_rule: Option<Bytes>,
    pub r#type: Option<Bytes>,
    pub match_value: Bytes,
    pub dn_attributes: bool,
}

impl MatchingRuleAssertion {
    pub fn new(matching_rule: Option<Bytes>, r#type: Option<Bytes>, match_value: Bytes, dn_attributes: bool) -> Self {
        Self {
            matching_rule,
            r#type,
            match_value,
            dn_attributes,
        }
    }
}

/// Search filter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    EqualityMatch(AttributeValueAssertion),
    Substrings(SubstringFilter),
    GreaterOrEqual(AttributeValueAssertion),
    LessOrEqual(AttributeValueAssertion),
    Present(Bytes),
    ApproxMatch(AttributeValueAssertion),
    ExtensibleMatch(MatchingRuleAssertion),
}

impl Filter {
    /// Decode from the context-tagged value of a search request
    pub fn from_asn1(value: Asn1Value) -> Result<Self> {
        let tagged = match value {
            Asn1Value::Tagged(tagged) if tagged.identifier().class == TagClass::Context => tagged,
            other => {
                return Err(ProtocolError::UnexpectedElement {
                    context: "Filter",
                    found: other.identifier(),
                }
                .into())
            }
        };

        let filter = match tagged.identifier().tag {
            0 => Filter::And(Self::read_set(&tagged)?),
            1 => Filter::Or(Self::read_set(&tagged)?),
            2 => {
                let mut elements = Elements::from_tagged(&tagged, "Filter.not")?;
                Filter::Not(Box::new(Filter::from_asn1(elements.next()?)?))
            }
            3 => Filter::EqualityMatch(AttributeValueAssertion::read(&tagged)?),
            4 => {
                let mut elements = Elements::from_tagged(&tagged, "SubstringFilter")?;
                let r#type = elements.octets()?;
                let substrings = elements
                    .collection()?
                    .into_iter()
                    .map(|value| match value {
                        Asn1Value::Tagged(t) if t.identifier().is(TagClass::Context, 0) => {
                            Ok(SubstringChoice::Initial(t.into_content()))
                        }
                        Asn1Value::Tagged(t) if t.identifier().is(TagClass::Context, 1) => {
                            Ok(SubstringChoice::Any(t.into_content()))
                        }
                        Asn1Value::Tagged(t) if t.identifier().is(TagClass::Context, 2) => {
                            Ok(SubstringChoice::Final(t.into_content()))
                        }
                        other => Err(elements.unexpected(&other)),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Filter::Substrings(SubstringFilter { r#type, substrings })
            }
            5 => Filter::GreaterOrEqual(AttributeValueAssertion::read(&tagged)?),
            6 => Filter::LessOrEqual(AttributeValueAssertion::read(&tagged)?),
            7 => Filter::Present(tagged.into_content()),
            8 => Filter::ApproxMatch(AttributeValueAssertion::read(&tagged)?),
            9 => {
                let mut elements = Elements::from_tagged(&tagged, "MatchingRuleAssertion")?;
                let matching_rule = elements.context(1).map(Tagged::into_content);
                let r#type = elements.context(2).map(Tagged::into_content);
                let match_value = match elements.context(3) {
                    Some(value) => value.into_content(),
                    None => return Err(ProtocolError::MissingElement("MatchingRuleAssertion").into()),
                };
                let dn_attributes = match elements.context(4) {
                    Some(value) => value.boolean()?,
                    None => false,
                };
                Filter::ExtensibleMatch(MatchingRuleAssertion {
                    matching_rule,
                    r#type,
                    match_value,
                    dn_attributes,
                })
            }
            _ => {
                return Err(ProtocolError::UnexpectedElement {
                    context: "Filter",
                    found: tagged.identifier(),
                }
                .into())
            }
        };
        Ok(filter)
    }

    fn read_set(tagged: &Tagged) -> Result<Vec<Filter>> {
        tagged.children()?.into_iter().map(Filter::from_asn1).collect()
    }

    pub fn to_asn1(&self) -> Asn1Value {
        let tagged = match self {
            Filter::And(filters) => Tagged::constructed(TagClass::Context, 0, &Self::write_set(filters)),
            Filter::Or(filters) => Tagged::constructed(TagClass::Context, 1, &Self::write_set(filters)),
            Filter::Not(filter) => Tagged::constructed(TagClass::Context, 2, &[filter.to_asn1()]),
            Filter::EqualityMatch(ava) => Tagged::constructed(TagClass::Context, 3, &ava.to_elements()),
            Filter::Substrings(substrings) => {
                let choices = substrings
                    .substrings
                    .iter()
                    .map(|choice| {
                        let (tag, value) = match choice {
                            SubstringChoice::Initial(v) => (0, v),
                            SubstringChoice::Any(v) => (1, v),
                            SubstringChoice::Final(v) => (2, v),
                        };
                        Asn1Value::Tagged(Tagged::primitive(TagClass::Context, tag, value.clone()))
                    })
                    .collect();
                Tagged::constructed(
                    TagClass::Context,
                    4,
                    &[
                        Asn1Value::OctetString(substrings.r#type.clone()),
                        Asn1Value::Sequence(choices),
                    ],
                )
            }
            Filter::GreaterOrEqual(ava) => Tagged::constructed(TagClass::Context, 5, &ava.to_elements()),
            Filter::LessOrEqual(ava) => Tagged::constructed(TagClass::Context, 6, &ava.to_elements()),
            Filter::Present(attr) => Tagged::primitive(TagClass::Context, 7, attr.clone()),
            Filter::ApproxMatch(ava) => Tagged::constructed(TagClass::Context, 8, &ava.to_elements()),
            Filter::ExtensibleMatch(mra) => {
                let mut elements = Vec::new();
                if let Some(ref rule) = mra.matching_rule {
                    elements.push(Asn1Value::Tagged(Tagged::primitive(TagClass::Context, 1, rule.clone())));
                }
                if let Some(ref r#type) = mra.r#type {
                    elements.push(Asn1Value::Tagged(Tagged::primitive(TagClass::Context, 2, r#type.clone())));
                }
                elements.push(Asn1Value::Tagged(Tagged::primitive(
                    TagClass::Context,
                    3,
                    mra.match_value.clone(),
                )));
                if mra.dn_attributes {
                    elements.push(Asn1Value::Tagged(Tagged::primitive(TagClass::Context, 4, vec![0xFF])));
                }
                Tagged::constructed(TagClass::Context, 9, &elements)
            }
        };
        Asn1Value::Tagged(tagged)
    }

    fn write_set(filters: &[Filter]) -> Vec<Asn1Value> {
        filters.iter().map(Filter::to_asn1).collect()
    }
}

fn escape(value: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for b in value {
        match b {
            b'*' | b'(' | b')' | b'\\' | 0 => write!(f, "\\{:02x}", b)?,
            b if b.is_ascii() => write!(f, "{}", *b as char)?,
            b => write!(f, "\\{:02x}", b)?,
        }
    }
    Ok(())
}

fn write_ava(f: &mut fmt::Formatter<'_>, ava: &AttributeValueAssertion, op: &str) -> fmt::Result {
    write!(f, "({}{}", String::from_utf8_lossy(&ava.attribute_desc), op)?;
    escape(&ava.assertion_value, f)?;
    write!(f, ")")
}

/// RFC 4515 string representation
impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(filters) | Filter::Or(filters) => {
                write!(f, "({}", if matches!(self, Filter::And(_)) { '&' } else { '|' })?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                write!(f, ")")
            }
            Filter::Not(filter) => write!(f, "(!{})", filter),
            Filter::EqualityMatch(ava) => write_ava(f, ava, "="),
            Filter::GreaterOrEqual(ava) => write_ava(f, ava, ">="),
            Filter::LessOrEqual(ava) => write_ava(f, ava, "<="),
            Filter::ApproxMatch(ava) => write_ava(f, ava, "~="),
            Filter::Present(attr) => write!(f, "({}=*)", String::from_utf8_lossy(attr)),
            Filter::Substrings(substrings) => {
                write!(f, "({}=", String::from_utf8_lossy(&substrings.r#type))?;
                for choice in &substrings.substrings {
                    match choice {
                        SubstringChoice::Initial(v) => escape(v, f)?,
                        SubstringChoice::Any(v) | SubstringChoice::Final(v) => {
                            write!(f, "*")?;
                            escape(v, f)?;
                        }
                    }
                }
                if !matches!(substrings.substrings.last(), Some(SubstringChoice::Final(_))) {
                    write!(f, "*")?;
                }
                write!(f, ")")
            }
            Filter::ExtensibleMatch(mra) => {
                write!(f, "(")?;
                if let Some(ref r#type) = mra.r#type {
                    write!(f, "{}", String::from_utf8_lossy(r#type))?;
                }
                if mra.dn_attributes {
                    write!(f, ":dn")?;
                }
                if let Some(ref rule) = mra.matching_rule {
                    write!(f, ":{}", String::from_utf8_lossy(rule))?;
                }
                write!(f, ":=")?;
                escape(&mra.match_value, f)?;
                write!(f, ")")
            }
        }
    }
}

fn unescape(s: &str) -> Bytes {
    static HEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\([\da-fA-F]{2})").expect("valid escape pattern"));

    HEX_RE
        .replace_all(s.as_bytes(), |caps: &Captures| [hex_value(&caps[1])])
        .into_owned()
        .into()
}

// the pattern only admits two hex digits
fn hex_value(digits: &[u8]) -> u8 {
    digits.iter().fold(0, |acc, d| {
        let nibble = match d {
            b'0'..=b'9' => d - b'0',
            b'a'..=b'f' => d - b'a' + 10,
            _ => d - b'A' + 10,
        };
        (acc << 4) | nibble
    })
}

#[derive(Parser)]
#[grammar = "filter.pest"]
pub(crate) struct FilterParser;

/// Parse an RFC 4515 string filter
pub fn parse_filter<S: AsRef<str>>(filter: S) -> Result<Filter> {
    let mut parsed = FilterParser::parse(Rule::rfc2254, filter.as_ref())?;
    Ok(parse_rule(parsed.next().expect("No top level rule")))
}

fn as_bytes(pair: &RulePair) -> Bytes {
    Bytes::copy_from_slice(pair.as_str().as_bytes())
}

fn as_value(pair: &RulePair) -> Bytes {
    unescape(pair.as_str())
}

fn as_inner(pair: RulePair) -> RulePair {
    pair.into_inner().next().expect("No inner rule")
}

fn parse_rule(pair: RulePair) -> Filter {
    match pair.as_rule() {
        Rule::and => Filter::And(parse_set(pair.into_inner())),
        Rule::or => Filter::Or(parse_set(pair.into_inner())),
        Rule::not => Filter::Not(Box::new(parse_rule(as_inner(pair)))),
        Rule::simple => parse_simple(pair.into_inner()),
        Rule::present => Filter::Present(as_bytes(&as_inner(pair))),
        Rule::substring => parse_substring(pair.into_inner()),
        Rule::extensible => parse_extensible(pair.into_inner()),
        _ => unreachable!("grammar yields only filter rules here"),
    }
}

fn parse_extensible(pairs: RulePairs) -> Filter {
    let mut assertion = MatchingRuleAssertion::new(None, None, Bytes::new(), false);
    for pair in pairs {
        match pair.as_rule() {
            Rule::ruleid => assertion.matching_rule = Some(as_bytes(&pair)),
            Rule::ident => assertion.r#type = Some(as_bytes(&pair)),
            Rule::string => assertion.match_value = as_value(&pair),
            Rule::dnattr => assertion.dn_attributes = true,
            _ => unreachable!("grammar yields only extensible parts here"),
        }
    }
    Filter::ExtensibleMatch(assertion)
}

fn parse_substring(mut pairs: RulePairs) -> Filter {
    let attr = as_bytes(&pairs.next().expect("No attribute"));
    let choices = pairs
        .map(|pair| match pair.as_rule() {
            Rule::initial => SubstringChoice::Initial(as_value(&pair)),
            Rule::any => SubstringChoice::Any(as_value(&pair)),
            _ => SubstringChoice::Final(as_value(&pair)),
        })
        .collect();
    Filter::Substrings(SubstringFilter::new(attr, choices))
}

fn parse_simple(pairs: RulePairs) -> Filter {
    let pairs = pairs.collect::<Vec<_>>();
    let assertion = AttributeValueAssertion::new(as_bytes(&pairs[0]), as_value(&pairs[2]));
    match pairs[1].as_rule() {
        Rule::equal => Filter::EqualityMatch(assertion),
        Rule::approx => Filter::ApproxMatch(assertion),
        Rule::greater => Filter::GreaterOrEqual(assertion),
        _ => Filter::LessOrEqual(assertion),
    }
}

fn parse_set(pairs: RulePairs) -> Vec<Filter> {
    pairs.map(parse_rule).collect()
}

impl std::str::FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_filter(s)
    }
}

impl TryFrom<Asn1Value> for Filter {
    type Error = Error;

    fn try_from(value: Asn1Value) -> Result<Self> {
        Filter::from_asn1(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(attr: &str, value: &str) -> Filter {
        Filter::EqualityMatch(AttributeValueAssertion::new(attr.to_owned(), value.to_owned()))
    }

    #[test]
    fn test_parser() {
        let test_filters = vec![
            (
                r#"(cn=Babs Jensen\30\30\01)"#,
                Filter::EqualityMatch(AttributeValueAssertion::new("cn", &b"Babs Jensen00\x01"[..])),
            ),
            ("(cn=Babs Jensen)", eq("cn", "Babs Jensen")),
            ("(cn=*)", Filter::Present("cn".into())),
            ("(!(cn=Tim Howes))", Filter::Not(Box::new(eq("cn", "Tim Howes")))),
            (
                "(&(objectClass=Person)(|(sn=Jensen)(cn=Babs J*)))",
                Filter::And(vec![
                    eq("objectClass", "Person"),
                    Filter::Or(vec![
                        eq("sn", "Jensen"),
                        Filter::Substrings(SubstringFilter::new(
                            "cn",
                            vec![SubstringChoice::Initial("Babs J".into())],
                        )),
                    ]),
                ]),
            ),
            (
                "(o=univ*of*mich*end)",
                Filter::Substrings(SubstringFilter::new(
                    "o",
                    vec![
                        SubstringChoice::Initial("univ".into()),
                        SubstringChoice::Any("of".into()),
                        SubstringChoice::Any("mich".into()),
                        SubstringChoice::Final("end".into()),
                    ],
                )),
            ),
            (
                "(cn:1.2.3.4.5:=Fred Flintstone)",
                Filter::ExtensibleMatch(MatchingRuleAssertion::new(
                    Some("1.2.3.4.5".into()),
                    Some("cn".into()),
                    "Fred Flintstone".into(),
                    false,
                )),
            ),
            (
                "(sn:dn:2.4.6.8.10:=Barney Rubble)",
                Filter::ExtensibleMatch(MatchingRuleAssertion::new(
                    Some("2.4.6.8.10".into()),
                    Some("sn".into()),
                    "Barney Rubble".into(),
                    true,
                )),
            ),
            (
                "(o:dn:=Ace Industry)",
                Filter::ExtensibleMatch(MatchingRuleAssertion::new(
                    None,
                    Some("o".into()),
                    "Ace Industry".into(),
                    true,
                )),
            ),
            (
                "(:dn:2.4.6.8.10:=Dino)",
                Filter::ExtensibleMatch(MatchingRuleAssertion::new(
                    Some("2.4.6.8.10".into()),
                    None,
                    "Dino".into(),
                    true,
                )),
            ),
            ("(uid>=1000)", Filter::GreaterOrEqual(AttributeValueAssertion::new("uid", "1000"))),
            ("(sn~=Jensn)", Filter::ApproxMatch(AttributeValueAssertion::new("sn", "Jensn"))),
        ];

        for (input, expected) in test_filters {
            assert_eq!(parse_filter(input).unwrap(), expected, "{}", input);
        }
    }

    #[test]
    fn test_escaped_parenthesis_in_value() {
        assert_eq!(parse_filter(r"(cn=a\28b\29)").unwrap(), eq("cn", "a(b)"));
        assert_eq!(parse_filter(r"(cn=*\2a*)").unwrap().to_string(), r"(cn=*\2a*)");
    }

    #[test]
    fn test_invalid_filters() {
        for input in ["cn=x", "(cn=x", "(&)", "(cn=**)", "(cn=x))"] {
            assert!(matches!(parse_filter(input), Err(Error::InvalidFilter(_))), "{}", input);
        }
    }

    #[test]
    fn test_unescape() {
        assert_eq!(&unescape(r#"hello\20\77\6f\72\6c\64\00\01"#)[..], b"hello world\x00\x01");
        assert_eq!(&unescape(r#"hello\\gg"#)[..], b"hello\\\\gg");
    }

    #[test]
    fn test_filter_pdu() {
        let filter = parse_filter("(&(objectClass=person)(!(mail=*))(cn:dn:=x))").unwrap();
        let encoded = filter.to_asn1();
        assert_eq!(Filter::from_asn1(encoded).unwrap(), filter);
        assert_eq!(Filter::Present("cn".into()).to_asn1().to_vec(), [0x87, 0x02, b'c', b'n']);
    }

    #[test]
    fn test_display() {
        for input in ["(&(objectClass=Person)(|(sn=Jensen)(cn=Babs J*)))", "(o=univ*of*mich*end)", "(cn=*x)"] {
            assert_eq!(parse_filter(input).unwrap().to_string(), input);
        }
    }
}
