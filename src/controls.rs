//! LDAP controls

use std::convert::TryFrom;

use bytes::Bytes;

use crate::{
    ber::{self, Asn1Value, TagClass, Tagged},
    error::{Error, Result},
    message::{expect_sequence, Elements},
};

/// Control ::= SEQUENCE { controlType LDAPOID, criticality BOOLEAN DEFAULT FALSE, controlValue OCTET STRING OPTIONAL }
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Control {
    pub control_type: Bytes,
    pub criticality: bool,
    pub control_value: Option<Bytes>,
}

impl Control {
    pub fn new<T: Into<Bytes>>(control_type: T, criticality: bool, control_value: Option<Bytes>) -> Self {
        Self {
            control_type: control_type.into(),
            criticality,
            control_value,
        }
    }

    /// Control OID as a string
    pub fn oid(&self) -> String {
        String::from_utf8_lossy(&self.control_type).into_owned()
    }

    fn read(value: Asn1Value) -> Result<Self> {
        let mut elements = expect_sequence(value, "Control")?;
        let control_type = elements.octets()?;
        let criticality = elements.optional_boolean();
        let control_value = elements.optional_octets();
        if !elements.is_empty() {
            let extra = elements.next()?;
            return Err(elements.unexpected(&extra));
        }
        Ok(Self {
            control_type,
            criticality,
            control_value,
        })
    }

    fn to_asn1(&self) -> Asn1Value {
        let mut elements = vec![Asn1Value::OctetString(self.control_type.clone())];
        if self.criticality {
            elements.push(Asn1Value::Boolean(true));
        }
        if let Some(ref value) = self.control_value {
            elements.push(Asn1Value::OctetString(value.clone()));
        }
        Asn1Value::Sequence(elements)
    }

    /// Decode the `[0] Controls` component of a message
    pub fn decode_list(tagged: &Tagged) -> Result<Vec<Control>> {
        Elements::from_tagged(tagged, "Controls")?
            .rest()
            .into_iter()
            .map(Control::read)
            .collect()
    }

    /// Encode a list of controls as the `[0] Controls` component of a message
    pub fn encode_list(controls: &[Control]) -> Tagged {
        let values = controls.iter().map(Control::to_asn1).collect::<Vec<_>>();
        Tagged::constructed(TagClass::Context, 0, &values)
    }
}

/// Simple paged result control, OID 1.2.840.113556.1.4.319
#[derive(Debug, Clone, PartialEq, PartialOrd, Eq, Ord, Hash)]
pub struct SimplePagedResultsControl {
    size: u32,
    cookie: Bytes,
    has_entries: bool,
}

impl SimplePagedResultsControl {
    /// Control OID
    pub const OID: &'static [u8] = b"1.2.840.113556.1.4.319";

    /// Create paged result control with a given page size
    pub fn new(size: u32) -> Self {
        Self {
            size,
            cookie: Bytes::new(),
            has_entries: true,
        }
    }

    /// Replace the page size for a given control
    pub fn with_size(self, size: u32) -> Self {
        Self { size, ..self }
    }

    /// Continue from a cookie returned by the server
    pub fn with_cookie<C: Into<Bytes>>(self, cookie: C) -> Self {
        Self {
            cookie: cookie.into(),
            ..self
        }
    }

    /// Return a cookie
    pub fn cookie(&self) -> &Bytes {
        &self.cookie
    }

    /// Return a current size
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Returns true if this control indicates more entries are available
    pub fn has_entries(&self) -> bool {
        self.has_entries
    }
}

impl From<SimplePagedResultsControl> for Control {
    fn from(control: SimplePagedResultsControl) -> Self {
        let value = Asn1Value::Sequence(vec![
            Asn1Value::Integer(control.size as i64),
            Asn1Value::OctetString(control.cookie),
        ]);
        Control::new(SimplePagedResultsControl::OID, false, Some(value.to_bytes()))
    }
}

impl TryFrom<Control> for SimplePagedResultsControl {
    type Error = Error;

    fn try_from(control: Control) -> Result<Self> {
        let data = control.control_value.unwrap_or_default();
        let (value, _) = ber::decode(&data)?;
        let mut elements = expect_sequence(value, "realSearchControlValue")?;
        let size = elements.integer()?;
        let cookie = elements.octets()?;
        let has_entries = !cookie.is_empty();

        Ok(SimplePagedResultsControl {
            size: u32::try_from(size).map_err(|_| elements.invalid_value(size))?,
            cookie,
            has_entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_criticality_omitted_when_false() {
        let control = Control::new("1.2.3", false, None);
        assert_eq!(control.to_asn1().to_vec(), [0x30, 0x07, 0x04, 0x05, b'1', b'.', b'2', b'.', b'3']);
    }

    #[test]
    fn test_control_list() {
        let controls = vec![
            Control::new("1.2.3", true, Some(Bytes::from_static(b"\x01\x02"))),
            Control::new("1.2.4", false, None),
        ];
        let tagged = Control::encode_list(&controls);
        assert_eq!(tagged.identifier().to_string(), "[CONTEXT 0] constructed");
        assert_eq!(Control::decode_list(&tagged).unwrap(), controls);
    }

    #[test]
    fn test_paged_control() {
        let control: Control = SimplePagedResultsControl::new(500).with_cookie("abc").into();
        assert_eq!(control.oid(), "1.2.840.113556.1.4.319");
        assert!(!control.criticality);

        let paged = SimplePagedResultsControl::try_from(control).unwrap();
        assert_eq!(paged.size(), 500);
        assert_eq!(&paged.cookie()[..], b"abc");
        assert!(paged.has_entries());
    }

    #[test]
    fn test_paged_control_last_page() {
        let control: Control = SimplePagedResultsControl::new(0).into();
        let paged = SimplePagedResultsControl::try_from(control).unwrap();
        assert!(!paged.has_entries());
    }
}
