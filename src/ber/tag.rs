//! BER identifier octets.
//!
//! Layout per X.690 8.1.2: bits 8-7 carry the class, bit 6 the
//! primitive/constructed flag, bits 5-1 the tag number (31 switches to the
//! high-tag-number form).

use std::fmt;

/// Constructed bit
pub const CONSTRUCTED: u8 = 0x20;

/// Universal tag numbers understood by this codec
pub mod universal {
    pub const BOOLEAN: u32 = 1;
    pub const INTEGER: u32 = 2;
    pub const OCTET_STRING: u32 = 4;
    pub const NULL: u32 = 5;
    pub const ENUMERATED: u32 = 10;
    pub const SEQUENCE: u32 = 16;
    pub const SET: u32 = 17;
}

/// Tag class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagClass {
    Universal,
    Application,
    Context,
    Private,
}

impl TagClass {
    fn bits(self) -> u8 {
        match self {
            TagClass::Universal => 0x00,
            TagClass::Application => 0x40,
            TagClass::Context => 0x80,
            TagClass::Private => 0xC0,
        }
    }

    fn from_bits(octet: u8) -> Self {
        match octet & 0xC0 {
            0x00 => TagClass::Universal,
            0x40 => TagClass::Application,
            0x80 => TagClass::Context,
            _ => TagClass::Private,
        }
    }
}

/// Identifier of a BER value: class, constructed flag and tag number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub class: TagClass,
    pub constructed: bool,
    pub tag: u32,
}

impl Identifier {
    pub const fn new(class: TagClass, constructed: bool, tag: u32) -> Self {
        Self {
            class,
            constructed,
            tag,
        }
    }

    pub const fn universal(tag: u32) -> Self {
        let constructed = tag == universal::SEQUENCE || tag == universal::SET;
        Self::new(TagClass::Universal, constructed, tag)
    }

    pub const fn application(constructed: bool, tag: u32) -> Self {
        Self::new(TagClass::Application, constructed, tag)
    }

    pub const fn context(constructed: bool, tag: u32) -> Self {
        Self::new(TagClass::Context, constructed, tag)
    }

    /// Check class and tag number, ignoring the constructed flag
    pub fn is(&self, class: TagClass, tag: u32) -> bool {
        self.class == class && self.tag == tag
    }

    /// Number of octets [`Identifier::write`] emits
    pub fn encoded_len(&self) -> usize {
        if self.tag < 31 {
            1
        } else {
            1 + base128_len(self.tag)
        }
    }

    pub(crate) fn write(&self, dst: &mut Vec<u8>) {
        let mut first = self.class.bits();
        if self.constructed {
            first |= CONSTRUCTED;
        }
        if self.tag < 31 {
            dst.push(first | self.tag as u8);
            return;
        }
        dst.push(first | 0x1F);
        let groups = base128_len(self.tag);
        for i in (0..groups).rev() {
            let mut octet = ((self.tag >> (7 * i)) & 0x7F) as u8;
            if i != 0 {
                octet |= 0x80;
            }
            dst.push(octet);
        }
    }

    /// Parse identifier octets, returning the identifier and the number of octets consumed.
    /// `None` means the input ends inside the identifier.
    pub(crate) fn parse(data: &[u8]) -> Option<Result<(Self, usize), ()>> {
        let first = *data.first()?;
        let class = TagClass::from_bits(first);
        let constructed = first & CONSTRUCTED != 0;

        if first & 0x1F != 0x1F {
            return Some(Ok((Self::new(class, constructed, (first & 0x1F) as u32), 1)));
        }

        let mut tag: u32 = 0;
        for (i, octet) in data[1..].iter().enumerate() {
            // five groups of seven bits already fill a u32
            if i >= 5 || tag > (u32::MAX >> 7) {
                return Some(Err(()));
            }
            tag = (tag << 7) | (octet & 0x7F) as u32;
            if octet & 0x80 == 0 {
                return Some(Ok((Self::new(class, constructed, tag), i + 2)));
            }
        }
        None
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = match self.class {
            TagClass::Universal => "UNIVERSAL",
            TagClass::Application => "APPLICATION",
            TagClass::Context => "CONTEXT",
            TagClass::Private => "PRIVATE",
        };
        let form = if self.constructed { "constructed" } else { "primitive" };
        write!(f, "[{} {}] {}", class, self.tag, form)
    }
}

fn base128_len(mut tag: u32) -> usize {
    let mut n = 1;
    while tag >= 0x80 {
        tag >>= 7;
        n += 1;
    }
    n
}
