//! BER encoding: definite lengths in the shortest form, primitive OCTET STRINGs,
//! TRUE as 0xFF and minimal two's-complement integers.

use super::{length::encode_length, value::Asn1Value};

/// Append the encoding of `value` to `dst`
pub fn encode_into(value: &Asn1Value, dst: &mut Vec<u8>) {
    let id = value.identifier();
    match value {
        Asn1Value::Boolean(b) => write_tlv(id, &[if *b { 0xFF } else { 0x00 }], dst),
        Asn1Value::Integer(i) | Asn1Value::Enumerated(i) => {
            let bytes = i.to_be_bytes();
            write_tlv(id, minimal_integer(&bytes), dst)
        }
        Asn1Value::OctetString(s) => write_tlv(id, s, dst),
        Asn1Value::Null => write_tlv(id, &[], dst),
        Asn1Value::Sequence(children) | Asn1Value::Set(children) => {
            let mut content = Vec::new();
            for child in children {
                encode_into(child, &mut content);
            }
            write_tlv(id, &content, dst)
        }
        Asn1Value::Tagged(tagged) => write_tlv(id, &tagged.content, dst),
    }
}

fn write_tlv(id: super::Identifier, content: &[u8], dst: &mut Vec<u8>) {
    id.write(dst);
    encode_length(content.len(), dst);
    dst.extend_from_slice(content);
}

// Drop leading octets that only repeat the sign bit
fn minimal_integer(bytes: &[u8; 8]) -> &[u8] {
    let mut start = 0;
    while start < 7 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    &bytes[start..]
}
