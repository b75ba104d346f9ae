//! Framing of LDAP messages on a byte stream

use bytes::{BufMut, BytesMut};
use log::{error, trace};
use tokio_util::codec::{Decoder, Encoder};

use crate::{ber, error::Error, message::LdapMessage};

/// LDAP message codec for `tokio_util::codec::Framed`
#[derive(Debug, Default, Clone, Copy)]
pub struct LdapCodec;

impl Decoder for LdapCodec {
    type Item = LdapMessage;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match ber::frame_length(src) {
            Ok(Some(len)) => len,
            Ok(None) => {
                trace!("Incomplete message, {} bytes buffered", src.len());
                return Ok(None);
            }
            Err(e) => {
                error!("Decoder error: {}", e);
                return Err(e.into());
            }
        };

        let frame = src.split_to(len).freeze();
        let mut decoder = ber::Decoder::new(frame);
        match decoder.decode().map_err(Error::from).and_then(LdapMessage::from_asn1) {
            Ok(msg) => {
                trace!("Decoded message: {} bytes", len);
                Ok(Some(msg))
            }
            Err(e) => {
                error!("Decoder error: {}", e);
                Err(e)
            }
        }
    }
}

impl Encoder<LdapMessage> for LdapCodec {
    type Error = Error;

    fn encode(&mut self, item: LdapMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = item.encode();
        dst.reserve(encoded.len());
        dst.put_slice(&encoded);
        Ok(())
    }
}
