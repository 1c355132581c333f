//! Frame Structure
//!
//! A header plus its body. Request bodies are laid out as
//! `[extras][key][value]`, response bodies as `[extras][value]`.

use bytes::{BufMut, Bytes, BytesMut};

use super::header::{Header, OpCode, Status, GET_EXTRAS_LEN, HEADER_SIZE, SET_EXTRAS_LEN};
use crate::storage::Cas;

/// Complete message with header and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub body: Bytes,
}

impl Frame {
    /// Build a frame, filling in the length fields from the parts.
    pub fn new(mut header: Header, extras: &[u8], key: &[u8], value: &[u8]) -> Self {
        let mut body = BytesMut::with_capacity(extras.len() + key.len() + value.len());
        body.put_slice(extras);
        body.put_slice(key);
        body.put_slice(value);

        header.extra_len = extras.len() as u8;
        header.key_len = key.len() as u16;
        header.body_len = body.len() as u32;
        Self {
            header,
            body: body.freeze(),
        }
    }

    pub fn get(key: &[u8], opaque: u32) -> Self {
        let mut header = Header::request(OpCode::Get);
        header.opaque = opaque;
        Self::new(header, &[], key, &[])
    }

    pub fn set(key: &[u8], value: &[u8], flags: u32, expire: u32, cas: Cas, opaque: u32) -> Self {
        let mut extras = [0u8; SET_EXTRAS_LEN];
        extras[..4].copy_from_slice(&flags.to_be_bytes());
        extras[4..].copy_from_slice(&expire.to_be_bytes());

        let mut header = Header::request(OpCode::Set);
        header.opaque = opaque;
        header.cas = cas;
        Self::new(header, &extras, key, value)
    }

    pub fn quit(opaque: u32) -> Self {
        let mut header = Header::request(OpCode::Quit);
        header.opaque = opaque;
        Self::new(header, &[], &[], &[])
    }

    pub fn extras(&self) -> &[u8] {
        let end = (self.header.extra_len as usize).min(self.body.len());
        &self.body[..end]
    }

    pub fn key(&self) -> &[u8] {
        let start = (self.header.extra_len as usize).min(self.body.len());
        let end = (start + self.header.key_len as usize).min(self.body.len());
        &self.body[start..end]
    }

    pub fn value(&self) -> &[u8] {
        let start = (self.header.extra_len as usize + self.header.key_len as usize)
            .min(self.body.len());
        &self.body[start..]
    }

    pub fn status(&self) -> Option<Status> {
        self.header.status_code()
    }

    /// Flags carried in a GET response's extras
    pub fn flags(&self) -> Option<u32> {
        let extras = self.extras();
        if extras.len() < GET_EXTRAS_LEN {
            return None;
        }
        Some(u32::from_be_bytes([extras[0], extras[1], extras[2], extras[3]]))
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        buf.put_slice(&self.body);
    }
}
