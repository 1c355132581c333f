//! Binary Header
//!
//! Fixed 24-byte header shared by requests and responses. Multi-byte
//! fields travel in network byte order.
//!
//! ```text
//! ┌─────────┬─────────┬───────────────────┐
//! │  Magic  │ Opcode  │    Key length     │  0
//! ├─────────┼─────────┼───────────────────┤
//! │ Extras  │DataType │ Reserved / Status │  4
//! ├─────────┴─────────┴───────────────────┤
//! │          Total body length            │  8
//! ├───────────────────────────────────────┤
//! │               Opaque                  │ 12
//! ├───────────────────────────────────────┤
//! │            CAS (2 x u32)              │ 16
//! └───────────────────────────────────────┘
//! ```

use bytes::{Buf, BufMut};
use std::fmt;

use crate::storage::Cas;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 24;

pub const REQUEST_MAGIC: u8 = 0x80;
pub const RESPONSE_MAGIC: u8 = 0x81;

/// Raw bytes; the only data type in use
pub const RAW_DATA_TYPE: u8 = 0x00;

/// SET extras: flags (4) + expiry (4)
pub const SET_EXTRAS_LEN: usize = 8;

/// GET response extras: flags (4)
pub const GET_EXTRAS_LEN: usize = 4;

/// Largest extras block any message carries
pub const MAX_EXTRAS_LEN: usize = SET_EXTRAS_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Get = 0x00,
    Set = 0x01,
    Quit = 0x07,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(OpCode::Get),
            0x01 => Some(OpCode::Set),
            0x07 => Some(OpCode::Quit),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Get => "GET",
            OpCode::Set => "SET",
            OpCode::Quit => "QUIT",
        }
    }
}

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    Success = 0x0000,
    NotFound = 0x0001,
    Exists = 0x0002,
    TooLarge = 0x0003,
    InvalidArgs = 0x0004,
    NotStored = 0x0005,
    NonNumeric = 0x0006,
    UnknownCommand = 0x0081,
}

impl Status {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Status::Success),
            0x0001 => Some(Status::NotFound),
            0x0002 => Some(Status::Exists),
            0x0003 => Some(Status::TooLarge),
            0x0004 => Some(Status::InvalidArgs),
            0x0005 => Some(Status::NotStored),
            0x0006 => Some(Status::NonNumeric),
            0x0081 => Some(Status::UnknownCommand),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Success => "SUCCESS",
            Status::NotFound => "NOT_FOUND",
            Status::Exists => "EXISTS",
            Status::TooLarge => "TOO_LARGE",
            Status::InvalidArgs => "INVALID_ARGS",
            Status::NotStored => "NOT_STORED",
            Status::NonNumeric => "NON_NUMERIC",
            Status::UnknownCommand => "UNKNOWN_COMMAND",
        };
        f.write_str(text)
    }
}

/// Decoded message header.
///
/// `opcode` stays a raw byte so unknown opcodes survive decoding and can be
/// answered; the magic byte is carried but not validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub key_len: u16,
    pub extra_len: u8,
    pub data_type: u8,
    /// Reserved in requests, status in responses
    pub status: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: Cas,
}

impl Header {
    /// Empty request header for `opcode`
    pub fn request(opcode: OpCode) -> Self {
        Self {
            magic: REQUEST_MAGIC,
            opcode: opcode as u8,
            key_len: 0,
            extra_len: 0,
            data_type: RAW_DATA_TYPE,
            status: 0,
            body_len: 0,
            opaque: 0,
            cas: Cas::default(),
        }
    }

    /// Response header answering `request`: same opcode and opaque, no body.
    pub fn response(request: &Header, status: Status) -> Self {
        Self {
            magic: RESPONSE_MAGIC,
            opcode: request.opcode,
            key_len: 0,
            extra_len: 0,
            data_type: RAW_DATA_TYPE,
            status: status as u16,
            body_len: 0,
            opaque: request.opaque,
            cas: Cas::default(),
        }
    }

    pub fn op(&self) -> Option<OpCode> {
        OpCode::from_u8(self.opcode)
    }

    pub fn status_code(&self) -> Option<Status> {
        Status::from_u16(self.status)
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.magic);
        buf.put_u8(self.opcode);
        buf.put_u16(self.key_len);
        buf.put_u8(self.extra_len);
        buf.put_u8(self.data_type);
        buf.put_u16(self.status);
        buf.put_u32(self.body_len);
        buf.put_u32(self.opaque);
        buf.put_u32(self.cas.0);
        buf.put_u32(self.cas.1);
    }

    /// Write the header into the first [`HEADER_SIZE`] bytes of `dst`.
    pub fn write_to(&self, dst: &mut [u8]) {
        let mut cursor = &mut dst[..HEADER_SIZE];
        self.encode(&mut cursor);
    }

    /// Decode a header from the first [`HEADER_SIZE`] bytes of `src`.
    pub fn decode(src: &[u8]) -> Option<Self> {
        if src.len() < HEADER_SIZE {
            return None;
        }
        let mut buf = &src[..HEADER_SIZE];
        Some(Self {
            magic: buf.get_u8(),
            opcode: buf.get_u8(),
            key_len: buf.get_u16(),
            extra_len: buf.get_u8(),
            data_type: buf.get_u8(),
            status: buf.get_u16(),
            body_len: buf.get_u32(),
            opaque: buf.get_u32(),
            cas: Cas(buf.get_u32(), buf.get_u32()),
        })
    }
}
