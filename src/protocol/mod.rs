//! Binary Protocol
//!
//! memcached-style binary framing: a 24-byte header followed by a body.
//! Only GET, SET and QUIT are understood.

mod codec;
mod command;
mod frame;
mod header;
mod response;

pub use codec::McCodec;
pub use command::{Command, Limits};
pub use frame::Frame;
pub use header::{
    Header, OpCode, Status, GET_EXTRAS_LEN, HEADER_SIZE, MAX_EXTRAS_LEN, RAW_DATA_TYPE,
    REQUEST_MAGIC, RESPONSE_MAGIC, SET_EXTRAS_LEN,
};
pub use response::{ResponseWriter, MIN_RESPONSE_SIZE};
