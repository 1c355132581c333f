//! Response Serialization
//!
//! Writes responses straight into a connection slot's response region.

use super::header::{Header, Status, GET_EXTRAS_LEN, HEADER_SIZE};
use crate::storage::Cas;

/// Smallest response region able to hold any response
pub const MIN_RESPONSE_SIZE: usize = HEADER_SIZE + GET_EXTRAS_LEN;

/// Serializes one response into a fixed buffer.
///
/// The buffer must be at least [`MIN_RESPONSE_SIZE`] bytes long.
pub struct ResponseWriter<'a> {
    buf: &'a mut [u8],
}

impl<'a> ResponseWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        debug_assert!(buf.len() >= MIN_RESPONSE_SIZE);
        Self { buf }
    }

    /// Room left for value bytes after the header and GET extras
    pub fn value_capacity(&self) -> usize {
        self.buf.len().saturating_sub(MIN_RESPONSE_SIZE)
    }

    /// Region a GET value is copied into
    pub fn value_buf(&mut self) -> &mut [u8] {
        &mut self.buf[MIN_RESPONSE_SIZE..]
    }

    /// Header-only response. Returns the number of bytes to send.
    pub fn status(self, request: &Header, status: Status, cas: Cas) -> usize {
        let mut header = Header::response(request, status);
        header.cas = cas;
        header.write_to(self.buf);
        HEADER_SIZE
    }

    /// GET hit whose `value_len` bytes were already placed in
    /// [`value_buf`](Self::value_buf). Returns the number of bytes to send.
    pub fn value(self, request: &Header, flags: u32, cas: Cas, value_len: usize) -> usize {
        let body_len = GET_EXTRAS_LEN + value_len;

        let mut header = Header::response(request, Status::Success);
        header.extra_len = GET_EXTRAS_LEN as u8;
        header.body_len = body_len as u32;
        header.cas = cas;
        header.write_to(self.buf);
        self.buf[HEADER_SIZE..MIN_RESPONSE_SIZE].copy_from_slice(&flags.to_be_bytes());

        HEADER_SIZE + body_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    #[test]
    fn test_status_response() {
        let mut request = Header::request(OpCode::Set);
        request.opaque = 5;
        let mut buf = [0xFFu8; 64];

        let len = ResponseWriter::new(&mut buf).status(&request, Status::Success, Cas(0, 3));
        assert_eq!(len, HEADER_SIZE);

        let header = Header::decode(&buf).unwrap();
        assert_eq!(header.status_code(), Some(Status::Success));
        assert_eq!(header.body_len, 0);
        assert_eq!(header.opaque, 5);
        assert_eq!(header.cas, Cas(0, 3));
    }

    #[test]
    fn test_value_response() {
        let request = Header::request(OpCode::Get);
        let mut buf = [0u8; 64];

        let mut writer = ResponseWriter::new(&mut buf);
        assert_eq!(writer.value_capacity(), 64 - MIN_RESPONSE_SIZE);
        writer.value_buf()[..3].copy_from_slice(b"bar");
        let len = writer.value(&request, 0xAABBCCDD, Cas(1, 1), 3);

        assert_eq!(len, HEADER_SIZE + 4 + 3);
        let header = Header::decode(&buf).unwrap();
        assert_eq!(header.extra_len, 4);
        assert_eq!(header.key_len, 0);
        assert_eq!(header.body_len, 7);
        assert_eq!(&buf[HEADER_SIZE..len], &[0xAA, 0xBB, 0xCC, 0xDD, b'b', b'a', b'r']);
    }
}
