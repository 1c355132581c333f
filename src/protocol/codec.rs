//! Frame Codec for Tokio
//!
//! Implements Encoder and Decoder traits for framed client I/O.

use bytes::BytesMut;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use super::frame::Frame;
use super::header::{Header, HEADER_SIZE};

/// Largest body accepted from the peer
const DEFAULT_MAX_BODY: usize = 1024 * 1024;

/// Tokio codec for binary frames
#[derive(Debug)]
pub struct McCodec {
    state: DecodeState,
    max_body: usize,
}

#[derive(Debug, Default)]
enum DecodeState {
    #[default]
    Header,
    Body(Header),
}

impl Default for McCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl McCodec {
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY)
    }

    pub fn with_max_body(max_body: usize) -> Self {
        Self {
            state: DecodeState::Header,
            max_body,
        }
    }
}

impl Decoder for McCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match &self.state {
                DecodeState::Header => {
                    let Some(header) = Header::decode(src) else {
                        return Ok(None);
                    };
                    let body_len = header.body_len as usize;
                    if body_len > self.max_body {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("body of {} bytes exceeds {}", body_len, self.max_body),
                        ));
                    }

                    let _ = src.split_to(HEADER_SIZE);
                    src.reserve(body_len);
                    self.state = DecodeState::Body(header);
                }

                DecodeState::Body(header) => {
                    let body_len = header.body_len as usize;
                    if src.len() < body_len {
                        return Ok(None);
                    }

                    let frame = Frame {
                        header: *header,
                        body: src.split_to(body_len).freeze(),
                    };
                    self.state = DecodeState::Header;
                    return Ok(Some(frame));
                }
            }
        }
    }
}

impl Encoder<Frame> for McCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.encoded_len());
        item.encode(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{OpCode, Status};
    use crate::storage::Cas;
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    fn response_bytes(status: Status, extras: &[u8], value: &[u8]) -> Vec<u8> {
        let request = Header::request(OpCode::Get);
        let frame = Frame::new(Header::response(&request, status), extras, &[], value);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_partial_decode() {
        let mut codec = McCodec::new();
        let frame = Frame::set(b"key", b"value", 1, 2, Cas::default(), 9);

        let mut full = BytesMut::new();
        codec.encode(frame.clone(), &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..HEADER_SIZE + 2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&full[HEADER_SIZE + 2..]);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(frame));
        assert!(partial.is_empty());
    }

    #[test]
    fn test_oversized_body_rejected() {
        let mut codec = McCodec::with_max_body(4);
        let mut buf = BytesMut::new();
        Frame::get(b"too-long", 0).encode(&mut buf);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_framed_exchange() {
        let request = Frame::get(b"foo", 0);
        let mut wire = BytesMut::new();
        request.encode(&mut wire);

        let mock = tokio_test::io::Builder::new()
            .write(&wire)
            .read(&response_bytes(Status::Success, &[0, 0, 0, 0], b"bar"))
            .build();

        tokio_test::block_on(async {
            let mut framed = Framed::new(mock, McCodec::new());
            framed.send(request).await.unwrap();

            let response = framed.next().await.unwrap().unwrap();
            assert_eq!(response.status(), Some(Status::Success));
            assert_eq!(response.flags(), Some(0));
            assert_eq!(response.value(), b"bar");
        });
    }
}
