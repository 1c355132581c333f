//! Request Validation
//!
//! Turns a decoded header and its body into a typed command, applying the
//! per-opcode structural checks.

use super::header::{Header, OpCode, SET_EXTRAS_LEN};
use crate::error::ProtocolError;
use crate::storage::EntryMeta;

/// Key and value size limits enforced on requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_key_len: usize,
    pub max_value_len: usize,
}

/// A validated request borrowing from the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Get { key: &'a [u8] },
    Set {
        key: &'a [u8],
        value: &'a [u8],
        meta: EntryMeta,
    },
    Quit,
}

impl<'a> Command<'a> {
    /// Validate `body` against `header`.
    ///
    /// `body` must hold exactly the `body_len` bytes declared by the header.
    pub fn parse(header: &Header, body: &'a [u8], limits: &Limits) -> Result<Self, ProtocolError> {
        let opcode = header
            .op()
            .ok_or(ProtocolError::UnknownOpcode(header.opcode))?;

        match opcode {
            OpCode::Get => {
                let (_, key, _) = split_body(header, body)?;
                check_key(key, limits)?;
                Ok(Command::Get { key })
            }

            OpCode::Set => {
                let (extras, key, value) = split_body(header, body)?;
                check_key(key, limits)?;
                if extras.is_empty() {
                    return Err(ProtocolError::MissingExtras);
                }
                if extras.len() != SET_EXTRAS_LEN {
                    return Err(ProtocolError::BadExtrasLength {
                        expected: SET_EXTRAS_LEN,
                        actual: extras.len(),
                    });
                }
                if value.len() > limits.max_value_len {
                    return Err(ProtocolError::ValueTooLarge {
                        len: value.len(),
                        max: limits.max_value_len,
                    });
                }

                let flags = u32::from_be_bytes([extras[0], extras[1], extras[2], extras[3]]);
                let expire = u32::from_be_bytes([extras[4], extras[5], extras[6], extras[7]]);
                Ok(Command::Set {
                    key,
                    value,
                    meta: EntryMeta::new(flags, expire, header.cas),
                })
            }

            OpCode::Quit => Ok(Command::Quit),
        }
    }

    pub fn opcode(&self) -> OpCode {
        match self {
            Command::Get { .. } => OpCode::Get,
            Command::Set { .. } => OpCode::Set,
            Command::Quit => OpCode::Quit,
        }
    }
}

/// Split a request body into extras, key and value.
fn split_body<'a>(
    header: &Header,
    body: &'a [u8],
) -> Result<(&'a [u8], &'a [u8], &'a [u8]), ProtocolError> {
    let extra_len = header.extra_len as usize;
    let key_len = header.key_len as usize;

    if body.len() < extra_len + key_len {
        return Err(ProtocolError::LengthMismatch {
            body_len: body.len(),
            key_len,
            extra_len,
        });
    }

    let (extras, rest) = body.split_at(extra_len);
    let (key, value) = rest.split_at(key_len);
    Ok((extras, key, value))
}

fn check_key(key: &[u8], limits: &Limits) -> Result<(), ProtocolError> {
    if key.is_empty() {
        return Err(ProtocolError::EmptyKey);
    }
    if key.len() > limits.max_key_len {
        return Err(ProtocolError::KeyTooLarge {
            len: key.len(),
            max: limits.max_key_len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Frame, Status};
    use crate::storage::Cas;

    const LIMITS: Limits = Limits {
        max_key_len: 16,
        max_value_len: 32,
    };

    fn parse(frame: &Frame) -> Result<Command<'_>, ProtocolError> {
        Command::parse(&frame.header, &frame.body, &LIMITS)
    }

    #[test]
    fn test_parse_get() {
        let frame = Frame::get(b"foo", 0);
        assert_eq!(parse(&frame), Ok(Command::Get { key: b"foo" }));
    }

    #[test]
    fn test_parse_set() {
        let frame = Frame::set(b"foo", b"bar", 0x01020304, 3600, Cas(7, 8), 0);
        match parse(&frame).unwrap() {
            Command::Set { key, value, meta } => {
                assert_eq!(key, b"foo");
                assert_eq!(value, b"bar");
                assert_eq!(meta.flags, 0x01020304);
                assert_eq!(meta.expire, 3600);
                assert_eq!(meta.cas, Cas(7, 8));
            }
            other => panic!("expected SET, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_quit() {
        assert_eq!(parse(&Frame::quit(0)), Ok(Command::Quit));
    }

    #[test]
    fn test_get_empty_key() {
        let err = parse(&Frame::get(b"", 0)).unwrap_err();
        assert_eq!(err, ProtocolError::EmptyKey);
        assert_eq!(err.status(), Status::InvalidArgs);
    }

    #[test]
    fn test_set_without_extras() {
        let mut header = crate::protocol::Header::request(OpCode::Set);
        header.opaque = 1;
        let frame = Frame::new(header, &[], b"foo", b"bar");

        let err = parse(&frame).unwrap_err();
        assert_eq!(err, ProtocolError::MissingExtras);
        assert_eq!(err.status(), Status::InvalidArgs);
    }

    #[test]
    fn test_set_short_extras() {
        let header = crate::protocol::Header::request(OpCode::Set);
        let frame = Frame::new(header, &[0, 0, 0, 1], b"foo", b"bar");
        assert_eq!(
            parse(&frame),
            Err(ProtocolError::BadExtrasLength {
                expected: 8,
                actual: 4
            })
        );
    }

    #[test]
    fn test_length_mismatch() {
        let mut frame = Frame::get(b"foo", 0);
        frame.header.key_len = 10;
        assert!(matches!(
            parse(&frame),
            Err(ProtocolError::LengthMismatch { body_len: 3, .. })
        ));
    }

    #[test]
    fn test_size_limits() {
        let long_key = [b'k'; 17];
        let err = parse(&Frame::get(&long_key, 0)).unwrap_err();
        assert_eq!(err.status(), Status::TooLarge);

        let long_value = [b'v'; 33];
        let err = parse(&Frame::set(b"k", &long_value, 0, 0, Cas::default(), 0)).unwrap_err();
        assert_eq!(err, ProtocolError::ValueTooLarge { len: 33, max: 32 });
    }

    #[test]
    fn test_unknown_opcode() {
        let mut frame = Frame::get(b"foo", 0);
        frame.header.opcode = 0x05;
        let err = parse(&frame).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownOpcode(0x05));
        assert_eq!(err.status(), Status::UnknownCommand);
    }
}
