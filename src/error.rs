//! Error Types
//!
//! Typed failures for each layer. Storage and protocol errors end up as a
//! response status; transport errors close the connection.

use std::io;
use thiserror::Error;

use crate::protocol::Status;

/// Storage-layer failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing memory for an entry could not be reserved
    #[error("failed to allocate {requested} bytes for entry")]
    Allocation { requested: usize },
}

/// Malformed or unsupported requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    #[error("key length is zero")]
    EmptyKey,

    #[error("request carries no extras")]
    MissingExtras,

    #[error("extras must be {expected} bytes, got {actual}")]
    BadExtrasLength { expected: usize, actual: usize },

    #[error("body length {body_len} shorter than key {key_len} + extras {extra_len}")]
    LengthMismatch {
        body_len: usize,
        key_len: usize,
        extra_len: usize,
    },

    #[error("key of {len} bytes exceeds limit of {max}")]
    KeyTooLarge { len: usize, max: usize },

    #[error("value of {len} bytes exceeds limit of {max}")]
    ValueTooLarge { len: usize, max: usize },

    #[error("body of {len} bytes exceeds buffer capacity of {max}")]
    BodyTooLarge { len: usize, max: usize },
}

impl ProtocolError {
    /// Wire status reported back to the client for this failure.
    pub fn status(&self) -> Status {
        match self {
            ProtocolError::UnknownOpcode(_) => Status::UnknownCommand,
            ProtocolError::KeyTooLarge { .. }
            | ProtocolError::ValueTooLarge { .. }
            | ProtocolError::BodyTooLarge { .. } => Status::TooLarge,
            ProtocolError::EmptyKey
            | ProtocolError::MissingExtras
            | ProtocolError::BadExtrasLength { .. }
            | ProtocolError::LengthMismatch { .. } => Status::InvalidArgs,
        }
    }
}

/// Network failures on a single connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Peer closed the connection before sending anything
    #[error("connection closed by peer")]
    Closed,

    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    #[error("short write: sent {sent} of {expected} bytes")]
    ShortWrite { expected: usize, sent: usize },

    #[error("server is shutting down")]
    Shutdown,

    #[error("slot has no endpoint attached")]
    NoEndpoint,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Invalid server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("shard count must be greater than zero")]
    ZeroShards,

    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("max key length {0} does not fit the 16-bit header field")]
    KeyLimitTooLarge(usize),
}

/// Errors raised while binding, starting or stopping the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("server already started")]
    AlreadyStarted,
}
