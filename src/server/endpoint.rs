//! Connection Endpoints
//!
//! The transport half of a connection slot. TCP endpoints read from the
//! stream on demand; a UDP endpoint wraps one datagram that the receiver
//! already copied into the slot's request buffer.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::ops::Range;
use std::sync::Arc;

use crate::error::TransportError;

/// Result of filling part of the request buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    Complete,
    /// Read timed out before a single byte arrived
    Idle,
}

/// Peer side of a pooled connection
#[derive(Debug)]
pub enum Endpoint {
    Tcp {
        stream: TcpStream,
        peer: SocketAddr,
    },
    Udp {
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        /// Length of the datagram held in the request buffer
        len: usize,
    },
}

impl Endpoint {
    pub fn tcp(stream: TcpStream, peer: SocketAddr) -> Self {
        Endpoint::Tcp { stream, peer }
    }

    pub fn udp(socket: Arc<UdpSocket>, peer: SocketAddr, len: usize) -> Self {
        Endpoint::Udp { socket, peer, len }
    }

    pub fn peer(&self) -> SocketAddr {
        match self {
            Endpoint::Tcp { peer, .. } | Endpoint::Udp { peer, .. } => *peer,
        }
    }

    /// Datagram endpoints serve exactly one request.
    pub fn is_datagram(&self) -> bool {
        matches!(self, Endpoint::Udp { .. })
    }

    /// Make `buf[range]` hold request bytes.
    ///
    /// A TCP read that times out is retried until `stopping` reports true.
    /// With `idle_ok`, a timeout before any byte of `range` arrived returns
    /// [`Received::Idle`] so the caller can park the connection.
    pub fn fill(
        &mut self,
        buf: &mut [u8],
        range: Range<usize>,
        stopping: &impl Fn() -> bool,
        idle_ok: bool,
    ) -> Result<Received, TransportError> {
        let expected = range.len();

        match self {
            Endpoint::Udp { len, .. } => {
                if *len < range.end {
                    return Err(TransportError::ShortRead {
                        expected,
                        received: len.saturating_sub(range.start),
                    });
                }
                Ok(Received::Complete)
            }

            Endpoint::Tcp { stream, .. } => {
                let mut filled = range.start;
                while filled < range.end {
                    match stream.read(&mut buf[filled..range.end]) {
                        Ok(0) if filled == range.start => return Err(TransportError::Closed),
                        Ok(0) => {
                            return Err(TransportError::ShortRead {
                                expected,
                                received: filled - range.start,
                            })
                        }
                        Ok(n) => filled += n,
                        Err(e) if is_timeout(&e) => {
                            if stopping() {
                                return Err(TransportError::Shutdown);
                            }
                            if idle_ok && filled == range.start {
                                return Ok(Received::Idle);
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(Received::Complete)
            }
        }
    }

    /// Send a complete response.
    ///
    /// A TCP write that times out is retried until `stopping` reports true,
    /// so a peer that stops reading cannot hold the worker past shutdown.
    pub fn send(
        &mut self,
        bytes: &[u8],
        stopping: &impl Fn() -> bool,
    ) -> Result<(), TransportError> {
        let expected = bytes.len();

        match self {
            Endpoint::Udp { socket, peer, .. } => {
                let sent = socket.send_to(bytes, *peer)?;
                if sent != expected {
                    return Err(TransportError::ShortWrite { expected, sent });
                }
                Ok(())
            }

            Endpoint::Tcp { stream, .. } => {
                let mut sent = 0;
                while sent < expected {
                    match stream.write(&bytes[sent..]) {
                        Ok(0) => return Err(TransportError::ShortWrite { expected, sent }),
                        Ok(n) => sent += n,
                        Err(e) if is_timeout(&e) => {
                            if stopping() {
                                return Err(TransportError::Shutdown);
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(())
            }
        }
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
