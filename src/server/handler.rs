//! Connection Handler
//!
//! Runs the request/response cycle for one pooled connection:
//! header, body, validation, dispatch against the store, response.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{ProtocolError, TransportError};
use crate::metrics::Metrics;
use crate::protocol::{Command, Header, Limits, OpCode, ResponseWriter, Status, HEADER_SIZE};
use crate::storage::{Cas, SetOutcome, ShardedStore};

use super::connection_pool::{Parked, Slot};
use super::endpoint::Received;

/// What to do with a connection after one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Wait for the next request on this connection
    KeepOpen,
    /// Connection went idle; give the worker back
    Yield,
    Close,
}

/// Connection handler shared by all workers
#[derive(Clone)]
pub struct Handler {
    store: ShardedStore,
    metrics: Arc<Metrics>,
    limits: Limits,
}

impl Handler {
    /// Create a new handler
    pub fn new(store: ShardedStore, metrics: Arc<Metrics>, limits: Limits) -> Self {
        Self {
            store,
            metrics,
            limits,
        }
    }

    /// Serve `slot` until its connection closes or goes idle.
    ///
    /// Returns where the slot should be parked.
    pub fn serve(&self, slot: &mut Slot, stopping: &impl Fn() -> bool) -> Parked {
        loop {
            if stopping() {
                return Parked::Free;
            }

            match self.exchange(slot, stopping) {
                Ok(Disposition::KeepOpen) => continue,
                Ok(Disposition::Yield) => {
                    trace!(slot = slot.id(), "Connection idle, yielding");
                    return Parked::Used;
                }
                Ok(Disposition::Close) => {
                    debug!(slot = slot.id(), "Connection closed");
                    return Parked::Free;
                }
                Err(TransportError::Closed) => {
                    debug!(slot = slot.id(), "Connection closed by peer");
                    return Parked::Free;
                }
                Err(TransportError::Shutdown) => {
                    debug!(slot = slot.id(), "Connection dropped for shutdown");
                    return Parked::Free;
                }
                Err(e) => {
                    self.metrics.record_error();
                    warn!(slot = slot.id(), error = %e, "Transport error");
                    return Parked::Free;
                }
            }
        }
    }

    /// Run one request/response exchange.
    pub fn exchange(
        &self,
        slot: &mut Slot,
        stopping: &impl Fn() -> bool,
    ) -> Result<Disposition, TransportError> {
        let id = slot.id();
        let Slot {
            request,
            response,
            endpoint,
            ..
        } = slot;
        let endpoint = endpoint.as_mut().ok_or(TransportError::NoEndpoint)?;
        let single_shot = endpoint.is_datagram();

        trace!(slot = id, "Awaiting header");
        if endpoint.fill(request, 0..HEADER_SIZE, stopping, true)? == Received::Idle {
            return Ok(Disposition::Yield);
        }
        let header = Header::decode(&request[..]).ok_or(TransportError::ShortRead {
            expected: HEADER_SIZE,
            received: request.len(),
        })?;

        let body_len = header.body_len as usize;
        let body_end = HEADER_SIZE + body_len;
        if body_end > request.len() {
            // the unread body cannot be skipped reliably, so answer and close
            let err = ProtocolError::BodyTooLarge {
                len: body_len,
                max: request.len() - HEADER_SIZE,
            };
            debug!(slot = id, error = %err, "Rejecting request");
            self.metrics.record_error();
            let len = ResponseWriter::new(response).status(&header, err.status(), Cas::default());
            endpoint.send(&response[..len], stopping)?;
            return Ok(Disposition::Close);
        }

        if body_len > 0 {
            trace!(slot = id, body_len, "Awaiting body");
            endpoint.fill(request, HEADER_SIZE..body_end, stopping, false)?;
        }

        trace!(slot = id, opcode = header.opcode, "Validating");
        let start = Instant::now();
        let len = match Command::parse(&header, &request[HEADER_SIZE..body_end], &self.limits) {
            Ok(Command::Quit) => {
                self.metrics.record_operation(OpCode::Quit, start.elapsed());
                debug!(slot = id, peer = %endpoint.peer(), "QUIT");
                return Ok(Disposition::Close);
            }
            Ok(command) => {
                let len = self.dispatch(command, &header, response);
                self.metrics.record_operation(command.opcode(), start.elapsed());
                len
            }
            Err(err) => {
                debug!(slot = id, opcode = header.opcode, error = %err, "Invalid request");
                self.metrics.record_error();
                ResponseWriter::new(response).status(&header, err.status(), Cas::default())
            }
        };

        trace!(slot = id, len, "Responding");
        endpoint.send(&response[..len], stopping)?;

        Ok(if single_shot {
            Disposition::Close
        } else {
            Disposition::KeepOpen
        })
    }

    /// Execute a validated command and write its response into `response`.
    ///
    /// Returns the number of response bytes to send.
    fn dispatch(&self, command: Command<'_>, header: &Header, response: &mut [u8]) -> usize {
        let mut writer = ResponseWriter::new(response);

        match command {
            Command::Get { key } => {
                let capacity = writer.value_capacity().min(self.limits.max_value_len);
                match self.store.get_into(key, &mut writer.value_buf()[..capacity]) {
                    Some(lookup) => {
                        if lookup.is_truncated() {
                            debug!(
                                value_len = lookup.value_len,
                                copied = lookup.copied,
                                "GET value truncated"
                            );
                        }
                        debug!(status = %Status::Success, "GET");
                        writer.value(header, lookup.meta.flags, lookup.meta.cas, lookup.copied)
                    }
                    None => {
                        debug!(status = %Status::NotFound, "GET");
                        writer.status(header, Status::NotFound, Cas::default())
                    }
                }
            }

            Command::Set { key, value, meta } => {
                let status = match self.store.set(key, value, meta) {
                    Ok(SetOutcome::Stored) | Ok(SetOutcome::Replaced) => Status::Success,
                    Ok(SetOutcome::Duplicate) => Status::Exists,
                    Err(e) => {
                        warn!(error = %e, "SET failed");
                        Status::NotStored
                    }
                };
                debug!(status = %status, "SET");

                let cas = if status == Status::Success {
                    meta.cas
                } else {
                    Cas::default()
                };
                writer.status(header, status, cas)
            }

            // handled before dispatch
            Command::Quit => 0,
        }
    }
}
