//! Server Module
//!
//! Blocking TCP/UDP server: one acceptor (or datagram receiver) thread
//! fills connection slots, a fixed worker pool serves them.

mod config;
mod connection_pool;
mod endpoint;
mod handler;
mod worker_pool;

pub use config::{Config, Transport, DEFAULT_KEY_LEN, DEFAULT_VALUE_LEN, RECV_TIMEOUT};
pub use connection_pool::{ConnectionPool, Parked, PoolStats, Slot, SlotState};
pub use endpoint::{Endpoint, Received};
pub use handler::{Disposition, Handler};
pub use worker_pool::{WorkerPool, WorkerPoolConfig};

use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::ServerError;
use crate::metrics::Metrics;
use crate::storage::ShardedStore;

/// Interval at which an idle acceptor re-checks for shutdown
const ACCEPT_POLL: Duration = Duration::from_millis(10);

enum Listener {
    Tcp(TcpListener),
    Udp(Arc<UdpSocket>),
}

/// shardcache server
pub struct Server {
    config: Config,
    store: ShardedStore,
    metrics: Arc<Metrics>,
    pool: Arc<ConnectionPool>,
    local_addr: SocketAddr,
    listener: Option<Listener>,
    acceptor: Option<JoinHandle<()>>,
    workers: Option<WorkerPool>,
    stopped: bool,
}

impl Server {
    /// Validate `config`, bind the listening socket and allocate the store
    /// and connection pool. No threads run until [`start`](Self::start).
    pub fn bind(config: Config) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.bind_address();
        let listener = match config.transport {
            Transport::Tcp => {
                let listener = TcpListener::bind(&addr)?;
                listener.set_nonblocking(true)?;
                Listener::Tcp(listener)
            }
            Transport::Udp => {
                let socket = UdpSocket::bind(&addr)?;
                socket.set_read_timeout(Some(config.recv_timeout))?;
                Listener::Udp(Arc::new(socket))
            }
        };
        let local_addr = match &listener {
            Listener::Tcp(listener) => listener.local_addr()?,
            Listener::Udp(socket) => socket.local_addr()?,
        };

        let store = ShardedStore::with_policy(config.shards, config.duplicate_policy);
        let pool = Arc::new(ConnectionPool::new(
            config.connection_count(),
            config.request_size(),
            config.response_size(),
        ));

        info!(
            addr = %local_addr,
            transport = ?config.transport,
            shards = config.shards,
            connections = pool.capacity(),
            "shardcache server bound"
        );

        Ok(Self {
            config,
            store,
            metrics: Arc::new(Metrics::new()),
            pool,
            local_addr,
            listener: Some(listener),
            acceptor: None,
            workers: None,
            stopped: false,
        })
    }

    /// Spawn the worker pool and the acceptor thread.
    pub fn start(&mut self) -> Result<(), ServerError> {
        let listener = self.listener.take().ok_or(ServerError::AlreadyStarted)?;

        let handler = Handler::new(
            self.store.clone(),
            self.metrics.clone(),
            self.config.limits(),
        );
        let workers = WorkerPool::spawn(
            WorkerPoolConfig {
                num_workers: self.config.worker_count(),
                pin_to_cores: self.config.pin_to_cores,
            },
            self.pool.clone(),
            handler,
        )?;
        self.workers = Some(workers);

        let pool = self.pool.clone();
        let recv_timeout = self.config.recv_timeout;
        let spawned = thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || match listener {
                Listener::Tcp(listener) => accept_loop(&listener, &pool, recv_timeout),
                Listener::Udp(socket) => receive_loop(&socket, &pool),
            });

        match spawned {
            Ok(handle) => self.acceptor = Some(handle),
            Err(e) => {
                self.shutdown();
                return Err(e.into());
            }
        }

        info!(addr = %self.local_addr, "shardcache server started");
        Ok(())
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a reference to the store
    pub fn store(&self) -> &ShardedStore {
        &self.store
    }

    /// Get metrics reference
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop accepting, join every thread and close parked connections.
    ///
    /// Idempotent; also run on drop.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("Shutting down");

        self.pool.shutdown();
        self.listener = None;

        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                warn!("Acceptor thread panicked");
            }
        }
        if let Some(workers) = self.workers.take() {
            workers.join();
        }

        self.pool.drain();
        let closed = self.pool.close_all();
        debug!(closed, "Parked connections closed");

        if tracing::enabled!(tracing::Level::DEBUG) {
            self.store.dump();
        }
        info!("{}", self.metrics.summary());
        info!(entries = self.store.len(), "Shutdown complete");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Hand accepted TCP connections to the pool, one free slot at a time.
fn accept_loop(listener: &TcpListener, pool: &ConnectionPool, recv_timeout: Duration) {
    debug!("Acceptor started");

    while let Some(mut slot) = pool.acquire_free() {
        match accept(listener, pool, recv_timeout) {
            Ok(Some((stream, peer))) => {
                debug!(slot = slot.id(), %peer, "Connection accepted");
                slot.attach(Endpoint::tcp(stream, peer));
                pool.release(slot, Parked::Used);
            }
            Ok(None) => {
                pool.release(slot, Parked::Free);
                break;
            }
            Err(e) => {
                error!(error = %e, "Accept error");
                pool.release(slot, Parked::Free);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }

    debug!("Acceptor stopped");
}

/// Wait for one connection. Returns `None` once the pool shuts down.
fn accept(
    listener: &TcpListener,
    pool: &ConnectionPool,
    recv_timeout: Duration,
) -> io::Result<Option<(std::net::TcpStream, SocketAddr)>> {
    loop {
        if pool.is_shutdown() {
            return Ok(None);
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(recv_timeout))?;
                stream.set_write_timeout(Some(recv_timeout))?;
                stream.set_nodelay(true)?;
                return Ok(Some((stream, peer)));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// Receive datagrams straight into free slots.
fn receive_loop(socket: &Arc<UdpSocket>, pool: &ConnectionPool) {
    debug!("Receiver started");

    'slots: while let Some(mut slot) = pool.acquire_free() {
        loop {
            if pool.is_shutdown() {
                pool.release(slot, Parked::Free);
                break 'slots;
            }

            match socket.recv_from(&mut slot.request) {
                Ok((len, peer)) => {
                    debug!(slot = slot.id(), %peer, len, "Datagram received");
                    slot.attach(Endpoint::udp(socket.clone(), peer, len));
                    pool.release(slot, Parked::Used);
                    break;
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    warn!(error = %e, "Receive error");
                }
            }
        }
    }

    debug!("Receiver stopped");
}
