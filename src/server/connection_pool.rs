//! Connection Pool
//!
//! Fixed set of connection slots handed between the acceptor and the
//! workers. Parked slots live in one of two queues: `free` (no connection,
//! waiting for the acceptor) or `used` (connection attached, waiting for a
//! worker). A slot taken out of a queue is owned by exactly one thread until
//! it is released, and `in_flight` counts those outstanding slots so that
//! teardown can wait for them deterministically.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::endpoint::Endpoint;

/// Lifecycle state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Parked without a connection
    Free,
    /// Held by the acceptor while it waits for a connection
    Locked,
    /// Parked with a connection that needs serving
    Used,
    /// Held by a worker serving the connection
    Process,
}

/// Where a released slot is parked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parked {
    Free,
    Used,
}

impl From<Parked> for SlotState {
    fn from(parked: Parked) -> Self {
        match parked {
            Parked::Free => SlotState::Free,
            Parked::Used => SlotState::Used,
        }
    }
}

/// One connection buffer: request and response regions plus the endpoint
#[derive(Debug)]
pub struct Slot {
    id: usize,
    pub(super) request: Box<[u8]>,
    pub(super) response: Box<[u8]>,
    pub(super) endpoint: Option<Endpoint>,
}

impl Slot {
    fn new(id: usize, request_size: usize, response_size: usize) -> Self {
        Self {
            id,
            request: vec![0u8; request_size].into_boxed_slice(),
            response: vec![0u8; response_size].into_boxed_slice(),
            endpoint: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn attach(&mut self, endpoint: Endpoint) {
        self.endpoint = Some(endpoint);
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn request_capacity(&self) -> usize {
        self.request.len()
    }

    pub fn response_capacity(&self) -> usize {
        self.response.len()
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub free: usize,
    pub used: usize,
    pub in_flight: usize,
}

struct PoolState {
    free: VecDeque<Slot>,
    used: VecDeque<Slot>,
    states: Vec<SlotState>,
    in_flight: usize,
}

impl PoolState {
    fn check_out(&mut self, slot: Slot, state: SlotState) -> Slot {
        self.states[slot.id] = state;
        self.in_flight += 1;
        slot
    }
}

/// Bounded pool of connection slots
pub struct ConnectionPool {
    state: Mutex<PoolState>,
    /// Signalled when a slot is parked as free
    freed: Condvar,
    /// Signalled when a slot is parked as used
    available: Condvar,
    /// Signalled when the last outstanding slot comes back
    drained: Condvar,
    shutdown: AtomicBool,
    capacity: usize,
}

impl ConnectionPool {
    /// Create `capacity` free slots (at least one) with the given buffer sizes
    pub fn new(capacity: usize, request_size: usize, response_size: usize) -> Self {
        let capacity = capacity.max(1);
        let free = (0..capacity)
            .map(|id| Slot::new(id, request_size, response_size))
            .collect();

        debug!(capacity, request_size, response_size, "Connection pool created");

        Self {
            state: Mutex::new(PoolState {
                free,
                used: VecDeque::with_capacity(capacity),
                states: vec![SlotState::Free; capacity],
                in_flight: 0,
            }),
            freed: Condvar::new(),
            available: Condvar::new(),
            drained: Condvar::new(),
            shutdown: AtomicBool::new(false),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block until a free slot exists and take it as `Locked`.
    ///
    /// Returns `None` once the pool is shutting down.
    pub fn acquire_free(&self) -> Option<Slot> {
        let mut state = self.state.lock();
        loop {
            if self.is_shutdown() {
                return None;
            }
            if let Some(slot) = state.free.pop_front() {
                return Some(state.check_out(slot, SlotState::Locked));
            }
            self.freed.wait(&mut state);
        }
    }

    /// Block until a slot with a connection exists and take it as `Process`.
    ///
    /// Returns `None` once the pool is shutting down.
    pub fn acquire_used(&self) -> Option<Slot> {
        let mut state = self.state.lock();
        loop {
            if self.is_shutdown() {
                return None;
            }
            if let Some(slot) = state.used.pop_front() {
                return Some(state.check_out(slot, SlotState::Process));
            }
            self.available.wait(&mut state);
        }
    }

    /// Non-blocking variant of [`acquire_used`](Self::acquire_used)
    pub fn try_acquire_used(&self) -> Option<Slot> {
        let mut state = self.state.lock();
        if self.is_shutdown() {
            return None;
        }
        let slot = state.used.pop_front()?;
        Some(state.check_out(slot, SlotState::Process))
    }

    /// Park a slot and wake one waiter of the matching kind.
    ///
    /// Parking as free drops the slot's endpoint, closing the connection.
    pub fn release(&self, mut slot: Slot, to: Parked) {
        let mut state = self.state.lock();
        state.states[slot.id] = to.into();
        state.in_flight = state.in_flight.saturating_sub(1);

        match to {
            Parked::Free => {
                slot.endpoint = None;
                state.free.push_back(slot);
                self.freed.notify_one();
            }
            Parked::Used => {
                state.used.push_back(slot);
                self.available.notify_one();
            }
        }

        if state.in_flight == 0 {
            self.drained.notify_all();
        }
    }

    /// Stop handing out slots and wake every blocked acquirer.
    pub fn shutdown(&self) {
        let _state = self.state.lock();
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Connection pool shutting down");
        self.freed.notify_all();
        self.available.notify_all();
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Wait until every slot taken out of the pool has been released.
    pub fn drain(&self) {
        let mut state = self.state.lock();
        while state.in_flight > 0 {
            self.drained.wait(&mut state);
        }
    }

    /// Like [`drain`](Self::drain) but gives up after `timeout`.
    ///
    /// Returns true if the pool drained.
    pub fn drain_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        while state.in_flight > 0 {
            if self.drained.wait_for(&mut state, timeout).timed_out() {
                return state.in_flight == 0;
            }
        }
        true
    }

    /// Close every parked connection and return its slot to the free queue.
    ///
    /// Returns the number of connections closed.
    pub fn close_all(&self) -> usize {
        let mut state = self.state.lock();
        let mut closed = 0;
        while let Some(mut slot) = state.used.pop_front() {
            if let Some(endpoint) = slot.endpoint.take() {
                debug!(slot = slot.id, peer = %endpoint.peer(), "Closing parked connection");
                closed += 1;
            }
            state.states[slot.id] = SlotState::Free;
            state.free.push_back(slot);
        }
        closed
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            free: state.free.len(),
            used: state.used.len(),
            in_flight: state.in_flight,
        }
    }

    pub fn state_of(&self, slot: usize) -> Option<SlotState> {
        self.state.lock().states.get(slot).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::net::{SocketAddr, UdpSocket};
    use std::sync::Arc;
    use std::thread;

    const BLOCKED: Duration = Duration::from_millis(200);
    const UNBLOCKED: Duration = Duration::from_secs(5);

    fn udp_endpoint() -> Endpoint {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        Endpoint::udp(socket, peer, 0)
    }

    #[test]
    fn test_state_transitions() {
        let pool = ConnectionPool::new(2, 64, 32);
        assert_eq!(pool.stats().free, 2);

        let mut slot = pool.acquire_free().unwrap();
        let id = slot.id();
        assert_eq!(slot.request_capacity(), 64);
        assert_eq!(slot.response_capacity(), 32);
        assert_eq!(pool.state_of(id), Some(SlotState::Locked));

        slot.attach(udp_endpoint());
        pool.release(slot, Parked::Used);
        assert_eq!(pool.state_of(id), Some(SlotState::Used));

        let slot = pool.acquire_used().unwrap();
        assert_eq!(slot.id(), id);
        assert!(slot.endpoint().is_some());
        assert_eq!(pool.state_of(id), Some(SlotState::Process));
        assert_eq!(pool.stats().in_flight, 1);

        pool.release(slot, Parked::Free);
        assert_eq!(pool.state_of(id), Some(SlotState::Free));
        assert_eq!(
            pool.stats(),
            PoolStats {
                free: 2,
                used: 0,
                in_flight: 0
            }
        );

        // endpoint dropped on release to free
        let first = pool.acquire_free().unwrap();
        let second = pool.acquire_free().unwrap();
        assert!(first.endpoint().is_none());
        assert!(second.endpoint().is_none());
        assert_eq!(pool.stats().free, 0);
    }

    #[test]
    fn test_saturation_blocks_until_release() {
        let pool = Arc::new(ConnectionPool::new(1, 32, 32));
        let held = pool.acquire_free().unwrap();

        let (tx, rx) = channel::unbounded();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || {
                let slot = pool.acquire_free();
                tx.send(slot.is_some()).unwrap();
                if let Some(slot) = slot {
                    pool.release(slot, Parked::Free);
                }
            })
        };

        assert!(rx.recv_timeout(BLOCKED).is_err());
        pool.release(held, Parked::Free);
        assert_eq!(rx.recv_timeout(UNBLOCKED), Ok(true));
        waiter.join().unwrap();
    }

    #[test]
    fn test_free_signal_does_not_wake_used_waiter() {
        let pool = Arc::new(ConnectionPool::new(1, 32, 32));
        let held = pool.acquire_free().unwrap();

        let (tx, rx) = channel::unbounded();
        let worker = {
            let pool = pool.clone();
            thread::spawn(move || {
                let slot = pool.acquire_used();
                tx.send(slot.as_ref().map(Slot::id)).unwrap();
                if let Some(slot) = slot {
                    pool.release(slot, Parked::Free);
                }
            })
        };

        pool.release(held, Parked::Free);
        assert!(rx.recv_timeout(BLOCKED).is_err());

        let mut slot = pool.acquire_free().unwrap();
        slot.attach(udp_endpoint());
        pool.release(slot, Parked::Used);
        assert_eq!(rx.recv_timeout(UNBLOCKED), Ok(Some(0)));
        worker.join().unwrap();
    }

    #[test]
    fn test_shutdown_wakes_all_waiters() {
        let pool = Arc::new(ConnectionPool::new(1, 32, 32));
        let held = pool.acquire_free().unwrap();

        let (tx, rx) = channel::unbounded();
        let mut handles = Vec::new();
        for i in 0..4 {
            let pool = pool.clone();
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                let got = if i % 2 == 0 {
                    pool.acquire_free().is_some()
                } else {
                    pool.acquire_used().is_some()
                };
                tx.send(got).unwrap();
            }));
        }

        assert!(rx.recv_timeout(BLOCKED).is_err());
        pool.shutdown();
        for _ in 0..4 {
            assert_eq!(rx.recv_timeout(UNBLOCKED), Ok(false));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        pool.release(held, Parked::Free);
        assert!(pool.acquire_free().is_none());
    }

    #[test]
    fn test_drain_waits_for_outstanding_slot() {
        let pool = Arc::new(ConnectionPool::new(2, 32, 32));
        let held = pool.acquire_free().unwrap();
        pool.shutdown();

        assert!(!pool.drain_timeout(Duration::from_millis(50)));

        let (tx, rx) = channel::unbounded();
        let drainer = {
            let pool = pool.clone();
            thread::spawn(move || {
                pool.drain();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(BLOCKED).is_err());
        pool.release(held, Parked::Free);
        assert!(rx.recv_timeout(UNBLOCKED).is_ok());
        drainer.join().unwrap();
        assert_eq!(pool.stats().in_flight, 0);
    }

    #[test]
    fn test_close_all() {
        let pool = ConnectionPool::new(3, 32, 32);
        for _ in 0..2 {
            let mut slot = pool.acquire_free().unwrap();
            slot.attach(udp_endpoint());
            pool.release(slot, Parked::Used);
        }

        assert_eq!(pool.close_all(), 2);
        assert_eq!(pool.stats().free, 3);
        assert_eq!(pool.stats().used, 0);
        assert!(pool.try_acquire_used().is_none());
    }
}
