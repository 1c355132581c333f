//! Worker Pool
//!
//! Fixed set of OS threads serving connections taken from the
//! [`ConnectionPool`], with optional CPU core affinity.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use super::connection_pool::ConnectionPool;
use super::handler::Handler;

/// Worker pool configuration
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    pub num_workers: usize,
    /// Whether to pin workers to CPU cores
    pub pin_to_cores: bool,
}

/// Running worker threads
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn the worker threads.
    ///
    /// If a spawn fails the pool is shut down, the workers already started
    /// are joined and the error is returned.
    pub fn spawn(
        config: WorkerPoolConfig,
        pool: Arc<ConnectionPool>,
        handler: Handler,
    ) -> io::Result<Self> {
        info!("Starting {} worker threads", config.num_workers);

        let core_ids = if config.pin_to_cores {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut workers = Self {
            handles: Vec::with_capacity(config.num_workers),
        };

        for i in 0..config.num_workers {
            let pool_ref = pool.clone();
            let handler = handler.clone();
            let core_id = core_ids.get(i).copied();

            let spawned = thread::Builder::new()
                .name(format!("worker-{}", i))
                .spawn(move || {
                    if let Some(core) = core_id {
                        if core_affinity::set_for_current(core) {
                            debug!(worker = i, core = core.id, "Worker pinned");
                        } else {
                            warn!(worker = i, core = core.id, "Failed to pin worker");
                        }
                    }

                    info!(worker = i, "Worker started");
                    Self::worker_loop(i, &pool_ref, &handler);
                    info!(worker = i, "Worker stopped");
                });

            match spawned {
                Ok(handle) => workers.handles.push(handle),
                Err(e) => {
                    pool.shutdown();
                    workers.join();
                    return Err(e);
                }
            }
        }

        Ok(workers)
    }

    /// Worker main loop
    fn worker_loop(worker: usize, pool: &ConnectionPool, handler: &Handler) {
        let stopping = || pool.is_shutdown();

        while let Some(mut slot) = pool.acquire_used() {
            debug!(worker, slot = slot.id(), "Serving connection");
            let parked = handler.serve(&mut slot, &stopping);
            pool.release(slot, parked);
        }
    }

    /// Wait for all workers to finish
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }

    /// Get number of workers
    pub fn num_workers(&self) -> usize {
        self.handles.len()
    }
}
