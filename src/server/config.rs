//! Server Configuration

use std::time::Duration;

use crate::error::ConfigError;
use crate::protocol::{Limits, HEADER_SIZE, MAX_EXTRAS_LEN, MIN_RESPONSE_SIZE};
use crate::storage::DuplicatePolicy;

/// Default bounded receive timeout
pub const RECV_TIMEOUT: Duration = Duration::from_millis(100);

pub const DEFAULT_KEY_LEN: usize = 128;
pub const DEFAULT_VALUE_LEN: usize = 128;

/// Socket flavour the server listens on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address
    pub bind: String,

    /// Port number (0 = pick an ephemeral port)
    pub port: u16,

    pub transport: Transport,

    /// Number of worker threads (0 = auto-detect)
    pub workers: usize,

    /// Number of store shards
    pub shards: usize,

    pub max_key_len: usize,

    pub max_value_len: usize,

    /// Connection buffer count (0 = one per worker)
    pub max_connections: usize,

    /// Read timeout applied to sockets so shutdown is noticed promptly
    pub recv_timeout: Duration,

    /// Whether to pin workers to CPU cores
    pub pin_to_cores: bool,

    pub duplicate_policy: DuplicatePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 5000,
            transport: Transport::Tcp,
            workers: 0,
            shards: 256,
            max_key_len: DEFAULT_KEY_LEN,
            max_value_len: DEFAULT_VALUE_LEN,
            max_connections: 0,
            recv_timeout: RECV_TIMEOUT,
            pin_to_cores: false,
            duplicate_policy: DuplicatePolicy::Replace,
        }
    }
}

impl Config {
    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Set key/value size limits; zero leaves the current value
    pub fn with_max_key_val(mut self, key_len: usize, value_len: usize) -> Self {
        if key_len > 0 {
            self.max_key_len = key_len;
        }
        if value_len > 0 {
            self.max_value_len = value_len;
        }
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn with_pin_to_cores(mut self, pin: bool) -> Self {
        self.pin_to_cores = pin;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shards == 0 {
            return Err(ConfigError::ZeroShards);
        }
        if self.max_key_len == 0 {
            return Err(ConfigError::ZeroLimit("max key length"));
        }
        if self.max_value_len == 0 {
            return Err(ConfigError::ZeroLimit("max value length"));
        }
        if self.max_key_len > u16::MAX as usize {
            return Err(ConfigError::KeyLimitTooLarge(self.max_key_len));
        }
        if self.recv_timeout.is_zero() {
            return Err(ConfigError::ZeroLimit("receive timeout"));
        }
        Ok(())
    }

    /// Worker count with auto-detection resolved
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }

    /// Pool capacity with the per-worker default resolved
    pub fn connection_count(&self) -> usize {
        if self.max_connections == 0 {
            self.worker_count()
        } else {
            self.max_connections
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_key_len: self.max_key_len,
            max_value_len: self.max_value_len,
        }
    }

    /// Largest request a slot must hold: header, extras, key and value
    pub fn request_size(&self) -> usize {
        HEADER_SIZE + MAX_EXTRAS_LEN + self.max_key_len + self.max_value_len
    }

    /// Largest response a slot must hold: header, flags and value
    pub fn response_size(&self) -> usize {
        MIN_RESPONSE_SIZE + self.max_value_len
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
