//! Basic Metrics
//!
//! Per-opcode operation counters, error counts and latency tracking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::protocol::OpCode;

const OPCODES: [OpCode; 3] = [OpCode::Get, OpCode::Set, OpCode::Quit];

fn counter_index(op: OpCode) -> usize {
    match op {
        OpCode::Get => 0,
        OpCode::Set => 1,
        OpCode::Quit => 2,
    }
}

/// Metrics collector
#[derive(Debug)]
pub struct Metrics {
    /// Total operations count
    total_ops: AtomicU64,

    /// Operations per opcode, indexed by `counter_index`
    ops_by_command: [AtomicU64; OPCODES.len()],

    /// Rejected requests and transport failures
    errors: AtomicU64,

    latency_sum_us: AtomicU64,
    latency_count: AtomicU64,
    latency_min_us: AtomicU64,
    latency_max_us: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            total_ops: AtomicU64::new(0),
            ops_by_command: Default::default(),
            errors: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            latency_min_us: AtomicU64::new(u64::MAX),
            latency_max_us: AtomicU64::new(0),
        }
    }

    /// Record a dispatched operation
    pub fn record_operation(&self, op: OpCode, latency: Duration) {
        self.total_ops.fetch_add(1, Ordering::Relaxed);
        self.ops_by_command[counter_index(op)].fetch_add(1, Ordering::Relaxed);

        let latency_us = latency.as_micros() as u64;
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        self.latency_min_us.fetch_min(latency_us, Ordering::Relaxed);
        self.latency_max_us.fetch_max(latency_us, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total operations count
    pub fn total_ops(&self) -> u64 {
        self.total_ops.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Get operations by opcode name, skipping opcodes never seen
    pub fn ops_by_command(&self) -> HashMap<&'static str, u64> {
        OPCODES
            .iter()
            .map(|op| (op.name(), self.ops(*op)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    pub fn ops(&self, op: OpCode) -> u64 {
        self.ops_by_command[counter_index(op)].load(Ordering::Relaxed)
    }

    /// Get average latency in microseconds
    pub fn avg_latency_us(&self) -> f64 {
        let count = self.latency_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let sum = self.latency_sum_us.load(Ordering::Relaxed);
        sum as f64 / count as f64
    }

    /// Get min latency in microseconds
    pub fn min_latency_us(&self) -> u64 {
        let min = self.latency_min_us.load(Ordering::Relaxed);
        if min == u64::MAX {
            0
        } else {
            min
        }
    }

    /// Get max latency in microseconds
    pub fn max_latency_us(&self) -> u64 {
        self.latency_max_us.load(Ordering::Relaxed)
    }

    /// Get a summary of metrics
    pub fn summary(&self) -> String {
        let mut by_command: Vec<_> = self.ops_by_command().into_iter().collect();
        by_command.sort_unstable();
        let by_command = by_command
            .iter()
            .map(|(name, count)| format!("{}={}", name, count))
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            "Operations: {} [{}] | Errors: {} | Latency (µs): avg={:.1}, min={}, max={}",
            self.total_ops(),
            by_command,
            self.errors(),
            self.avg_latency_us(),
            self.min_latency_us(),
            self.max_latency_us()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_metrics() {
        let metrics = Metrics::new();

        metrics.record_operation(OpCode::Get, Duration::from_micros(100));
        metrics.record_operation(OpCode::Get, Duration::from_micros(200));
        metrics.record_operation(OpCode::Set, Duration::from_micros(150));
        metrics.record_error();

        assert_eq!(metrics.total_ops(), 3);
        assert_eq!(metrics.errors(), 1);
        assert_eq!(metrics.min_latency_us(), 100);
        assert_eq!(metrics.max_latency_us(), 200);
        assert!((metrics.avg_latency_us() - 150.0).abs() < 0.1);

        let by_cmd = metrics.ops_by_command();
        assert_eq!(by_cmd.get("GET"), Some(&2));
        assert_eq!(by_cmd.get("SET"), Some(&1));
    }

    #[test]
    fn test_summary() {
        let metrics = Metrics::new();
        assert_eq!(metrics.min_latency_us(), 0);

        metrics.record_operation(OpCode::Set, Duration::from_micros(10));
        metrics.record_operation(OpCode::Get, Duration::from_micros(30));
        let summary = metrics.summary();
        assert!(summary.starts_with("Operations: 2 [GET=1 SET=1]"));
        assert!(summary.contains("Errors: 0"));
    }

    #[test]
    fn test_concurrent_recording() {
        let metrics = Arc::new(Metrics::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    let op = if i % 2 == 0 { OpCode::Get } else { OpCode::Set };
                    for _ in 0..1000 {
                        metrics.record_operation(op, Duration::from_micros(5));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.total_ops(), 8000);
        assert_eq!(metrics.ops(OpCode::Get), 4000);
        assert_eq!(metrics.ops(OpCode::Set), 4000);
        assert_eq!(metrics.ops(OpCode::Quit), 0);
        assert!(!metrics.ops_by_command().contains_key("QUIT"));
    }
}
