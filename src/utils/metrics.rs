//! Wire Metrics
//!
//! Atomic counters for frames, packets and session outcomes, shared through `Arc`
//! between writers, readers and receive loops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
pub struct WireMetrics {
    /// Frames written to a transport
    pub frames_sent: AtomicU64,
    /// Frames read from a transport
    pub frames_received: AtomicU64,
    /// Bytes written, length prefixes included
    pub bytes_sent: AtomicU64,
    /// Bytes read, length prefixes included
    pub bytes_received: AtomicU64,
    pub packets_sent: AtomicU64,
    pub packets_received: AtomicU64,
    /// Sessions that ended on a decode or handler error
    pub decode_failures: AtomicU64,
    /// Sessions that ended because they were closed
    pub expected_closes: AtomicU64,
    start_time: Instant,
}

impl WireMetrics {
    pub fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            expected_closes: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one frame written
    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record one frame read
    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn expected_close(&self) {
        self.expected_closes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            expected_closes: self.expected_closes.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            frames_sent = snapshot.frames_sent,
            frames_received = snapshot.frames_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            decode_failures = snapshot.decode_failures,
            expected_closes = snapshot.expected_closes,
            uptime_seconds = snapshot.uptime_seconds,
            "Wire metrics snapshot"
        );
    }
}

impl Default for WireMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub decode_failures: u64,
    pub expected_closes: u64,
    pub uptime_seconds: u64,
}

/// Logs the elapsed time of an operation when dropped
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            operation = self.operation,
            duration_ms = self.start.elapsed().as_millis(),
            "Operation completed"
        );
    }
}
