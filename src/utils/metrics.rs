//! Observability and Metrics
//!
//! Per-client counters for frames, requests and failures.
//!
//! Uses atomic counters so the reader, the writer and caller tasks can record
//! without coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for one client
#[derive(Debug)]
pub struct Metrics {
    /// Frames written to the wire
    pub frames_sent: AtomicU64,
    /// Bytes written, including length prefixes
    pub bytes_sent: AtomicU64,
    /// Non-heartbeat frames read from the wire
    pub frames_received: AtomicU64,
    /// Bytes read, including length prefixes
    pub bytes_received: AtomicU64,
    /// Zero-length keep-alive frames
    pub heartbeats_received: AtomicU64,
    /// Requests registered and enqueued
    pub requests_sent: AtomicU64,
    /// Waiters resolved by a matching response
    pub responses_matched: AtomicU64,
    /// Responses with no registered waiter
    pub responses_orphaned: AtomicU64,
    /// Waiters failed on teardown
    pub requests_abandoned: AtomicU64,
    /// Push messages delivered to the handler
    pub push_messages: AtomicU64,
    /// Messages that failed to decode
    pub decode_errors: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            heartbeats_received: AtomicU64::new(0),
            requests_sent: AtomicU64::new(0),
            responses_matched: AtomicU64::new(0),
            responses_orphaned: AtomicU64::new(0),
            requests_abandoned: AtomicU64::new(0),
            push_messages: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn heartbeat_received(&self) {
        self.heartbeats_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(4, Ordering::Relaxed);
    }

    pub fn request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_matched(&self) {
        self.responses_matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_orphaned(&self) {
        self.responses_orphaned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_abandoned(&self, count: u64) {
        self.requests_abandoned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn push_message(&self) {
        self.push_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            heartbeats_received: self.heartbeats_received.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
            responses_orphaned: self.responses_orphaned.load(Ordering::Relaxed),
            requests_abandoned: self.requests_abandoned.load(Ordering::Relaxed),
            push_messages: self.push_messages.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            frames_sent = snapshot.frames_sent,
            bytes_sent = snapshot.bytes_sent,
            frames_received = snapshot.frames_received,
            bytes_received = snapshot.bytes_received,
            heartbeats_received = snapshot.heartbeats_received,
            requests_sent = snapshot.requests_sent,
            responses_matched = snapshot.responses_matched,
            responses_orphaned = snapshot.responses_orphaned,
            requests_abandoned = snapshot.requests_abandoned,
            push_messages = snapshot.push_messages,
            decode_errors = snapshot.decode_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Client metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_received: u64,
    pub bytes_received: u64,
    pub heartbeats_received: u64,
    pub requests_sent: u64,
    pub responses_matched: u64,
    pub responses_orphaned: u64,
    pub requests_abandoned: u64,
    pub push_messages: u64,
    pub decode_errors: u64,
    pub uptime_seconds: u64,
}
