//! # Utility Modules
//!
//! Supporting utilities for buffering, logging and metrics.
//!
//! ## Components
//! - **Buffer Pool**: reusable read buffers for the frame reader
//! - **Logging**: `tracing-subscriber` setup from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: per-client atomic counters

pub mod buffer_pool;
pub mod logging;
pub mod metrics;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use metrics::{Metrics, MetricsSnapshot};
