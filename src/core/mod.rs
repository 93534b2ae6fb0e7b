//! # Core Protocol Components
//!
//! Envelope model and length-prefixed framing.
//!
//! ## Components
//! - **Envelope**: payload type tag, opaque payload bytes, optional correlation id
//! - **Codec**: Tokio codec for 4-byte length-prefixed frames over byte streams
//!
//! ## Wire Format
//! ```text
//! [Length(4, big-endian)] [Envelope(N)]
//! ```
//! A frame with `N == 0` has no body and is a heartbeat.
//!
//! ## Security
//! - Maximum frame size: 16MB by default (bounds allocation per frame)
//! - Length validation before allocation

pub mod codec;
pub mod envelope;
