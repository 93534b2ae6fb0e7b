//! # Transport Layer
//!
//! Byte-stream establishment for the client.
//!
//! The client itself only needs `AsyncRead + AsyncWrite`; this module provides the
//! production stream: TCP plus a TLS handshake validated against the host name.

pub mod tls;

pub use tls::{connect, connect_with_timeout, TlsClientConfig, TlsTransport};
