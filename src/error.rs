//! # Error Types
//!
//! Error handling for the envelope client.
//!
//! This module defines every failure the client can surface, from socket and TLS
//! failures during `connect` to frame-level violations detected by the reader loop.
//!
//! ## Error Categories
//! - **Connection**: DNS, TCP, TLS handshake failures. Fatal and returned to the
//!   `connect` caller.
//! - **Receive**: frame read failures, malformed lengths and remote close. These end
//!   the reader loop and are reported through [`EventHandler::on_error`].
//!   [`ClientError::ProtocolViolation`] (a short read) belongs to this family.
//! - **Send**: write failures. These end the writer loop and are reported through
//!   [`EventHandler::on_error`].
//! - **Decode**: an unsupported or malformed payload for a single message. Scoped to
//!   that message; the reader keeps going.
//!
//! ## Example Usage
//! ```rust
//! use envelope_rpc::error::{ClientError, Result};
//!
//! fn check(len: usize, max: usize) -> Result<()> {
//!     if len > max {
//!         return Err(ClientError::OversizedFrame(len));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check(10, 4).unwrap_err().is_receive_error());
//! ```
//!
//! [`EventHandler::on_error`]: crate::protocol::dispatcher::EventHandler::on_error

use std::io;
use thiserror::Error;

/// Boxed cause carried by [`ClientError::Connection`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Lifecycle errors
    pub const ERR_NOT_CONNECTED: &str = "Client is not connected";
    pub const ERR_ALREADY_CONNECTED: &str = "Client has already been connected";
    pub const ERR_CONNECT_IN_PROGRESS: &str = "Connect already in progress";
    pub const ERR_NO_RUNTIME: &str = "Must be called from within a Tokio runtime";

    /// Correlation errors
    pub const ERR_DUPLICATE_CORRELATION_ID: &str = "Correlation id already pending";

    /// Connection errors
    pub const ERR_CONNECT_TIMEOUT: &str = "Connect timed out";
}

/// ClientError is the primary error type for all client operations
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Connection failed: {0}")]
    Connection(#[source] BoxError),

    #[error("Receive error: {0}")]
    Receive(#[source] io::Error),

    #[error("Protocol violation: remote closed the connection after {received} of {expected} bytes")]
    ProtocolViolation { expected: usize, received: usize },

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Send error: {0}")]
    Send(#[source] io::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Payload type {0} is not supported")]
    UnknownPayloadType(u32),

    #[error("Unexpected response for payload type {0}")]
    UnexpectedResponse(u32),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Client already closed")]
    AlreadyClosed,

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Synchronization primitive poisoned")]
    LockPoisoned,
}

impl ClientError {
    /// Wrap any failure that happened while establishing the connection.
    pub fn connection<E>(cause: E) -> Self
    where
        E: Into<BoxError>,
    {
        ClientError::Connection(cause.into())
    }

    /// True for failures that terminate the reader loop.
    pub fn is_receive_error(&self) -> bool {
        matches!(
            self,
            ClientError::Receive(_)
                | ClientError::ProtocolViolation { .. }
                | ClientError::OversizedFrame(_)
        )
    }

    /// True for failures scoped to a single inbound message.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            ClientError::Decode(_) | ClientError::UnknownPayloadType(_)
        )
    }
}

/// Type alias for Results using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violation_is_receive_error() {
        let err = ClientError::ProtocolViolation {
            expected: 4,
            received: 2,
        };
        assert!(err.is_receive_error());
        assert!(!err.is_decode_error());
        assert_eq!(
            err.to_string(),
            "Protocol violation: remote closed the connection after 2 of 4 bytes"
        );
    }

    #[test]
    fn test_decode_family() {
        assert!(ClientError::UnknownPayloadType(7).is_decode_error());
        assert!(ClientError::Decode("bad".into()).is_decode_error());
        assert!(!ClientError::ConnectionClosed.is_decode_error());
    }

    #[test]
    fn test_connection_wraps_cause() {
        let cause = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = ClientError::connection(cause);
        assert!(matches!(err, ClientError::Connection(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
