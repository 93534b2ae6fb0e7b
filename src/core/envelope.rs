use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One logical protocol message.
///
/// An envelope without a correlation id is a push message; one carrying an id is
/// either a request or the response to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Numeric tag selecting the payload decoder
    pub payload_type: u32,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
    /// Client-generated token linking a request to its response
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Build an envelope. An empty correlation id is treated as absent.
    pub fn new<P>(payload_type: u32, payload: P, correlation_id: Option<String>) -> Self
    where
        P: Into<Vec<u8>>,
    {
        Self {
            payload_type,
            payload: payload.into(),
            correlation_id: correlation_id.filter(|id| !id.is_empty()),
        }
    }

    /// Build an envelope without a correlation id.
    pub fn push<P: Into<Vec<u8>>>(payload_type: u32, payload: P) -> Self {
        Self::new(payload_type, payload, None)
    }

    /// Build an envelope carrying `correlation_id`.
    pub fn correlated<P: Into<Vec<u8>>>(
        payload_type: u32,
        payload: P,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self::new(payload_type, payload, Some(correlation_id.into()))
    }

    /// True if this is an unsolicited message.
    #[inline]
    pub fn is_push(&self) -> bool {
        self.correlation_id.is_none()
    }

    /// Serialize the envelope body (without length prefix)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Parse an envelope body (without length prefix). The body must be consumed
    /// exactly; trailing bytes are an error.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .deserialize(data)?)
    }
}
