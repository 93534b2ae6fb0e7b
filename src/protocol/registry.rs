use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;

use crate::error::{ClientError, Result};

type DecodeFn<M> = dyn Fn(&[u8]) -> Result<M> + Send + Sync + 'static;

/// Table of payload decoders keyed by payload type tag.
///
/// Built once before the client starts and shared read-only with the reader, so
/// lookups take no lock. New payload types are added with [`register`] without
/// touching the dispatcher.
///
/// ```rust
/// use envelope_rpc::protocol::registry::PayloadRegistry;
///
/// #[derive(Debug, PartialEq)]
/// enum Event {
///     Heartbeat,
///     Text(String),
/// }
///
/// let registry = PayloadRegistry::new()
///     .with(51, |_| Ok(Event::Heartbeat))
///     .with(2100, |bytes| Ok(Event::Text(String::from_utf8_lossy(bytes).into_owned())));
///
/// assert_eq!(registry.decode(51, &[]).unwrap(), Event::Heartbeat);
/// assert!(registry.decode(9, &[]).is_err());
/// ```
///
/// [`register`]: PayloadRegistry::register
pub struct PayloadRegistry<M> {
    decoders: HashMap<u32, Box<DecodeFn<M>>>,
}

impl<M> PayloadRegistry<M> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register (or replace) the decoder for `payload_type`.
    pub fn register<F>(&mut self, payload_type: u32, decoder: F) -> &mut Self
    where
        F: Fn(&[u8]) -> Result<M> + Send + Sync + 'static,
    {
        self.decoders.insert(payload_type, Box::new(decoder));
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, payload_type: u32, decoder: F) -> Self
    where
        F: Fn(&[u8]) -> Result<M> + Send + Sync + 'static,
    {
        self.register(payload_type, decoder);
        self
    }

    /// Register a bincode-encoded payload type `T`, lifted into `M` by `wrap`.
    pub fn register_serde<T, W>(&mut self, payload_type: u32, wrap: W) -> &mut Self
    where
        T: DeserializeOwned + 'static,
        W: Fn(T) -> M + Send + Sync + 'static,
        M: 'static,
    {
        self.register(payload_type, move |bytes| {
            bincode::deserialize::<T>(bytes)
                .map(&wrap)
                .map_err(|e| ClientError::Decode(format!("payload type {payload_type}: {e}")))
        })
    }

    /// Decode `payload` with the decoder registered for `payload_type`.
    pub fn decode(&self, payload_type: u32, payload: &[u8]) -> Result<M> {
        self.decoders
            .get(&payload_type)
            .ok_or(ClientError::UnknownPayloadType(payload_type))
            .and_then(|decoder| decoder(payload))
    }

    pub fn contains(&self, payload_type: u32) -> bool {
        self.decoders.contains_key(&payload_type)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

impl<M> Default for PayloadRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for PayloadRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.decoders.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("PayloadRegistry")
            .field("payload_types", &tags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct SymbolList {
        symbols: Vec<String>,
    }

    #[derive(Debug, PartialEq)]
    enum Msg {
        Symbols(SymbolList),
        Raw(Vec<u8>),
    }

    #[test]
    fn test_unknown_payload_type() {
        let registry: PayloadRegistry<Msg> = PayloadRegistry::new();
        assert!(matches!(
            registry.decode(42, b"x"),
            Err(ClientError::UnknownPayloadType(42))
        ));
    }

    #[test]
    fn test_register_replaces_decoder() {
        let mut registry = PayloadRegistry::new();
        registry.register(1, |_| Ok(Msg::Raw(vec![1])));
        registry.register(1, |b| Ok(Msg::Raw(b.to_vec())));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.decode(1, &[9, 9]).unwrap(), Msg::Raw(vec![9, 9]));
    }

    #[test]
    fn test_serde_payload() {
        let mut registry = PayloadRegistry::new();
        registry.register_serde(2115, Msg::Symbols);

        let list = SymbolList {
            symbols: vec!["EURUSD".into(), "XAUUSD".into()],
        };
        let bytes = bincode::serialize(&list).unwrap();
        assert_eq!(registry.decode(2115, &bytes).unwrap(), Msg::Symbols(list));

        let err = registry.decode(2115, &[0xFF]).unwrap_err();
        assert!(err.is_decode_error());
    }
}
