//! # envelope-rpc
//!
//! Asynchronous request/response client over a single TLS connection.
//!
//! Messages travel as envelopes (payload type tag, opaque payload, optional
//! correlation id) inside 4-byte big-endian length-prefixed frames. Any number of
//! tasks may issue requests concurrently; responses are matched back to their
//! callers by correlation id in whatever order the server sends them. Envelopes
//! without a correlation id are push messages delivered to an [`EventHandler`].
//!
//! ## Layout
//! - [`core`]: envelope model and frame codec
//! - [`protocol`]: payload registry, correlation table, dispatcher
//! - [`transport`]: TCP + TLS connection establishment
//! - [`client`]: lifecycle, send queue and writer, frame reader
//! - [`config`], [`error`], [`utils`]: settings, error taxonomy, logging, metrics, buffer pool
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use envelope_rpc::{ChannelHandler, Client, ClientEvent, ClientSettings, PayloadRegistry};
//!
//! #[derive(Debug)]
//! enum Message {
//!     Quote(Vec<u8>),
//!     Tick(Vec<u8>),
//! }
//!
//! # async fn run() -> envelope_rpc::Result<()> {
//! let settings = ClientSettings::default_with_overrides(|s| {
//!     s.client.host = "quotes.example.com".into();
//!     s.client.port = 7443;
//! });
//!
//! let registry = PayloadRegistry::new()
//!     .with(10, |b| Ok(Message::Quote(b.to_vec())))
//!     .with(51, |b| Ok(Message::Tick(b.to_vec())));
//! let (handler, mut events) = ChannelHandler::<Message>::new();
//!
//! let client = Client::new(settings, registry, Arc::new(handler));
//! client.connect().await?;
//!
//! let quote = client.request(10, b"EURUSD".to_vec()).await?;
//! println!("{quote:?}");
//!
//! if let Some(ClientEvent::Push(tick)) = events.recv().await {
//!     println!("{tick:?}");
//! }
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use client::{Client, ConnectionState, Request};
pub use config::ClientSettings;
pub use core::envelope::Envelope;
pub use error::{ClientError, Result};
pub use protocol::dispatcher::{ChannelHandler, ClientEvent, EventHandler, LoggingHandler};
pub use protocol::registry::PayloadRegistry;
pub use utils::metrics::MetricsSnapshot;
