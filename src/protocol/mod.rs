//! # Protocol Layer
//!
//! Correlation and routing of decoded envelopes.
//!
//! ## Components
//! - **Registry**: payload type tag to decoder table
//! - **Pending**: correlation id to waiter table with exactly-once resolution
//! - **Dispatcher**: sends each inbound envelope to its waiter or to the event handler
//!
//! ## Routing
//! ```text
//! envelope ─┬─ correlation id, pending ──► decode ──► waiter
//!           ├─ correlation id, unknown ──► dropped
//!           └─ no correlation id ────────► decode ──► EventHandler::on_push / on_error
//! ```

pub mod dispatcher;
pub mod pending;
pub mod registry;
