use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::core::envelope::Envelope;
use crate::error::ClientError;
use crate::protocol::pending::PendingRequests;
use crate::protocol::registry::PayloadRegistry;
use crate::utils::metrics::Metrics;

/// Subscriber for messages and failures that no caller is awaiting.
///
/// Registered once when the client is built and invoked synchronously from the
/// reader task (and from the writer task for send failures). Implementations
/// should hand work off rather than block.
pub trait EventHandler<M>: Send + Sync + 'static {
    /// An envelope without a correlation id was decoded.
    fn on_push(&self, message: M) {
        drop(message);
        debug!("Push message dropped: handler does not consume pushes");
    }

    /// A loop failed, or a single inbound message could not be decoded.
    fn on_error(&self, error: ClientError) {
        error!(error = %error, "Unhandled client error");
    }
}

/// Handler that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl<M> EventHandler<M> for LoggingHandler {}

/// Event forwarded by [`ChannelHandler`]
#[derive(Debug)]
pub enum ClientEvent<M> {
    Push(M),
    Error(ClientError),
}

/// Handler that forwards every event into an unbounded channel.
///
/// Lets the caller consume pushes and loop failures from its own task instead of
/// running code on the reader task.
#[derive(Debug)]
pub struct ChannelHandler<M> {
    tx: mpsc::UnboundedSender<ClientEvent<M>>,
}

impl<M> ChannelHandler<M> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent<M>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl<M: Send + 'static> EventHandler<M> for ChannelHandler<M> {
    fn on_push(&self, message: M) {
        if self.tx.send(ClientEvent::Push(message)).is_err() {
            debug!("Push message dropped: event receiver gone");
        }
    }

    fn on_error(&self, error: ClientError) {
        if let Err(mpsc::error::SendError(ClientEvent::Error(error))) =
            self.tx.send(ClientEvent::Error(error))
        {
            error!(error = %error, "Unhandled client error");
        }
    }
}

/// What the dispatcher did with one envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A pending waiter was resolved (with a message or a decode failure)
    Resolved,
    /// The correlation id had no pending waiter; the envelope was dropped
    Orphaned,
    /// Delivered to [`EventHandler::on_push`]
    Pushed,
    /// A push message failed to decode and was reported to [`EventHandler::on_error`]
    Rejected,
}

/// Routes inbound envelopes to waiters or to the event handler.
pub struct Dispatcher<M> {
    registry: Arc<PayloadRegistry<M>>,
    pending: Arc<PendingRequests<M>>,
    handler: Arc<dyn EventHandler<M>>,
    metrics: Arc<Metrics>,
}

impl<M: 'static> Dispatcher<M> {
    pub fn new(
        registry: Arc<PayloadRegistry<M>>,
        pending: Arc<PendingRequests<M>>,
        handler: Arc<dyn EventHandler<M>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            pending,
            handler,
            metrics,
        }
    }

    pub fn dispatch(&self, envelope: Envelope) -> Outcome {
        let Envelope {
            payload_type,
            payload,
            correlation_id,
        } = envelope;

        match correlation_id {
            Some(id) => {
                let Some(waiter) = self.pending.take(&id) else {
                    debug!(correlation_id = %id, payload_type, "Dropping response with no pending request");
                    self.metrics.response_orphaned();
                    return Outcome::Orphaned;
                };

                let result = self.registry.decode(payload_type, &payload);
                if let Err(ref e) = result {
                    warn!(correlation_id = %id, payload_type, error = %e, "Response failed to decode");
                    self.metrics.decode_error();
                }

                trace!(correlation_id = %id, payload_type, "Resolving pending request");
                self.metrics.response_matched();
                let _ = waiter.send(result);
                Outcome::Resolved
            }
            None => match self.registry.decode(payload_type, &payload) {
                Ok(message) => {
                    self.metrics.push_message();
                    self.handler.on_push(message);
                    Outcome::Pushed
                }
                Err(e) => {
                    warn!(payload_type, error = %e, "Push message failed to decode");
                    self.metrics.decode_error();
                    self.handler.on_error(e);
                    Outcome::Rejected
                }
            },
        }
    }

    /// Forward a failure that is not tied to a pending request.
    pub fn report(&self, error: ClientError) {
        if error.is_decode_error() {
            self.metrics.decode_error();
        }
        self.handler.on_error(error);
    }
}
