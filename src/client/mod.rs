//! # Client
//!
//! Owns one connection and the two tasks that drive it.
//!
//! ## Lifecycle
//! ```text
//! Disconnected ──connect──► Connecting ──ok──► Connected ──close / loop failure──► Closing ──► Closed
//!                                │
//!                                └──err──► Closed
//! ```
//! No state is entered twice. A client is used for exactly one connection.
//!
//! ## Tasks
//! - **Writer**: drains the send queue onto the stream, see [`writer`]
//! - **Reader**: reads frames and dispatches them, see [`reader`]
//!
//! A fatal error in either loop cancels both, fails every pending request with
//! [`ClientError::ConnectionClosed`] and is reported once through
//! [`EventHandler::on_error`]. The connection is not re-established.

pub mod reader;
pub mod writer;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::ClientSettings;
use crate::core::codec::FrameCodec;
use crate::core::envelope::Envelope;
use crate::error::{constants, ClientError, Result};
use crate::protocol::dispatcher::{Dispatcher, EventHandler};
use crate::protocol::pending::{PendingGuard, PendingRequests};
use crate::protocol::registry::PayloadRegistry;
use crate::transport::{self, TlsClientConfig};
use crate::utils::buffer_pool::BufferPool;
use crate::utils::metrics::{Metrics, MetricsSnapshot};

use reader::{reader_loop, FrameReader};
use writer::{writer_loop, SendQueue};

/// Connection lifecycle. Ordered; the client only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Closing = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
        }
    }

    fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move `from -> to`, or return the state actually found.
    fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> std::result::Result<(), ConnectionState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ConnectionState::from_u8)
    }

    /// Move to `to` if it is ahead of the current state. Returns true if it moved.
    fn advance(&self, to: ConnectionState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < to as u8).then_some(to as u8)
            })
            .is_ok()
    }
}

/// A request type with a fixed payload type tag and a known response type.
///
/// ```rust
/// use envelope_rpc::client::Request;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct GetBalance {
///     account: String,
/// }
///
/// struct Balance(u64);
///
/// impl Request for GetBalance {
///     const PAYLOAD_TYPE: u32 = 10;
///     type Response = Balance;
/// }
/// ```
pub trait Request: Serialize {
    /// Tag written into the envelope
    const PAYLOAD_TYPE: u32;

    /// Expected decoded response, converted from the client's message type
    type Response;
}

/// Random 128-bit id as 32 lowercase hex characters
pub fn new_correlation_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

struct LoopHandles {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Everything a failing loop needs to take the connection down.
struct Teardown<M> {
    lifecycle: Arc<Lifecycle>,
    cancel: CancellationToken,
    pending: Arc<PendingRequests<M>>,
    handler: Arc<dyn EventHandler<M>>,
    metrics: Arc<Metrics>,
}

impl<M> Clone for Teardown<M> {
    fn clone(&self) -> Self {
        Self {
            lifecycle: self.lifecycle.clone(),
            cancel: self.cancel.clone(),
            pending: self.pending.clone(),
            handler: self.handler.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<M: 'static> Teardown<M> {
    fn fatal(&self, task: &'static str, error: ClientError) {
        if self.cancel.is_cancelled() || !self.lifecycle.advance(ConnectionState::Closing) {
            debug!(task, error = %error, "Loop error after shutdown began");
            return;
        }

        error!(task, error = %error, "Connection loop failed");
        self.cancel.cancel();
        let failed = self.pending.fail_all();
        self.metrics.requests_abandoned(failed as u64);
        self.handler.on_error(error);
    }
}

async fn supervise<M: 'static, F>(task: &'static str, work: F, teardown: Teardown<M>)
where
    F: Future<Output = Result<()>>,
{
    match work.await {
        Ok(()) => debug!(task, "Loop stopped"),
        Err(e) => teardown.fatal(task, e),
    }
}

/// Request/response client over a single framed connection.
///
/// `M` is the decoded message type produced by the [`PayloadRegistry`]. Requests
/// may be issued concurrently from any number of tasks; each resolves with the
/// response carrying its own correlation id, in whatever order responses arrive.
pub struct Client<M> {
    settings: ClientSettings,
    tls: TlsClientConfig,
    registry: Arc<PayloadRegistry<M>>,
    handler: Arc<dyn EventHandler<M>>,
    pending: Arc<PendingRequests<M>>,
    metrics: Arc<Metrics>,
    lifecycle: Arc<Lifecycle>,
    cancel: CancellationToken,
    queue: OnceLock<SendQueue>,
    tasks: Mutex<Option<LoopHandles>>,
    disposed: AtomicBool,
}

impl<M> Client<M>
where
    M: Send + 'static,
{
    /// Build a client. Nothing is opened until [`connect`](Self::connect).
    ///
    /// The server certificate is validated against `settings.client.host` using
    /// the trust roots from `settings.transport`.
    pub fn new(
        settings: ClientSettings,
        registry: PayloadRegistry<M>,
        handler: Arc<dyn EventHandler<M>>,
    ) -> Self {
        let tls = TlsClientConfig::from_settings(settings.client.host.clone(), &settings.transport);
        Self {
            settings,
            tls,
            registry: Arc::new(registry),
            handler,
            pending: Arc::new(PendingRequests::new()),
            metrics: Arc::new(Metrics::new()),
            lifecycle: Arc::new(Lifecycle::new()),
            cancel: CancellationToken::new(),
            queue: OnceLock::new(),
            tasks: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    /// Replace the TLS configuration derived from the settings
    pub fn with_tls_config(mut self, tls: TlsClientConfig) -> Self {
        self.tls = tls;
        self
    }

    fn begin_connect(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ClientError::ConnectionClosed);
        }

        self.lifecycle
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
            .map_err(|current| match current {
                ConnectionState::Connected => {
                    ClientError::InvalidState(constants::ERR_ALREADY_CONNECTED)
                }
                ConnectionState::Closing | ConnectionState::Closed => {
                    ClientError::ConnectionClosed
                }
                _ => ClientError::InvalidState(constants::ERR_CONNECT_IN_PROGRESS),
            })
    }

    fn abort_connect(&self) {
        self.lifecycle.advance(ConnectionState::Closed);
        self.pending.fail_all();
    }

    /// Open the TLS connection and start the reader and writer.
    ///
    /// Fails with [`ClientError::Connection`] on any resolution, TCP or handshake
    /// failure; the client is then closed and cannot be reused.
    #[instrument(skip(self), fields(host = %self.settings.client.host, port = self.settings.client.port))]
    pub async fn connect(&self) -> Result<()> {
        self.begin_connect()?;

        let target = &self.settings.client;
        let stream = match transport::connect_with_timeout(
            &target.host,
            target.port,
            &self.tls,
            target.connect_timeout,
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Connect failed");
                self.abort_connect();
                return Err(e);
            }
        };

        self.start(stream, Handle::current())
    }

    /// Run the client over an already established stream.
    ///
    /// Must be called from within a Tokio runtime; the loops are spawned on it.
    pub fn connect_with_stream<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let runtime =
            Handle::try_current().map_err(|_| ClientError::InvalidState(constants::ERR_NO_RUNTIME))?;
        self.begin_connect()?;
        self.start(stream, runtime)
    }

    fn start<S>(&self, stream: S, runtime: Handle) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (queue, rx) = SendQueue::new();
        // begin_connect admits a single caller, so the cell is always empty here
        let installed = self.queue.set(queue).is_ok();
        debug_assert!(installed, "send queue installed twice");

        if self
            .lifecycle
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
            .is_err()
        {
            debug!("Client closed while connecting; dropping stream");
            return Err(ClientError::ConnectionClosed);
        }

        let (read_half, write_half) = tokio::io::split(stream);
        let limits = &self.settings.transport;
        let teardown = Teardown {
            lifecycle: self.lifecycle.clone(),
            cancel: self.cancel.clone(),
            pending: self.pending.clone(),
            handler: self.handler.clone(),
            metrics: self.metrics.clone(),
        };

        let writer = runtime.spawn(supervise(
            "writer",
            writer_loop(
                rx,
                write_half,
                FrameCodec::new(limits.max_frame_size),
                self.cancel.clone(),
                self.metrics.clone(),
            ),
            teardown.clone(),
        ));

        let frames = FrameReader::new(
            read_half,
            BufferPool::new(limits.buffer_pool_size, limits.max_pooled_buffer_size),
            limits.max_frame_size,
            self.metrics.clone(),
        );
        let dispatcher = Dispatcher::new(
            self.registry.clone(),
            self.pending.clone(),
            self.handler.clone(),
            self.metrics.clone(),
        );
        let reader = runtime.spawn(supervise(
            "reader",
            reader_loop(frames, dispatcher, self.cancel.clone()),
            teardown,
        ));

        if let Ok(mut tasks) = self.tasks.lock() {
            *tasks = Some(LoopHandles { reader, writer });
        }

        info!("Client connected");
        Ok(())
    }

    fn ready_queue(&self) -> Result<&SendQueue> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ClientError::ConnectionClosed);
        }

        match self.lifecycle.load() {
            ConnectionState::Connected => self
                .queue
                .get()
                .ok_or(ClientError::InvalidState(constants::ERR_NOT_CONNECTED)),
            ConnectionState::Closing | ConnectionState::Closed => Err(ClientError::ConnectionClosed),
            _ => Err(ClientError::InvalidState(constants::ERR_NOT_CONNECTED)),
        }
    }

    /// Send a request and wait for the response carrying the same correlation id.
    ///
    /// There is no timeout: the call completes when the response arrives or the
    /// connection is torn down ([`ClientError::ConnectionClosed`]). Dropping the
    /// returned future abandons the request; a late response is then discarded.
    pub async fn request<P>(&self, payload_type: u32, payload: P) -> Result<M>
    where
        P: Into<Vec<u8>>,
    {
        let queue = self.ready_queue()?;

        let correlation_id = new_correlation_id();
        let body = Envelope::correlated(payload_type, payload, correlation_id.clone()).to_bytes()?;
        if body.len() > self.settings.transport.max_frame_size {
            return Err(ClientError::OversizedFrame(body.len()));
        }

        // Registered before enqueueing so a fast response always finds its waiter
        let waiter = self.pending.register(&correlation_id)?;
        let _guard = PendingGuard::new(self.pending.clone(), correlation_id.clone());

        queue.enqueue(Bytes::from(body))?;
        self.metrics.request_sent();
        trace!(correlation_id = %correlation_id, payload_type, "Request enqueued");

        waiter.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Typed variant of [`request`](Self::request).
    ///
    /// The request is serialized with bincode and the decoded message converted to
    /// `R::Response`; a message of another kind is [`ClientError::UnexpectedResponse`].
    pub async fn send<R>(&self, request: &R) -> Result<R::Response>
    where
        R: Request,
        R::Response: TryFrom<M>,
    {
        let payload = bincode::serialize(request)?;
        let message = self.request(R::PAYLOAD_TYPE, payload).await?;
        R::Response::try_from(message).map_err(|_| ClientError::UnexpectedResponse(R::PAYLOAD_TYPE))
    }

    /// Stop both loops, fail pending requests and close the stream.
    ///
    /// The client is terminal afterwards. Calling `close` again is a caller bug and
    /// returns [`ClientError::AlreadyClosed`].
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            error!("close() called on a client that is already closed");
            return Err(ClientError::AlreadyClosed);
        }

        self.lifecycle.advance(ConnectionState::Closing);
        self.cancel.cancel();

        let failed = self.pending.fail_all();
        if failed > 0 {
            debug!(failed, "Failed pending requests on close");
            self.metrics.requests_abandoned(failed as u64);
        }

        let handles = self.tasks.lock().ok().and_then(|mut tasks| tasks.take());
        if let Some(LoopHandles { reader, writer }) = handles {
            if let Err(e) = writer.await {
                warn!(error = %e, "Writer task did not finish cleanly");
            }
            if let Err(e) = reader.await {
                warn!(error = %e, "Reader task did not finish cleanly");
            }
        }

        self.lifecycle.advance(ConnectionState::Closed);
        self.metrics.log_metrics();
        info!("Client closed");
        Ok(())
    }
}

impl<M> Client<M> {
    pub fn state(&self) -> ConnectionState {
        self.lifecycle.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Number of requests still awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }
}

impl<M> Drop for Client<M> {
    fn drop(&mut self) {
        if !*self.disposed.get_mut() {
            self.cancel.cancel();
            self.pending.fail_all();
            self.lifecycle.advance(ConnectionState::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::protocol::dispatcher::LoggingHandler;

    fn client() -> Client<Vec<u8>> {
        let registry = PayloadRegistry::new().with(1, |b| Ok(b.to_vec()));
        Client::new(ClientSettings::default(), registry, Arc::new(LoggingHandler))
    }

    #[test]
    fn test_correlation_id_format() {
        let id = new_correlation_id();
        assert_eq!(id.len(), 32);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, new_correlation_id());
    }

    #[test]
    fn test_lifecycle_only_moves_forward() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
            .is_ok());
        assert_eq!(
            lifecycle.transition(ConnectionState::Disconnected, ConnectionState::Connecting),
            Err(ConnectionState::Connecting)
        );
        assert!(lifecycle.advance(ConnectionState::Closed));
        assert!(!lifecycle.advance(ConnectionState::Closing));
        assert_eq!(lifecycle.load(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_request_before_connect() {
        let client = client();
        assert!(matches!(
            client.request(1, vec![]).await,
            Err(ClientError::InvalidState(constants::ERR_NOT_CONNECTED))
        ));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_second_connect_rejected() {
        let client = client();
        let (a, _a_peer) = tokio::io::duplex(64);
        let (b, _b_peer) = tokio::io::duplex(64);

        client.connect_with_stream(a).unwrap();
        assert!(matches!(
            client.connect_with_stream(b),
            Err(ClientError::InvalidState(constants::ERR_ALREADY_CONNECTED))
        ));
        client.close().await.unwrap();
    }

    #[test]
    fn test_connect_with_stream_needs_runtime() {
        let client = client();
        let (a, _peer) = tokio::io::duplex(64);
        assert!(matches!(
            client.connect_with_stream(a),
            Err(ClientError::InvalidState(constants::ERR_NO_RUNTIME))
        ));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_close_without_connect() {
        let client = client();
        client.close().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(
            client.close().await,
            Err(ClientError::AlreadyClosed)
        ));
        assert!(matches!(
            client.request(1, vec![]).await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_request_rejected_before_send() {
        let mut settings = ClientSettings::default();
        settings.transport.max_frame_size = 16;
        settings.transport.max_pooled_buffer_size = 16;
        let client: Client<Vec<u8>> =
            Client::new(settings, PayloadRegistry::new(), Arc::new(LoggingHandler));
        let (stream, _peer) = tokio::io::duplex(64);
        client.connect_with_stream(stream).unwrap();

        assert!(matches!(
            client.request(1, vec![0u8; 64]).await,
            Err(ClientError::OversizedFrame(_))
        ));
        assert_eq!(client.pending_requests(), 0);
        client.close().await.unwrap();
    }
}
