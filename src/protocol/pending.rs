//! Correlation table.
//!
//! Maps correlation ids to the one-shot channel the requesting caller is awaiting.
//! Every operation is a single critical section over the map, so an id is either
//! resolved by the dispatcher, removed by its caller, or failed on teardown, and
//! exactly one of those wins. Senders are always completed outside the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{constants, ClientError, Result};

/// Sending side of a waiter
pub type Waiter<M> = oneshot::Sender<Result<M>>;

/// Receiving side a caller awaits
pub type WaiterHandle<M> = oneshot::Receiver<Result<M>>;

struct Table<M> {
    waiters: HashMap<String, Waiter<M>>,
    closed: bool,
}

/// Pending requests keyed by correlation id
pub struct PendingRequests<M> {
    inner: Mutex<Table<M>>,
}

impl<M> PendingRequests<M> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Table {
                waiters: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn table(&self) -> Result<MutexGuard<'_, Table<M>>> {
        self.inner.lock().map_err(|_| ClientError::LockPoisoned)
    }

    /// Register a waiter for `id`. Must happen before the request is enqueued.
    pub fn register(&self, id: &str) -> Result<WaiterHandle<M>> {
        let mut table = self.table()?;
        if table.closed {
            return Err(ClientError::ConnectionClosed);
        }
        if table.waiters.contains_key(id) {
            return Err(ClientError::InvalidState(
                constants::ERR_DUPLICATE_CORRELATION_ID,
            ));
        }

        let (tx, rx) = oneshot::channel();
        table.waiters.insert(id.to_owned(), tx);
        Ok(rx)
    }

    /// Remove and return the waiter for `id`, if one is still pending.
    pub fn take(&self, id: &str) -> Option<Waiter<M>> {
        self.table().ok()?.waiters.remove(id)
    }

    /// Resolve the waiter for `id`. Returns false if no waiter was pending.
    pub fn resolve(&self, id: &str, result: Result<M>) -> bool {
        match self.take(id) {
            Some(waiter) => {
                // The caller may have given up; that is not an error here.
                let _ = waiter.send(result);
                true
            }
            None => false,
        }
    }

    /// Fail every pending waiter with [`ClientError::ConnectionClosed`] and refuse
    /// further registrations. Returns the number of waiters failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = match self.table() {
            Ok(mut table) => {
                table.closed = true;
                table.waiters.drain().collect()
            }
            Err(_) => return 0,
        };

        let count = drained.len();
        for (id, waiter) in drained {
            debug!(correlation_id = %id, "Failing pending request on teardown");
            let _ = waiter.send(Err(ClientError::ConnectionClosed));
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.table().map(|t| t.closed).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.table().map(|t| t.waiters.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M> Default for PendingRequests<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a registration when the awaiting caller goes away.
///
/// Covers both a caller that stops polling its request and a failed enqueue.
/// Removing an id that was already resolved is a no-op.
pub(crate) struct PendingGuard<M> {
    table: Arc<PendingRequests<M>>,
    id: String,
}

impl<M> PendingGuard<M> {
    pub(crate) fn new(table: Arc<PendingRequests<M>>, id: String) -> Self {
        Self { table, id }
    }
}

impl<M> Drop for PendingGuard<M> {
    fn drop(&mut self) {
        self.table.take(&self.id);
    }
}
