//! Send queue and the single writer task.
//!
//! ```text
//! caller 1 ─┐
//! caller 2 ─┼─► mpsc::UnboundedSender<Bytes> ─► writer task ─► transport
//! caller N ─┘
//! ```
//!
//! Callers never touch the transport. The writer is the only task that writes, so
//! frames go out whole and in submission order.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::core::codec::{FrameCodec, LENGTH_PREFIX_SIZE};
use crate::error::{ClientError, Result};
use crate::utils::metrics::Metrics;

/// Bound on the TLS close_notify + FIN at shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// A serialized envelope waiting to be framed and written
pub type OutboundItem = Bytes;

/// Producer side of the outbound FIFO. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SendQueue {
    tx: mpsc::UnboundedSender<OutboundItem>,
}

impl SendQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Append an item. Never waits; fails only once the writer is gone.
    pub fn enqueue(&self, item: OutboundItem) -> Result<()> {
        self.tx.send(item).map_err(|_| ClientError::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn into_send_error(error: ClientError) -> ClientError {
    match error {
        ClientError::Io(e) => ClientError::Send(e),
        other => other,
    }
}

/// Drain `rx` into `writer` one frame at a time, flushing after each.
///
/// Returns `Ok(())` on cancellation or when every producer is gone; items still
/// queued at that point are discarded. A write failure ends the loop with
/// [`ClientError::Send`].
pub async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<OutboundItem>,
    writer: W,
    codec: FrameCodec,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut framed = FramedWrite::new(writer, codec);

    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let len = item.len();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = framed.send(item) => sent.map_err(into_send_error)?,
        }

        metrics.frame_sent((LENGTH_PREFIX_SIZE + len) as u64);
        trace!(bytes = len, "Frame written");
    }

    rx.close();
    let mut discarded = 0usize;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        debug!(discarded, "Discarding queued frames on shutdown");
    }

    let mut writer = framed.into_inner();
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
        Ok(Ok(())) => debug!("Write half shut down"),
        Ok(Err(e)) => debug!(error = %e, "Write half shutdown failed"),
        Err(_) => debug!("Write half shutdown timed out"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use futures::StreamExt;
    use tokio::io::duplex;
    use tokio_util::codec::FramedRead;

    #[tokio::test]
    async fn test_frames_written_in_submission_order() {
        let (client, server) = duplex(4096);
        let (queue, rx) = SendQueue::new();
        let metrics = Arc::new(Metrics::new());
        let cancel = CancellationToken::new();

        // Three producers, one queue
        let producers = [queue.clone(), queue.clone(), queue.clone()];
        producers[0].enqueue(Bytes::from_static(b"o1")).unwrap();
        producers[1].enqueue(Bytes::from_static(b"o2")).unwrap();
        producers[2].enqueue(Bytes::from_static(b"o3")).unwrap();

        let task = tokio::spawn(writer_loop(
            rx,
            client,
            FrameCodec::default(),
            cancel.clone(),
            metrics.clone(),
        ));

        let mut frames = FramedRead::new(server, FrameCodec::default());
        for expected in [&b"o1"[..], b"o2", b"o3"] {
            let frame = frames.next().await.unwrap().unwrap();
            assert_eq!(&frame[..], expected);
        }

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
        let snap = metrics.snapshot();
        assert_eq!(snap.frames_sent, 3);
        assert_eq!(snap.bytes_sent, 3 * 6);
    }

    #[tokio::test]
    async fn test_enqueue_fails_after_writer_gone() {
        let (queue, rx) = SendQueue::new();
        drop(rx);
        assert!(queue.is_closed());
        assert!(matches!(
            queue.enqueue(Bytes::from_static(b"x")),
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_failure_is_send_error() {
        let (client, server) = duplex(64);
        drop(server);

        let (queue, rx) = SendQueue::new();
        queue.enqueue(Bytes::from_static(b"lost")).unwrap();

        let result = writer_loop(
            rx,
            client,
            FrameCodec::default(),
            CancellationToken::new(),
            Arc::new(Metrics::new()),
        )
        .await;

        assert!(matches!(result, Err(ClientError::Send(_))));
    }

    #[tokio::test]
    async fn test_cancel_discards_queue() {
        let (client, mut server) = duplex(4096);
        let (queue, rx) = SendQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        queue.enqueue(Bytes::from_static(b"never")).unwrap();
        let result = writer_loop(
            rx,
            client,
            FrameCodec::default(),
            cancel,
            Arc::new(Metrics::new()),
        )
        .await;
        assert!(result.is_ok());

        // Peer sees a clean EOF and nothing else
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut buf)
            .await
            .unwrap();
        assert!(buf.is_empty());
        assert!(queue.is_closed());
    }
}
