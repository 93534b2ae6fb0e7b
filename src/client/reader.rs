//! Frame reader and the single reader task.
//!
//! Reads one length prefix, then exactly that many bytes, then hands the parsed
//! envelope to the dispatcher before touching the socket again. End of stream at
//! any point inside a prefix or a body is a protocol violation and ends the loop.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::core::codec::LENGTH_PREFIX_SIZE;
use crate::core::envelope::Envelope;
use crate::error::{ClientError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::utils::buffer_pool::BufferPool;
use crate::utils::metrics::Metrics;

/// One unit read off the wire
#[derive(Debug)]
pub enum Inbound {
    /// Zero-length frame
    Heartbeat,
    /// A well-formed envelope
    Envelope(Envelope),
    /// Framing was intact but the body did not parse
    Malformed(ClientError),
}

/// Fill `buf` completely or fail with the number of bytes that did arrive.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(ClientError::Receive)?;
        if n == 0 {
            return Err(ClientError::ProtocolViolation {
                expected: buf.len(),
                received: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

/// Reads length-prefixed envelopes from a byte stream
pub struct FrameReader<R> {
    reader: R,
    pool: BufferPool,
    max_frame_size: usize,
    metrics: Arc<Metrics>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, pool: BufferPool, max_frame_size: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            reader,
            pool,
            max_frame_size,
            metrics,
        }
    }

    /// Read the next frame. `Err` means the stream is no longer usable.
    pub async fn read_frame(&mut self) -> Result<Inbound> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        read_full(&mut self.reader, &mut prefix).await?;

        let len = u32::from_be_bytes(prefix) as usize;
        if len == 0 {
            self.metrics.heartbeat_received();
            return Ok(Inbound::Heartbeat);
        }
        if len > self.max_frame_size {
            return Err(ClientError::OversizedFrame(len));
        }

        let mut buf = self.pool.acquire();
        buf.resize(len, 0);
        read_full(&mut self.reader, &mut buf).await?;
        self.metrics
            .frame_received((LENGTH_PREFIX_SIZE + len) as u64);

        Ok(match Envelope::from_bytes(&buf) {
            Ok(envelope) => Inbound::Envelope(envelope),
            Err(e) => Inbound::Malformed(ClientError::Decode(format!(
                "malformed envelope in {len}-byte frame: {e}"
            ))),
        })
    }
}

/// Read and dispatch frames until cancelled or the stream fails.
pub async fn reader_loop<R, M: 'static>(
    mut frames: FrameReader<R>,
    dispatcher: Dispatcher<M>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let inbound = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            inbound = frames.read_frame() => inbound?,
        };

        match inbound {
            Inbound::Heartbeat => trace!("Heartbeat received"),
            Inbound::Envelope(envelope) => {
                let outcome = dispatcher.dispatch(envelope);
                trace!(?outcome, "Envelope dispatched");
            }
            Inbound::Malformed(error) => dispatcher.report(error),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use bytes::BytesMut;
    use tokio::io::{duplex, AsyncWriteExt};

    use crate::core::codec::encode_frame;

    fn reader<R: AsyncRead + Unpin>(r: R) -> FrameReader<R> {
        FrameReader::new(r, BufferPool::new(2, 4096), 1024, Arc::new(Metrics::new()))
    }

    fn framed(envelope: &Envelope) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(&envelope.to_bytes().unwrap(), &mut buf).unwrap();
        buf.to_vec()
    }

    #[tokio::test]
    async fn test_heartbeat_then_envelope() {
        let env = Envelope::push(51, vec![]);
        let mut bytes = vec![0, 0, 0, 0];
        bytes.extend(framed(&env));

        let mut frames = reader(&bytes[..]);
        assert!(matches!(frames.read_frame().await.unwrap(), Inbound::Heartbeat));
        match frames.read_frame().await.unwrap() {
            Inbound::Envelope(got) => assert_eq!(got, env),
            other => panic!("unexpected {other:?}"),
        }
        let snap = frames.metrics.snapshot();
        assert_eq!(snap.heartbeats_received, 1);
        assert_eq!(snap.frames_received, 1);
    }

    #[tokio::test]
    async fn test_short_prefix_is_protocol_violation() {
        let mut frames = reader(&[0u8, 0][..]);
        assert!(matches!(
            frames.read_frame().await,
            Err(ClientError::ProtocolViolation {
                expected: 4,
                received: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_short_body_is_protocol_violation() {
        let mut bytes = framed(&Envelope::push(10, vec![1; 20]));
        bytes.truncate(bytes.len() - 5);

        let mut frames = reader(&bytes[..]);
        assert!(matches!(
            frames.read_frame().await,
            Err(ClientError::ProtocolViolation { received, expected }) if received + 5 == expected
        ));
    }

    #[tokio::test]
    async fn test_eof_at_frame_boundary() {
        let mut frames = reader(&[][..]);
        assert!(matches!(
            frames.read_frame().await,
            Err(ClientError::ProtocolViolation {
                expected: 4,
                received: 0
            })
        ));
    }

    #[tokio::test]
    async fn test_oversized_length() {
        let mut frames = reader(&[0u8, 0, 4, 1][..]);
        assert!(matches!(
            frames.read_frame().await,
            Err(ClientError::OversizedFrame(1025))
        ));
    }

    #[tokio::test]
    async fn test_garbage_body_is_scoped() {
        let mut bytes = vec![0, 0, 0, 3, 0xFF, 0xFF, 0xFF];
        bytes.extend(framed(&Envelope::push(10, vec![7])));

        let mut frames = reader(&bytes[..]);
        match frames.read_frame().await.unwrap() {
            Inbound::Malformed(e) => assert!(e.is_decode_error()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            frames.read_frame().await.unwrap(),
            Inbound::Envelope(_)
        ));
    }

    #[tokio::test]
    async fn test_body_split_across_reads() {
        let (mut tx, rx) = duplex(8);
        let bytes = framed(&Envelope::correlated(20, vec![9; 40], "b1"));

        let writer = tokio::spawn(async move {
            for chunk in bytes.chunks(3) {
                tx.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let mut frames = reader(rx);
        match frames.read_frame().await.unwrap() {
            Inbound::Envelope(env) => {
                assert_eq!(env.correlation_id.as_deref(), Some("b1"));
                assert_eq!(env.payload.len(), 40);
            }
            other => panic!("unexpected {other:?}"),
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_trailing_junk_in_body_is_scoped() {
        let mut body = Envelope::push(10, vec![7]).to_bytes().unwrap();
        body.push(0xEE);
        let mut bytes = BytesMut::new();
        encode_frame(&body, &mut bytes).unwrap();

        let mut frames = reader(&bytes[..]);
        match frames.read_frame().await.unwrap() {
            Inbound::Malformed(e) => assert!(e.is_decode_error()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reader_loop_dispatches_until_eof() {
        use crate::protocol::dispatcher::{ChannelHandler, ClientEvent};
        use crate::protocol::pending::PendingRequests;
        use crate::protocol::registry::PayloadRegistry;

        let registry = PayloadRegistry::new().with(10, |b| Ok(b.to_vec()));
        let (handler, mut events) = ChannelHandler::<Vec<u8>>::new();
        let metrics = Arc::new(Metrics::new());
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            Arc::new(PendingRequests::new()),
            Arc::new(handler),
            metrics.clone(),
        );

        let mut bytes = vec![0, 0, 0, 0];
        bytes.extend(framed(&Envelope::push(10, vec![4, 2])));
        let frames = FrameReader::new(&bytes[..], BufferPool::new(1, 1024), 1024, metrics);

        let result = reader_loop(frames, dispatcher, CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(ClientError::ProtocolViolation {
                expected: 4,
                received: 0
            })
        ));
        assert!(matches!(events.recv().await, Some(ClientEvent::Push(p)) if p == vec![4, 2]));
    }
}
