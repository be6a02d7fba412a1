//! Transport backend over any `AsyncRead + AsyncWrite` byte stream (TCP,
//! Unix sockets, TLS wrappers, ...).
//!
//! The stream gives no message boundaries at all, so every inbound byte
//! passes through a [`Framer`]. A background task owns the read half and
//! feeds reassembled blocks into an mpsc channel; writes go straight to the
//! write half under a mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use crate::block::Block;
use crate::error::TransportError;
use crate::framer::Framer;

use super::TransportBackend;

const READ_CHUNK: usize = 8 * 1024;
const INBOUND_CAPACITY: usize = 64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Inner {
    writer: Mutex<BoxedWriter>,
    inbound: Mutex<mpsc::Receiver<Block>>,
    closed: AtomicBool,
}

/// A transport backed by a split `AsyncRead + AsyncWrite` stream.
#[derive(Clone)]
pub struct StreamTransport {
    inner: Arc<Inner>,
}

impl StreamTransport {
    /// Wrap a stream, spawning the background reader task. `reader` and
    /// `writer` are typically the two halves returned by
    /// [`tokio::io::split`].
    pub fn new<R, W>(reader: R, writer: W) -> StreamTransport
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let inner = Arc::new(Inner {
            writer: Mutex::new(Box::new(writer)),
            inbound: Mutex::new(rx),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(read_loop(reader, tx, inner.clone()));

        StreamTransport { inner }
    }
}

async fn read_loop<R>(mut reader: R, tx: mpsc::Sender<Block>, inner: Arc<Inner>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut framer = Framer::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("stream transport read half reached eof");
                break;
            }
            Ok(n) => n,
            Err(err) => {
                tracing::debug!(error = %err, "stream transport read error");
                break;
            }
        };

        for block in framer.push(&buf[..n]) {
            if tx.send(block).await.is_err() {
                break;
            }
        }
    }

    inner.closed.store(true, Ordering::Release);
}

impl TransportBackend for StreamTransport {
    async fn send_block(&self, block: Block) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let encoded = block.encode()?;
        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv_block(&self) -> Result<Block, TransportError> {
        let mut rx = self.inner.inbound.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;
    use tokio::io::duplex;

    #[tokio::test]
    async fn roundtrips_a_block_over_a_duplex_stream() {
        let (client_io, server_io) = duplex(1024);
        let (client_r, client_w) = tokio::io::split(client_io);
        let (server_r, server_w) = tokio::io::split(server_io);

        let client = StreamTransport::new(client_r, client_w);
        let server = StreamTransport::new(server_r, server_w);

        client
            .send_block(Block::new(BlockType::Data, b"hello".to_vec()))
            .await
            .unwrap();
        let got = server.recv_block().await.unwrap();
        assert_eq!(got.block_type, BlockType::Data);
        assert_eq!(got.body, b"hello");
    }

    #[tokio::test]
    async fn eof_on_read_half_marks_transport_closed() {
        let (client_io, server_io) = duplex(1024);
        let (client_r, client_w) = tokio::io::split(client_io);
        let (server_r, server_w) = tokio::io::split(server_io);

        let client = StreamTransport::new(client_r, client_w);
        let server = StreamTransport::new(server_r, server_w);
        drop(client);

        let err = server.recv_block().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
