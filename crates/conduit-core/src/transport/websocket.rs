//! Transport backend over a `tokio-tungstenite` websocket.
//!
//! Each [`Block`] is sent as its own binary websocket message, but a single
//! message may itself straddle more than one block if the peer batches
//! writes, so inbound bytes still run through a [`Framer`] rather than being
//! decoded as exactly-one-frame-per-message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::block::Block;
use crate::error::TransportError;
use crate::framer::Framer;

use super::TransportBackend;

const INBOUND_CAPACITY: usize = 64;

type BoxedSink = Box<
    dyn futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + Unpin,
>;

struct Inner {
    sink: Mutex<BoxedSink>,
    inbound: Mutex<mpsc::Receiver<Block>>,
    closed: AtomicBool,
}

/// A transport backed by an established websocket connection.
#[derive(Clone)]
pub struct WebSocketTransport {
    inner: Arc<Inner>,
}

impl WebSocketTransport {
    /// Wrap an already-upgraded websocket stream, spawning the background
    /// reader task.
    pub fn new<S>(ws: WebSocketStream<S>) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let inner = Arc::new(Inner {
            sink: Mutex::new(Box::new(sink)),
            inbound: Mutex::new(rx),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(read_loop(stream, tx, inner.clone()));

        WebSocketTransport { inner }
    }
}

async fn read_loop<S>(
    mut stream: futures_util::stream::SplitStream<WebSocketStream<S>>,
    tx: mpsc::Sender<Block>,
    inner: Arc<Inner>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let mut framer = Framer::new();

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                tracing::debug!(error = %err, "websocket transport read error");
                break;
            }
        };

        let bytes = match msg {
            Message::Binary(bytes) => bytes,
            Message::Close(_) => {
                tracing::debug!("websocket transport received close frame");
                break;
            }
            // Ping/Pong/Frame are handled by tungstenite internally; text
            // messages are not part of this protocol and are ignored.
            _ => continue,
        };

        for block in framer.push(&bytes) {
            if tx.send(block).await.is_err() {
                break;
            }
        }
    }

    inner.closed.store(true, Ordering::Release);
}

impl TransportBackend for WebSocketTransport {
    async fn send_block(&self, block: Block) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let encoded = block.encode()?;
        let mut sink = self.inner.sink.lock().await;
        sink.send(Message::Binary(encoded.into())).await?;
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
