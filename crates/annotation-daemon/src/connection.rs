//! Individual client connection management.
//!
//! Each connection splits its WebSocket into a read loop, which hands every
//! frame to the relay and waits for it before reading the next one, and a
//! writer task, which drains the connection's bounded outbound queue.
//!
//! The registry holds the only sender for that queue. When the relay drops a
//! connection (queue overflow) or the client leaves, the queue closes and the
//! connection's close signal fires. The read loop stops at once, so an evicted
//! client's later changes are never relayed, and the writer gets a short
//! grace period to send a close frame before the socket is dropped.

use crate::context::ServerContext;
use annotation_core::{CloseSignal, ConnectionHandle, ConnectionId, Frame};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, info, warn};

/// How long the writer may keep flushing after the connection is dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Run a client connection until it closes.
///
/// With `document_id` the connection joins that document immediately;
/// without it, it joins the document of its first valid change.
pub async fn serve_connection<S>(
    ctx: Arc<ServerContext>,
    id: ConnectionId,
    ws_stream: WebSocketStream<S>,
    document_id: Option<String>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (handle, outbound) = ConnectionHandle::new(id, ctx.limits.outbound_queue_capacity);
    let close = handle.close_signal();
    match document_id.as_deref() {
        Some(doc) => {
            ctx.registry.register(handle, doc);
            info!("{} joined document {}", id, doc);
        }
        None => {
            ctx.registry.admit(handle);
            info!("{} connected without a document", id);
        }
    }

    let (write, read) = ws_stream.split();
    let mut writer = tokio::spawn(write_loop(id, write, outbound, ctx.clone()));

    let writer_done = read_loop(id, read, &ctx, &close, &mut writer).await;

    ctx.registry.unregister(id);
    // A writer stuck on a client that stopped reading is cut off
    if !writer_done && timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    info!("{} disconnected", id);
}

/// Read loop that hands frames to the relay.
///
/// Returns true if it stopped because the writer finished.
async fn read_loop<S>(
    id: ConnectionId,
    mut read: SplitStream<WebSocketStream<S>>,
    ctx: &ServerContext,
    close: &CloseSignal,
    writer: &mut JoinHandle<()>,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            () = close.closed() => {
                debug!("{} was dropped by the relay, closing connection", id);
                return false;
            }
            _ = &mut *writer => {
                debug!("Writer for {} finished, closing connection", id);
                return true;
            }
            next = read.next() => next,
        };

        match next {
            Some(Ok(msg)) => {
                let frame = match msg {
                    Message::Text(text) => Frame::Text(text.to_string()),
                    Message::Binary(data) => Frame::Binary(data.to_vec()),
                    Message::Ping(_) | Message::Pong(_) => continue,
                    Message::Close(_) => {
                        debug!("Received close frame from {}", id);
                        return false;
                    }
                    Message::Frame(_) => continue,
                };

                ctx.relay.on_message(id, frame).await;
            }
            Some(Err(e)) => {
                match e {
                    WsError::ConnectionClosed | WsError::AlreadyClosed => {
                        debug!("Connection {} closed", id);
                    }
                    WsError::Capacity(e) => {
                        warn!(
                            "{} sent a message over {} bytes, closing: {}",
                            id, ctx.limits.max_message_size, e
                        );
                    }
                    _ => {
                        warn!("WebSocket error on {}: {}", id, e);
                    }
                }
                return false;
            }
            None => {
                debug!("Connection {} stream ended", id);
                return false;
            }
        }
    }
}

/// Writer that drains the outbound queue into the socket.
async fn write_loop<S>(
    id: ConnectionId,
    mut write: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::Receiver<Frame>,
    ctx: Arc<ServerContext>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        let msg = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
        };
        if let Err(e) = write.send(msg).await {
            debug!("Failed to send to {}: {}", id, e);
            ctx.registry.unregister(id);
            return;
        }
    }

    // Queue closed: the registry let go of this connection
    debug!("Outbound queue for {} closed", id);
    let _ = write.send(Message::Close(None)).await;
}
