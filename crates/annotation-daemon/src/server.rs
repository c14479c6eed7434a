//! WebSocket server for accepting client connections.
//!
//! Clients connect to `ws://<host>:<port>/?documentId=<id>`. The query is
//! read during the upgrade; connections without it are still accepted and
//! join the document named by their first change.

use crate::connection::serve_connection;
use crate::context::ServerContext;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, error, info};

/// Query parameter naming the document a connection joins.
pub const DOCUMENT_QUERY_PARAM: &str = "documentId";

/// WebSocket relay server.
pub struct RelayServer {
    ctx: Arc<ServerContext>,
}

impl RelayServer {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("WebSocket relay listening on {}", listen_addr);
        Ok(listener)
    }

    /// Accept connections forever.
    pub async fn run(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => self.accept_connection(stream, addr),
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Handle a new incoming TCP connection on its own task.
    pub fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let mut document_id = None;
            let capture_document = |request: &Request, response: Response| {
                document_id = document_from_query(request.uri().query());
                Ok::<_, ErrorResponse>(response)
            };

            let config = websocket_config(ctx.limits.max_message_size);
            let ws_stream = match accept_hdr_async_with_config(stream, capture_document, Some(config))
                .await
            {
                Ok(ws) => ws,
                Err(e) => {
                    // Health checks (like `nc -z`) connect and immediately close without
                    // completing the WebSocket handshake. Log these as debug, not error.
                    let err_str = e.to_string();
                    if err_str.contains("Handshake not finished")
                        || err_str.contains("Connection reset")
                        || err_str.contains("unexpected EOF")
                    {
                        debug!("Connection closed before handshake from {}", addr);
                    } else {
                        error!("WebSocket upgrade failed for {}: {}", addr, e);
                    }
                    return;
                }
            };

            let id = ctx.next_connection_id();
            info!("New connection from {} ({})", addr, id);
            serve_connection(ctx, id, ws_stream, document_id).await;
        });
    }
}

/// Frame and message limits enforced while reading, before a message is buffered whole.
pub fn websocket_config(max_message_size: usize) -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(max_message_size),
        max_frame_size: Some(max_message_size),
        ..WebSocketConfig::default()
    }
}

/// Extract a non-empty `documentId` from a request query string.
pub fn document_from_query(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == DOCUMENT_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_from_query() {
        assert_eq!(
            document_from_query(Some("documentId=webviewer-demo-1")).as_deref(),
            Some("webviewer-demo-1")
        );
        assert_eq!(
            document_from_query(Some("user=Andy&documentId=doc%201")).as_deref(),
            Some("doc 1")
        );
    }

    #[test]
    fn test_websocket_config_uses_message_limit() {
        let config = websocket_config(32 * 1024 * 1024);
        assert_eq!(config.max_message_size, Some(32 * 1024 * 1024));
        assert_eq!(config.max_frame_size, Some(32 * 1024 * 1024));
    }

    #[test]
    fn test_document_from_query_absent_or_empty() {
        assert_eq!(document_from_query(None), None);
        assert_eq!(document_from_query(Some("user=Andy")), None);
        assert_eq!(document_from_query(Some("documentId=")), None);
    }
}
