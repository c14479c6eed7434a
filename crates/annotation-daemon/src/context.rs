//! Shared server state, built once at startup.
//!
//! Both the WebSocket relay and the HTTP history endpoint hold an
//! `Arc<ServerContext>`; nothing is reached through globals.

use crate::config::Config;
use annotation_core::{
    AnnotationStore, ConnectionId, ConnectionRegistry, HistoryService, Relay,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-connection resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Frames queued per connection before it is dropped
    pub outbound_queue_capacity: usize,
    /// Largest inbound frame accepted, in bytes
    pub max_message_size: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        let config = Config::default();
        Self {
            outbound_queue_capacity: config.outbound_queue_capacity,
            max_message_size: config.max_message_size,
        }
    }
}

pub struct ServerContext {
    pub registry: Arc<ConnectionRegistry>,
    pub relay: Relay,
    pub history: HistoryService,
    pub limits: ConnectionLimits,
    /// Counter for generating connection IDs
    next_connection_id: AtomicU64,
}

impl ServerContext {
    pub fn new(store: Arc<dyn AnnotationStore>, limits: ConnectionLimits) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            relay: Relay::new(store.clone(), registry.clone()),
            history: HistoryService::new(store),
            registry,
            limits,
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(store: Arc<dyn AnnotationStore>, config: &Config) -> Self {
        Self::new(
            store,
            ConnectionLimits {
                outbound_queue_capacity: config.outbound_queue_capacity,
                max_message_size: config.max_message_size,
            },
        )
    }

    /// Allocate a fresh connection ID.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annotation_core::InMemoryStore;

    #[test]
    fn test_connection_ids_are_unique() {
        let ctx = ServerContext::new(Arc::new(InMemoryStore::new()), ConnectionLimits::default());
        let a = ctx.next_connection_id();
        let b = ctx.next_connection_id();

        assert_ne!(a, b);
        assert_eq!(a.to_string(), "conn-1");
    }

    #[test]
    fn test_limits_follow_config() {
        let config = Config {
            outbound_queue_capacity: 3,
            max_message_size: 1024,
            ..Config::default()
        };
        let ctx = ServerContext::from_config(Arc::new(InMemoryStore::new()), &config);

        assert_eq!(ctx.limits.outbound_queue_capacity, 3);
        assert_eq!(ctx.limits.max_message_size, 1024);
    }
}
