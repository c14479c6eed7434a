//! annotation-daemon library: Exposes the relay's server components.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod config;
pub mod connection;
pub mod context;
pub mod http;
pub mod server;
pub mod sqlite_store;

// Re-export key types for convenience
pub use config::{Config, Overrides};
pub use context::{ConnectionLimits, ServerContext};
pub use server::RelayServer;
pub use sqlite_store::SqliteStore;
