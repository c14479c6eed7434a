//! annotation-core: Synchronization core for collaborative document annotations.
//!
//! This crate provides the transport-agnostic pieces of the relay:
//! - Annotation records and the JSON wire envelope
//! - The `AnnotationStore` trait (plus an in-memory implementation)
//! - The connection registry with bounded per-connection outbound queues
//! - The broadcast relay (persist, then fan out to peers)
//! - The history service and the client-side replica used to replay it
//!
//! Payload content (XFDF) is opaque here: it is stored and forwarded, never parsed.

pub mod envelope;
pub mod history;
pub mod record;
pub mod registry;
pub mod relay;
pub mod replica;
pub mod store;

pub use envelope::{ChangeEnvelope, EnvelopeError, Frame, HistoryEntry};
pub use history::HistoryService;
pub use record::{AnnotationRecord, PayloadKind};
pub use registry::{CloseSignal, ConnectionHandle, ConnectionId, ConnectionRegistry, DeliveryError};
pub use relay::{Relay, RelayOutcome};
pub use replica::{AppliedAnnotation, DocumentReplica};
pub use store::{AnnotationStore, InMemoryStore, StoreError};
