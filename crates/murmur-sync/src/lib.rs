//! Murmur Sync
//!
//! Drives simplex (one-way, store-and-forward) connections between contacts.
//!
//! # Architecture
//!
//! ```text
//! SyncStorage ──► OutgoingSimplexConnection ──► ConnectionEncrypter ──► TransportConnectionWriter
//!
//! TransportConnectionReader ──► TagRecogniser ──► ConnectionDecrypter ──► IncomingSimplexConnection ──► SyncReceiver
//! ```
//!
//! The storage collaborator owns all sync state and decides what to send;
//! the drivers only sequence records into frames in priority order and
//! report what arrived. [`MemorySyncStorage`] implements both halves for
//! tests and simulation.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod incoming;
pub mod memory;
pub mod outgoing;
pub mod record;
pub mod storage;

pub use error::{RecordError, StorageError, SyncError};
pub use incoming::{IncomingSimplexConnection, ReadOutcome};
pub use memory::MemorySyncStorage;
pub use outgoing::{AbortReason, ConnectionState, OutgoingSimplexConnection, Priority, WriteOutcome};
pub use record::{Ack, BatchId, GroupId, RawBatch, SubscriptionUpdate, SyncRecord, TransportUpdate};
pub use storage::{SyncReceiver, SyncStorage};
