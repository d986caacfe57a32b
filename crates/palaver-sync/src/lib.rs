// Contracts for the external synchronization service consumed by the
// controllers, plus an in-memory hub implementing them for tests and demos.

pub mod blob;
pub mod error;
pub mod memory;
pub mod peer;
pub mod record;
pub mod services;
pub mod store;
pub mod thread;

pub use blob::{BlobReader, BlobTransfer, BlobWriter, FileSource, StatsFn, TransferStats};
pub use error::SyncError;
pub use memory::{Grant, MemoryClient, MemoryHub};
pub use peer::{BlobHook, BlobHookFn, PeerSync, SyncAttempt, SyncAttempts};
pub use record::{Annotations, Reactions, Record, RecordFields};
pub use services::{IdentityProvider, Services};
pub use store::RecordStore;
pub use thread::{ChangeEvent, FetchParams, Subscription, ThreadDefaults, ThreadOpener, ThreadView};
