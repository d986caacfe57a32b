//! Peer-sync contracts: requesting a blob from remote peers and hooking
//! its local availability.

use async_trait::async_trait;

use palaver_shared::ItemId;

use crate::blob::BlobWriter;

/// One-shot callback fired when a blob's bytes become available locally.
pub type BlobHookFn = Box<dyn FnOnce() + Send>;

/// Handle to a registered blob hook. Cancelling prevents the hook from
/// ever firing; dropping the handle leaves the hook armed.
pub struct BlobHook {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl BlobHook {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// One attempt at syncing a blob from a peer. The writer reports
/// written-byte progress; its `run()` outcome decides whether the blob is
/// now available (`Ok`) or the next peer should be tried (`Err`).
pub struct SyncAttempt {
    pub writer: Box<dyn BlobWriter>,
}

/// Lazy pull sequence of sync attempts, exhausted when `next()` yields
/// `None`.
#[async_trait]
pub trait SyncAttempts: Send {
    async fn next(&mut self) -> Option<SyncAttempt>;
}

pub trait PeerSync: Send + Sync {
    /// Register a one-shot hook invoked when the blob becomes available
    /// locally (e.g. synced from a peer).
    fn on_blob(&self, id: &ItemId, hook: BlobHookFn) -> BlobHook;

    /// Start a lazy sequence of peer-sync attempts for a blob.
    fn sync_blob(&self, id: &ItemId) -> Box<dyn SyncAttempts>;
}
