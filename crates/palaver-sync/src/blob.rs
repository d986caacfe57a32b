//! Blob (attachment) transfer contracts.
//!
//! Blobs travel on a separate streaming channel from record metadata.
//! Readers pull chunks out of local storage; writers push a file-like
//! source into the storage slot of a record. Both report progress through
//! a stats callback.

use async_trait::async_trait;
use bytes::Bytes;

use palaver_shared::ItemId;

use crate::error::SyncError;

/// Progress snapshot delivered to stats callbacks.
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// Read cursor position in bytes.
    pub pos: u64,
    /// Total blob size in bytes.
    pub size: u64,
    /// Current throughput in bytes per second.
    pub throughput: u64,
    pub is_paused: bool,
    pub finished: bool,
    /// Bytes written so far (writer side).
    pub written: u64,
}

pub type StatsFn = Box<dyn FnMut(TransferStats) + Send>;

/// Streaming reader over a locally stored blob.
#[async_trait]
pub trait BlobReader: Send {
    fn on_stats(&mut self, cb: StatsFn);

    /// Pull the next chunk. `None` marks the end of the blob.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, SyncError>;

    fn is_closed(&self) -> bool;
}

/// Streaming writer storing a file-like source into a record's blob slot.
#[async_trait]
pub trait BlobWriter: Send {
    fn on_stats(&mut self, cb: StatsFn);

    /// Drive the transfer to completion.
    async fn run(&mut self) -> Result<(), SyncError>;

    fn is_closed(&self) -> bool;
}

pub trait BlobTransfer: Send + Sync {
    fn open_reader(&self, id: &ItemId) -> Result<Box<dyn BlobReader>, SyncError>;

    fn open_writer(&self, id: &ItemId, source: FileSource) -> Result<Box<dyn BlobWriter>, SyncError>;
}

/// An in-memory file-like byte source (name plus content).
#[derive(Debug, Clone)]
pub struct FileSource {
    pub name: String,
    pub data: Bytes,
}

impl FileSource {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// BLAKE3 hash of the content, matched against record blob metadata.
    pub fn content_hash(&self) -> [u8; 32] {
        *blake3::hash(&self.data).as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_source_hash_matches_content() {
        let a = FileSource::new("a.txt", &b"same bytes"[..]);
        let b = FileSource::new("b.txt", &b"same bytes"[..]);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.len(), 10);
    }
}
