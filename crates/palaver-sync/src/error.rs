use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Thread subscription is stopped")]
    Stopped,

    #[error("Blob is not available locally")]
    BlobNotAvailable,

    #[error("Blob transfer failed: {0}")]
    Transfer(String),

    #[error("Record store rejected the operation: {0}")]
    Store(String),
}
