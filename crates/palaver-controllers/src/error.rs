use palaver_shared::ItemId;
use palaver_sync::SyncError;

/// Errors produced by the controller layer.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Controller requires a non-empty thread name")]
    MissingThreadName,

    #[error("Controller is closed")]
    Closed,

    #[error("Record creation returned no record")]
    RecordCreation,

    #[error("Attachment of {size} bytes exceeds the {max} byte limit")]
    AttachmentTooLarge { size: u64, max: u64 },

    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}
