use std::time::Duration;

/// Peers show as inactive after this threshold without a well-spaced ping.
pub const INACTIVE_THRESHOLD: Duration = Duration::from_secs(60);

/// Maximum attachment blob size in bytes (50 MiB).
pub const MAX_BLOB_SIZE: u64 = 50 * 1024 * 1024;

/// Number of most-recent records initially streamed into a view.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// How many additional records each "load older history" step requests.
pub const HISTORY_PAGE: usize = 25;

/// How often undisplayed media is considered for eviction.
pub const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Media untouched for this long is evicted from memory.
pub const PURGE_MAX_AGE: Duration = Duration::from_secs(600);

/// Delay between the hiding edit and the actual deletion of a message,
/// giving the edit annotation time to propagate.
pub const DELETE_EDIT_GRACE: Duration = Duration::from_secs(1);

/// Size (bytes) of the per-instance random salt carried by presence records.
pub const PRESENCE_SALT_SIZE: usize = 4;

/// Chunk size used when streaming blob payloads.
pub const BLOB_CHUNK_SIZE: usize = 16 * 1024;
