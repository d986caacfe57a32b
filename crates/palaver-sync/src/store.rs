//! Record store contract: posting records, annotations, licenses, and
//! deletions. All operations return the records the store produced.

use async_trait::async_trait;

use palaver_shared::UserKey;

use crate::error::SyncError;
use crate::record::{Record, RecordFields};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Post a new record to a named thread.
    async fn post(&self, thread: &str, fields: RecordFields) -> Result<Vec<Record>, SyncError>;

    /// Post an edit annotation against an existing record. The merged
    /// annotation state surfaces on the target through an `updated`
    /// change event.
    async fn post_edit(&self, target: &Record, text: &str) -> Result<Vec<Record>, SyncError>;

    /// Post a reaction vote against an existing record. `negate` removes
    /// the caller's reaction instead of adding it.
    async fn post_reaction(
        &self,
        target: &Record,
        reaction: &str,
        negate: bool,
    ) -> Result<Vec<Record>, SyncError>;

    /// Issue license grants covering `targets` for a record.
    async fn post_license(
        &self,
        target: &Record,
        targets: &[UserKey],
    ) -> Result<Vec<Record>, SyncError>;

    /// Delete a record, returning the resulting tombstone records.
    async fn delete(&self, target: &Record) -> Result<Vec<Record>, SyncError>;
}
