//! Streaming thread subscriptions.
//!
//! A logical thread is a named subscription scope within the sync service.
//! Subscribing yields a change-event channel plus a view handle through
//! which the live stream can be widened or stopped, mirroring the typed
//! command/notification split used elsewhere in the workspace.

use std::sync::Arc;

use tokio::sync::mpsc;

use palaver_shared::constants::DEFAULT_HISTORY_LIMIT;
use palaver_shared::ItemId;

use crate::error::SyncError;
use crate::record::Record;

/// A batch of changes to the items of one thread view.
///
/// Within a single event, consumers process `updated` before `added`
/// before `deleted`. No ordering is guaranteed across events beyond the
/// delivery order of the channel itself.
#[derive(Debug, Clone, Default)]
pub struct ChangeEvent {
    pub updated: Vec<ItemId>,
    pub added: Vec<ItemId>,
    pub deleted: Vec<ItemId>,
}

impl ChangeEvent {
    pub fn added(ids: Vec<ItemId>) -> Self {
        Self {
            added: ids,
            ..Self::default()
        }
    }

    pub fn updated(ids: Vec<ItemId>) -> Self {
        Self {
            updated: ids,
            ..Self::default()
        }
    }

    pub fn deleted(ids: Vec<ItemId>) -> Self {
        Self {
            deleted: ids,
            ..Self::default()
        }
    }
}

/// Query scope of a streaming subscription.
#[derive(Debug, Clone)]
pub struct FetchParams {
    /// Maximum number of most-recent records streamed into the view.
    pub history_limit: usize,
    /// Also stream license records and auto-extend matched licenses.
    pub include_licenses: bool,
}

impl Default for FetchParams {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            include_licenses: true,
        }
    }
}

/// Defaults applied to every record posted to, or fetched from, a thread.
#[derive(Debug, Clone, Default)]
pub struct ThreadDefaults {
    /// Scope the thread under this parent item (e.g. a channel record).
    pub parent: Option<ItemId>,
}

/// A live streaming subscription against one thread.
pub struct Subscription {
    /// Change events pushed by the service, starting with the initial
    /// replay of the current history window.
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
    /// Handle for reading records and controlling the stream.
    pub view: Arc<dyn ThreadView>,
}

/// Read/control surface of a live subscription.
pub trait ThreadView: Send + Sync {
    /// Look up the current record for an item in this view.
    fn record(&self, id: &ItemId) -> Option<Record>;

    /// The item ids currently in the view, in creation order.
    fn ordered(&self) -> Vec<ItemId>;

    /// Mutate the scope of the live stream (e.g. widen the history
    /// window). Newly matched items arrive as `added` change events.
    fn update_stream(&self, fetch: &FetchParams) -> Result<(), SyncError>;

    /// Stop the stream. The event channel closes afterwards.
    fn stop(&self);
}

/// Entry point for opening streaming subscriptions. Subscribing also
/// registers the thread for background synchronization.
pub trait ThreadOpener: Send + Sync {
    fn subscribe(
        &self,
        thread: &str,
        defaults: &ThreadDefaults,
        fetch: &FetchParams,
    ) -> Result<Subscription, SyncError>;
}
