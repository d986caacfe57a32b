use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use palaver_shared::ItemId;
use palaver_sync::{FetchParams, Record, Subscription, ThreadView};

use crate::error::ControllerError;
use crate::signal::Signal;

/// Folds one change event into a controller's view model.
///
/// Implementations must not block; they run on the stream pump task and
/// a stalled reconciler stalls every later event on the same stream.
pub trait Reconciler: Send + Sync {
    fn on_change(&self, event: &palaver_sync::ChangeEvent);
}

/// Connects a thread subscription to a [`Reconciler`] and owns the
/// stream lifecycle.
///
/// The binding pumps events from the subscription into the reconciler
/// until either side shuts down. Closing is idempotent and fans out
/// through an `on_close` signal so owners can cascade teardown.
pub struct StreamBinding {
    thread_name: String,
    view: Arc<dyn ThreadView>,
    closed: AtomicBool,
    close_signal: Signal<()>,
}

impl StreamBinding {
    /// Starts pumping `subscription` into `reconciler`.
    ///
    /// The pump holds only a weak handle on the binding, so dropping the
    /// last strong reference stops the pump. When the stream ends on its
    /// own the binding closes itself.
    pub fn bind(
        thread_name: &str,
        subscription: Subscription,
        reconciler: Arc<dyn Reconciler>,
    ) -> Arc<Self> {
        let binding = Arc::new(Self {
            thread_name: thread_name.to_string(),
            view: subscription.view,
            closed: AtomicBool::new(false),
            close_signal: Signal::new(),
        });

        let weak = Arc::downgrade(&binding);
        let mut events = subscription.events;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(binding) = weak.upgrade() else { break };
                if binding.is_closed() {
                    break;
                }
                drop(binding);
                reconciler.on_change(&event);
            }
            if let Some(binding) = weak.upgrade() {
                binding.close();
            }
        });

        binding
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn record(&self, id: &ItemId) -> Option<Record> {
        self.view.record(id)
    }

    pub fn ordered(&self) -> Vec<ItemId> {
        self.view.ordered()
    }

    /// Re-issues the stream query, typically with a wider history window.
    pub fn update_stream(&self, fetch: &FetchParams) -> Result<(), ControllerError> {
        if self.is_closed() {
            return Err(ControllerError::Closed);
        }
        self.view.update_stream(fetch)?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stops the stream. Safe to call any number of times; listeners are
    /// notified exactly once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(thread = %self.thread_name, "closing stream binding");
        self.view.stop();
        self.close_signal.emit(());
    }

    pub fn on_close(&self, listener: impl Fn(()) + Send + Sync + 'static) {
        self.close_signal.connect(listener);
    }
}

impl Drop for StreamBinding {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.view.stop();
        }
    }
}

/// Controllers reject construction with an empty thread name instead of
/// silently subscribing to nothing.
pub fn require_thread_name(name: &str) -> Result<(), ControllerError> {
    if name.is_empty() {
        return Err(ControllerError::MissingThreadName);
    }
    Ok(())
}
