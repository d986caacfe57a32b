use std::sync::{Arc, Mutex};

type Listener<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A typed event channel with deferred delivery.
///
/// Listeners are invoked on a fresh task, never inline from `emit`. A
/// listener that re-enters the controller therefore observes a fully
/// settled view model, and a panicking listener cannot unwind into the
/// reconciliation path.
pub struct Signal<T> {
    listeners: Arc<Mutex<Vec<Listener<T>>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<T> Default for Signal<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers a listener for every future emission.
    pub fn connect(&self, listener: impl Fn(T) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .expect("signal listeners lock")
            .push(Arc::new(listener));
    }

    /// Delivers `value` to every listener registered at the time of the
    /// call. Delivery happens on spawned tasks after the caller yields.
    pub fn emit(&self, value: T) {
        let listeners = self.listeners.lock().expect("signal listeners lock").clone();
        for listener in listeners {
            let value = value.clone();
            tokio::spawn(async move {
                listener(value);
            });
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().expect("signal listeners lock").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn emit_is_deferred() {
        let signal = Signal::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in = hits.clone();
        signal.connect(move |n: usize| {
            hits_in.fetch_add(n, Ordering::SeqCst);
        });

        signal.emit(2);
        assert_eq!(hits.load(Ordering::SeqCst), 0, "delivery must not be inline");

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn all_listeners_receive_each_emission() {
        let signal: Signal<()> = Signal::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            signal.connect(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        signal.emit(());
        signal.emit(());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 6);
    }
}
