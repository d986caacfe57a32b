//! Peer liveness derived from a shared presence thread.
//!
//! Every running instance posts small salted heartbeat records. Each
//! instance is keyed by the hash of its owner key and salt, so two
//! windows of the same account count as two instances. A peer is active
//! when its heartbeats are both recent and well spaced; a lone fresh
//! ping also counts so newcomers show up immediately.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use palaver_shared::constants::{INACTIVE_THRESHOLD, PRESENCE_SALT_SIZE};
use palaver_shared::{ItemId, UserKey};
use palaver_sync::{
    ChangeEvent, FetchParams, IdentityProvider, Record, RecordFields, RecordStore, Services,
    ThreadDefaults, ThreadView,
};

use crate::binding::{require_thread_name, Reconciler, StreamBinding};
use crate::error::ControllerError;
use crate::signal::Signal;

/// How many heartbeat arrival times are kept per instance.
const PINGS_KEPT: usize = 2;

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub thread_name: String,
    /// Time without qualifying heartbeats after which a peer, or the
    /// local user, counts as inactive.
    pub inactive_threshold: Duration,
    pub fetch: FetchParams,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            thread_name: "presence".to_string(),
            inactive_threshold: INACTIVE_THRESHOLD,
            fetch: FetchParams::default(),
        }
    }
}

struct InstanceRecord {
    key: UserKey,
    items: HashMap<ItemId, Record>,
    /// Heartbeat arrival times, most recent first.
    pings: Vec<Instant>,
}

#[derive(Default)]
struct PresenceState {
    last_activity: Option<Instant>,
    is_active: bool,
    /// Instances keyed by hash of owner key and salt.
    records: HashMap<String, InstanceRecord>,
    active: Vec<UserKey>,
    inactive: Vec<UserKey>,
}

struct PresenceInner {
    config: PresenceConfig,
    salt: [u8; PRESENCE_SALT_SIZE],
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn RecordStore>,
    view: Arc<dyn ThreadView>,
    state: Mutex<PresenceState>,
    update_signal: Signal<()>,
    active_signal: Signal<()>,
    inactive_signal: Signal<()>,
    binding: OnceLock<Weak<StreamBinding>>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

/// Tracks which peers are online and reports the local user's own
/// activity to them.
pub struct PresenceController {
    inner: Arc<PresenceInner>,
    binding: Arc<StreamBinding>,
}

impl PresenceController {
    pub fn new(services: &Services, config: PresenceConfig) -> Result<Self, ControllerError> {
        require_thread_name(&config.thread_name)?;

        let subscription = services.threads.subscribe(
            &config.thread_name,
            &ThreadDefaults::default(),
            &config.fetch,
        )?;

        let inner = Arc::new(PresenceInner {
            salt: rand::random(),
            identity: services.identity.clone(),
            store: services.store.clone(),
            view: subscription.view.clone(),
            state: Mutex::new(PresenceState::default()),
            update_signal: Signal::new(),
            active_signal: Signal::new(),
            inactive_signal: Signal::new(),
            binding: OnceLock::new(),
            timers: Mutex::new(Vec::new()),
            config,
        });

        let binding = StreamBinding::bind(
            &inner.config.thread_name,
            subscription,
            inner.clone() as Arc<dyn Reconciler>,
        );
        let _ = inner.binding.set(Arc::downgrade(&binding));

        let threshold = inner.config.inactive_threshold;
        let refresh_inner = inner.clone();
        let refresh = tokio::spawn(async move {
            loop {
                tokio::time::sleep(threshold / 4).await;
                if refresh_inner.is_closed() {
                    break;
                }
                refresh_inner.refresh();
            }
        });
        let pulse_inner = inner.clone();
        let pulse = tokio::spawn(async move {
            loop {
                tokio::time::sleep(threshold).await;
                if pulse_inner.is_closed() {
                    break;
                }
                if pulse_inner.state.lock().expect("presence state lock").is_active {
                    pulse_inner.clone().post_heartbeat().await;
                }
            }
        });
        inner
            .timers
            .lock()
            .expect("presence timers lock")
            .extend([refresh, pulse]);

        Ok(Self { inner, binding })
    }

    /// The host reports user input through this. An inactive-to-active
    /// transition emits `on_active` and posts a heartbeat right away.
    pub fn activity_detected(&self) {
        let became_active = {
            let mut state = self.inner.state.lock().expect("presence state lock");
            state.last_activity = Some(Instant::now());
            !std::mem::replace(&mut state.is_active, true)
        };
        if became_active {
            self.inner.active_signal.emit(());
            let inner = self.inner.clone();
            tokio::spawn(async move {
                inner.post_heartbeat().await;
            });
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().expect("presence state lock").is_active
    }

    pub fn active_peers(&self) -> Vec<UserKey> {
        self.inner.state.lock().expect("presence state lock").active.clone()
    }

    pub fn inactive_peers(&self) -> Vec<UserKey> {
        self.inner
            .state
            .lock()
            .expect("presence state lock")
            .inactive
            .clone()
    }

    pub fn on_update(&self, listener: impl Fn(()) + Send + Sync + 'static) {
        self.inner.update_signal.connect(listener);
    }

    pub fn on_active(&self, listener: impl Fn(()) + Send + Sync + 'static) {
        self.inner.active_signal.connect(listener);
    }

    pub fn on_inactive(&self, listener: impl Fn(()) + Send + Sync + 'static) {
        self.inner.inactive_signal.connect(listener);
    }

    pub fn on_close(&self, listener: impl Fn(()) + Send + Sync + 'static) {
        self.binding.on_close(listener);
    }

    pub fn close(&self) {
        self.binding.close();
        for timer in self
            .inner
            .timers
            .lock()
            .expect("presence timers lock")
            .drain(..)
        {
            timer.abort();
        }
        let mut state = self.inner.state.lock().expect("presence state lock");
        state.records.clear();
        state.active.clear();
        state.inactive.clear();
    }
}

impl PresenceInner {
    fn is_closed(&self) -> bool {
        self.binding
            .get()
            .and_then(Weak::upgrade)
            .map(|b| b.is_closed())
            .unwrap_or(true)
    }

    async fn post_heartbeat(self: Arc<Self>) {
        let fields = RecordFields {
            data: Bytes::copy_from_slice(&self.salt),
            ..RecordFields::default()
        };
        if let Err(err) = self.store.post(&self.config.thread_name, fields).await {
            warn!(%err, "presence heartbeat failed");
        }
    }

    /// Reclassifies every instance and the local user against the clock.
    fn refresh(&self) {
        let now = Instant::now();
        let threshold = self.config.inactive_threshold;
        let went_inactive = {
            let mut state = self.state.lock().expect("presence state lock");

            let expired = state.is_active
                && state
                    .last_activity
                    .map(|at| now.duration_since(at) >= threshold)
                    .unwrap_or(true);
            if expired {
                state.is_active = false;
            }

            state.records.retain(|_, rec| !rec.items.is_empty());
            let mut active: BTreeMap<String, UserKey> = BTreeMap::new();
            let mut inactive: BTreeMap<String, UserKey> = BTreeMap::new();
            for rec in state.records.values() {
                let slot = if pings_indicate_active(&rec.pings, now, threshold) {
                    &mut active
                } else {
                    &mut inactive
                };
                slot.insert(rec.key.to_hex(), rec.key);
            }
            for hex in active.keys() {
                inactive.remove(hex);
            }
            state.active = active.into_values().collect();
            state.inactive = inactive.into_values().collect();

            expired
        };

        if went_inactive {
            self.inactive_signal.emit(());
        }
        self.update_signal.emit(());
    }

    fn instance_key(record: &Record) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&record.owner.0);
        hasher.update(&record.data);
        hex::encode(hasher.finalize().as_bytes())
    }
}

impl Reconciler for PresenceInner {
    fn on_change(&self, event: &ChangeEvent) {
        {
            let mut state = self.state.lock().expect("presence state lock");
            let now = Instant::now();
            for id in &event.added {
                let Some(record) = self.view.record(id) else {
                    continue;
                };
                let key = Self::instance_key(&record);
                let entry = state.records.entry(key).or_insert_with(|| InstanceRecord {
                    key: record.owner,
                    items: HashMap::new(),
                    pings: Vec::new(),
                });
                entry.items.insert(record.id, record);
                entry.pings.insert(0, now);
                entry.pings.truncate(PINGS_KEPT);
            }
            for id in &event.deleted {
                for rec in state.records.values_mut() {
                    if rec.items.remove(id).is_some() {
                        break;
                    }
                }
            }
        }
        debug!(
            added = event.added.len(),
            deleted = event.deleted.len(),
            "presence change"
        );
        self.refresh();
    }
}

/// A single ping counts while it is fresh. With two or more, the two
/// most recent must be at least half a threshold apart (ruling out a
/// lone burst) and the newest must still be fresh.
fn pings_indicate_active(pings: &[Instant], now: Instant, threshold: Duration) -> bool {
    let fresh_cutoff = threshold * 3 / 2;
    match pings {
        [] => false,
        [only] => now.duration_since(*only) < fresh_cutoff,
        [newest, previous, ..] => {
            newest.duration_since(*previous) >= threshold / 2
                && now.duration_since(*newest) < fresh_cutoff
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_sync::{MemoryHub, RecordStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(byte: u8) -> UserKey {
        UserKey([byte; 32])
    }

    fn config() -> PresenceConfig {
        PresenceConfig {
            inactive_threshold: Duration::from_secs(10),
            ..PresenceConfig::default()
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn classification_rules() {
        let threshold = Duration::from_secs(10);
        // move the paused clock forward so backdated pings cannot underflow
        tokio::time::sleep(Duration::from_secs(100)).await;
        let now = Instant::now();

        assert!(!pings_indicate_active(&[], now, threshold));

        // lone fresh ping
        assert!(pings_indicate_active(&[now - Duration::from_secs(1)], now, threshold));
        // lone stale ping
        assert!(!pings_indicate_active(&[now - Duration::from_secs(16)], now, threshold));

        // well spaced and fresh
        let spaced = [now - Duration::from_secs(1), now - Duration::from_secs(8)];
        assert!(pings_indicate_active(&spaced, now, threshold));

        // a burst: two pings too close together
        let burst = [now - Duration::from_secs(1), now - Duration::from_secs(2)];
        assert!(!pings_indicate_active(&burst, now, threshold));

        // well spaced but stale
        let stale = [now - Duration::from_secs(20), now - Duration::from_secs(40)];
        assert!(!pings_indicate_active(&stale, now, threshold));
    }

    #[tokio::test(start_paused = true)]
    async fn peer_becomes_active_with_spaced_heartbeats() {
        let hub = MemoryHub::new();
        let alice = hub.client(key(1));
        let bob = hub.client(key(2));

        let controller = PresenceController::new(&alice.services(), config()).unwrap();

        let fields = || RecordFields {
            data: Bytes::from_static(&[9, 9, 9, 9]),
            ..RecordFields::default()
        };
        bob.post("presence", fields()).await.unwrap();
        settle().await;
        // a lone fresh ping already counts
        assert_eq!(controller.active_peers(), vec![key(2)]);

        tokio::time::sleep(Duration::from_secs(6)).await;
        bob.post("presence", fields()).await.unwrap();
        settle().await;
        assert_eq!(controller.active_peers(), vec![key(2)]);
        assert!(controller.inactive_peers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_heartbeats_do_not_count_as_active() {
        let hub = MemoryHub::new();
        let alice = hub.client(key(1));
        let bob = hub.client(key(2));

        let controller = PresenceController::new(&alice.services(), config()).unwrap();

        bob.post(
            "presence",
            RecordFields {
                data: Bytes::from_static(&[1, 2, 3, 4]),
                ..RecordFields::default()
            },
        )
        .await
        .unwrap();
        settle().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        bob.post(
            "presence",
            RecordFields {
                data: Bytes::from_static(&[1, 2, 3, 4]),
                ..RecordFields::default()
            },
        )
        .await
        .unwrap();
        settle().await;

        assert!(controller.active_peers().is_empty());
        assert_eq!(controller.inactive_peers(), vec![key(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn lone_ping_goes_stale() {
        let hub = MemoryHub::new();
        let alice = hub.client(key(1));
        let bob = hub.client(key(2));

        let controller = PresenceController::new(&alice.services(), config()).unwrap();

        bob.post(
            "presence",
            RecordFields {
                data: Bytes::from_static(&[0, 0, 0, 1]),
                ..RecordFields::default()
            },
        )
        .await
        .unwrap();
        settle().await;
        assert_eq!(controller.active_peers(), vec![key(2)]);

        // past the 1.5x freshness cutoff; the periodic refresh reclassifies
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(controller.active_peers().is_empty());
        assert_eq!(controller.inactive_peers(), vec![key(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn local_activity_posts_heartbeat_and_expires() {
        let hub = MemoryHub::new();
        let alice = hub.client(key(1));

        let controller = PresenceController::new(&alice.services(), config()).unwrap();

        let inactives = Arc::new(AtomicUsize::new(0));
        let inactives_in = inactives.clone();
        controller.on_inactive(move |_| {
            inactives_in.fetch_add(1, Ordering::SeqCst);
        });

        controller.activity_detected();
        settle().await;
        assert!(controller.is_active());
        assert_eq!(hub.record_count("presence", None), 1);

        // no further input; the refresh timer notices the expiry
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!controller.is_active());
        assert_eq!(inactives.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_repeat_while_active() {
        let hub = MemoryHub::new();
        let alice = hub.client(key(1));

        let mut cfg = config();
        cfg.inactive_threshold = Duration::from_secs(4);
        let controller = PresenceController::new(&alice.services(), cfg).unwrap();

        controller.activity_detected();
        settle().await;
        assert_eq!(hub.record_count("presence", None), 1);

        // keep reporting activity across two pulse periods
        for _ in 0..2 {
            tokio::time::sleep(Duration::from_secs(3)).await;
            controller.activity_detected();
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(hub.record_count("presence", None) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_clears_peers_and_stops_timers() {
        let hub = MemoryHub::new();
        let alice = hub.client(key(1));
        let bob = hub.client(key(2));

        let controller = PresenceController::new(&alice.services(), config()).unwrap();
        bob.post(
            "presence",
            RecordFields {
                data: Bytes::from_static(&[4, 4, 4, 4]),
                ..RecordFields::default()
            },
        )
        .await
        .unwrap();
        settle().await;
        assert!(!controller.active_peers().is_empty());

        let closes = Arc::new(AtomicUsize::new(0));
        let closes_in = closes.clone();
        controller.on_close(move |_| {
            closes_in.fetch_add(1, Ordering::SeqCst);
        });

        controller.close();
        controller.close();
        settle().await;

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(controller.active_peers().is_empty());
        assert!(controller.inactive_peers().is_empty());
    }

    #[tokio::test]
    async fn empty_thread_name_is_rejected() {
        let hub = MemoryHub::new();
        let alice = hub.client(key(1));
        let cfg = PresenceConfig {
            thread_name: String::new(),
            ..config()
        };
        assert!(matches!(
            PresenceController::new(&alice.services(), cfg),
            Err(ControllerError::MissingThreadName)
        ));
    }
}
