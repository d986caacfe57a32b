//! The channel list: one record per channel, reconciled into display
//! entries, plus lazily created per-channel timeline controllers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use chrono::{DateTime, Utc};
use tracing::debug;

use palaver_shared::{ItemId, UserKey};
use palaver_sync::{
    ChangeEvent, FetchParams, Record, RecordFields, Services, ThreadDefaults, ThreadView,
};

use crate::binding::{require_thread_name, Reconciler, StreamBinding};
use crate::channel::{ChannelConfig, ChannelController};
use crate::error::ControllerError;
use crate::objects::ObjectStore;
use crate::signal::Signal;

#[derive(Debug, Clone)]
pub struct ChannelsConfig {
    pub thread_name: String,
    pub fetch: FetchParams,
    /// Configuration handed to every per-channel controller.
    pub channel: ChannelConfig,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            thread_name: "channels".to_string(),
            fetch: FetchParams::default(),
            channel: ChannelConfig::default(),
        }
    }
}

/// One entry of the channel list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Private channel between exactly two parties.
    pub is_direct: bool,
    pub name: String,
    /// The channel currently shown; at most one channel is active.
    pub active: bool,
    pub open: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct ChannelsState {
    order: Vec<ItemId>,
    channels: HashMap<ItemId, Channel>,
    controllers: HashMap<ItemId, Arc<ChannelController>>,
    notifications: HashMap<ItemId, bool>,
}

struct ChannelsInner {
    config: ChannelsConfig,
    services: Services,
    objects: Arc<ObjectStore>,
    view: Arc<dyn ThreadView>,
    state: Mutex<ChannelsState>,
    update_signal: Signal<()>,
    binding: OnceLock<Weak<StreamBinding>>,
}

/// Maintains the channel list and its per-channel sub-controllers.
pub struct ChannelsController {
    inner: Arc<ChannelsInner>,
    binding: Arc<StreamBinding>,
}

impl ChannelsController {
    pub fn new(
        services: &Services,
        objects: Arc<ObjectStore>,
        config: ChannelsConfig,
    ) -> Result<Self, ControllerError> {
        require_thread_name(&config.thread_name)?;

        let subscription = services.threads.subscribe(
            &config.thread_name,
            &ThreadDefaults::default(),
            &config.fetch,
        )?;

        let inner = Arc::new(ChannelsInner {
            services: services.clone(),
            objects,
            view: subscription.view.clone(),
            state: Mutex::new(ChannelsState::default()),
            update_signal: Signal::new(),
            binding: OnceLock::new(),
            config,
        });
        let binding = StreamBinding::bind(
            &inner.config.thread_name,
            subscription,
            inner.clone() as Arc<dyn Reconciler>,
        );
        let _ = inner.binding.set(Arc::downgrade(&binding));

        Ok(Self { inner, binding })
    }

    /// Channel list snapshot in creation order.
    pub fn channels(&self) -> Vec<(ItemId, Channel)> {
        let state = self.inner.state.lock().expect("channels lock");
        state
            .order
            .iter()
            .filter_map(|id| state.channels.get(id).map(|c| (*id, c.clone())))
            .collect()
    }

    pub fn channel(&self, id: &ItemId) -> Option<Channel> {
        self.inner
            .state
            .lock()
            .expect("channels lock")
            .channels
            .get(id)
            .cloned()
    }

    pub fn has_notification(&self, id: &ItemId) -> bool {
        self.inner
            .state
            .lock()
            .expect("channels lock")
            .notifications
            .get(id)
            .copied()
            .unwrap_or(false)
    }

    /// Makes `id` the single active channel and clears its pending
    /// notification marker.
    pub fn set_channel_active(&self, id: ItemId) {
        let mut state = self.inner.state.lock().expect("channels lock");
        for (channel_id, channel) in state.channels.iter_mut() {
            channel.active = *channel_id == id;
        }
        state.notifications.insert(id, false);
    }

    pub fn open_channel(&self, id: ItemId) {
        let mut state = self.inner.state.lock().expect("channels lock");
        if let Some(channel) = state.channels.get_mut(&id) {
            channel.open = true;
        }
    }

    /// The timeline controller for one channel, created on first use and
    /// cached afterwards.
    pub fn channel_controller(
        &self,
        id: ItemId,
    ) -> Result<Arc<ChannelController>, ControllerError> {
        {
            let state = self.inner.state.lock().expect("channels lock");
            if let Some(existing) = state.controllers.get(&id) {
                return Ok(existing.clone());
            }
        }

        let record = self
            .binding
            .record(&id)
            .ok_or(ControllerError::UnknownItem(id))?;
        let controller = Arc::new(ChannelController::new(
            &self.inner.services,
            self.inner.objects.clone(),
            record,
            self.inner.config.channel.clone(),
        )?);

        let weak = Arc::downgrade(&self.inner);
        controller.on_notification(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.note_notification(id);
            }
        });

        let mut state = self.inner.state.lock().expect("channels lock");
        let controller = state
            .controllers
            .entry(id)
            .or_insert(controller)
            .clone();
        Ok(controller)
    }

    /// Returns the direct channel with `peer`, creating it if neither
    /// party has done so yet. The lookup is symmetric, so both parties
    /// converge on one record regardless of who created it.
    pub async fn make_private_channel(&self, peer: UserKey) -> Result<ItemId, ControllerError> {
        let own = self.inner.services.identity.public_key();
        for id in self.binding.ordered() {
            let Some(record) = self.binding.record(&id) else {
                continue;
            };
            let Some(reference) = record.reference else {
                continue;
            };
            let matches = (record.owner == own && reference == peer)
                || (record.owner == peer && reference == own);
            if matches {
                return Ok(record.id);
            }
        }

        let records = self
            .inner
            .services
            .store
            .post(
                &self.inner.config.thread_name,
                RecordFields {
                    reference: Some(peer),
                    ..RecordFields::default()
                },
            )
            .await?;
        let record = records
            .into_iter()
            .next()
            .ok_or(ControllerError::RecordCreation)?;
        debug!(id = %record.id.short(), "created private channel");

        if record.licensed {
            let targets = if peer == own { vec![own] } else { vec![peer, own] };
            self.inner
                .services
                .store
                .post_license(&record, &targets)
                .await?;
        }
        Ok(record.id)
    }

    pub fn on_update(&self, listener: impl Fn(()) + Send + Sync + 'static) {
        self.inner.update_signal.connect(listener);
    }

    pub fn on_close(&self, listener: impl Fn(()) + Send + Sync + 'static) {
        self.binding.on_close(listener);
    }

    pub fn close(&self) {
        self.binding.close();
        let controllers: Vec<Arc<ChannelController>> = {
            let mut state = self.inner.state.lock().expect("channels lock");
            state.channels.clear();
            state.order.clear();
            state.notifications.clear();
            state.controllers.drain().map(|(_, c)| c).collect()
        };
        for controller in controllers {
            controller.close();
        }
    }
}

impl ChannelsInner {
    fn reconcile_item(&self, id: &ItemId, is_new: bool) {
        let Some(record) = self.view.record(id) else {
            return;
        };
        let own = self.services.identity.public_key();
        let (name, is_direct) = channel_display_name(&record, &own);

        let mut guard = self.state.lock().expect("channels lock");
        let state = &mut *guard;
        let channel = state.channels.entry(*id).or_insert(Channel {
            is_direct,
            name: name.clone(),
            active: false,
            open: false,
            created_at: record.created_at,
        });
        channel.name = name;
        channel.is_direct = is_direct;
        channel.created_at = record.created_at;

        if is_new && !state.order.contains(id) {
            let sort_key = (record.created_at, *id);
            let at = state
                .order
                .iter()
                .position(|existing| {
                    state
                        .channels
                        .get(existing)
                        .map(|c| (c.created_at, *existing) > sort_key)
                        .unwrap_or(false)
                })
                .unwrap_or(state.order.len());
            state.order.insert(at, *id);
        }
    }

    fn remove_item(&self, id: &ItemId) {
        let controller = {
            let mut state = self.state.lock().expect("channels lock");
            state.channels.remove(id);
            state.order.retain(|item| item != id);
            state.notifications.remove(id);
            state.controllers.remove(id)
        };
        if let Some(controller) = controller {
            controller.close();
        }
    }

    /// A sub-controller saw a foreign record. Inactive channels get a
    /// pending notification marker; the active one is already on screen.
    fn note_notification(&self, id: ItemId) {
        let marked = {
            let mut state = self.state.lock().expect("channels lock");
            let active = state.channels.get(&id).map(|c| c.active).unwrap_or(false);
            if active {
                false
            } else {
                state.notifications.insert(id, true);
                true
            }
        };
        if marked {
            self.update_signal.emit(());
        }
    }
}

impl Reconciler for ChannelsInner {
    fn on_change(&self, event: &ChangeEvent) {
        for id in &event.updated {
            self.reconcile_item(id, false);
        }
        for id in &event.added {
            self.reconcile_item(id, true);
        }
        for id in &event.deleted {
            self.remove_item(id);
        }
        self.update_signal.emit(());
    }
}

/// A direct channel is displayed under the other party's short key; for
/// a self-channel both parties are the local user. Group channels carry
/// their label in the record text.
fn channel_display_name(record: &Record, own: &UserKey) -> (String, bool) {
    match record.reference {
        Some(reference) => {
            let other = if reference == *own {
                record.owner
            } else {
                reference
            };
            (other.short(), true)
        }
        None => {
            let name = record
                .text()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Unnamed channel".to_string());
            (name, false)
        }
    }
}
