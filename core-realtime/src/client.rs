//! Transport multiplexer
//!
//! Owns at most one shared polling channel and at most one push channel per
//! resource, routes inbound payloads to listeners by resource name, and
//! drives bounded reconnection for every channel.
//!
//! ## Channel lifecycle
//!
//! ```text
//! Disconnected → Connecting → Open → Error → Reconnecting → Connecting
//!                                      ↓
//!                                    Closed (attempts exhausted)
//! ```
//!
//! A channel is started by the first subscription routed to it and torn
//! down when its last listener unsubscribes. A `Closed` channel is restarted
//! by the next subscription routed to it.
//!
//! ## Locking
//!
//! Listener sets and channel slots share one `std::sync::Mutex` that is never
//! held across an `await` or while a listener runs.

use bridge_traits::realtime::{ChangeFeed, EventSourceTransport};
use core_api::{ApiClient, ResourceName};
use core_runtime::config::{CoreConfig, ReconnectPolicy};
use core_runtime::events::{ConnectionState, CoreEvent, EventBus, RealtimeEvent};
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::channel::{polling_signals, push_signals, ChannelKey, Signal, SignalStream};
use crate::error::{RealtimeError, Result};

/// Callback receiving every payload delivered for a resource
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

struct ChannelSlot {
    state: ConnectionState,
    attempt: u32,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<ResourceName, Vec<(u64, Listener)>>,
    channels: HashMap<ChannelKey, ChannelSlot>,
}

struct Shared {
    api: ApiClient,
    event_source: Arc<dyn EventSourceTransport>,
    change_feed: Option<Arc<dyn ChangeFeed>>,
    realtime_url: String,
    policy: ReconnectPolicy,
    events: Option<EventBus>,
    registry: Mutex<Registry>,
}

/// Builder for [`RealtimeClient`]
pub struct RealtimeClientBuilder {
    api: ApiClient,
    event_source: Arc<dyn EventSourceTransport>,
    realtime_url: String,
    change_feed: Option<Arc<dyn ChangeFeed>>,
    policy: ReconnectPolicy,
    events: Option<EventBus>,
}

impl RealtimeClientBuilder {
    pub fn change_feed(mut self, feed: Arc<dyn ChangeFeed>) -> Self {
        self.change_feed = Some(feed);
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn build(self) -> RealtimeClient {
        RealtimeClient {
            shared: Arc::new(Shared {
                api: self.api,
                event_source: self.event_source,
                change_feed: self.change_feed,
                realtime_url: self.realtime_url,
                policy: self.policy,
                events: self.events,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }
}

/// Transport multiplexer handle
///
/// Cheap to clone; clones share channels and listeners. Channels stay open
/// until their listeners unsubscribe or [`disconnect`](Self::disconnect) is
/// called.
#[derive(Clone)]
pub struct RealtimeClient {
    shared: Arc<Shared>,
}

impl RealtimeClient {
    pub fn builder(
        api: ApiClient,
        event_source: Arc<dyn EventSourceTransport>,
        realtime_url: impl Into<String>,
    ) -> RealtimeClientBuilder {
        RealtimeClientBuilder {
            api,
            event_source,
            realtime_url: realtime_url.into(),
            change_feed: None,
            policy: ReconnectPolicy::default(),
            events: None,
        }
    }

    pub fn from_config(config: &CoreConfig, api: ApiClient, events: EventBus) -> Self {
        let mut builder = Self::builder(api, Arc::clone(&config.event_source), config.realtime_url())
            .reconnect(config.reconnect)
            .event_bus(events);
        if let Some(feed) = &config.change_feed {
            builder = builder.change_feed(Arc::clone(feed));
        }
        builder.build()
    }

    /// Register `callback` for every payload delivered for `resource`.
    ///
    /// Starts the backing channel if none is running. Must be called from
    /// within a Tokio runtime. Dropping the returned [`Subscription`]
    /// unsubscribes.
    pub fn subscribe<F>(&self, resource: ResourceName, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let key = self.shared.channel_for(resource);
        let id = {
            let mut registry = self.shared.registry();
            registry.next_id += 1;
            let id = registry.next_id;
            registry
                .listeners
                .entry(resource)
                .or_default()
                .push((id, Arc::new(callback)));
            self.shared.ensure_channel(&mut registry, key);
            id
        };

        debug!(resource = %resource, channel = %key, id, "Listener subscribed");
        Subscription {
            shared: Arc::downgrade(&self.shared),
            resource,
            id,
            active: true,
        }
    }

    /// Close every channel and forget every listener.
    ///
    /// Safe to call any number of times.
    #[instrument(skip(self))]
    pub fn disconnect(&self) {
        let channels: Vec<ChannelKey> = {
            let mut registry = self.shared.registry();
            registry.listeners.clear();
            registry
                .channels
                .drain()
                .map(|(key, slot)| {
                    slot.cancel.cancel();
                    key
                })
                .collect()
        };

        for key in &channels {
            self.shared.emit_state(*key, ConnectionState::Disconnected, 0);
        }
        if !channels.is_empty() {
            info!(channels = channels.len(), "Realtime channels disconnected");
        }
    }

    /// Current state of a channel; `Disconnected` when it does not exist.
    pub fn channel_state(&self, key: ChannelKey) -> ConnectionState {
        self.shared
            .registry()
            .channels
            .get(&key)
            .map(|slot| slot.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Channels that still connect or deliver on their own.
    pub fn active_channel_count(&self) -> usize {
        self.shared
            .registry()
            .channels
            .values()
            .filter(|slot| slot.state.is_live())
            .count()
    }

    pub fn listener_count(&self, resource: ResourceName) -> usize {
        self.shared
            .registry()
            .listeners
            .get(&resource)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Channel a resource's updates arrive on.
    pub fn channel_for(&self, resource: ResourceName) -> ChannelKey {
        self.shared.channel_for(resource)
    }
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        // listeners run outside the lock, so a poisoned lock holds consistent data
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push-backed resources use their own channel when a change feed is
    /// available; everything else rides the polling relay.
    fn channel_for(&self, resource: ResourceName) -> ChannelKey {
        if resource.is_push() && self.change_feed.is_some() {
            ChannelKey::Push(resource)
        } else {
            ChannelKey::Polling
        }
    }

    fn ensure_channel(self: &Arc<Self>, registry: &mut Registry, key: ChannelKey) {
        if let Some(slot) = registry.channels.get(&key) {
            if slot.state != ConnectionState::Closed {
                return;
            }
            debug!(channel = %key, "Restarting closed channel");
        }

        let cancel = CancellationToken::new();
        registry.channels.insert(
            key,
            ChannelSlot {
                state: ConnectionState::Connecting,
                attempt: 0,
                cancel: cancel.clone(),
            },
        );

        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.supervise(key, cancel).await });
    }

    fn release(&self, resource: ResourceName, id: u64) {
        let key = self.channel_for(resource);
        let torn_down = {
            let mut registry = self.registry();
            let Some(listeners) = registry.listeners.get_mut(&resource) else {
                return;
            };
            listeners.retain(|(listener_id, _)| *listener_id != id);
            if listeners.is_empty() {
                registry.listeners.remove(&resource);
            }

            let still_used = registry
                .listeners
                .keys()
                .any(|other| self.channel_for(*other) == key);
            if still_used {
                false
            } else if let Some(slot) = registry.channels.remove(&key) {
                slot.cancel.cancel();
                true
            } else {
                false
            }
        };

        debug!(resource = %resource, id, "Listener unsubscribed");
        if torn_down {
            info!(channel = %key, "Last listener gone, channel closed");
            self.emit_state(key, ConnectionState::Disconnected, 0);
        }
    }

    async fn open(&self, key: ChannelKey) -> Result<SignalStream> {
        match key {
            ChannelKey::Polling => {
                let events = self.event_source.open(&self.realtime_url).await?;
                Ok(polling_signals(events))
            }
            ChannelKey::Push(resource) => {
                let feed = self.change_feed.as_ref().ok_or_else(|| {
                    RealtimeError::Transport(format!("No change feed for {}", resource))
                })?;
                let changes = feed.subscribe(resource.as_str()).await?;
                Ok(push_signals(resource, changes, self.api.clone()))
            }
        }
    }

    /// Reconnect loop for one channel; exits on cancellation or exhaustion.
    async fn supervise(self: Arc<Self>, key: ChannelKey, cancel: CancellationToken) {
        let mut attempts: u32 = 0;

        loop {
            if !self.set_state(key, &cancel, ConnectionState::Connecting, attempts) {
                return;
            }

            let opened = tokio::select! {
                _ = cancel.cancelled() => return,
                opened = self.open(key) => opened,
            };

            let failure = match opened {
                Ok(mut signals) => loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => return,
                        next = signals.next() => next,
                    };
                    match next {
                        Some(Signal::Opened) => {
                            attempts = 0;
                            info!(channel = %key, "Channel open");
                            if !self.set_state(key, &cancel, ConnectionState::Open, 0) {
                                return;
                            }
                        }
                        Some(Signal::Deliver { resource, payload }) => {
                            if cancel.is_cancelled() {
                                return;
                            }
                            self.dispatch(resource, &payload);
                        }
                        Some(Signal::Ignored) => {}
                        Some(Signal::Failed(message)) => break message,
                        None => break "Channel closed by remote".to_string(),
                    }
                },
                Err(e) => e.to_string(),
            };
            // the previous stream is dropped at this point

            warn!(channel = %key, attempts, error = %failure, "Channel failed");
            if !self.set_state(key, &cancel, ConnectionState::Error, attempts) {
                return;
            }

            if !self.policy.allows(attempts) {
                error!(channel = %key, attempts, "Reconnect attempts exhausted, channel closed");
                self.set_state(key, &cancel, ConnectionState::Closed, attempts);
                self.emit(RealtimeEvent::ReconnectExhausted {
                    channel: key.to_string(),
                    attempts,
                });
                return;
            }

            attempts += 1;
            let delay = self.policy.delay_for(attempts);
            debug!(channel = %key, attempt = attempts, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
            if !self.set_state(key, &cancel, ConnectionState::Reconnecting, attempts) {
                return;
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Record a state change; `false` once the channel has been torn down.
    fn set_state(
        &self,
        key: ChannelKey,
        cancel: &CancellationToken,
        state: ConnectionState,
        attempt: u32,
    ) -> bool {
        {
            let mut registry = self.registry();
            if cancel.is_cancelled() {
                return false;
            }
            let Some(slot) = registry.channels.get_mut(&key) else {
                return false;
            };
            slot.state = state;
            slot.attempt = attempt;
        }
        self.emit_state(key, state, attempt);
        true
    }

    /// Deliver to every listener in registration order.
    fn dispatch(&self, resource: ResourceName, payload: &Value) {
        let listeners: Vec<(u64, Listener)> = self
            .registry()
            .listeners
            .get(&resource)
            .cloned()
            .unwrap_or_default();

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(payload))).is_err() {
                warn!(resource = %resource, id, "Listener panicked; continuing delivery");
            }
        }
    }

    fn emit_state(&self, key: ChannelKey, state: ConnectionState, attempt: u32) {
        self.emit(RealtimeEvent::ChannelStateChanged {
            channel: key.to_string(),
            state,
            attempt,
        });
    }

    fn emit(&self, event: RealtimeEvent) {
        if let Some(bus) = &self.events {
            let _ = bus.emit(CoreEvent::Realtime(event));
        }
    }
}

/// Handle for one registered listener
///
/// Unsubscribes on drop. Outliving the client is fine.
pub struct Subscription {
    shared: Weak<Shared>,
    resource: ResourceName,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn resource(&self) -> ResourceName {
        self.resource
    }

    /// Remove this listener now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.release(self.resource, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("resource", &self.resource)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
