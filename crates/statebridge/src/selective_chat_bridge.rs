// ABOUTME: Chat-session facade connecting a legacy view and a modern store through shared state
// ABOUTME: Legacy events batch through the bus, store mutations apply directly, changes fan out to the other side

use std::cell::{Cell, RefCell};
use std::fmt;
use std::path::Path;
use std::rc::{Rc, Weak};

use anyhow::Context;
use statebridge_core::{
    BridgeState, BridgeStatusManager, MemoryManager, Origin, SelfHealing, StateChange,
    StateManager, change_callback,
};
use statebridge_events::{
    Callback, DeliveryMode, EventListenerManager, OptimizedEventBus, Scheduler, callback,
};
use statebridge_logging::{PerformanceMonitor, debug, info, trace};
use statebridge_types::{
    AllocationKind, AllocationTracker, BridgeError, BridgeResult, Clock, ComponentName, HealthSink, OwnerTag,
    Payload, ResetParticipant, Revision, StatePatch, StateValue, SubscriptionId, Sweepable,
    SystemClock, Topic,
};

use crate::adapters::{LegacyView, ModernStore};
use crate::chat::{
    ChatChannel, ChatPatchBuilder, LegacyChatEvent, LegacyUpdate, STATE_SYNC, StoreMutation,
};
use crate::config::{ChatConfig, StatebridgeConfig};
use crate::diagnostics::ChatBridgeDiagnostics;

/// Bus owner of the subscriptions that carry legacy events into state
pub const LEGACY_INGRESS_OWNER: &str = "chat-bridge:legacy-ingress";
/// Change-listener owner that forwards changes to the modern store
pub const MODERN_STORE_OWNER: &str = "modern-store";
/// Change-listener owner that forwards changes to the legacy view
pub const LEGACY_VIEW_OWNER: &str = "legacy-view";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Legacy,
    Modern,
}

/// Marks which side is being written to until dropped.
struct Delivery<'a> {
    current: &'a Cell<Option<Side>>,
    previous: Option<Side>,
}

impl<'a> Delivery<'a> {
    fn enter(current: &'a Cell<Option<Side>>, side: Side) -> Self {
        let previous = current.replace(Some(side));
        Self { current, previous }
    }
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        self.current.set(self.previous);
    }
}

/// Bridges chat-session state between a legacy view and a modern store.
///
/// Only the configured chat channels cross. Legacy events are published on
/// the bus, so keystroke-rate events such as drafts coalesce into one state
/// patch per tick. Modern mutations are applied directly. Every change is
/// forwarded to the side that did not produce it; calls back into the bridge
/// made while a side is being updated are dropped as echoes.
pub struct SelectiveChatBridge {
    chat: ChatConfig,
    scheduler: Rc<Scheduler>,
    monitor: Rc<PerformanceMonitor>,
    bus: Rc<OptimizedEventBus>,
    state: Rc<StateManager>,
    memory: Rc<MemoryManager>,
    status: Rc<BridgeStatusManager>,
    healing: Rc<SelfHealing>,
    diagnostics: ChatBridgeDiagnostics,
    modern: RefCell<Option<Rc<dyn ModernStore>>>,
    legacy: RefCell<Option<Rc<dyn LegacyView>>>,
    delivering_to: Cell<Option<Side>>,
    echoes_suppressed: Cell<u64>,
    shut_down: Cell<bool>,
}

impl SelectiveChatBridge {
    pub fn new(config: StatebridgeConfig) -> BridgeResult<Rc<Self>> {
        Self::with_clock(config, Rc::new(SystemClock))
    }

    pub fn from_config_file(path: &Path) -> BridgeResult<Rc<Self>> {
        let config =
            StatebridgeConfig::load_from_file(path).map_err(|error| BridgeError::Config {
                message: format!("{error:#}"),
            })?;
        Self::new(config)
    }

    /// Build and wire every component against `clock`.
    pub fn with_clock(config: StatebridgeConfig, clock: Rc<dyn Clock>) -> BridgeResult<Rc<Self>> {
        config.validate()?;
        let StatebridgeConfig { bridge, chat, .. } = config;

        let scheduler = Scheduler::new(clock.clone());
        let monitor = Rc::new(PerformanceMonitor::new(
            bridge.performance.window_size,
            bridge.performance.slow_threshold(),
        ));
        let listeners = EventListenerManager::new(clock.clone());
        let bus = OptimizedEventBus::new(
            scheduler.clone(),
            listeners.clone(),
            monitor.clone(),
            &bridge.batching,
        );
        let state = StateManager::new(monitor.clone());
        let memory = MemoryManager::new(bridge.memory.clone());
        let status = BridgeStatusManager::new(clock.clone());
        let healing = SelfHealing::new(
            bridge.healing.clone(),
            scheduler.clone(),
            status.clone(),
            &state,
        );

        let tracker = Rc::downgrade(&memory);

        let tracker: Weak<dyn AllocationTracker> = tracker;
        listeners.set_tracker(tracker.clone());
        bus.emitter().set_tracker(tracker.clone());
        state.set_tracker(tracker);

        let sink = Rc::downgrade(&healing);

        let sink: Weak<dyn HealthSink> = sink;
        bus.set_health_sink(sink.clone());
        state.set_health_sink(sink.clone());
        memory.set_health_sink(sink);

        let batches = Rc::downgrade(bus.emitter());

        let batches: Weak<dyn Sweepable> = batches;
        let revisions = Rc::downgrade(&state);
        let revisions: Weak<dyn Sweepable> = revisions;
        memory.register_sweepable(batches);
        memory.register_sweepable(revisions);

        let bus_participant = Rc::downgrade(&bus);

        let bus_participant: Weak<dyn ResetParticipant> = bus_participant;
        let state_participant = Rc::downgrade(&state);
        let state_participant: Weak<dyn ResetParticipant> = state_participant;
        healing.register_participant(bus_participant);
        healing.register_participant(state_participant);

        memory.schedule_sweeps(&scheduler);
        healing.start();

        let diagnostics = ChatBridgeDiagnostics::new(
            clock,
            status.clone(),
            healing.clone(),
            monitor.clone(),
            memory.clone(),
            state.clone(),
            bus.clone(),
        );

        let bridge = Rc::new(Self {
            chat,
            scheduler,
            monitor,
            bus,
            state,
            memory,
            status,
            healing,
            diagnostics,
            modern: RefCell::new(None),
            legacy: RefCell::new(None),
            delivering_to: Cell::new(None),
            echoes_suppressed: Cell::new(0),
            shut_down: Cell::new(false),
        });
        bridge.connect_internal_listeners()?;

        info!(
            channels = ?bridge.chat.channels,
            subscriptions = bridge.subscription_count(),
            "Chat bridge initialized"
        );
        Ok(bridge)
    }

    fn connect_internal_listeners(self: &Rc<Self>) -> BridgeResult<()> {
        for channel in &self.chat.channels {
            let bridge = Rc::downgrade(self);
            self.bus.subscribe_as(
                OwnerTag::new(LEGACY_INGRESS_OWNER),
                channel.topic(),
                DeliveryMode::Batched,
                callback(move |topic, payloads| match bridge.upgrade() {
                    Some(bridge) => bridge.ingest(topic, payloads),
                    None => Ok(()),
                }),
            )?;
        }

        let bridge = Rc::downgrade(self);
        self.state.subscribe_to_changes_as(
            OwnerTag::new(MODERN_STORE_OWNER),
            change_callback(move |change| match bridge.upgrade() {
                Some(bridge) => bridge.forward_to_modern(change),
                None => Ok(()),
            }),
        );

        let bridge = Rc::downgrade(self);
        self.state.subscribe_to_changes_as(
            OwnerTag::new(LEGACY_VIEW_OWNER),
            change_callback(move |change| match bridge.upgrade() {
                Some(bridge) => bridge.forward_to_legacy(change),
                None => Ok(()),
            }),
        );
        Ok(())
    }

    pub fn connect_modern(&self, store: Rc<dyn ModernStore>) {
        *self.modern.borrow_mut() = Some(store);
        info!("Modern store connected");
    }

    pub fn connect_legacy(&self, view: Rc<dyn LegacyView>) {
        *self.legacy.borrow_mut() = Some(view);
        info!("Legacy view connected");
    }

    /// Bridge an event raised by the legacy view. Returns false when the
    /// channel is not bridged or the event is an echo.
    pub fn handle_legacy_event(&self, event: LegacyChatEvent) -> BridgeResult<bool> {
        self.ensure_running()?;
        let channel = event.channel();
        if !self.chat.is_enabled(channel) {
            trace!(channel = %channel, "Legacy event on unbridged channel");
            return Ok(false);
        }
        if self.delivering_to.get() == Some(Side::Legacy) {
            self.suppress_echo(Side::Legacy, channel);
            return Ok(false);
        }

        self.bus.publish(channel.topic(), event.to_payload())?;
        Ok(true)
    }

    /// Apply a mutation made in the modern store. Returns the new revision, or
    /// `None` when nothing crossed the bridge.
    pub fn handle_store_mutation(&self, mutation: StoreMutation) -> BridgeResult<Option<Revision>> {
        self.apply_modern(mutation, None)
    }

    /// As `handle_store_mutation`, for a store that last saw `revision`. A
    /// stale revision is recorded as a conflict; the mutation still wins.
    pub fn handle_store_mutation_at(
        &self,
        mutation: StoreMutation,
        revision: Revision,
    ) -> BridgeResult<Option<Revision>> {
        self.apply_modern(mutation, Some(revision))
    }

    fn apply_modern(
        &self,
        mutation: StoreMutation,
        expected: Option<Revision>,
    ) -> BridgeResult<Option<Revision>> {
        self.ensure_running()?;
        let channel = mutation.channel();
        if !self.chat.is_enabled(channel) {
            trace!(channel = %channel, "Store mutation on unbridged channel");
            return Ok(None);
        }
        if self.delivering_to.get() == Some(Side::Modern) {
            self.suppress_echo(Side::Modern, channel);
            return Ok(None);
        }

        let patch = self
            .patch_for([mutation])
            .map_err(|error| BridgeError::InvalidPayload {
                message: error.to_string(),
            })?;
        if patch.is_empty() {
            return Ok(None);
        }
        self.state
            .apply_from(Origin::Modern, patch, expected)
            .map(Some)
    }

    /// Subscribe a legacy UI component to a bus topic. Release everything it
    /// holds with `detach_component`.
    pub fn attach_legacy_listener(
        &self,
        owner: impl Into<OwnerTag>,
        topic: impl Into<Topic>,
        callback: Callback,
    ) -> BridgeResult<SubscriptionId> {
        self.ensure_running()?;
        self.bus
            .subscribe_as(owner.into(), topic, DeliveryMode::Batched, callback)
    }

    /// Release every bus subscription and change listener held by `owner`
    /// and forget its health record.
    pub fn detach_component(&self, owner: &OwnerTag) -> usize {
        let subscriptions = self.bus.unregister_all(owner);
        let listeners = self.state.unsubscribe_owner(owner);
        let forgotten = self.healing.forget(&ComponentName::Owner(owner.clone()));
        info!(
            owner = %owner,
            subscriptions,
            listeners,
            health_dropped = forgotten,
            "Component detached"
        );
        subscriptions + listeners
    }

    /// Re-deliver the current state to both sides.
    pub fn resync(&self) -> BridgeResult<usize> {
        self.ensure_running()?;
        self.state.replay(None)
    }

    /// Retry a component SelfHealing has given up on.
    pub fn reset_component(&self, component: &ComponentName) -> BridgeResult<()> {
        self.ensure_running()?;
        self.healing.reset_now(component)
    }

    /// Run one scheduler tick.
    pub fn run_tick(&self) -> usize {
        self.scheduler.run_tick()
    }

    /// Run ticks until no ready work remains.
    pub fn pump(&self) -> usize {
        self.scheduler.run_until_idle()
    }

    pub fn snapshot(&self) -> (BridgeState, Revision) {
        self.state.get_snapshot()
    }

    pub fn get(&self, key: &str) -> Option<StateValue> {
        self.state.get(key)
    }

    /// Live subscriptions of every kind: bus subscriptions plus state change
    /// listeners. The same count drives the leak warning.
    pub fn subscription_count(&self) -> usize {
        self.memory.tracked_count(AllocationKind::Subscription)
    }

    pub fn echoes_suppressed(&self) -> u64 {
        self.echoes_suppressed.get()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.get()
    }

    pub fn scheduler(&self) -> &Rc<Scheduler> {
        &self.scheduler
    }

    pub fn bus(&self) -> &Rc<OptimizedEventBus> {
        &self.bus
    }

    pub fn state(&self) -> &Rc<StateManager> {
        &self.state
    }

    pub fn memory(&self) -> &Rc<MemoryManager> {
        &self.memory
    }

    pub fn monitor(&self) -> &Rc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn status(&self) -> &Rc<BridgeStatusManager> {
        &self.status
    }

    pub fn healing(&self) -> &Rc<SelfHealing> {
        &self.healing
    }

    pub fn diagnostics(&self) -> &ChatBridgeDiagnostics {
        &self.diagnostics
    }

    /// Tear down every subscription and stop accepting events and mutations.
    pub fn shutdown(&self) {
        if self.shut_down.replace(true) {
            return;
        }

        self.healing.stop();
        self.memory.stop_sweeps(&self.scheduler);
        let released = self.bus.shutdown();
        self.state.shutdown();
        self.modern.borrow_mut().take();
        self.legacy.borrow_mut().take();

        info!(
            released_subscriptions = released,
            revision = %self.state.revision(),
            "Chat bridge shut down"
        );
    }

    fn ensure_running(&self) -> BridgeResult<()> {
        if self.shut_down.get() {
            return Err(BridgeError::BridgeShutdown);
        }
        Ok(())
    }

    fn suppress_echo(&self, side: Side, channel: ChatChannel) {
        self.echoes_suppressed.set(self.echoes_suppressed.get() + 1);
        debug!(side = ?side, channel = %channel, "Suppressed echo");
    }

    fn patch_for(
        &self,
        mutations: impl IntoIterator<Item = StoreMutation>,
    ) -> serde_json::Result<StatePatch> {
        let (snapshot, _) = self.state.get_snapshot();
        let mut builder = ChatPatchBuilder::new(&snapshot);
        for mutation in mutations {
            builder.push(&mutation)?;
        }
        Ok(builder.finish())
    }

    /// Batched delivery of legacy events on one channel: the whole batch
    /// becomes a single patch.
    fn ingest(&self, topic: &Topic, payloads: &[Payload]) -> anyhow::Result<()> {
        let Some(channel) = ChatChannel::from_topic(topic) else {
            return Ok(());
        };
        let mutations: Vec<StoreMutation> = payloads
            .iter()
            .filter_map(|payload| LegacyChatEvent::decode(channel, payload))
            .map(StoreMutation::from)
            .collect();
        if mutations.is_empty() {
            return Ok(());
        }

        let events = mutations.len();
        let patch = self
            .patch_for(mutations)
            .with_context(|| format!("Failed to translate {channel} events"))?;
        if patch.is_empty() {
            return Ok(());
        }
        let revision = self.state.apply_from(Origin::Legacy, patch, None)?;
        debug!(channel = %channel, events, revision = %revision, "Legacy events applied");
        Ok(())
    }

    fn updates_for(&self, change: &StateChange) -> anyhow::Result<Vec<LegacyUpdate>> {
        let updates = LegacyUpdate::from_change(change)
            .with_context(|| format!("Failed to read chat state at {}", change.revision))?;
        Ok(updates
            .into_iter()
            .filter(|update| self.chat.is_enabled(update.channel()))
            .collect())
    }

    fn forward_to_modern(&self, change: &StateChange) -> anyhow::Result<()> {
        if change.origin == Origin::Modern {
            return Ok(());
        }
        let Some(store) = self.modern.borrow().clone() else {
            return Ok(());
        };
        let mutations: Vec<StoreMutation> = self
            .updates_for(change)?
            .into_iter()
            .map(StoreMutation::from)
            .collect();
        if mutations.is_empty() {
            return Ok(());
        }

        let _delivery = Delivery::enter(&self.delivering_to, Side::Modern);
        for mutation in &mutations {
            store.commit(mutation).with_context(|| {
                format!("Modern store rejected {} mutation", mutation.channel())
            })?;
        }
        debug!(
            revision = %change.revision,
            origin = ?change.origin,
            mutations = mutations.len(),
            "Forwarded change to modern store"
        );
        Ok(())
    }

    fn forward_to_legacy(&self, change: &StateChange) -> anyhow::Result<()> {
        if change.origin == Origin::Legacy {
            return Ok(());
        }
        let updates = self.updates_for(change)?;
        if updates.is_empty() {
            return Ok(());
        }

        let view = self.legacy.borrow().clone();
        if let Some(view) = view {
            let _delivery = Delivery::enter(&self.delivering_to, Side::Legacy);
            for update in &updates {
                view.render(update).with_context(|| {
                    format!("Legacy view failed to render {} update", update.channel())
                })?;
            }
        }

        // Attached legacy listeners see modern-side changes on the sync topic
        let sync = Topic::new(STATE_SYNC);
        if !self.bus.is_shut_down() && self.bus.subscriber_count(&sync) > 0 {
            for update in &updates {
                self.bus.publish(&sync, update.to_payload()?)?;
            }
        }
        debug!(
            revision = %change.revision,
            origin = ?change.origin,
            updates = updates.len(),
            "Forwarded change to legacy side"
        );
        Ok(())
    }
}

impl fmt::Debug for SelectiveChatBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectiveChatBridge")
            .field("channels", &self.chat.channels)
            .field("revision", &self.state.revision())
            .field("subscriptions", &self.subscription_count())
            .field("overall", &self.status.overall())
            .field("shut_down", &self.shut_down.get())
            .finish_non_exhaustive()
    }
}
