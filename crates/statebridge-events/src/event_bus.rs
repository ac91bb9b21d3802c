// ABOUTME: Publish/subscribe front door over the listener registry and batched emitter
// ABOUTME: Delivers batches in subscription order and isolates failing subscribers

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use statebridge_logging::{PerformanceMonitor, debug, info, warn};
use statebridge_types::{
    BatchingConfig, BridgeError, BridgeResult, ComponentName, HealthEvent, HealthSink, OwnerTag,
    Payload, ResetCommand, ResetParticipant, SubscriptionId, Topic,
};

use crate::batched_emitter::{BatchedEventEmitter, FlushTarget};
use crate::listener_manager::{Callback, DeliveryMode, EventListenerManager, Subscription};
use crate::scheduler::{Scheduler, panic_message};

pub const DISPATCH_LABEL: &str = "bus.dispatch";

/// Topic-keyed event bus.
///
/// Subscriptions are owned by the [`EventListenerManager`]; the bus only keeps
/// per-topic id lists that fix delivery order. Ids released behind the bus's
/// back are pruned lazily at dispatch.
pub struct OptimizedEventBus {
    listeners: Rc<EventListenerManager>,
    emitter: Rc<BatchedEventEmitter>,
    monitor: Rc<PerformanceMonitor>,
    dispatch: RefCell<HashMap<Topic, Vec<SubscriptionId>>>,
    health: RefCell<Option<Weak<dyn HealthSink>>>,
    shut_down: Cell<bool>,
}

impl OptimizedEventBus {
    pub fn new(
        scheduler: Rc<Scheduler>,
        listeners: Rc<EventListenerManager>,
        monitor: Rc<PerformanceMonitor>,
        batching: &BatchingConfig,
    ) -> Rc<Self> {
        Rc::new_cyclic(|bus: &Weak<Self>| {
            let target: Weak<dyn FlushTarget> = bus.clone();
            Self {
                listeners,
                emitter: BatchedEventEmitter::new(scheduler, batching.max_batch_size, target),
                monitor,
                dispatch: RefCell::new(HashMap::new()),
                health: RefCell::new(None),
                shut_down: Cell::new(false),
            }
        })
    }

    pub fn set_health_sink(&self, sink: Weak<dyn HealthSink>) {
        *self.health.borrow_mut() = Some(sink);
    }

    pub fn listeners(&self) -> &Rc<EventListenerManager> {
        &self.listeners
    }

    pub fn emitter(&self) -> &Rc<BatchedEventEmitter> {
        &self.emitter
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.get()
    }

    /// Queue `payload` for delivery on the next tick.
    pub fn publish(&self, topic: impl Into<Topic>, payload: Payload) -> BridgeResult<()> {
        self.ensure_running()?;
        let topic = topic.into();
        self.emitter.emit(&topic, payload);
        Ok(())
    }

    /// Subscribe without an owner, batched delivery.
    pub fn subscribe(
        &self,
        topic: impl Into<Topic>,
        callback: Callback,
    ) -> BridgeResult<SubscriptionId> {
        self.subscribe_as(OwnerTag::anonymous(), topic, DeliveryMode::Batched, callback)
    }

    pub fn subscribe_as(
        &self,
        owner: OwnerTag,
        topic: impl Into<Topic>,
        mode: DeliveryMode,
        callback: Callback,
    ) -> BridgeResult<SubscriptionId> {
        self.ensure_running()?;
        let topic = topic.into();
        let id = self
            .listeners
            .register_with_mode(owner, topic.clone(), mode, callback);
        self.dispatch.borrow_mut().entry(topic).or_default().push(id);
        Ok(id)
    }

    /// Ids issued before a reset resubscribed the owner are still honored.
    pub fn unsubscribe(&self, id: SubscriptionId) -> BridgeResult<()> {
        let subscription = self.listeners.get(id);
        self.listeners.unregister(id)?;
        if let Some(Subscription { id: current, topic, .. }) = subscription {
            self.prune(&topic, |existing| existing != current);
        }
        Ok(())
    }

    /// Release every subscription of `owner`. Returns how many were removed.
    pub fn unregister_all(&self, owner: &OwnerTag) -> usize {
        let topics: Vec<Topic> = self
            .listeners
            .ids_for_owner(owner)
            .into_iter()
            .filter_map(|id| self.listeners.get(id))
            .map(|subscription| subscription.topic)
            .collect();

        let removed = self.listeners.unregister_all(owner);
        for topic in topics {
            self.prune(&topic, |id| self.listeners.is_registered(id));
        }
        removed
    }

    /// Live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.dispatch
            .borrow()
            .get(topic)
            .map_or(0, |ids| {
                ids.iter()
                    .filter(|id| self.listeners.is_registered(**id))
                    .count()
            })
    }

    pub fn subscription_count(&self) -> usize {
        self.listeners.count()
    }

    pub fn pending_count(&self, topic: &Topic) -> usize {
        self.emitter.pending_count(topic)
    }

    pub fn flush_now(&self, topic: Option<&Topic>) -> usize {
        self.emitter.flush_now(topic)
    }

    /// Drop pending batches and every subscription. Further publishes and
    /// subscribes fail with `BridgeShutdown`.
    pub fn shutdown(&self) -> usize {
        if self.shut_down.replace(true) {
            return 0;
        }

        let dropped = self.emitter.clear_all();
        let mut released = 0;
        for owner in self.listeners.owners() {
            released += self.listeners.unregister_all(&owner);
        }
        self.dispatch.borrow_mut().clear();

        info!(
            dropped_payloads = dropped,
            released_subscriptions = released,
            "Event bus shut down"
        );
        released
    }

    fn ensure_running(&self) -> BridgeResult<()> {
        if self.shut_down.get() {
            Err(BridgeError::BridgeShutdown)
        } else {
            Ok(())
        }
    }

    fn prune(&self, topic: &Topic, keep: impl Fn(SubscriptionId) -> bool) {
        let mut dispatch = self.dispatch.borrow_mut();
        if let Some(ids) = dispatch.get_mut(topic) {
            ids.retain(|id| keep(*id));
            if ids.is_empty() {
                dispatch.remove(topic);
            }
        }
    }

    /// Snapshot of the topic's delivery order, dropping released ids.
    fn live_subscribers(&self, topic: &Topic) -> Vec<SubscriptionId> {
        self.prune(topic, |id| self.listeners.is_registered(id));
        self.dispatch
            .borrow()
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    fn dispatch_batch(&self, topic: &Topic, payloads: &[Payload]) -> usize {
        let mut invoked = 0;

        for id in self.live_subscribers(topic) {
            // Removed by an earlier subscriber of this batch
            let Some(subscription) = self.listeners.get(id) else {
                continue;
            };
            invoked += 1;

            match subscription.mode {
                DeliveryMode::Batched => {
                    self.invoke(&subscription, topic, payloads);
                }
                DeliveryMode::PerPayload => {
                    for payload in payloads {
                        if !self.listeners.is_registered(id) {
                            break;
                        }
                        if !self.invoke(&subscription, topic, std::slice::from_ref(payload)) {
                            break;
                        }
                    }
                }
            }
        }

        invoked
    }

    /// Run one callback, converting errors and panics into a health fault.
    fn invoke(&self, subscription: &Subscription, topic: &Topic, payloads: &[Payload]) -> bool {
        let callback = Rc::clone(&subscription.callback);
        let outcome = catch_unwind(AssertUnwindSafe(|| callback(topic, payloads)));

        let message = match outcome {
            Ok(Ok(())) => return true,
            Ok(Err(error)) => format!("{error:#}"),
            Err(panic) => panic_message(panic.as_ref()),
        };

        warn!(
            subscription = %subscription.id,
            owner = %subscription.owner,
            topic = %topic,
            error = %message,
            "Subscriber delivery failed"
        );

        let fault = BridgeError::DeliveryFailure {
            owner: subscription.owner.clone(),
            topic: topic.clone(),
            message,
        };
        let sink = self.health.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(sink) = sink {
            sink.report(
                ComponentName::Owner(subscription.owner.clone()),
                HealthEvent::Fault(fault),
            );
        }
        false
    }
}

impl FlushTarget for OptimizedEventBus {
    fn deliver(&self, topic: &Topic, payloads: Vec<Payload>) -> usize {
        self.monitor
            .measure(DISPATCH_LABEL, || self.dispatch_batch(topic, &payloads))
    }
}

impl ResetParticipant for OptimizedEventBus {
    fn participant(&self) -> ComponentName {
        ComponentName::OptimizedEventBus
    }

    fn handle_reset(&self, command: &ResetCommand) -> BridgeResult<()> {
        match command {
            ResetCommand::Resubscribe { owner } => {
                let mapping = self.listeners.resubscribe_owner(owner);
                let renamed: HashMap<SubscriptionId, SubscriptionId> =
                    mapping.iter().copied().collect();

                // New ids take the old ones' places so delivery order survives
                for ids in self.dispatch.borrow_mut().values_mut() {
                    for id in ids.iter_mut() {
                        if let Some(new_id) = renamed.get(id) {
                            *id = *new_id;
                        }
                    }
                }
                debug!(owner = %owner, resubscribed = mapping.len(), "Owner resubscribed on bus");
                Ok(())
            }
            ResetCommand::ClearQueues { owner: None } => {
                self.emitter.clear_all();
                Ok(())
            }
            ResetCommand::ClearQueues { owner: Some(owner) } => {
                let mut topics: Vec<Topic> = self
                    .listeners
                    .ids_for_owner(owner)
                    .into_iter()
                    .filter_map(|id| self.listeners.get(id))
                    .map(|subscription| subscription.topic)
                    .collect();
                topics.sort();
                topics.dedup();
                for topic in &topics {
                    self.emitter.clear(topic);
                }
                Ok(())
            }
            ResetCommand::RollbackTo { .. } | ResetCommand::ReplaySnapshot { .. } => Ok(()),
        }
    }
}

impl fmt::Debug for OptimizedEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimizedEventBus")
            .field("topics", &self.dispatch.borrow().len())
            .field("subscriptions", &self.listeners.count())
            .field("shut_down", &self.shut_down.get())
            .finish_non_exhaustive()
    }
}
