// ABOUTME: Registry of subscriptions with an owner index for bulk teardown
// ABOUTME: Every registration and release is reported to the allocation tracker

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;

use statebridge_logging::debug;
use statebridge_types::{
    AllocationKind, AllocationRef, AllocationTracker, BridgeError, BridgeResult, Clock, OwnerTag,
    Payload, SubscriptionId, Topic,
};

/// Subscriber callback. Receives the topic and the delivered payloads.
pub type Callback = Rc<dyn Fn(&Topic, &[Payload]) -> anyhow::Result<()>>;

/// Wrap a closure as a [`Callback`].
pub fn callback(f: impl Fn(&Topic, &[Payload]) -> anyhow::Result<()> + 'static) -> Callback {
    Rc::new(f)
}

/// How a subscriber receives a flushed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// One call per flush with every payload of the batch
    #[default]
    Batched,
    /// One call per payload, in arrival order
    PerPayload,
}

#[derive(Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub topic: Topic,
    pub owner: OwnerTag,
    pub mode: DeliveryMode,
    pub created_at: Instant,
    pub callback: Callback,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("owner", &self.owner)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    fn allocation(&self) -> AllocationRef {
        AllocationRef::owned(self.id.as_u64(), self.owner.clone())
    }
}

#[derive(Default)]
struct Registry {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    by_owner: HashMap<OwnerTag, Vec<SubscriptionId>>,
    /// Ids handed out before a resubscribe, mapped to the live id
    aliases: HashMap<SubscriptionId, SubscriptionId>,
}

impl Registry {
    fn insert(&mut self, subscription: Subscription) {
        self.by_owner
            .entry(subscription.owner.clone())
            .or_default()
            .push(subscription.id);
        self.subscriptions.insert(subscription.id, subscription);
    }

    fn resolve(&self, id: SubscriptionId) -> SubscriptionId {
        self.aliases.get(&id).copied().unwrap_or(id)
    }

    fn rename(&mut self, old: SubscriptionId, new: SubscriptionId) {
        for current in self.aliases.values_mut() {
            if *current == old {
                *current = new;
            }
        }
        self.aliases.insert(old, new);
    }

    fn remove(&mut self, id: SubscriptionId) -> Option<Subscription> {
        let subscription = self.subscriptions.remove(&id)?;
        if let Some(ids) = self.by_owner.get_mut(&subscription.owner) {
            ids.retain(|existing| *existing != id);
            if ids.is_empty() {
                self.by_owner.remove(&subscription.owner);
            }
        }
        if !self.aliases.is_empty() {
            self.aliases.retain(|_, current| *current != id);
        }
        Some(subscription)
    }
}

/// Owns every Subscription of the bridge.
pub struct EventListenerManager {
    clock: Rc<dyn Clock>,
    registry: RefCell<Registry>,
    tracker: RefCell<Option<Weak<dyn AllocationTracker>>>,
}

impl EventListenerManager {
    pub fn new(clock: Rc<dyn Clock>) -> Rc<Self> {
        Rc::new(Self {
            clock,
            registry: RefCell::new(Registry::default()),
            tracker: RefCell::new(None),
        })
    }

    pub fn set_tracker(&self, tracker: Weak<dyn AllocationTracker>) {
        *self.tracker.borrow_mut() = Some(tracker);
    }

    pub fn register(&self, owner: OwnerTag, topic: Topic, callback: Callback) -> SubscriptionId {
        self.register_with_mode(owner, topic, DeliveryMode::Batched, callback)
    }

    pub fn register_with_mode(
        &self,
        owner: OwnerTag,
        topic: Topic,
        mode: DeliveryMode,
        callback: Callback,
    ) -> SubscriptionId {
        let subscription = Subscription {
            id: SubscriptionId::next(),
            topic,
            owner,
            mode,
            created_at: self.clock.now(),
            callback,
        };
        let id = subscription.id;
        let allocation = subscription.allocation();

        debug!(
            subscription = %id,
            topic = %subscription.topic,
            owner = %subscription.owner,
            "Subscription registered"
        );
        self.registry.borrow_mut().insert(subscription);
        self.with_tracker(|tracker| tracker.track_allocation(AllocationKind::Subscription, allocation));
        id
    }

    /// Remove a subscription. Unknown ids are a successful no-op. An id
    /// issued before a resubscribe still names the renewed subscription.
    pub fn unregister(&self, id: SubscriptionId) -> BridgeResult<()> {
        let current = self.registry.borrow().resolve(id);
        match self.release(current) {
            Some(subscription) => {
                debug!(subscription = %id, owner = %subscription.owner, "Subscription released");
            }
            None => {
                debug!(
                    error = %BridgeError::SubscriptionNotFound { id },
                    "Ignoring unregister of unknown subscription"
                );
            }
        }
        Ok(())
    }

    fn release(&self, id: SubscriptionId) -> Option<Subscription> {
        let removed = self.registry.borrow_mut().remove(id)?;
        let allocation = removed.allocation();
        self.with_tracker(|tracker| tracker.release(AllocationKind::Subscription, &allocation));
        Some(removed)
    }

    /// Release every subscription held by `owner`. Returns how many were removed.
    pub fn unregister_all(&self, owner: &OwnerTag) -> usize {
        let removed: Vec<Subscription> = {
            let mut registry = self.registry.borrow_mut();
            let ids = registry.by_owner.get(owner).cloned().unwrap_or_default();
            ids.into_iter()
                .filter_map(|id| registry.remove(id))
                .collect()
        };

        for subscription in &removed {
            let allocation = subscription.allocation();
            self.with_tracker(|tracker| tracker.release(AllocationKind::Subscription, &allocation));
        }

        if !removed.is_empty() {
            debug!(owner = %owner, count = removed.len(), "Owner subscriptions released");
        }
        removed.len()
    }

    /// Re-register each of the owner's subscriptions under a fresh id.
    ///
    /// Topic, callback and delivery mode are preserved, and the old id stays
    /// usable as an alias of the new one. Returns the old-to-new id mapping
    /// in the owner's registration order.
    pub fn resubscribe_owner(&self, owner: &OwnerTag) -> Vec<(SubscriptionId, SubscriptionId)> {
        let previous: Vec<Subscription> = {
            let registry = self.registry.borrow();
            registry
                .by_owner
                .get(owner)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| registry.subscriptions.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut mapping = Vec::with_capacity(previous.len());
        for subscription in previous {
            let old_id = subscription.id;
            // Register first so the owner index keeps existing while swapping
            let new_id = self.register_with_mode(
                subscription.owner.clone(),
                subscription.topic.clone(),
                subscription.mode,
                subscription.callback.clone(),
            );
            self.registry.borrow_mut().rename(old_id, new_id);
            self.release(old_id);
            mapping.push((old_id, new_id));
        }

        debug!(owner = %owner, count = mapping.len(), "Owner resubscribed");
        mapping
    }

    /// Look up by a live id or by an id issued before a resubscribe.
    pub fn get(&self, id: SubscriptionId) -> Option<Subscription> {
        let registry = self.registry.borrow();
        registry.subscriptions.get(&registry.resolve(id)).cloned()
    }

    pub fn is_registered(&self, id: SubscriptionId) -> bool {
        let registry = self.registry.borrow();
        registry.subscriptions.contains_key(&registry.resolve(id))
    }

    /// The live id for `id`, following resubscribes.
    pub fn current_id(&self, id: SubscriptionId) -> SubscriptionId {
        self.registry.borrow().resolve(id)
    }

    pub fn alias_count(&self) -> usize {
        self.registry.borrow().aliases.len()
    }

    pub fn count(&self) -> usize {
        self.registry.borrow().subscriptions.len()
    }

    pub fn count_for_owner(&self, owner: &OwnerTag) -> usize {
        self.registry
            .borrow()
            .by_owner
            .get(owner)
            .map_or(0, Vec::len)
    }

    /// Ids held by `owner`, in registration order.
    pub fn ids_for_owner(&self, owner: &OwnerTag) -> Vec<SubscriptionId> {
        self.registry
            .borrow()
            .by_owner
            .get(owner)
            .cloned()
            .unwrap_or_default()
    }

    /// Owners holding at least one subscription, sorted.
    pub fn owners(&self) -> Vec<OwnerTag> {
        let mut owners: Vec<OwnerTag> = self.registry.borrow().by_owner.keys().cloned().collect();
        owners.sort();
        owners
    }

    fn with_tracker(&self, f: impl FnOnce(&dyn AllocationTracker)) {
        let tracker = self.tracker.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(tracker) = tracker {
            f(tracker.as_ref());
        }
    }
}

impl fmt::Debug for EventListenerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListenerManager")
            .field("subscriptions", &self.count())
            .finish_non_exhaustive()
    }
}
