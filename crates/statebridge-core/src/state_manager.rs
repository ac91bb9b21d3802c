// ABOUTME: The single versioned BridgeState shared by the legacy and modern sides
// ABOUTME: Applies patches last-writer-wins, keeps revision history for rollback and replay

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use serde::Serialize;
use statebridge_logging::{PerformanceMonitor, debug, info, warn};
use statebridge_types::{
    AllocationKind, AllocationRef, AllocationTracker, BridgeError, BridgeResult, ComponentName,
    HealthEvent, HealthSink, OwnerTag, ResetCommand, ResetParticipant, Revision, StateKey,
    StatePatch, StateValue, SubscriptionId, Sweepable, Topic,
};

pub const APPLY_LABEL: &str = "state.apply";

/// Topic name used when a change listener's failure is reported.
pub const STATE_CHANGE_TOPIC: &str = "state:change";

pub type BridgeState = BTreeMap<StateKey, StateValue>;

/// Which side of the bridge produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Legacy,
    Modern,
    Replay,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyChange {
    pub key: StateKey,
    pub previous: Option<StateValue>,
    pub current: Option<StateValue>,
}

/// Notification delivered to change listeners after a write completes.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub revision: Revision,
    pub origin: Origin,
    pub changes: Vec<KeyChange>,
    /// State as of `revision`
    pub snapshot: Rc<BridgeState>,
}

impl StateChange {
    pub fn changed_keys(&self) -> impl Iterator<Item = &StateKey> {
        self.changes.iter().map(|change| &change.key)
    }
}

pub type ChangeCallback = Rc<dyn Fn(&StateChange) -> anyhow::Result<()>>;

pub fn change_callback(
    f: impl Fn(&StateChange) -> anyhow::Result<()> + 'static,
) -> ChangeCallback {
    Rc::new(f)
}

#[derive(Debug, Clone)]
struct RevisionRecord {
    revision: Revision,
    origin: Origin,
    changes: Vec<KeyChange>,
}

/// Who wrote a retained revision, and which keys it touched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevisionSummary {
    pub revision: Revision,
    pub origin: Origin,
    pub keys: Vec<StateKey>,
}

impl From<&RevisionRecord> for RevisionSummary {
    fn from(record: &RevisionRecord) -> Self {
        Self {
            revision: record.revision,
            origin: record.origin,
            keys: record.changes.iter().map(|change| change.key.clone()).collect(),
        }
    }
}

#[derive(Clone)]
struct ChangeListener {
    id: SubscriptionId,
    /// Id returned to the subscriber; survives resubscribes
    issued: SubscriptionId,
    owner: OwnerTag,
    callback: ChangeCallback,
}

impl ChangeListener {
    fn allocation(&self) -> AllocationRef {
        AllocationRef::owned(self.id.as_u64(), self.owner.clone())
    }
}

struct Store {
    state: Rc<BridgeState>,
    revision: Revision,
    history: VecDeque<RevisionRecord>,
}

pub struct StateManager {
    store: RefCell<Store>,
    listeners: RefCell<Vec<ChangeListener>>,
    queue: RefCell<VecDeque<StateChange>>,
    notifying: Cell<bool>,
    conflicts: Cell<u64>,
    shut_down: Cell<bool>,
    monitor: Rc<PerformanceMonitor>,
    tracker: RefCell<Option<Weak<dyn AllocationTracker>>>,
    health: RefCell<Option<Weak<dyn HealthSink>>>,
}

impl StateManager {
    pub fn new(monitor: Rc<PerformanceMonitor>) -> Rc<Self> {
        Rc::new(Self {
            store: RefCell::new(Store {
                state: Rc::new(BridgeState::new()),
                revision: Revision::INITIAL,
                history: VecDeque::new(),
            }),
            listeners: RefCell::new(Vec::new()),
            queue: RefCell::new(VecDeque::new()),
            notifying: Cell::new(false),
            conflicts: Cell::new(0),
            shut_down: Cell::new(false),
            monitor,
            tracker: RefCell::new(None),
            health: RefCell::new(None),
        })
    }

    pub fn set_tracker(&self, tracker: Weak<dyn AllocationTracker>) {
        *self.tracker.borrow_mut() = Some(tracker);
    }

    pub fn set_health_sink(&self, sink: Weak<dyn HealthSink>) {
        *self.health.borrow_mut() = Some(sink);
    }

    /// Apply a patch from the host. Returns the new revision.
    pub fn apply(&self, patch: StatePatch) -> BridgeResult<Revision> {
        self.apply_from(Origin::System, patch, None)
    }

    /// Apply a patch, last-writer-wins per key.
    ///
    /// A stale `expected` revision is logged as a conflict and the patch is
    /// applied anyway. Listeners are notified after the write, in revision
    /// order; applies made from inside a listener are queued behind the
    /// current notification.
    pub fn apply_from(
        &self,
        origin: Origin,
        patch: StatePatch,
        expected: Option<Revision>,
    ) -> BridgeResult<Revision> {
        if self.shut_down.get() {
            return Err(BridgeError::BridgeShutdown);
        }

        let change = self.monitor.measure(APPLY_LABEL, || {
            let mut store = self.store.borrow_mut();

            if let Some(expected) = expected {
                if expected != store.revision {
                    let conflict = BridgeError::StateConflict {
                        expected,
                        actual: store.revision,
                    };
                    self.conflicts.set(self.conflicts.get() + 1);
                    warn!(
                        origin = ?origin,
                        error = %conflict,
                        "Stale revision, applying last-writer-wins"
                    );
                }
            }

            let state = Rc::make_mut(&mut store.state);
            let changes: Vec<KeyChange> = patch
                .into_iter()
                .map(|(key, value)| {
                    let previous = match &value {
                        Some(value) => state.insert(key.clone(), value.clone()),
                        None => state.remove(&key),
                    };
                    KeyChange {
                        key,
                        previous,
                        current: value,
                    }
                })
                .collect();

            store.revision = store.revision.next();
            let revision = store.revision;
            store.history.push_back(RevisionRecord {
                revision,
                origin,
                changes: changes.clone(),
            });

            StateChange {
                revision,
                origin,
                changes,
                snapshot: Rc::clone(&store.state),
            }
        });

        let revision = change.revision;
        debug!(
            revision = %revision,
            origin = ?origin,
            keys = change.changes.len(),
            "State patch applied"
        );
        self.with_tracker(|tracker| {
            tracker.track_allocation(
                AllocationKind::RevisionHistory,
                AllocationRef::new(revision.as_u64()),
            )
        });

        self.queue.borrow_mut().push_back(change);
        self.drain_notifications();
        Ok(revision)
    }

    /// Current state and its revision.
    pub fn get_snapshot(&self) -> (BridgeState, Revision) {
        let store = self.store.borrow();
        ((*store.state).clone(), store.revision)
    }

    pub fn get(&self, key: &str) -> Option<StateValue> {
        self.store.borrow().state.get(key).cloned()
    }

    pub fn revision(&self) -> Revision {
        self.store.borrow().revision
    }

    /// Number of applies that arrived with a stale expected revision.
    pub fn conflict_count(&self) -> u64 {
        self.conflicts.get()
    }

    pub fn subscribe_to_changes(&self, callback: ChangeCallback) -> SubscriptionId {
        self.subscribe_to_changes_as(OwnerTag::anonymous(), callback)
    }

    pub fn subscribe_to_changes_as(
        &self,
        owner: OwnerTag,
        callback: ChangeCallback,
    ) -> SubscriptionId {
        let id = SubscriptionId::next();
        let listener = ChangeListener {
            id,
            issued: id,
            owner,
            callback,
        };
        let allocation = listener.allocation();
        debug!(subscription = %id, owner = %listener.owner, "Change listener registered");

        self.listeners.borrow_mut().push(listener);
        self.with_tracker(|tracker| {
            tracker.track_allocation(AllocationKind::Subscription, allocation)
        });
        id
    }

    /// Remove a change listener, by its current id or the one `subscribe`
    /// returned. Unknown ids are a successful no-op.
    pub fn unsubscribe_changes(&self, id: SubscriptionId) -> BridgeResult<()> {
        let removed = {
            let mut listeners = self.listeners.borrow_mut();
            listeners
                .iter()
                .position(|listener| listener.id == id || listener.issued == id)
                .map(|index| listeners.remove(index))
        };
        match removed {
            Some(listener) => self.release(&listener),
            None => debug!(
                error = %BridgeError::SubscriptionNotFound { id },
                "Ignoring unsubscribe of unknown change listener"
            ),
        }
        Ok(())
    }

    /// Remove every change listener held by `owner`.
    pub fn unsubscribe_owner(&self, owner: &OwnerTag) -> usize {
        let removed: Vec<ChangeListener> = {
            let mut listeners = self.listeners.borrow_mut();
            let (removed, kept) = std::mem::take(&mut *listeners)
                .into_iter()
                .partition(|listener| &listener.owner == owner);
            *listeners = kept;
            removed
        };
        for listener in &removed {
            self.release(listener);
        }
        removed.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Retained revisions, newest first, at most `limit` of them.
    pub fn recent_revisions(&self, limit: usize) -> Vec<RevisionSummary> {
        self.store
            .borrow()
            .history
            .iter()
            .rev()
            .take(limit)
            .map(RevisionSummary::from)
            .collect()
    }

    /// Reconstruct the state as of `revision` from retained history.
    pub fn snapshot_at(&self, revision: Revision) -> BridgeResult<BridgeState> {
        let store = self.store.borrow();
        if revision > store.revision {
            return Err(BridgeError::UnknownRevision { revision });
        }

        let oldest_reachable = store
            .history
            .front()
            .map_or(store.revision, |record| Revision::new(record.revision.as_u64() - 1));
        if revision < oldest_reachable {
            return Err(BridgeError::UnknownRevision { revision });
        }

        let mut state = (*store.state).clone();
        for record in store.history.iter().rev() {
            if record.revision <= revision {
                break;
            }
            for change in record.changes.iter().rev() {
                match &change.previous {
                    Some(previous) => {
                        state.insert(change.key.clone(), previous.clone());
                    }
                    None => {
                        state.remove(&change.key);
                    }
                }
            }
        }
        Ok(state)
    }

    /// Restore the state of `revision` by applying the difference as a new
    /// revision. Nothing is applied when the state already matches.
    pub fn rollback_to(&self, revision: Revision) -> BridgeResult<Revision> {
        let target = self.snapshot_at(revision)?;
        let patch = {
            let store = self.store.borrow();
            diff(&store.state, &target)
        };

        if patch.is_empty() {
            debug!(target = %revision, "Rollback target matches current state");
            return Ok(self.revision());
        }

        info!(target = %revision, keys = patch.len(), "Rolling back state");
        self.apply_from(Origin::System, patch, None)
    }

    /// Re-deliver a snapshot (current, or as of `revision`) to every change
    /// listener with origin `Replay`. Returns the number of listeners.
    pub fn replay(&self, revision: Option<Revision>) -> BridgeResult<usize> {
        if self.shut_down.get() {
            return Err(BridgeError::BridgeShutdown);
        }

        let (snapshot, revision) = match revision {
            Some(revision) => (Rc::new(self.snapshot_at(revision)?), revision),
            None => {
                let store = self.store.borrow();
                (Rc::clone(&store.state), store.revision)
            }
        };

        let changes = snapshot
            .iter()
            .map(|(key, value)| KeyChange {
                key: key.clone(),
                previous: None,
                current: Some(value.clone()),
            })
            .collect();

        info!(revision = %revision, "Replaying state snapshot");
        self.queue.borrow_mut().push_back(StateChange {
            revision,
            origin: Origin::Replay,
            changes,
            snapshot,
        });
        self.drain_notifications();
        Ok(self.listener_count())
    }

    /// Stop accepting applies and release every change listener.
    pub fn shutdown(&self) {
        if self.shut_down.replace(true) {
            return;
        }
        self.queue.borrow_mut().clear();
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        for listener in &listeners {
            self.release(listener);
        }
        info!(revision = %self.revision(), "State manager shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.get()
    }

    fn drain_notifications(&self) {
        if self.notifying.replace(true) {
            return;
        }

        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(change) = next else {
                break;
            };
            let listeners = self.listeners.borrow().clone();
            for listener in &listeners {
                // Dropped by an earlier listener of this change
                let still_registered = self
                    .listeners
                    .borrow()
                    .iter()
                    .any(|existing| existing.id == listener.id);
                if still_registered {
                    self.notify(listener, &change);
                }
            }
        }

        self.notifying.set(false);
    }

    fn notify(&self, listener: &ChangeListener, change: &StateChange) {
        let callback = Rc::clone(&listener.callback);
        let outcome = catch_unwind(AssertUnwindSafe(|| callback(change)));
        let message = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(error)) => format!("{error:#}"),
            Err(_) => "change listener panicked".to_string(),
        };

        warn!(
            subscription = %listener.id,
            owner = %listener.owner,
            revision = %change.revision,
            error = %message,
            "Change listener failed"
        );
        let sink = self.health.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(sink) = sink {
            sink.report(
                ComponentName::Owner(listener.owner.clone()),
                HealthEvent::Fault(BridgeError::DeliveryFailure {
                    owner: listener.owner.clone(),
                    topic: Topic::new(STATE_CHANGE_TOPIC),
                    message,
                }),
            );
        }
    }

    fn resubscribe_owner(&self, owner: &OwnerTag) -> usize {
        let renewed: Vec<(ChangeListener, ChangeListener)> = {
            let mut listeners = self.listeners.borrow_mut();
            listeners
                .iter_mut()
                .filter(|listener| &listener.owner == owner)
                .map(|listener| {
                    let previous = listener.clone();
                    listener.id = SubscriptionId::next();
                    (previous, listener.clone())
                })
                .collect()
        };
        for (previous, current) in &renewed {
            self.release(previous);
            self.with_tracker(|tracker| {
                tracker.track_allocation(AllocationKind::Subscription, current.allocation())
            });
        }
        renewed.len()
    }

    fn release(&self, listener: &ChangeListener) {
        let allocation = listener.allocation();
        self.with_tracker(|tracker| tracker.release(AllocationKind::Subscription, &allocation));
    }

    fn with_tracker(&self, f: impl FnOnce(&dyn AllocationTracker)) {
        let tracker = self.tracker.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(tracker) = tracker {
            f(tracker.as_ref());
        }
    }
}

/// Patch that turns `from` into `to`.
fn diff(from: &BridgeState, to: &BridgeState) -> StatePatch {
    let keys: BTreeSet<&StateKey> = from.keys().chain(to.keys()).collect();
    keys.into_iter()
        .filter(|key| from.get(*key) != to.get(*key))
        .map(|key| (key.clone(), to.get(key).cloned()))
        .collect()
}

impl Sweepable for StateManager {
    fn kind(&self) -> AllocationKind {
        AllocationKind::RevisionHistory
    }

    fn retained(&self) -> usize {
        self.store.borrow().history.len()
    }

    fn trim_to(&self, window: usize) -> usize {
        let evicted: Vec<Revision> = {
            let mut store = self.store.borrow_mut();
            let excess = store.history.len().saturating_sub(window);
            store
                .history
                .drain(..excess)
                .map(|record| record.revision)
                .collect()
        };
        for revision in &evicted {
            self.with_tracker(|tracker| {
                tracker.release(
                    AllocationKind::RevisionHistory,
                    &AllocationRef::new(revision.as_u64()),
                )
            });
        }
        evicted.len()
    }
}

impl ResetParticipant for StateManager {
    fn participant(&self) -> ComponentName {
        ComponentName::StateManager
    }

    fn handle_reset(&self, command: &ResetCommand) -> BridgeResult<()> {
        match command {
            ResetCommand::RollbackTo { revision } => self.rollback_to(*revision).map(|_| ()),
            ResetCommand::ReplaySnapshot { revision } => self.replay(*revision).map(|_| ()),
            ResetCommand::Resubscribe { owner } => {
                self.resubscribe_owner(owner);
                Ok(())
            }
            ResetCommand::ClearQueues { .. } => Ok(()),
        }
    }
}

impl fmt::Debug for StateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = self.store.borrow();
        f.debug_struct("StateManager")
            .field("revision", &store.revision)
            .field("keys", &store.state.len())
            .field("history", &store.history.len())
            .field("listeners", &self.listeners.borrow().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn manager() -> Rc<StateManager> {
        StateManager::new(Rc::new(PerformanceMonitor::new(100, None)))
    }

    fn title(value: &str) -> StatePatch {
        StatePatch::new().with("title", json!(value))
    }

    #[test]
    fn test_last_writer_wins_and_revision_counts_applies() {
        let state = manager();
        let initial = state.revision();

        state.apply(title("a")).unwrap();
        let revision = state.apply(title("b")).unwrap();

        let (snapshot, current) = state.get_snapshot();
        assert_eq!(snapshot.get("title"), Some(&json!("b")));
        assert_eq!(current, revision);
        assert_eq!(current.as_u64(), initial.as_u64() + 2);
    }

    #[test]
    fn test_patch_can_remove_keys() {
        let state = manager();
        state.apply(title("a").with("draft", json!("hi"))).unwrap();
        state.apply(StatePatch::new().without("draft")).unwrap();

        assert_eq!(state.get("draft"), None);
        assert_eq!(state.get("title"), Some(json!("a")));
    }

    #[test]
    fn test_stale_expected_revision_is_counted_but_applied() {
        let state = manager();
        state.apply(title("a")).unwrap();
        state.apply(title("b")).unwrap();

        let result = state.apply_from(Origin::Legacy, title("c"), Some(Revision::new(1)));
        assert_eq!(result, Ok(Revision::new(3)));
        assert_eq!(state.conflict_count(), 1);
        assert_eq!(state.get("title"), Some(json!("c")));

        state
            .apply_from(Origin::Modern, title("d"), Some(Revision::new(3)))
            .unwrap();
        assert_eq!(state.conflict_count(), 1);
    }

    #[test]
    fn test_listeners_see_changes_in_revision_order_with_nested_applies() {
        let state = manager();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let weak = Rc::downgrade(&state);
        let log = seen.clone();
        state.subscribe_to_changes(change_callback(move |change| {
            log.borrow_mut().push(("first", change.revision.as_u64()));
            if change.revision == Revision::new(1) {
                if let Some(state) = weak.upgrade() {
                    state.apply(StatePatch::new().with("echo", json!(true)))?;
                }
            }
            Ok(())
        }));
        let log = seen.clone();
        state.subscribe_to_changes(change_callback(move |change| {
            log.borrow_mut().push(("second", change.revision.as_u64()));
            Ok(())
        }));

        state.apply(title("a")).unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![("first", 1), ("second", 1), ("first", 2), ("second", 2)]
        );
    }

    #[test]
    fn test_change_carries_previous_values() {
        let state = manager();
        let last = Rc::new(RefCell::new(None));
        let slot = last.clone();
        state.subscribe_to_changes(change_callback(move |change| {
            *slot.borrow_mut() = Some(change.clone());
            Ok(())
        }));

        state.apply(title("a")).unwrap();
        state
            .apply_from(Origin::Modern, title("b"), None)
            .unwrap();

        let change = last.borrow().clone().unwrap();
        assert_eq!(change.origin, Origin::Modern);
        assert_eq!(
            change.changes,
            vec![KeyChange {
                key: "title".to_string(),
                previous: Some(json!("a")),
                current: Some(json!("b")),
            }]
        );
        assert_eq!(change.snapshot.get("title"), Some(&json!("b")));
    }

    #[test]
    fn test_unsubscribe_changes_is_idempotent() {
        let state = manager();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let id = state.subscribe_to_changes(change_callback(move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        }));

        state.apply(title("a")).unwrap();
        state.unsubscribe_changes(id).unwrap();
        state.unsubscribe_changes(id).unwrap();
        state.apply(title("b")).unwrap();

        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_issued_id_survives_resubscribe() {
        let state = manager();
        let owner = OwnerTag::new("modern-store");
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let id = state.subscribe_to_changes_as(
            owner.clone(),
            change_callback(move |_| {
                counter.set(counter.get() + 1);
                Ok(())
            }),
        );

        state
            .handle_reset(&ResetCommand::Resubscribe { owner })
            .unwrap();
        state.apply(title("a")).unwrap();
        assert_eq!(calls.get(), 1);

        state.unsubscribe_changes(id).unwrap();
        state.apply(title("b")).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(state.listener_count(), 0);
    }

    #[test]
    fn test_recent_revisions_name_their_origin() {
        let state = manager();
        state.apply_from(Origin::Legacy, title("a"), None).unwrap();
        state
            .apply_from(Origin::Modern, StatePatch::new().with("draft", json!("x")), None)
            .unwrap();
        state.rollback_to(Revision::new(1)).unwrap();

        let recent = state.recent_revisions(2);
        assert_eq!(
            recent,
            vec![
                RevisionSummary {
                    revision: Revision::new(3),
                    origin: Origin::System,
                    keys: vec!["draft".to_string()],
                },
                RevisionSummary {
                    revision: Revision::new(2),
                    origin: Origin::Modern,
                    keys: vec!["draft".to_string()],
                },
            ]
        );
        assert_eq!(state.recent_revisions(10).len(), 3);
    }

    #[test]
    fn test_snapshot_at_and_rollback() {
        let state = manager();
        state.apply(title("a")).unwrap();
        let good = state.apply(StatePatch::new().with("draft", json!("x"))).unwrap();
        state.apply(title("broken").without("draft")).unwrap();

        let past = state.snapshot_at(good).unwrap();
        assert_eq!(past.get("title"), Some(&json!("a")));
        assert_eq!(past.get("draft"), Some(&json!("x")));

        let revision = state.rollback_to(good).unwrap();
        assert_eq!(revision, Revision::new(4));
        assert_eq!(state.get_snapshot().0, past);

        // Already there, nothing new to apply
        assert_eq!(state.rollback_to(revision).unwrap(), revision);
        assert_eq!(state.rollback_to(Revision::INITIAL).unwrap(), Revision::new(5));
        assert!(state.get_snapshot().0.is_empty());
    }

    #[test]
    fn test_trimmed_history_limits_reachable_revisions() {
        let state = manager();
        for index in 0..5 {
            state.apply(StatePatch::new().with("n", json!(index))).unwrap();
        }

        assert_eq!(state.trim_to(2), 3);
        assert_eq!(state.retained(), 2);
        assert!(state.snapshot_at(Revision::new(3)).is_ok());
        assert_eq!(
            state.snapshot_at(Revision::new(2)),
            Err(BridgeError::UnknownRevision {
                revision: Revision::new(2)
            })
        );
        assert!(matches!(
            state.snapshot_at(Revision::new(9)),
            Err(BridgeError::UnknownRevision { .. })
        ));
    }

    #[test]
    fn test_replay_delivers_full_snapshot() {
        let state = manager();
        state.apply(title("a").with("draft", json!("x"))).unwrap();

        let replays = Rc::new(RefCell::new(Vec::new()));
        let log = replays.clone();
        state.subscribe_to_changes(change_callback(move |change| {
            log.borrow_mut().push(change.clone());
            Ok(())
        }));

        assert_eq!(state.replay(None).unwrap(), 1);
        let replays = replays.borrow();
        assert_eq!(replays.len(), 1);
        assert_eq!(replays[0].origin, Origin::Replay);
        assert_eq!(replays[0].revision, state.revision());
        let keys: Vec<&StateKey> = replays[0].changed_keys().collect();
        assert_eq!(keys, vec!["draft", "title"]);
    }

    #[test]
    fn test_shutdown_rejects_applies() {
        let state = manager();
        state.subscribe_to_changes(change_callback(|_| Ok(())));
        state.shutdown();

        assert_eq!(state.apply(title("a")), Err(BridgeError::BridgeShutdown));
        assert_eq!(state.listener_count(), 0);
    }

    #[test]
    fn test_apply_is_timed() {
        let monitor = Rc::new(PerformanceMonitor::new(100, None));
        let state = StateManager::new(monitor.clone());
        state.apply(title("a")).unwrap();
        assert_eq!(monitor.get_stats(APPLY_LABEL).unwrap().count, 1);
    }

    #[derive(Default)]
    struct FaultLog {
        components: RefCell<Vec<ComponentName>>,
    }

    impl HealthSink for FaultLog {
        fn report(&self, component: ComponentName, _event: HealthEvent) {
            self.components.borrow_mut().push(component);
        }
    }

    #[test]
    fn test_failing_listener_reports_owner_fault_and_others_still_run() {
        let state = manager();
        let faults = Rc::new(FaultLog::default());
        let sink = Rc::downgrade(&faults);
        let sink: Weak<dyn HealthSink> = sink;
        state.set_health_sink(sink);

        let calls = Rc::new(Cell::new(0));
        state.subscribe_to_changes_as(
            OwnerTag::new("modern-store"),
            change_callback(|_| anyhow::bail!("commit rejected")),
        );
        let counter = calls.clone();
        state.subscribe_to_changes(change_callback(move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        }));

        state.apply(title("a")).unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(
            *faults.components.borrow(),
            vec![ComponentName::Owner(OwnerTag::new("modern-store"))]
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Every apply bumps the revision by one and the snapshot reflects the last write per key.
        #[test]
        fn prop_revision_tracks_applies(
            writes in prop::collection::vec((0u8..4, prop::option::of(0i64..100)), 1..40)
        ) {
            let state = manager();
            let mut model = BridgeState::new();

            for (index, (key, value)) in writes.iter().enumerate() {
                let key = format!("k{key}");
                let mut patch = StatePatch::new();
                match value {
                    Some(value) => {
                        patch.set(key.clone(), json!(value));
                        model.insert(key, json!(value));
                    }
                    None => {
                        patch.remove(key.clone());
                        model.remove(&key);
                    }
                }
                let revision = state.apply(patch).unwrap();
                prop_assert_eq!(revision.as_u64(), index as u64 + 1);
            }

            prop_assert_eq!(state.get_snapshot().0, model);
        }
    }
}
