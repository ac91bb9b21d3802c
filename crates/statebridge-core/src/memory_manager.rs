// ABOUTME: Allocation accounting for subscriptions and retained histories
// ABOUTME: Sweeps histories down to their windows and warns when subscriptions pile up

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};

use statebridge_events::{Scheduler, TimerId};
use statebridge_logging::{debug, info, timed, warn};
use statebridge_types::{
    AllocationKind, AllocationRef, AllocationTracker, BridgeError, ComponentName, HealthEvent,
    HealthSink, MemoryConfig, OwnerTag, Sweepable,
};

pub struct MemoryManager {
    config: MemoryConfig,
    tracked: RefCell<BTreeMap<AllocationKind, HashMap<u64, Option<OwnerTag>>>>,
    sweepables: RefCell<Vec<Weak<dyn Sweepable>>>,
    health: RefCell<Option<Weak<dyn HealthSink>>>,
    over_threshold: Cell<bool>,
    sweep_timer: Cell<Option<TimerId>>,
    released_total: Cell<u64>,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig) -> Rc<Self> {
        Rc::new(Self {
            config,
            tracked: RefCell::new(BTreeMap::new()),
            sweepables: RefCell::new(Vec::new()),
            health: RefCell::new(None),
            over_threshold: Cell::new(false),
            sweep_timer: Cell::new(None),
            released_total: Cell::new(0),
        })
    }

    pub fn set_health_sink(&self, sink: Weak<dyn HealthSink>) {
        *self.health.borrow_mut() = Some(sink);
    }

    pub fn register_sweepable(&self, target: Weak<dyn Sweepable>) {
        self.sweepables.borrow_mut().push(target);
    }

    pub fn tracked_count(&self, kind: AllocationKind) -> usize {
        self.tracked.borrow().get(&kind).map_or(0, HashMap::len)
    }

    /// Live allocations of any kind attributed to `owner`.
    pub fn tracked_for_owner(&self, owner: &OwnerTag) -> usize {
        self.tracked
            .borrow()
            .values()
            .flat_map(HashMap::values)
            .filter(|tracked_owner| tracked_owner.as_ref() == Some(owner))
            .count()
    }

    /// Total allocations released by sweeps so far.
    pub fn released_total(&self) -> u64 {
        self.released_total.get()
    }

    pub fn is_over_threshold(&self) -> bool {
        self.over_threshold.get()
    }

    /// Trim every registered history to its configured window. Returns the
    /// number of entries released.
    pub fn sweep(&self) -> usize {
        timed!("memory.sweep", {
            let targets: Vec<Rc<dyn Sweepable>> = {
                let mut sweepables = self.sweepables.borrow_mut();
                sweepables.retain(|target| target.strong_count() > 0);
                sweepables.iter().filter_map(Weak::upgrade).collect()
            };

            let released: usize = targets
                .iter()
                .filter_map(|target| {
                    self.window_for(target.kind())
                        .map(|window| target.trim_to(window))
                })
                .sum();

            self.released_total
                .set(self.released_total.get() + released as u64);
            debug!(
                released,
                subscriptions = self.tracked_count(AllocationKind::Subscription),
                "Memory sweep finished"
            );

            // Still leaking: keep the warning alive
            if self.over_threshold.get() {
                self.report_leak();
            }
            released
        })
    }

    /// Sweep on a repeating timer when a sweep interval is configured.
    pub fn schedule_sweeps(self: &Rc<Self>, scheduler: &Scheduler) -> Option<TimerId> {
        let interval = self.config.sweep_interval()?;
        if let Some(previous) = self.sweep_timer.take() {
            scheduler.cancel(previous);
        }

        let manager = Rc::downgrade(self);
        let timer = scheduler.schedule_repeating(interval, move || {
            if let Some(manager) = manager.upgrade() {
                manager.sweep();
            }
        });
        self.sweep_timer.set(Some(timer));
        info!(interval_ms = interval.as_millis() as u64, "Periodic memory sweeps scheduled");
        Some(timer)
    }

    pub fn stop_sweeps(&self, scheduler: &Scheduler) -> bool {
        self.sweep_timer
            .take()
            .is_some_and(|timer| scheduler.cancel(timer))
    }

    fn window_for(&self, kind: AllocationKind) -> Option<usize> {
        match kind {
            AllocationKind::BatchHistory => Some(self.config.batch_history_window),
            AllocationKind::RevisionHistory => Some(self.config.revision_history_window),
            AllocationKind::Subscription => None,
        }
    }

    fn check_threshold(&self) {
        let count = self.tracked_count(AllocationKind::Subscription);
        let threshold = self.config.subscription_warn_threshold;

        if count > threshold && !self.over_threshold.get() {
            self.over_threshold.set(true);
            self.report_leak();
        } else if count <= threshold && self.over_threshold.get() {
            self.over_threshold.set(false);
            info!(count, threshold, "Subscription count back under threshold");
            if let Some(sink) = self.sink() {
                sink.recovered(ComponentName::MemoryManager);
            }
        }
    }

    fn report_leak(&self) {
        let leak = BridgeError::SubscriptionLeak {
            count: self.tracked_count(AllocationKind::Subscription),
            threshold: self.config.subscription_warn_threshold,
        };
        warn!(error = %leak, "Possible subscription leak");
        if let Some(sink) = self.sink() {
            sink.report(ComponentName::MemoryManager, HealthEvent::Warning(leak));
        }
    }

    fn sink(&self) -> Option<Rc<dyn HealthSink>> {
        self.health.borrow().as_ref().and_then(Weak::upgrade)
    }
}

impl AllocationTracker for MemoryManager {
    fn track_allocation(&self, kind: AllocationKind, allocation: AllocationRef) {
        self.tracked
            .borrow_mut()
            .entry(kind)
            .or_default()
            .insert(allocation.id, allocation.owner);
        if kind == AllocationKind::Subscription {
            self.check_threshold();
        }
    }

    fn release(&self, kind: AllocationKind, allocation: &AllocationRef) {
        let removed = self
            .tracked
            .borrow_mut()
            .get_mut(&kind)
            .and_then(|entries| entries.remove(&allocation.id));
        if removed.is_some() && kind == AllocationKind::Subscription {
            self.check_threshold();
        }
    }
}

impl fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("subscriptions", &self.tracked_count(AllocationKind::Subscription))
            .field("batch_history", &self.tracked_count(AllocationKind::BatchHistory))
            .field(
                "revision_history",
                &self.tracked_count(AllocationKind::RevisionHistory),
            )
            .field("over_threshold", &self.over_threshold.get())
            .finish_non_exhaustive()
    }
}
