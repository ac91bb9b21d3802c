// ABOUTME: Health records for every bridge component and the aggregated overall status
// ABOUTME: Escalations only move toward Failed; recovery requires a reset token from self-healing

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use statebridge_logging::{debug, error, info};
use statebridge_types::{BridgeError, Clock, ComponentName, HealthRecord, HealthStatus};

use crate::self_healing::ResetToken;

/// Emitted whenever a component's status changes.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub component: ComponentName,
    pub previous: HealthStatus,
    pub current: HealthStatus,
    /// Overall status after the change
    pub overall: HealthStatus,
    pub record: HealthRecord,
}

pub type StatusListener = Rc<dyn Fn(&StatusChange)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct BridgeStatusManager {
    clock: Rc<dyn Clock>,
    records: RefCell<BTreeMap<ComponentName, HealthRecord>>,
    listeners: RefCell<Vec<(ListenerId, StatusListener)>>,
    next_listener: Cell<u64>,
}

impl BridgeStatusManager {
    pub fn new(clock: Rc<dyn Clock>) -> Rc<Self> {
        let now = clock.now();
        let records = ComponentName::CORE
            .iter()
            .map(|component| (component.clone(), HealthRecord::healthy(component.clone(), now)))
            .collect();

        Rc::new(Self {
            clock,
            records: RefCell::new(records),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(1),
        })
    }

    /// Every tracked component and its record.
    pub fn get_status(&self) -> BTreeMap<ComponentName, HealthRecord> {
        self.records.borrow().clone()
    }

    pub fn record(&self, component: &ComponentName) -> Option<HealthRecord> {
        self.records.borrow().get(component).cloned()
    }

    pub fn status_of(&self, component: &ComponentName) -> HealthStatus {
        self.records
            .borrow()
            .get(component)
            .map_or(HealthStatus::Healthy, |record| record.status)
    }

    /// Worst status across all components: failed, then degraded, then healthy.
    pub fn overall(&self) -> HealthStatus {
        HealthStatus::worst(self.records.borrow().values().map(|record| record.status))
    }

    pub fn on_status_change(&self, listener: impl Fn(&StatusChange) + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Raise a component to `status`. Lower statuses are ignored; an equal
    /// status only refreshes the error.
    pub(crate) fn escalate(
        &self,
        component: &ComponentName,
        status: HealthStatus,
        error: BridgeError,
    ) {
        let now = self.clock.now();
        let change = {
            let mut records = self.records.borrow_mut();
            let record = records
                .entry(component.clone())
                .or_insert_with(|| HealthRecord::healthy(component.clone(), now));

            if status < record.status {
                debug!(
                    component = %component,
                    current = %record.status,
                    requested = %status,
                    "Ignoring downgrade outside of a reset"
                );
                return;
            }

            let previous = record.status;
            record.status = status;
            record.last_error = Some(error);
            record.last_checked_at = now;
            (previous != status).then(|| (previous, record.clone()))
        };

        if let Some((previous, record)) = change {
            self.emit(previous, record);
        }
    }

    /// Return a component to Healthy. Only the self-healing coordinator can
    /// produce the token.
    pub(crate) fn restore(&self, component: &ComponentName, _token: ResetToken) {
        let now = self.clock.now();
        let change = {
            let mut records = self.records.borrow_mut();
            let Some(record) = records.get_mut(component) else {
                return;
            };
            let previous = record.status;
            record.status = HealthStatus::Healthy;
            record.last_error = None;
            record.last_checked_at = now;
            (previous != HealthStatus::Healthy).then(|| (previous, record.clone()))
        };

        if let Some((previous, record)) = change {
            self.emit(previous, record);
        }
    }

    /// Drop an owner's record once the owner detaches. Core components are
    /// never removed. When the departing record was not Healthy, listeners
    /// see it settle to Healthy so the recomputed overall reaches them.
    pub(crate) fn remove_component(&self, component: &ComponentName) -> bool {
        if !matches!(component, ComponentName::Owner(_)) {
            return false;
        }
        let Some(removed) = self.records.borrow_mut().remove(component) else {
            return false;
        };
        debug!(component = %component, status = %removed.status, "Health record dropped");

        if removed.status != HealthStatus::Healthy {
            let settled = HealthRecord::healthy(component.clone(), self.clock.now());
            self.emit(removed.status, settled);
        }
        true
    }

    /// Refresh `last_checked_at` on every record.
    pub(crate) fn touch_all(&self) {
        let now = self.clock.now();
        for record in self.records.borrow_mut().values_mut() {
            record.last_checked_at = now;
        }
    }

    fn emit(&self, previous: HealthStatus, record: HealthRecord) {
        let change = StatusChange {
            component: record.component.clone(),
            previous,
            current: record.status,
            overall: self.overall(),
            record,
        };
        info!(
            component = %change.component,
            previous = %change.previous,
            current = %change.current,
            overall = %change.overall,
            "Component health changed"
        );

        let listeners: Vec<StatusListener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&change))).is_err() {
                error!(component = %change.component, "Status listener panicked");
            }
        }
    }
}

impl fmt::Debug for BridgeStatusManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeStatusManager")
            .field("overall", &self.overall())
            .field("components", &self.records.borrow().len())
            .finish_non_exhaustive()
    }
}
