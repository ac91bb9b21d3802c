// ABOUTME: Read-only health and performance report for an external health indicator
// ABOUTME: Collects component status, healing phases, latency stats and memory counts into JSON

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Serialize;
use statebridge_core::{
    BridgeStatusManager, HealingPhase, ListenerId, MemoryManager, RevisionSummary, SelfHealing,
    StateManager, StatusChange,
};
use statebridge_events::OptimizedEventBus;
use statebridge_logging::{LatencyStats, PerformanceMonitor, info};
use statebridge_types::{AllocationKind, Clock, HealthStatus, Revision};

/// Revisions listed in a report, newest first
const RECENT_REVISIONS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct ComponentReport {
    pub component: String,
    pub status: HealthStatus,
    pub phase: HealingPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    pub checked_ms_ago: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub overall: HealthStatus,
    pub components: Vec<ComponentReport>,
    pub performance: BTreeMap<String, LatencyStats>,
    pub subscriptions: usize,
    pub tracked: BTreeMap<String, usize>,
    pub released_total: u64,
    pub state_revision: Revision,
    pub state_conflicts: u64,
    pub recent_revisions: Vec<RevisionSummary>,
    pub batch_history: usize,
}

impl DiagnosticsReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn component(&self, name: &str) -> Option<&ComponentReport> {
        self.components
            .iter()
            .find(|report| report.component == name)
    }
}

pub struct ChatBridgeDiagnostics {
    clock: Rc<dyn Clock>,
    status: Rc<BridgeStatusManager>,
    healing: Rc<SelfHealing>,
    monitor: Rc<PerformanceMonitor>,
    memory: Rc<MemoryManager>,
    state: Rc<StateManager>,
    bus: Rc<OptimizedEventBus>,
}

impl ChatBridgeDiagnostics {
    pub fn new(
        clock: Rc<dyn Clock>,
        status: Rc<BridgeStatusManager>,
        healing: Rc<SelfHealing>,
        monitor: Rc<PerformanceMonitor>,
        memory: Rc<MemoryManager>,
        state: Rc<StateManager>,
        bus: Rc<OptimizedEventBus>,
    ) -> Self {
        Self {
            clock,
            status,
            healing,
            monitor,
            memory,
            state,
            bus,
        }
    }

    pub fn report(&self) -> DiagnosticsReport {
        let now = self.clock.now();
        let components = self
            .status
            .get_status()
            .into_iter()
            .map(|(component, record)| ComponentReport {
                phase: self.healing.phase(&component),
                component: component.to_string(),
                status: record.status,
                error_kind: record.last_error.as_ref().map(|error| error.kind()),
                last_error: record.last_error.map(|error| error.to_string()),
                checked_ms_ago: now.saturating_duration_since(record.last_checked_at).as_millis()
                    as u64,
            })
            .collect();

        let performance = self
            .monitor
            .labels()
            .into_iter()
            .filter_map(|label| self.monitor.get_stats(&label).map(|stats| (label, stats)))
            .collect();

        let tracked = [
            AllocationKind::Subscription,
            AllocationKind::BatchHistory,
            AllocationKind::RevisionHistory,
        ]
        .into_iter()
        .map(|kind| (kind.to_string(), self.memory.tracked_count(kind)))
        .collect();

        DiagnosticsReport {
            overall: self.status.overall(),
            components,
            performance,
            subscriptions: self.memory.tracked_count(AllocationKind::Subscription),
            tracked,
            released_total: self.memory.released_total(),
            state_revision: self.state.revision(),
            state_conflicts: self.state.conflict_count(),
            recent_revisions: self.state.recent_revisions(RECENT_REVISIONS),
            batch_history: self.bus.emitter().history().len(),
        }
    }

    /// Forward status changes to an external indicator.
    pub fn on_status_change(&self, listener: impl Fn(&StatusChange) + 'static) -> ListenerId {
        self.status.on_status_change(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.status.remove_listener(id)
    }

    pub fn log_summary(&self) {
        let report = self.report();
        let unhealthy = report
            .components
            .iter()
            .filter(|component| component.status != HealthStatus::Healthy)
            .count();
        info!(
            overall = %report.overall,
            unhealthy,
            subscriptions = report.subscriptions,
            revision = %report.state_revision,
            "Bridge diagnostics"
        );
    }
}
