// ABOUTME: Health records tracked per bridge component
// ABOUTME: Defines the component set, status severity ordering and the reporting seam

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::error::BridgeError;
use crate::ids::OwnerTag;

/// Components whose health is tracked by the bridge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentName {
    EventListenerManager,
    BatchedEventEmitter,
    OptimizedEventBus,
    MemoryManager,
    StateManager,
    PerformanceMonitor,
    SelfHealing,
    ChatBridgeDiagnostics,
    SelectiveChatBridge,
    /// A subscriber owner whose callbacks have failed
    Owner(OwnerTag),
}

impl ComponentName {
    /// The fixed set of bridge components, tracked from startup
    pub const CORE: [ComponentName; 9] = [
        ComponentName::EventListenerManager,
        ComponentName::BatchedEventEmitter,
        ComponentName::OptimizedEventBus,
        ComponentName::MemoryManager,
        ComponentName::StateManager,
        ComponentName::PerformanceMonitor,
        ComponentName::SelfHealing,
        ComponentName::ChatBridgeDiagnostics,
        ComponentName::SelectiveChatBridge,
    ];

    pub fn owner(&self) -> Option<&OwnerTag> {
        match self {
            ComponentName::Owner(owner) => Some(owner),
            _ => None,
        }
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentName::EventListenerManager => "event_listener_manager",
            ComponentName::BatchedEventEmitter => "batched_event_emitter",
            ComponentName::OptimizedEventBus => "optimized_event_bus",
            ComponentName::MemoryManager => "memory_manager",
            ComponentName::StateManager => "state_manager",
            ComponentName::PerformanceMonitor => "performance_monitor",
            ComponentName::SelfHealing => "self_healing",
            ComponentName::ChatBridgeDiagnostics => "chat_bridge_diagnostics",
            ComponentName::SelectiveChatBridge => "selective_chat_bridge",
            ComponentName::Owner(owner) => return write!(f, "owner:{owner}"),
        };
        f.write_str(name)
    }
}

/// Health of a single component. Ordered by severity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Failed,
}

impl HealthStatus {
    /// Worst status in the iterator: failed dominates degraded dominates healthy
    pub fn worst(statuses: impl IntoIterator<Item = HealthStatus>) -> HealthStatus {
        statuses
            .into_iter()
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => f.write_str("healthy"),
            HealthStatus::Degraded => f.write_str("degraded"),
            HealthStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Last known health of one component
#[derive(Debug, Clone, PartialEq)]
pub struct HealthRecord {
    pub component: ComponentName,
    pub status: HealthStatus,
    pub last_error: Option<BridgeError>,
    pub last_checked_at: Instant,
}

impl HealthRecord {
    pub fn healthy(component: ComponentName, now: Instant) -> Self {
        Self {
            component,
            status: HealthStatus::Healthy,
            last_error: None,
            last_checked_at: now,
        }
    }
}

/// Health signal raised by a component
#[derive(Debug, Clone, PartialEq)]
pub enum HealthEvent {
    /// An operation failed; repeated faults escalate to Failed
    Fault(BridgeError),
    /// Resource pressure; degrades but never escalates on its own
    Warning(BridgeError),
}

impl HealthEvent {
    pub fn error(&self) -> &BridgeError {
        match self {
            HealthEvent::Fault(error) | HealthEvent::Warning(error) => error,
        }
    }
}

/// Receiver for health signals, implemented by the self-healing coordinator
pub trait HealthSink {
    fn report(&self, component: ComponentName, event: HealthEvent);

    /// The condition behind an earlier warning has cleared.
    fn recovered(&self, _component: ComponentName) {}
}
