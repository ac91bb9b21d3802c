// ABOUTME: Core type definitions shared by every statebridge crate (Layer 1)
// ABOUTME: Pure data types plus the narrow traits other layers implement at their seams

pub mod chat;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod ids;
pub mod payload;
pub mod reset;
pub mod tracking;

pub use chat::{ChatMessage, DraftChange, MessageRole, SessionId, SessionUpdate};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BatchingConfig, BridgeConfig, HealingConfig, MemoryConfig, PerformanceConfig};
pub use error::{BridgeError, BridgeResult};
pub use health::{ComponentName, HealthEvent, HealthRecord, HealthSink, HealthStatus};
pub use ids::{OwnerTag, Revision, SubscriptionId, Topic};
pub use payload::{Payload, StateKey, StatePatch, StateValue};
pub use reset::{ResetCommand, ResetParticipant};
pub use tracking::{AllocationKind, AllocationRef, AllocationTracker, Sweepable};
