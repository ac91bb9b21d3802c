// ABOUTME: Shared state and health machinery for the statebridge (Layer 3)
// ABOUTME: Versioned state, memory accounting, component status and the self-healing coordinator

pub mod memory_manager;
pub mod self_healing;
pub mod state_manager;
pub mod status;

pub use memory_manager::MemoryManager;
pub use self_healing::{HealingPhase, SelfHealing};
pub use state_manager::{
    APPLY_LABEL, BridgeState, ChangeCallback, KeyChange, Origin, RevisionSummary,
    STATE_CHANGE_TOPIC, StateChange, StateManager, change_callback,
};
pub use status::{BridgeStatusManager, ListenerId, StatusChange, StatusListener};
