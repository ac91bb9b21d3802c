// ABOUTME: Error taxonomy for every public bridge operation
// ABOUTME: Faults are returned as values, never unwound across the bridge boundary

use crate::health::ComponentName;
use crate::ids::{OwnerTag, Revision, SubscriptionId, Topic};

/// Errors surfaced by bridge components
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// Unregister of an unknown id. Logged, then treated as success.
    #[error("Subscription not found: {id}")]
    SubscriptionNotFound { id: SubscriptionId },

    /// A subscriber callback returned an error or panicked
    #[error("Delivery to '{owner}' on topic '{topic}' failed: {message}")]
    DeliveryFailure {
        owner: OwnerTag,
        topic: Topic,
        message: String,
    },

    /// Apply was based on a stale revision; resolved last-writer-wins
    #[error("State conflict: expected revision {expected}, found {actual}")]
    StateConflict { expected: Revision, actual: Revision },

    /// SelfHealing gave up on a component
    #[error("Reset of {component} exhausted after {attempts} attempts")]
    ResetExhausted {
        component: ComponentName,
        attempts: u32,
    },

    /// A single reset participant rejected a reset command
    #[error("Reset of {component} failed: {message}")]
    ResetFailed {
        component: ComponentName,
        message: String,
    },

    /// Revision history no longer covers the requested revision
    #[error("Revision {revision} is no longer retained")]
    UnknownRevision { revision: Revision },

    /// Bus subscription count crossed the leak-warning threshold
    #[error("Subscription count {count} exceeds threshold {threshold}")]
    SubscriptionLeak { count: usize, threshold: usize },

    /// Chat data could not be translated to or from bridge state
    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("Bridge has been shut down")]
    BridgeShutdown,

    #[error("Configuration validation failed: {message}")]
    InvalidConfig { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl BridgeError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        BridgeError::InvalidConfig {
            message: message.into(),
        }
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::SubscriptionNotFound { .. } => "subscription_not_found",
            BridgeError::DeliveryFailure { .. } => "delivery_failure",
            BridgeError::StateConflict { .. } => "state_conflict",
            BridgeError::ResetExhausted { .. } => "reset_exhausted",
            BridgeError::ResetFailed { .. } => "reset_failed",
            BridgeError::UnknownRevision { .. } => "unknown_revision",
            BridgeError::SubscriptionLeak { .. } => "subscription_leak",
            BridgeError::InvalidPayload { .. } => "invalid_payload",
            BridgeError::BridgeShutdown => "bridge_shutdown",
            BridgeError::InvalidConfig { .. } => "invalid_config",
            BridgeError::Config { .. } => "config",
        }
    }
}

/// Uniform outcome of a public bridge operation
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = BridgeError::DeliveryFailure {
            owner: OwnerTag::new("sidebar"),
            topic: Topic::new("session:update"),
            message: "boom".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Delivery to 'sidebar' on topic 'session:update' failed: boom"
        );
        assert_eq!(error.kind(), "delivery_failure");
    }

    #[test]
    fn test_reset_exhausted_names_component() {
        let error = BridgeError::ResetExhausted {
            component: ComponentName::Owner(OwnerTag::new("composer")),
            attempts: 5,
        };
        assert_eq!(
            error.to_string(),
            "Reset of owner:composer exhausted after 5 attempts"
        );
    }
}
