// ABOUTME: Selective chat bridge between a legacy view and a modern store (Layer 4)
// ABOUTME: Wires the event, state and health layers together for chat sessions

pub mod adapters;
pub mod chat;
pub mod config;
pub mod diagnostics;
pub mod selective_chat_bridge;

#[cfg(test)]
mod tests;

pub use adapters::{LegacyView, ModernStore};
pub use chat::{
    ChatChannel, ChatKey, ChatPatchBuilder, LegacyChatEvent, LegacyUpdate, StoreMutation,
};
pub use config::{ChatConfig, StatebridgeConfig};
pub use diagnostics::{ChatBridgeDiagnostics, ComponentReport, DiagnosticsReport};
pub use selective_chat_bridge::{
    LEGACY_INGRESS_OWNER, LEGACY_VIEW_OWNER, MODERN_STORE_OWNER, SelectiveChatBridge,
};

use statebridge_logging::LoggingReloadHandle;

/// Initialize logging from the `[logging]` section with environment
/// overrides applied. The returned handle changes levels at runtime.
pub fn init_logging(config: &StatebridgeConfig) -> anyhow::Result<LoggingReloadHandle> {
    statebridge_logging::init_logging_with_reload(config.logging_with_env()?)
}
