// ABOUTME: Host-implemented collaborators on either side of the chat bridge
// ABOUTME: The modern store accepts mutations; the legacy view renders updates

use crate::chat::{LegacyUpdate, StoreMutation};

/// The modern application store.
///
/// `commit` may call back into the bridge; those calls are recognised as
/// echoes and dropped. An error is reported as a fault of the `modern-store`
/// owner.
pub trait ModernStore {
    fn commit(&self, mutation: &StoreMutation) -> anyhow::Result<()>;
}

/// The legacy chat view.
pub trait LegacyView {
    fn render(&self, update: &LegacyUpdate) -> anyhow::Result<()>;
}
