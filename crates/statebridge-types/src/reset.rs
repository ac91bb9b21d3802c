// ABOUTME: Reset messages sent by the self-healing coordinator
// ABOUTME: Components expose a reset entry point instead of having their internals mutated

use crate::error::BridgeResult;
use crate::health::ComponentName;
use crate::ids::{OwnerTag, Revision};

/// One step of a coordinated reset sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetCommand {
    /// Drop and re-register every subscription of the owner
    Resubscribe { owner: OwnerTag },
    /// Discard pending batches; `None` clears every topic
    ClearQueues { owner: Option<OwnerTag> },
    /// Restore state to a known-good revision as a new revision
    RollbackTo { revision: Revision },
    /// Re-deliver a snapshot to change subscribers; `None` means the latest
    ReplaySnapshot { revision: Option<Revision> },
}

/// Component that takes part in reset sequences.
///
/// Participants ignore commands that do not concern them and return `Ok`.
pub trait ResetParticipant {
    fn participant(&self) -> ComponentName;

    fn handle_reset(&self, command: &ResetCommand) -> BridgeResult<()>;
}
