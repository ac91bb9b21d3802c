// ABOUTME: Allocation tracking seam between retaining components and the memory manager
// ABOUTME: Retainers report what they hold; sweepable stores can be trimmed to a window

use serde::Serialize;
use std::fmt;

use crate::ids::OwnerTag;

/// Category of retained bridge memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationKind {
    Subscription,
    BatchHistory,
    RevisionHistory,
}

impl fmt::Display for AllocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationKind::Subscription => f.write_str("subscription"),
            AllocationKind::BatchHistory => f.write_str("batch_history"),
            AllocationKind::RevisionHistory => f.write_str("revision_history"),
        }
    }
}

/// Reference to one tracked allocation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AllocationRef {
    pub id: u64,
    pub owner: Option<OwnerTag>,
}

impl AllocationRef {
    pub fn new(id: u64) -> Self {
        Self { id, owner: None }
    }

    pub fn owned(id: u64, owner: OwnerTag) -> Self {
        Self {
            id,
            owner: Some(owner),
        }
    }
}

/// Receiver of allocation and release notifications
pub trait AllocationTracker {
    fn track_allocation(&self, kind: AllocationKind, allocation: AllocationRef);

    fn release(&self, kind: AllocationKind, allocation: &AllocationRef);
}

/// Store whose retained history can be evicted oldest-first
pub trait Sweepable {
    fn kind(&self) -> AllocationKind;

    fn retained(&self) -> usize;

    /// Evict the oldest entries until at most `window` remain.
    /// Returns the number of entries released.
    fn trim_to(&self, window: usize) -> usize;
}
