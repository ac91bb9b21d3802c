// ABOUTME: Event payloads and partial-state patches exchanged through the bridge
// ABOUTME: Tagged variants per topic kind with an opaque JSON fallback

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::chat::{ChatMessage, DraftChange, SessionUpdate};

/// Key into the shared bridge state
pub type StateKey = String;

/// Structural value stored under a state key
pub type StateValue = serde_json::Value;

/// Payload carried by a published event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Session(SessionUpdate),
    Message(ChatMessage),
    Draft(DraftChange),
    State(StatePatch),
    /// Heterogeneous topics that have no dedicated variant
    Opaque(serde_json::Value),
}

impl Payload {
    pub fn opaque(value: serde_json::Value) -> Self {
        Payload::Opaque(value)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Session(_) => "session",
            Payload::Message(_) => "message",
            Payload::Draft(_) => "draft",
            Payload::State(_) => "state",
            Payload::Opaque(_) => "opaque",
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Opaque(value)
    }
}

/// Partial state update: `Some(value)` sets a key, `None` removes it.
///
/// Entries are kept sorted by key so applying a patch is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatePatch {
    entries: BTreeMap<StateKey, Option<StateValue>>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    pub fn with(mut self, key: impl Into<StateKey>, value: impl Into<StateValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Builder-style removal
    pub fn without(mut self, key: impl Into<StateKey>) -> Self {
        self.remove(key);
        self
    }

    pub fn set(&mut self, key: impl Into<StateKey>, value: impl Into<StateValue>) {
        self.entries.insert(key.into(), Some(value.into()));
    }

    pub fn remove(&mut self, key: impl Into<StateKey>) {
        self.entries.insert(key.into(), None);
    }

    /// Fold another patch into this one; entries from `other` win.
    pub fn merge(&mut self, other: StatePatch) {
        self.entries.extend(other.entries);
    }

    pub fn get(&self, key: &str) -> Option<&Option<StateValue>> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &Option<StateValue>)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &StateKey> {
        self.entries.keys()
    }
}

impl IntoIterator for StatePatch {
    type Item = (StateKey, Option<StateValue>);
    type IntoIter = std::collections::btree_map::IntoIter<StateKey, Option<StateValue>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(StateKey, Option<StateValue>)> for StatePatch {
    fn from_iter<T: IntoIterator<Item = (StateKey, Option<StateValue>)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
