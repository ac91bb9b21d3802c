// ABOUTME: Chat-session vocabulary spoken on both sides of the bridge
// ABOUTME: Maps legacy events and store mutations onto state keys, and state changes back to updates

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;
use statebridge_core::{BridgeState, StateChange};
use statebridge_logging::debug;
use statebridge_types::{
    ChatMessage, DraftChange, Payload, SessionId, SessionUpdate, StateKey, StatePatch, StateValue,
    Topic,
};

pub const SESSION_SELECT: &str = "session:select";
pub const SESSION_UPDATE: &str = "session:update";
pub const MESSAGE_APPEND: &str = "message:append";
pub const DRAFT_CHANGE: &str = "draft:change";
pub const SESSION_CLOSE: &str = "session:close";

/// Topic carrying modern-side updates to attached legacy listeners.
pub const STATE_SYNC: &str = "state:sync";

pub const ACTIVE_SESSION_KEY: &str = "chat.active_session";
const SESSION_KEY_PREFIX: &str = "chat.session:";

/// A bridgeable category of chat events. Only configured channels cross the
/// bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatChannel {
    SessionSelect,
    SessionUpdate,
    MessageAppend,
    DraftChange,
    SessionClose,
}

impl ChatChannel {
    pub const ALL: [ChatChannel; 5] = [
        ChatChannel::SessionSelect,
        ChatChannel::SessionUpdate,
        ChatChannel::MessageAppend,
        ChatChannel::DraftChange,
        ChatChannel::SessionClose,
    ];

    pub fn topic_name(self) -> &'static str {
        match self {
            ChatChannel::SessionSelect => SESSION_SELECT,
            ChatChannel::SessionUpdate => SESSION_UPDATE,
            ChatChannel::MessageAppend => MESSAGE_APPEND,
            ChatChannel::DraftChange => DRAFT_CHANGE,
            ChatChannel::SessionClose => SESSION_CLOSE,
        }
    }

    pub fn topic(self) -> Topic {
        Topic::new(self.topic_name())
    }

    pub fn from_topic(topic: &Topic) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|channel| channel.topic_name() == topic.as_str())
    }
}

impl fmt::Display for ChatChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic_name())
    }
}

/// State keys owned by the chat domain.
///
/// `chat.active_session` holds the selected session id. Each open session
/// has `chat.session:<id>:meta` (its presence marks the session open),
/// `chat.session:<id>:messages` and `chat.session:<id>:draft`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatKey {
    ActiveSession,
    Session(SessionId),
    Messages(SessionId),
    Draft(SessionId),
}

impl ChatKey {
    pub fn parse(key: &str) -> Option<Self> {
        if key == ACTIVE_SESSION_KEY {
            return Some(ChatKey::ActiveSession);
        }
        let (session, field) = key.strip_prefix(SESSION_KEY_PREFIX)?.rsplit_once(':')?;
        if session.is_empty() {
            return None;
        }
        let session = SessionId::new(session);
        match field {
            "meta" => Some(ChatKey::Session(session)),
            "messages" => Some(ChatKey::Messages(session)),
            "draft" => Some(ChatKey::Draft(session)),
            _ => None,
        }
    }

    pub fn to_key(&self) -> StateKey {
        let (session, field) = match self {
            ChatKey::ActiveSession => return ACTIVE_SESSION_KEY.to_string(),
            ChatKey::Session(session) => (session, "meta"),
            ChatKey::Messages(session) => (session, "messages"),
            ChatKey::Draft(session) => (session, "draft"),
        };
        format!("{SESSION_KEY_PREFIX}{session}:{field}")
    }

    pub fn channel(&self) -> ChatChannel {
        match self {
            ChatKey::ActiveSession => ChatChannel::SessionSelect,
            ChatKey::Session(_) => ChatChannel::SessionUpdate,
            ChatKey::Messages(_) => ChatChannel::MessageAppend,
            ChatKey::Draft(_) => ChatChannel::DraftChange,
        }
    }
}

/// An event raised by the legacy chat view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyChatEvent {
    SelectSession(SessionId),
    UpdateSession(SessionUpdate),
    AppendMessage(ChatMessage),
    ChangeDraft(DraftChange),
    CloseSession(SessionId),
}

impl LegacyChatEvent {
    pub fn channel(&self) -> ChatChannel {
        match self {
            LegacyChatEvent::SelectSession(_) => ChatChannel::SessionSelect,
            LegacyChatEvent::UpdateSession(_) => ChatChannel::SessionUpdate,
            LegacyChatEvent::AppendMessage(_) => ChatChannel::MessageAppend,
            LegacyChatEvent::ChangeDraft(_) => ChatChannel::DraftChange,
            LegacyChatEvent::CloseSession(_) => ChatChannel::SessionClose,
        }
    }

    pub fn to_payload(&self) -> Payload {
        match self {
            LegacyChatEvent::SelectSession(session) => Payload::Session(SessionUpdate {
                session_id: session.clone(),
                title: None,
                active: true,
            }),
            LegacyChatEvent::UpdateSession(update) => Payload::Session(update.clone()),
            LegacyChatEvent::AppendMessage(message) => Payload::Message(message.clone()),
            LegacyChatEvent::ChangeDraft(draft) => Payload::Draft(draft.clone()),
            LegacyChatEvent::CloseSession(session) => Payload::Session(SessionUpdate {
                session_id: session.clone(),
                title: None,
                active: false,
            }),
        }
    }

    /// Interpret a payload published on `channel`. Loose JSON from the legacy
    /// DOM is accepted when it has the channel's shape.
    pub fn decode(channel: ChatChannel, payload: &Payload) -> Option<Self> {
        let typed;
        let payload = match payload {
            Payload::Opaque(value) => {
                typed = Self::typed_from_json(channel, value)?;
                &typed
            }
            other => other,
        };

        match (channel, payload) {
            (ChatChannel::SessionSelect, Payload::Session(update)) => {
                Some(LegacyChatEvent::SelectSession(update.session_id.clone()))
            }
            (ChatChannel::SessionUpdate, Payload::Session(update)) => {
                Some(LegacyChatEvent::UpdateSession(update.clone()))
            }
            (ChatChannel::MessageAppend, Payload::Message(message)) => {
                Some(LegacyChatEvent::AppendMessage(message.clone()))
            }
            (ChatChannel::DraftChange, Payload::Draft(draft)) => {
                Some(LegacyChatEvent::ChangeDraft(draft.clone()))
            }
            (ChatChannel::SessionClose, Payload::Session(update)) => {
                Some(LegacyChatEvent::CloseSession(update.session_id.clone()))
            }
            (channel, payload) => {
                debug!(channel = %channel, kind = payload.kind(), "Payload does not fit channel");
                None
            }
        }
    }

    fn typed_from_json(channel: ChatChannel, value: &serde_json::Value) -> Option<Payload> {
        let value = value.clone();
        let typed = match channel {
            ChatChannel::SessionSelect | ChatChannel::SessionUpdate | ChatChannel::SessionClose => {
                serde_json::from_value(value).map(Payload::Session)
            }
            ChatChannel::MessageAppend => serde_json::from_value(value).map(Payload::Message),
            ChatChannel::DraftChange => serde_json::from_value(value).map(Payload::Draft),
        };
        match typed {
            Ok(payload) => Some(payload),
            Err(error) => {
                debug!(channel = %channel, error = %error, "Ignoring malformed legacy payload");
                None
            }
        }
    }
}

/// A change to the modern chat store, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StoreMutation {
    SetActiveSession(Option<SessionId>),
    UpsertSession(SessionUpdate),
    AppendMessage(ChatMessage),
    SetMessages {
        session_id: SessionId,
        messages: Vec<ChatMessage>,
    },
    SetDraft(DraftChange),
    RemoveSession(SessionId),
}

impl StoreMutation {
    pub fn channel(&self) -> ChatChannel {
        match self {
            StoreMutation::SetActiveSession(_) => ChatChannel::SessionSelect,
            StoreMutation::UpsertSession(_) => ChatChannel::SessionUpdate,
            StoreMutation::AppendMessage(_) | StoreMutation::SetMessages { .. } => {
                ChatChannel::MessageAppend
            }
            StoreMutation::SetDraft(_) => ChatChannel::DraftChange,
            StoreMutation::RemoveSession(_) => ChatChannel::SessionClose,
        }
    }
}

impl From<LegacyChatEvent> for StoreMutation {
    fn from(event: LegacyChatEvent) -> Self {
        match event {
            LegacyChatEvent::SelectSession(session) => StoreMutation::SetActiveSession(Some(session)),
            LegacyChatEvent::UpdateSession(update) => StoreMutation::UpsertSession(update),
            LegacyChatEvent::AppendMessage(message) => StoreMutation::AppendMessage(message),
            LegacyChatEvent::ChangeDraft(draft) => StoreMutation::SetDraft(draft),
            LegacyChatEvent::CloseSession(session) => StoreMutation::RemoveSession(session),
        }
    }
}

impl From<LegacyUpdate> for StoreMutation {
    fn from(update: LegacyUpdate) -> Self {
        match update {
            LegacyUpdate::ActiveSession(session) => StoreMutation::SetActiveSession(session),
            LegacyUpdate::Session(update) => StoreMutation::UpsertSession(update),
            LegacyUpdate::SessionClosed(session) => StoreMutation::RemoveSession(session),
            LegacyUpdate::Messages {
                session_id,
                messages,
            } => StoreMutation::SetMessages {
                session_id,
                messages,
            },
            LegacyUpdate::Draft(draft) => StoreMutation::SetDraft(draft),
        }
    }
}

/// What the legacy view is asked to render after a state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LegacyUpdate {
    ActiveSession(Option<SessionId>),
    Session(SessionUpdate),
    SessionClosed(SessionId),
    Messages {
        session_id: SessionId,
        messages: Vec<ChatMessage>,
    },
    Draft(DraftChange),
}

impl LegacyUpdate {
    pub fn channel(&self) -> ChatChannel {
        match self {
            LegacyUpdate::ActiveSession(_) => ChatChannel::SessionSelect,
            LegacyUpdate::Session(_) => ChatChannel::SessionUpdate,
            LegacyUpdate::SessionClosed(_) => ChatChannel::SessionClose,
            LegacyUpdate::Messages { .. } => ChatChannel::MessageAppend,
            LegacyUpdate::Draft(_) => ChatChannel::DraftChange,
        }
    }

    pub fn to_payload(&self) -> serde_json::Result<Payload> {
        serde_json::to_value(self).map(Payload::Opaque)
    }

    /// Chat updates carried by a state change, in key order. Keys outside the
    /// chat domain and unchanged keys are skipped; a closed session yields a
    /// single `SessionClosed`.
    pub fn from_change(change: &StateChange) -> serde_json::Result<Vec<LegacyUpdate>> {
        let closed: BTreeSet<SessionId> = change
            .changes
            .iter()
            .filter(|key_change| key_change.current.is_none() && key_change.previous.is_some())
            .filter_map(|key_change| match ChatKey::parse(&key_change.key) {
                Some(ChatKey::Session(session)) => Some(session),
                _ => None,
            })
            .collect();
        let active = change
            .snapshot
            .get(ACTIVE_SESSION_KEY)
            .and_then(StateValue::as_str)
            .map(SessionId::new);

        let mut updates = Vec::new();
        for key_change in &change.changes {
            if key_change.previous == key_change.current {
                continue;
            }
            let Some(key) = ChatKey::parse(&key_change.key) else {
                continue;
            };
            let current = key_change.current.as_ref();

            let update = match (key, current) {
                (ChatKey::ActiveSession, value) => LegacyUpdate::ActiveSession(
                    value.and_then(StateValue::as_str).map(SessionId::new),
                ),
                (ChatKey::Session(session), Some(meta)) => LegacyUpdate::Session(SessionUpdate {
                    title: title_of(meta),
                    active: active.as_ref() == Some(&session),
                    session_id: session,
                }),
                (ChatKey::Session(session), None) => LegacyUpdate::SessionClosed(session),
                (ChatKey::Messages(session) | ChatKey::Draft(session), None)
                    if closed.contains(&session) =>
                {
                    continue;
                }
                (ChatKey::Messages(session_id), value) => LegacyUpdate::Messages {
                    messages: value
                        .cloned()
                        .map(serde_json::from_value)
                        .transpose()?
                        .unwrap_or_default(),
                    session_id,
                },
                (ChatKey::Draft(session_id), value) => LegacyUpdate::Draft(DraftChange {
                    text: value
                        .and_then(StateValue::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    session_id,
                }),
            };
            updates.push(update);
        }
        Ok(updates)
    }
}

fn title_of(meta: &StateValue) -> Option<String> {
    meta.get("title")
        .and_then(StateValue::as_str)
        .map(str::to_string)
}

/// Folds store mutations into one state patch against a base snapshot.
/// Later mutations see the effect of earlier ones.
pub struct ChatPatchBuilder<'a> {
    base: &'a BridgeState,
    patch: StatePatch,
}

impl<'a> ChatPatchBuilder<'a> {
    pub fn new(base: &'a BridgeState) -> Self {
        Self {
            base,
            patch: StatePatch::new(),
        }
    }

    pub fn push(&mut self, mutation: &StoreMutation) -> serde_json::Result<()> {
        match mutation {
            StoreMutation::SetActiveSession(Some(session)) => self.select(session),
            StoreMutation::SetActiveSession(None) => self.remove(ACTIVE_SESSION_KEY.to_string()),
            StoreMutation::UpsertSession(update) => {
                let key = ChatKey::Session(update.session_id.clone()).to_key();
                let title = update
                    .title
                    .clone()
                    .or_else(|| self.current(&key).as_ref().and_then(title_of));
                self.patch.set(key, json!({ "title": title }));
                if update.active {
                    self.select(&update.session_id);
                }
            }
            StoreMutation::AppendMessage(message) => {
                self.ensure_session(&message.session_id);
                let key = ChatKey::Messages(message.session_id.clone()).to_key();
                let mut messages: Vec<ChatMessage> = self
                    .current(&key)
                    .map(serde_json::from_value)
                    .transpose()?
                    .unwrap_or_default();
                messages.push(message.clone());
                self.patch.set(key, serde_json::to_value(messages)?);
            }
            StoreMutation::SetMessages {
                session_id,
                messages,
            } => {
                self.ensure_session(session_id);
                let key = ChatKey::Messages(session_id.clone()).to_key();
                self.patch.set(key, serde_json::to_value(messages)?);
            }
            StoreMutation::SetDraft(draft) => {
                self.ensure_session(&draft.session_id);
                let key = ChatKey::Draft(draft.session_id.clone()).to_key();
                self.patch.set(key, StateValue::String(draft.text.clone()));
            }
            StoreMutation::RemoveSession(session) => {
                self.remove(ChatKey::Session(session.clone()).to_key());
                self.remove(ChatKey::Messages(session.clone()).to_key());
                self.remove(ChatKey::Draft(session.clone()).to_key());
                let active = self.current(ACTIVE_SESSION_KEY);
                if active.as_ref().and_then(StateValue::as_str) == Some(session.as_str()) {
                    self.remove(ACTIVE_SESSION_KEY.to_string());
                }
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.patch.is_empty()
    }

    pub fn finish(self) -> StatePatch {
        self.patch
    }

    fn current(&self, key: &str) -> Option<StateValue> {
        match self.patch.get(key) {
            Some(pending) => pending.clone(),
            None => self.base.get(key).cloned(),
        }
    }

    fn select(&mut self, session: &SessionId) {
        self.ensure_session(session);
        self.patch
            .set(ACTIVE_SESSION_KEY, StateValue::String(session.to_string()));
    }

    fn ensure_session(&mut self, session: &SessionId) {
        let key = ChatKey::Session(session.clone()).to_key();
        if self.current(&key).is_none() {
            self.patch.set(key, json!({ "title": null }));
        }
    }

    fn remove(&mut self, key: StateKey) {
        if self.current(&key).is_some() {
            self.patch.remove(key);
        }
    }
}
