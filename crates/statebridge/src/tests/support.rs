// ABOUTME: Shared fixtures for bridge scenario tests
// ABOUTME: Manual-clock harness plus recording store, view and bus listener doubles

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use statebridge_events::{Callback, callback};
use statebridge_types::{
    ChatMessage, DraftChange, ManualClock, MessageRole, Payload, SessionId, Topic,
};

use crate::adapters::{LegacyView, ModernStore};
use crate::chat::{LegacyChatEvent, LegacyUpdate, StoreMutation};
use crate::config::StatebridgeConfig;
use crate::selective_chat_bridge::SelectiveChatBridge;

pub struct Harness {
    pub clock: Rc<ManualClock>,
    pub bridge: Rc<SelectiveChatBridge>,
    pub modern: Rc<RecordingStore>,
    pub legacy: Rc<RecordingView>,
}

impl Harness {
    /// Advance the clock and run everything that became ready.
    pub fn advance(&self, millis: u64) {
        self.clock.advance(Duration::from_millis(millis));
        self.bridge.pump();
    }
}

pub fn harness() -> Harness {
    harness_with(StatebridgeConfig::default())
}

pub fn harness_with(config: StatebridgeConfig) -> Harness {
    let clock = Rc::new(ManualClock::new());
    let bridge = SelectiveChatBridge::with_clock(config, clock.clone())
        .expect("Failed to build bridge");
    let modern = Rc::new(RecordingStore::default());
    let legacy = Rc::new(RecordingView::default());
    bridge.connect_modern(modern.clone());
    bridge.connect_legacy(legacy.clone());
    Harness {
        clock,
        bridge,
        modern,
        legacy,
    }
}

/// Modern store double that records commits and can fail or echo.
#[derive(Default)]
pub struct RecordingStore {
    pub commits: RefCell<Vec<StoreMutation>>,
    pub fail: Cell<bool>,
    pub echo_into: RefCell<Option<Weak<SelectiveChatBridge>>>,
}

impl RecordingStore {
    pub fn take(&self) -> Vec<StoreMutation> {
        self.commits.take()
    }

    pub fn echo_into(&self, bridge: &Rc<SelectiveChatBridge>) {
        *self.echo_into.borrow_mut() = Some(Rc::downgrade(bridge));
    }
}

impl ModernStore for RecordingStore {
    fn commit(&self, mutation: &StoreMutation) -> anyhow::Result<()> {
        if self.fail.get() {
            anyhow::bail!("store offline");
        }
        self.commits.borrow_mut().push(mutation.clone());

        let bridge = self.echo_into.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(bridge) = bridge {
            let echoed = bridge.handle_store_mutation(mutation.clone())?;
            assert_eq!(echoed, None, "echo crossed the bridge");
        }
        Ok(())
    }
}

/// Legacy view double that records rendered updates and can fail or echo.
#[derive(Default)]
pub struct RecordingView {
    pub rendered: RefCell<Vec<LegacyUpdate>>,
    pub fail: Cell<bool>,
    pub echo_into: RefCell<Option<Weak<SelectiveChatBridge>>>,
}

impl RecordingView {
    pub fn take(&self) -> Vec<LegacyUpdate> {
        self.rendered.take()
    }

    pub fn echo_into(&self, bridge: &Rc<SelectiveChatBridge>) {
        *self.echo_into.borrow_mut() = Some(Rc::downgrade(bridge));
    }
}

impl LegacyView for RecordingView {
    fn render(&self, update: &LegacyUpdate) -> anyhow::Result<()> {
        if self.fail.get() {
            anyhow::bail!("view detached from DOM");
        }
        self.rendered.borrow_mut().push(update.clone());

        // A DOM input listener re-raising the value it was just given
        let bridge = self.echo_into.borrow().as_ref().and_then(Weak::upgrade);
        if let (Some(bridge), LegacyUpdate::Draft(draft)) = (bridge, update) {
            let published =
                bridge.handle_legacy_event(LegacyChatEvent::ChangeDraft(draft.clone()))?;
            assert!(!published, "echo crossed the bridge");
        }
        Ok(())
    }
}

pub type Deliveries = Rc<RefCell<Vec<(Topic, Vec<Payload>)>>>;

/// Bus callback recording every delivery.
pub fn recorder() -> (Callback, Deliveries) {
    let deliveries: Deliveries = Rc::new(RefCell::new(Vec::new()));
    let log = deliveries.clone();
    let callback = callback(move |topic, payloads| {
        log.borrow_mut().push((topic.clone(), payloads.to_vec()));
        Ok(())
    });
    (callback, deliveries)
}

pub fn session(id: &str) -> SessionId {
    SessionId::new(id)
}

pub fn message(session_id: &str, message_id: &str, content: &str) -> ChatMessage {
    ChatMessage {
        session_id: session(session_id),
        message_id: message_id.to_string(),
        role: MessageRole::User,
        content: content.to_string(),
    }
}

pub fn draft(session_id: &str, text: &str) -> DraftChange {
    DraftChange {
        session_id: session(session_id),
        text: text.to_string(),
    }
}
