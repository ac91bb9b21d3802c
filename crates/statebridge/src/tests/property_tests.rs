// ABOUTME: Property tests for batching, revision accounting and subscription bookkeeping
// ABOUTME: Runs randomized event and attach/detach sequences through the full bridge

use proptest::prelude::*;
use serde_json::json;
use statebridge_events::callback;
use statebridge_types::{OwnerTag, Revision};

use super::support::{draft, harness, session};
use crate::chat::{ChatKey, DRAFT_CHANGE, LegacyChatEvent, StoreMutation};

const OWNERS: [&str; 3] = ["sidebar", "composer", "header"];

#[derive(Debug, Clone)]
enum Lifecycle {
    Attach(usize),
    Detach(usize),
}

fn lifecycle() -> impl Strategy<Value = Lifecycle> {
    prop_oneof![
        3 => (0..OWNERS.len()).prop_map(Lifecycle::Attach),
        1 => (0..OWNERS.len()).prop_map(Lifecycle::Detach),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_keystrokes_in_one_tick_make_one_revision(
        texts in prop::collection::vec("[a-z ]{1,12}", 1..40)
    ) {
        let h = harness();
        for text in &texts {
            h.bridge
                .handle_legacy_event(LegacyChatEvent::ChangeDraft(draft("s1", text)))
                .unwrap();
        }
        h.bridge.pump();

        prop_assert_eq!(h.bridge.state().revision(), Revision::new(1));
        let key = ChatKey::Draft(session("s1")).to_key();
        prop_assert_eq!(h.bridge.get(&key), texts.last().map(|text| json!(text)));

        let draft_flushes = h
            .bridge
            .bus()
            .emitter()
            .history()
            .iter()
            .filter(|record| record.topic.as_str() == DRAFT_CHANGE)
            .count();
        prop_assert_eq!(draft_flushes, 1);
    }

    #[test]
    fn prop_each_store_mutation_is_one_revision(
        texts in prop::collection::vec("[a-z]{0,8}", 1..30)
    ) {
        let h = harness();
        for (index, text) in texts.iter().enumerate() {
            let revision = h
                .bridge
                .handle_store_mutation(StoreMutation::SetDraft(draft("s1", text)))
                .unwrap();
            prop_assert_eq!(revision, Some(Revision::new(index as u64 + 1)));
        }
        let key = ChatKey::Draft(session("s1")).to_key();
        prop_assert_eq!(h.bridge.get(&key), texts.last().map(|text| json!(text)));
        prop_assert_eq!(h.bridge.state().conflict_count(), 0);
    }

    #[test]
    fn prop_subscription_count_tracks_attach_and_detach(
        operations in prop::collection::vec(lifecycle(), 0..40)
    ) {
        let h = harness();
        let baseline = h.bridge.subscription_count();
        let mut live = [0usize; OWNERS.len()];

        for operation in operations {
            match operation {
                Lifecycle::Attach(index) => {
                    h.bridge
                        .attach_legacy_listener(OWNERS[index], "panel:refresh", callback(|_, _| Ok(())))
                        .unwrap();
                    live[index] += 1;
                }
                Lifecycle::Detach(index) => {
                    let released = h.bridge.detach_component(&OwnerTag::new(OWNERS[index]));
                    prop_assert_eq!(released, live[index]);
                    live[index] = 0;
                }
            }

            prop_assert_eq!(
                h.bridge.subscription_count(),
                baseline + live.iter().sum::<usize>()
            );
            for (index, owner) in OWNERS.iter().enumerate() {
                prop_assert_eq!(
                    h.bridge.memory().tracked_for_owner(&OwnerTag::new(*owner)),
                    live[index]
                );
            }
        }
    }
}
