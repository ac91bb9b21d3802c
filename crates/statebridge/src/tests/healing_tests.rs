// ABOUTME: Fault isolation and recovery through the full bridge
// ABOUTME: Failing subscribers and stores degrade, fail, reset and come back healthy

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use statebridge_core::HealingPhase;
use statebridge_events::callback;
use statebridge_types::{
    AllocationKind, ComponentName, HealthStatus, OwnerTag, Revision, SessionUpdate,
};

use super::support::{draft, harness, harness_with, message, session};
use crate::chat::{LegacyChatEvent, MESSAGE_APPEND, StoreMutation};
use crate::config::StatebridgeConfig;
use crate::selective_chat_bridge::MODERN_STORE_OWNER;

#[test]
fn test_failing_subscriber_is_reset_with_its_subscriptions() {
    let h = harness();
    let owner = OwnerTag::new("sidebar");
    let sidebar = ComponentName::Owner(owner.clone());
    h.bridge
        .attach_legacy_listener(
            owner.clone(),
            MESSAGE_APPEND,
            callback(|_, _| Err(anyhow::anyhow!("sidebar render failed"))),
        )
        .unwrap();
    let subscriptions_before = h.bridge.bus().subscription_count();
    let ids_before = h.bridge.bus().listeners().ids_for_owner(&owner);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    let watched = sidebar.clone();
    h.bridge.status().on_status_change(move |change| {
        if change.component == watched {
            log.borrow_mut().push(change.current);
        }
    });

    let mut statuses = Vec::new();
    for index in 0..3 {
        h.bridge
            .handle_legacy_event(LegacyChatEvent::AppendMessage(message(
                "s1",
                &format!("m{index}"),
                "hello",
            )))
            .unwrap();
        h.bridge.pump();
        statuses.push(h.bridge.status().status_of(&sidebar));
    }

    assert_eq!(
        statuses,
        vec![
            HealthStatus::Degraded,
            HealthStatus::Degraded,
            HealthStatus::Failed
        ]
    );
    assert_eq!(h.bridge.healing().phase(&sidebar), HealingPhase::Failed);
    // The failing subscriber never blocked the ingress subscription
    assert_eq!(h.bridge.state().revision(), Revision::new(3));

    h.advance(100);

    assert_eq!(h.bridge.status().status_of(&sidebar), HealthStatus::Healthy);
    assert_eq!(h.bridge.healing().phase(&sidebar), HealingPhase::Healthy);
    assert_eq!(h.bridge.bus().subscription_count(), subscriptions_before);
    let ids_after = h.bridge.bus().listeners().ids_for_owner(&owner);
    assert_eq!(ids_after.len(), 1);
    assert_ne!(ids_after, ids_before);

    let transitions = seen.borrow();
    assert_eq!(transitions.first(), Some(&HealthStatus::Degraded));
    assert!(transitions.contains(&HealthStatus::Failed));
    assert_eq!(transitions.last(), Some(&HealthStatus::Healthy));
}

#[test]
fn test_id_from_attach_still_detaches_after_reset() {
    let h = harness();
    let owner = OwnerTag::new("sidebar");
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let original = h
        .bridge
        .attach_legacy_listener(
            owner.clone(),
            MESSAGE_APPEND,
            callback(move |_, _| {
                counter.set(counter.get() + 1);
                Err(anyhow::anyhow!("sidebar render failed"))
            }),
        )
        .unwrap();
    let bus_before = h.bridge.bus().subscription_count();
    let tracked_before = h.bridge.subscription_count();

    for index in 0..3 {
        h.bridge
            .handle_legacy_event(LegacyChatEvent::AppendMessage(message(
                "s1",
                &format!("m{index}"),
                "hello",
            )))
            .unwrap();
        h.bridge.pump();
    }
    h.advance(100);
    assert_ne!(
        h.bridge.bus().listeners().ids_for_owner(&owner),
        vec![original]
    );

    h.bridge.bus().unsubscribe(original).unwrap();

    assert_eq!(h.bridge.bus().subscription_count(), bus_before - 1);
    assert_eq!(h.bridge.subscription_count(), tracked_before - 1);
    assert!(h.bridge.bus().listeners().ids_for_owner(&owner).is_empty());

    let delivered = calls.get();
    h.bridge
        .handle_legacy_event(LegacyChatEvent::AppendMessage(message("s1", "m9", "late")))
        .unwrap();
    h.bridge.pump();
    assert_eq!(calls.get(), delivered);
}

#[test]
fn test_detached_owners_leave_no_health_records() {
    let h = harness();
    let components_before = h.bridge.status().get_status().len();

    for cycle in 0..50 {
        let owner = OwnerTag::new(format!("panel-{cycle}"));
        h.bridge
            .attach_legacy_listener(
                owner.clone(),
                MESSAGE_APPEND,
                callback(|_, _| Err(anyhow::anyhow!("panel render failed"))),
            )
            .unwrap();
        for index in 0..3 {
            h.bridge
                .handle_legacy_event(LegacyChatEvent::AppendMessage(message(
                    "s1",
                    &format!("c{cycle}-m{index}"),
                    "hello",
                )))
                .unwrap();
            h.bridge.pump();
        }
        let panel = ComponentName::Owner(owner.clone());
        assert_eq!(h.bridge.status().status_of(&panel), HealthStatus::Failed);
        assert_eq!(h.bridge.status().overall(), HealthStatus::Failed);

        h.bridge.detach_component(&owner);

        assert!(h.bridge.status().record(&panel).is_none());
        assert_eq!(h.bridge.healing().phase(&panel), HealingPhase::Healthy);
    }

    assert_eq!(h.bridge.status().get_status().len(), components_before);
    assert_eq!(h.bridge.status().overall(), HealthStatus::Healthy);
    assert_eq!(h.bridge.diagnostics().report().overall, HealthStatus::Healthy);

    // The cancelled resets never fire
    h.advance(10_000);
    assert_eq!(h.bridge.status().overall(), HealthStatus::Healthy);
}

#[test]
fn test_failing_store_does_not_block_legacy_view() {
    let h = harness();
    let store = ComponentName::Owner(OwnerTag::new(MODERN_STORE_OWNER));
    h.bridge
        .handle_store_mutation(StoreMutation::UpsertSession(SessionUpdate {
            session_id: session("s1"),
            title: Some("Plans".to_string()),
            active: true,
        }))
        .unwrap();
    h.legacy.take();
    h.modern.fail.set(true);

    assert_eq!(h.bridge.resync().unwrap(), 2);

    assert!(!h.legacy.take().is_empty());
    assert!(h.modern.take().is_empty());
    assert_eq!(h.bridge.status().status_of(&store), HealthStatus::Degraded);
    assert_eq!(h.bridge.status().overall(), HealthStatus::Degraded);
}

#[test]
fn test_exhausted_reset_is_reported_until_retried() {
    let mut config = StatebridgeConfig::default();
    config.bridge.healing.failure_threshold = 1;
    config.bridge.healing.max_reset_attempts = 1;
    let h = harness_with(config);
    let store = ComponentName::Owner(OwnerTag::new(MODERN_STORE_OWNER));
    h.modern.fail.set(true);

    h.bridge
        .handle_legacy_event(LegacyChatEvent::ChangeDraft(draft("s1", "lost")))
        .unwrap();
    h.bridge.pump();
    assert_eq!(h.bridge.healing().phase(&store), HealingPhase::Failed);

    // The replay inside the reset hits the same failing store
    h.advance(100);

    assert_eq!(
        h.bridge.healing().phase(&store),
        HealingPhase::PermanentlyFailed
    );
    let report = h.bridge.diagnostics().report();
    let component = report
        .component("owner:modern-store")
        .expect("store should be reported");
    assert_eq!(component.status, HealthStatus::Failed);
    assert_eq!(component.error_kind, Some("reset_exhausted"));
    assert_eq!(report.overall, HealthStatus::Failed);

    // No further attempts are scheduled on their own
    h.advance(10_000);
    assert_eq!(
        h.bridge.healing().phase(&store),
        HealingPhase::PermanentlyFailed
    );

    h.modern.fail.set(false);
    h.bridge.reset_component(&store).unwrap();

    assert_eq!(h.bridge.status().status_of(&store), HealthStatus::Healthy);
    assert!(
        h.modern
            .take()
            .contains(&StoreMutation::SetDraft(draft("s1", "lost")))
    );
}

#[test]
fn test_subscription_leak_warning_clears_on_detach() {
    let mut config = StatebridgeConfig::default();
    config.bridge.memory.subscription_warn_threshold = 10;
    let h = harness_with(config);
    let owner = OwnerTag::new("leaky-panel");

    for _ in 0..3 {
        h.bridge
            .attach_legacy_listener(owner.clone(), "panel:refresh", callback(|_, _| Ok(())))
            .unwrap();
    }
    assert_eq!(
        h.bridge.status().status_of(&ComponentName::MemoryManager),
        HealthStatus::Healthy
    );

    h.bridge
        .attach_legacy_listener(owner.clone(), "panel:refresh", callback(|_, _| Ok(())))
        .unwrap();
    assert!(h.bridge.memory().is_over_threshold());
    assert_eq!(
        h.bridge.status().status_of(&ComponentName::MemoryManager),
        HealthStatus::Degraded
    );
    assert_eq!(
        h.bridge.healing().phase(&ComponentName::MemoryManager),
        HealingPhase::Degraded
    );

    assert_eq!(h.bridge.detach_component(&owner), 4);

    assert!(!h.bridge.memory().is_over_threshold());
    assert_eq!(
        h.bridge.status().status_of(&ComponentName::MemoryManager),
        HealthStatus::Healthy
    );
}

#[test]
fn test_periodic_sweep_bounds_histories() {
    let mut config = StatebridgeConfig::default();
    config.bridge.memory.batch_history_window = 2;
    config.bridge.memory.revision_history_window = 3;
    config.bridge.memory.sweep_interval_ms = 1_000;
    let h = harness_with(config);

    for index in 0..6 {
        h.bridge
            .handle_store_mutation(StoreMutation::SetDraft(draft("s1", &index.to_string())))
            .unwrap();
    }
    for index in 0..4 {
        h.bridge
            .handle_legacy_event(LegacyChatEvent::ChangeDraft(draft(
                "s2",
                &index.to_string(),
            )))
            .unwrap();
        h.bridge.pump();
    }
    let memory = h.bridge.memory();
    assert_eq!(memory.tracked_count(AllocationKind::RevisionHistory), 10);
    assert_eq!(memory.tracked_count(AllocationKind::BatchHistory), 4);

    h.advance(1_000);

    assert_eq!(memory.tracked_count(AllocationKind::RevisionHistory), 3);
    assert_eq!(memory.tracked_count(AllocationKind::BatchHistory), 2);
    assert_eq!(memory.released_total(), 9);
    assert_eq!(h.bridge.bus().emitter().history().len(), 2);

    // Rollback beyond the retained window is refused
    assert!(h.bridge.state().rollback_to(Revision::new(2)).is_err());
}
