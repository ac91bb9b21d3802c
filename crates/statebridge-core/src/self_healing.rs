// ABOUTME: Per-component healing state machine driven by health reports
// ABOUTME: Escalates repeated faults to Failed and runs reset sequences with exponential backoff

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;

use serde::Serialize;
use statebridge_events::{Scheduler, TimerId};
use statebridge_logging::{debug, error, info, info_span, warn};
use statebridge_types::{
    BridgeError, BridgeResult, ComponentName, HealingConfig, HealthEvent, HealthSink,
    HealthStatus, ResetCommand, ResetParticipant, Revision,
};

use crate::state_manager::StateManager;
use crate::status::BridgeStatusManager;

/// Proof that a transition back to Healthy comes from this module.
pub(crate) struct ResetToken(());

impl ResetToken {
    fn issue() -> Self {
        ResetToken(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingPhase {
    #[default]
    Healthy,
    Degraded,
    Failed,
    Resetting,
    PermanentlyFailed,
}

#[derive(Debug, Default)]
struct ComponentHealth {
    phase: HealingPhase,
    /// Fault times inside the cooldown window
    faults: VecDeque<Instant>,
    warning_active: bool,
    attempts: u32,
    /// Revision observed when the component first degraded
    known_good: Option<Revision>,
    pending_reset: Option<TimerId>,
    fault_during_reset: Option<BridgeError>,
    recovered_at: Option<Instant>,
}

impl ComponentHealth {
    fn prune_faults(&mut self, now: Instant, config: &HealingConfig) {
        let cooldown = config.cooldown();
        while let Some(oldest) = self.faults.front() {
            if now.duration_since(*oldest) >= cooldown {
                self.faults.pop_front();
            } else {
                break;
            }
        }
    }
}

enum FaultAction {
    Escalate(HealthStatus),
    Fail { from_healthy: bool, attempt: u32 },
}

enum ResetOutcome {
    Recovered,
    Retry { error: BridgeError, attempt: u32 },
    Exhausted(BridgeError),
}

/// Watches health reports and repairs components.
///
/// Healthy moves to Degraded on the first fault and to Failed once
/// `failure_threshold` faults land inside the cooldown window. A Failed
/// component is reset after `backoff(attempt)`: every registered participant
/// receives the component's reset commands in order. Exhausting
/// `max_reset_attempts` leaves it permanently Failed until `reset_now`.
pub struct SelfHealing {
    config: HealingConfig,
    scheduler: Rc<Scheduler>,
    status: Rc<BridgeStatusManager>,
    state: Weak<StateManager>,
    participants: RefCell<Vec<Weak<dyn ResetParticipant>>>,
    components: RefCell<BTreeMap<ComponentName, ComponentHealth>>,
    self_ref: Weak<Self>,
    check_timer: Cell<Option<TimerId>>,
}

impl SelfHealing {
    pub fn new(
        config: HealingConfig,
        scheduler: Rc<Scheduler>,
        status: Rc<BridgeStatusManager>,
        state: &Rc<StateManager>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|self_ref| Self {
            config,
            scheduler,
            status,
            state: Rc::downgrade(state),
            participants: RefCell::new(Vec::new()),
            components: RefCell::new(BTreeMap::new()),
            self_ref: self_ref.clone(),
            check_timer: Cell::new(None),
        })
    }

    pub fn register_participant(&self, participant: Weak<dyn ResetParticipant>) {
        self.participants.borrow_mut().push(participant);
    }

    /// Run `check` every cooldown period.
    pub fn start(&self) -> TimerId {
        if let Some(previous) = self.check_timer.take() {
            self.scheduler.cancel(previous);
        }
        let healing = self.self_ref.clone();
        let timer = self
            .scheduler
            .schedule_repeating(self.config.cooldown(), move || {
                if let Some(healing) = healing.upgrade() {
                    healing.check();
                }
            });
        self.check_timer.set(Some(timer));
        timer
    }

    /// Cancel the periodic check and every pending reset.
    pub fn stop(&self) {
        if let Some(timer) = self.check_timer.take() {
            self.scheduler.cancel(timer);
        }
        for health in self.components.borrow_mut().values_mut() {
            if let Some(timer) = health.pending_reset.take() {
                self.scheduler.cancel(timer);
            }
        }
    }

    /// Stop tracking a detached owner: cancel its pending reset and drop its
    /// healing and health records. Returns false when nothing was tracked.
    pub fn forget(&self, component: &ComponentName) -> bool {
        let removed = self.components.borrow_mut().remove(component);
        if let Some(timer) = removed.as_ref().and_then(|health| health.pending_reset) {
            self.scheduler.cancel(timer);
        }
        let dropped_record = self.status.remove_component(component);
        if removed.is_some() {
            debug!(component = %component, "Healing record dropped");
        }
        removed.is_some() || dropped_record
    }

    /// Number of components with healing state.
    pub fn tracked_components(&self) -> usize {
        self.components.borrow().len()
    }

    pub fn phase(&self, component: &ComponentName) -> HealingPhase {
        self.components
            .borrow()
            .get(component)
            .map_or(HealingPhase::Healthy, |health| health.phase)
    }

    /// Reset attempts made since the component last settled.
    pub fn attempts(&self, component: &ComponentName) -> u32 {
        self.components
            .borrow()
            .get(component)
            .map_or(0, |health| health.attempts)
    }

    /// Soft reset of Degraded components whose faults aged out of the
    /// cooldown window. Returns how many were restored.
    pub fn check(&self) -> usize {
        let now = self.scheduler.now();
        let cooldown = self.config.cooldown();

        let restored: Vec<ComponentName> = {
            let mut components = self.components.borrow_mut();
            let mut restored = Vec::new();
            for (component, health) in components.iter_mut() {
                health.prune_faults(now, &self.config);
                match health.phase {
                    HealingPhase::Degraded
                        if health.faults.is_empty() && !health.warning_active =>
                    {
                        health.phase = HealingPhase::Healthy;
                        health.known_good = None;
                        restored.push(component.clone());
                    }
                    HealingPhase::Healthy if health.attempts > 0 && health.faults.is_empty() => {
                        let settled = health
                            .recovered_at
                            .is_some_and(|at| now.duration_since(at) >= cooldown);
                        if settled {
                            health.attempts = 0;
                            health.recovered_at = None;
                        }
                    }
                    _ => {}
                }
            }
            restored
        };

        self.status.touch_all();
        for component in &restored {
            info!(component = %component, "Faults aged out, component restored");
            self.status.restore(component, ResetToken::issue());
        }
        restored.len()
    }

    /// Run the reset sequence immediately, re-arming a permanently failed
    /// component.
    pub fn reset_now(&self, component: &ComponentName) -> BridgeResult<()> {
        {
            let mut components = self.components.borrow_mut();
            let health = components.entry(component.clone()).or_default();
            if let Some(timer) = health.pending_reset.take() {
                self.scheduler.cancel(timer);
            }
            if health.phase == HealingPhase::PermanentlyFailed {
                health.attempts = 0;
                health.phase = HealingPhase::Failed;
            }
        }
        info!(component = %component, "External reset requested");
        self.run_reset(component)
    }

    fn current_revision(&self) -> Option<Revision> {
        self.state.upgrade().map(|state| state.revision())
    }

    fn on_fault(&self, component: ComponentName, fault: BridgeError) {
        let now = self.scheduler.now();
        let revision = self.current_revision();

        let action = {
            let mut components = self.components.borrow_mut();
            let health = components.entry(component.clone()).or_default();
            match health.phase {
                HealingPhase::Resetting => {
                    health.fault_during_reset = Some(fault.clone());
                    FaultAction::Escalate(HealthStatus::Failed)
                }
                HealingPhase::Failed | HealingPhase::PermanentlyFailed => {
                    FaultAction::Escalate(HealthStatus::Failed)
                }
                HealingPhase::Healthy | HealingPhase::Degraded => {
                    let from_healthy = health.phase == HealingPhase::Healthy;
                    if from_healthy && health.known_good.is_none() {
                        health.known_good = revision;
                    }
                    health.prune_faults(now, &self.config);
                    health.faults.push_back(now);

                    if health.faults.len() >= self.config.failure_threshold as usize {
                        health.phase = HealingPhase::Failed;
                        FaultAction::Fail {
                            from_healthy,
                            attempt: health.attempts,
                        }
                    } else {
                        health.phase = HealingPhase::Degraded;
                        FaultAction::Escalate(HealthStatus::Degraded)
                    }
                }
            }
        };

        match action {
            FaultAction::Escalate(status) => {
                debug!(component = %component, error = %fault, "Fault recorded");
                self.status.escalate(&component, status, fault);
            }
            FaultAction::Fail {
                from_healthy,
                attempt,
            } => {
                if from_healthy {
                    self.status
                        .escalate(&component, HealthStatus::Degraded, fault.clone());
                }
                warn!(
                    component = %component,
                    error = %fault,
                    threshold = self.config.failure_threshold,
                    "Component failed, scheduling reset"
                );
                self.status.escalate(&component, HealthStatus::Failed, fault);
                self.schedule_reset(&component, attempt);
            }
        }
    }

    fn on_warning(&self, component: ComponentName, warning: BridgeError) {
        let revision = self.current_revision();
        {
            let mut components = self.components.borrow_mut();
            let health = components.entry(component.clone()).or_default();
            health.warning_active = true;
            if health.phase == HealingPhase::Healthy {
                health.phase = HealingPhase::Degraded;
                if health.known_good.is_none() {
                    health.known_good = revision;
                }
            }
        }
        self.status
            .escalate(&component, HealthStatus::Degraded, warning);
    }

    fn on_recovered(&self, component: ComponentName) {
        let now = self.scheduler.now();
        let restore = {
            let mut components = self.components.borrow_mut();
            let Some(health) = components.get_mut(&component) else {
                return;
            };
            health.warning_active = false;
            health.prune_faults(now, &self.config);
            let restore = health.phase == HealingPhase::Degraded && health.faults.is_empty();
            if restore {
                health.phase = HealingPhase::Healthy;
                health.known_good = None;
            }
            restore
        };

        if restore {
            info!(component = %component, "Warning cleared, component restored");
            self.status.restore(&component, ResetToken::issue());
        }
    }

    fn schedule_reset(&self, component: &ComponentName, attempt: u32) {
        let delay = self.config.backoff(attempt);
        let healing = self.self_ref.clone();
        let target = component.clone();
        let timer = self.scheduler.schedule_after(delay, move || {
            if let Some(healing) = healing.upgrade() {
                if let Err(error) = healing.run_reset(&target) {
                    debug!(
                        component = %target,
                        error = %error,
                        "Scheduled reset did not recover component"
                    );
                }
            }
        });

        debug!(
            component = %component,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Reset scheduled"
        );
        if let Some(health) = self.components.borrow_mut().get_mut(component) {
            health.pending_reset = Some(timer);
        }
    }

    fn commands_for(component: &ComponentName, known_good: Option<Revision>) -> Vec<ResetCommand> {
        match component {
            ComponentName::Owner(owner) => vec![
                ResetCommand::Resubscribe {
                    owner: owner.clone(),
                },
                ResetCommand::ClearQueues {
                    owner: Some(owner.clone()),
                },
                ResetCommand::ReplaySnapshot { revision: None },
            ],
            ComponentName::StateManager => known_good
                .map(|revision| ResetCommand::RollbackTo { revision })
                .into_iter()
                .chain([ResetCommand::ReplaySnapshot { revision: None }])
                .collect(),
            ComponentName::BatchedEventEmitter | ComponentName::OptimizedEventBus => vec![
                ResetCommand::ClearQueues { owner: None },
                ResetCommand::ReplaySnapshot { revision: None },
            ],
            ComponentName::MemoryManager => Vec::new(),
            _ => vec![ResetCommand::ReplaySnapshot { revision: None }],
        }
    }

    fn run_reset(&self, component: &ComponentName) -> BridgeResult<()> {
        let (commands, attempt) = {
            let mut components = self.components.borrow_mut();
            let health = components.entry(component.clone()).or_default();
            health.pending_reset = None;
            if health.phase == HealingPhase::PermanentlyFailed {
                return Err(BridgeError::ResetExhausted {
                    component: component.clone(),
                    attempts: health.attempts,
                });
            }
            health.phase = HealingPhase::Resetting;
            health.attempts += 1;
            health.fault_during_reset = None;
            (Self::commands_for(component, health.known_good), health.attempts)
        };

        let span = info_span!("reset", component = %component, attempt);
        let _guard = span.enter();
        info!(commands = commands.len(), "Reset attempt started");

        let participants: Vec<Rc<dyn ResetParticipant>> = self
            .participants
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        let mut failure = None;
        'commands: for command in &commands {
            for participant in &participants {
                if let Err(error) = participant.handle_reset(command) {
                    failure = Some(BridgeError::ResetFailed {
                        component: component.clone(),
                        message: format!(
                            "{} rejected {command:?}: {error}",
                            participant.participant()
                        ),
                    });
                    break 'commands;
                }
            }
        }

        let now = self.scheduler.now();
        let outcome = {
            let mut components = self.components.borrow_mut();
            let health = components.entry(component.clone()).or_default();
            match failure.or_else(|| health.fault_during_reset.take()) {
                None => {
                    health.phase = HealingPhase::Healthy;
                    health.faults.clear();
                    health.known_good = None;
                    health.recovered_at = Some(now);
                    ResetOutcome::Recovered
                }
                Some(_) if health.attempts >= self.config.max_reset_attempts => {
                    health.phase = HealingPhase::PermanentlyFailed;
                    ResetOutcome::Exhausted(BridgeError::ResetExhausted {
                        component: component.clone(),
                        attempts: health.attempts,
                    })
                }
                Some(error) => {
                    health.phase = HealingPhase::Failed;
                    ResetOutcome::Retry {
                        error,
                        attempt: health.attempts,
                    }
                }
            }
        };

        match outcome {
            ResetOutcome::Recovered => {
                info!("Reset succeeded, component healthy");
                self.status.restore(component, ResetToken::issue());
                Ok(())
            }
            ResetOutcome::Retry { error, attempt } => {
                warn!(error = %error, "Reset attempt failed, retrying");
                self.status
                    .escalate(component, HealthStatus::Failed, error.clone());
                self.schedule_reset(component, attempt);
                Err(error)
            }
            ResetOutcome::Exhausted(exhausted) => {
                error!(error = %exhausted, "Reset attempts exhausted, component permanently failed");
                self.status
                    .escalate(component, HealthStatus::Failed, exhausted.clone());
                Err(exhausted)
            }
        }
    }
}

impl HealthSink for SelfHealing {
    fn report(&self, component: ComponentName, event: HealthEvent) {
        match event {
            HealthEvent::Fault(fault) => self.on_fault(component, fault),
            HealthEvent::Warning(warning) => self.on_warning(component, warning),
        }
    }

    fn recovered(&self, component: ComponentName) {
        self.on_recovered(component);
    }
}

impl fmt::Debug for SelfHealing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phases: BTreeMap<String, HealingPhase> = self
            .components
            .borrow()
            .iter()
            .map(|(component, health)| (component.to_string(), health.phase))
            .collect();
        f.debug_struct("SelfHealing")
            .field("phases", &phases)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_manager::change_callback;
    use serde_json::json;
    use statebridge_logging::PerformanceMonitor;
    use statebridge_types::{ManualClock, OwnerTag, StatePatch, Topic};
    use std::time::Duration;

    struct Harness {
        clock: Rc<ManualClock>,
        scheduler: Rc<Scheduler>,
        status: Rc<BridgeStatusManager>,
        state: Rc<StateManager>,
        healing: Rc<SelfHealing>,
    }

    fn harness() -> Harness {
        let clock = Rc::new(ManualClock::new());
        let scheduler = Scheduler::new(clock.clone());
        let status = BridgeStatusManager::new(clock.clone());
        let state = StateManager::new(Rc::new(PerformanceMonitor::new(100, None)));
        let healing = SelfHealing::new(
            HealingConfig::default(),
            scheduler.clone(),
            status.clone(),
            &state,
        );
        let participant = Rc::downgrade(&state);
        let participant: Weak<dyn ResetParticipant> = participant;
        healing.register_participant(participant);
        Harness {
            clock,
            scheduler,
            status,
            state,
            healing,
        }
    }

    impl Harness {
        fn advance(&self, millis: u64) {
            self.clock.advance(Duration::from_millis(millis));
            self.scheduler.run_until_idle();
        }
    }

    fn sidebar() -> ComponentName {
        ComponentName::Owner(OwnerTag::new("sidebar"))
    }

    fn fault() -> HealthEvent {
        HealthEvent::Fault(BridgeError::DeliveryFailure {
            owner: OwnerTag::new("sidebar"),
            topic: Topic::new("session:update"),
            message: "boom".to_string(),
        })
    }

    #[derive(Default)]
    struct Recorder {
        commands: RefCell<Vec<ResetCommand>>,
        fail: Cell<bool>,
    }

    impl ResetParticipant for Recorder {
        fn participant(&self) -> ComponentName {
            ComponentName::OptimizedEventBus
        }

        fn handle_reset(&self, command: &ResetCommand) -> BridgeResult<()> {
            self.commands.borrow_mut().push(command.clone());
            if self.fail.get() {
                Err(BridgeError::BridgeShutdown)
            } else {
                Ok(())
            }
        }
    }

    fn recorder(h: &Harness) -> Rc<Recorder> {
        let recorder = Rc::new(Recorder::default());
        let weak = Rc::downgrade(&recorder);
        let weak: Weak<dyn ResetParticipant> = weak;
        h.healing.register_participant(weak);
        recorder
    }

    #[test]
    fn test_three_faults_fail_then_reset_restores() {
        let h = harness();
        let recorder = recorder(&h);
        let transitions = Rc::new(RefCell::new(Vec::new()));
        let log = transitions.clone();
        h.status
            .on_status_change(move |change| log.borrow_mut().push(change.current));

        h.healing.report(sidebar(), fault());
        assert_eq!(h.healing.phase(&sidebar()), HealingPhase::Degraded);
        h.healing.report(sidebar(), fault());
        assert_eq!(h.healing.phase(&sidebar()), HealingPhase::Degraded);
        h.healing.report(sidebar(), fault());
        assert_eq!(h.healing.phase(&sidebar()), HealingPhase::Failed);
        assert_eq!(h.status.status_of(&sidebar()), HealthStatus::Failed);

        h.advance(99);
        assert_eq!(h.healing.phase(&sidebar()), HealingPhase::Failed);
        h.advance(1);

        assert_eq!(h.healing.phase(&sidebar()), HealingPhase::Healthy);
        assert_eq!(h.healing.attempts(&sidebar()), 1);
        use HealthStatus::*;
        assert_eq!(*transitions.borrow(), vec![Degraded, Failed, Healthy]);

        let owner = OwnerTag::new("sidebar");
        assert_eq!(
            *recorder.commands.borrow(),
            vec![
                ResetCommand::Resubscribe {
                    owner: owner.clone()
                },
                ResetCommand::ClearQueues { owner: Some(owner) },
                ResetCommand::ReplaySnapshot { revision: None },
            ]
        );
    }

    #[test]
    fn test_forgotten_owner_is_never_reset() {
        let h = harness();
        let recorder = recorder(&h);
        for _ in 0..3 {
            h.healing.report(sidebar(), fault());
        }
        assert_eq!(h.scheduler.pending_timers(), 1);
        assert_eq!(h.status.overall(), HealthStatus::Failed);

        assert!(h.healing.forget(&sidebar()));
        assert!(!h.healing.forget(&sidebar()));
        h.advance(1_000);

        assert!(recorder.commands.borrow().is_empty());
        assert_eq!(h.scheduler.pending_timers(), 0);
        assert_eq!(h.healing.tracked_components(), 0);
        assert_eq!(h.healing.phase(&sidebar()), HealingPhase::Healthy);
        assert_eq!(h.status.overall(), HealthStatus::Healthy);
        assert!(h.status.record(&sidebar()).is_none());
    }

    #[test]
    fn test_faults_outside_cooldown_do_not_accumulate() {
        let h = harness();
        for _ in 0..3 {
            h.healing.report(sidebar(), fault());
            h.clock.advance(Duration::from_secs(6));
        }
        assert_eq!(h.healing.phase(&sidebar()), HealingPhase::Degraded);
    }

    #[test]
    fn test_soft_reset_after_cooldown() {
        let h = harness();
        h.healing.report(sidebar(), fault());

        assert_eq!(h.healing.check(), 0);
        h.clock.advance(Duration::from_secs(5));
        assert_eq!(h.healing.check(), 1);

        assert_eq!(h.healing.phase(&sidebar()), HealingPhase::Healthy);
        assert_eq!(h.status.status_of(&sidebar()), HealthStatus::Healthy);
    }

    #[test]
    fn test_periodic_check_runs_on_scheduler() {
        let h = harness();
        h.healing.start();
        h.healing.report(sidebar(), fault());

        h.advance(5_000);
        assert_eq!(h.status.status_of(&sidebar()), HealthStatus::Healthy);
    }

    #[test]
    fn test_failed_participant_retries_with_backoff_until_exhausted() {
        let h = harness();
        let recorder = recorder(&h);
        recorder.fail.set(true);

        for _ in 0..3 {
            h.healing.report(sidebar(), fault());
        }

        // 100 + 200 + 400 + 800 + 1600 ms
        for (attempt, delay) in [100, 200, 400, 800].into_iter().enumerate() {
            h.advance(delay);
            assert_eq!(h.healing.attempts(&sidebar()), attempt as u32 + 1);
            assert_eq!(h.healing.phase(&sidebar()), HealingPhase::Failed);
        }
        h.advance(1_600);
        assert_eq!(h.healing.phase(&sidebar()), HealingPhase::PermanentlyFailed);
        let record = h.status.record(&sidebar()).unwrap();
        assert_eq!(record.status, HealthStatus::Failed);
        assert!(matches!(
            record.last_error,
            Some(BridgeError::ResetExhausted { attempts: 5, .. })
        ));

        // Nothing else is scheduled
        h.advance(60_000);
        assert_eq!(h.healing.attempts(&sidebar()), 5);

        recorder.fail.set(false);
        assert!(h.healing.reset_now(&sidebar()).is_ok());
        assert_eq!(h.healing.phase(&sidebar()), HealingPhase::Healthy);
        assert_eq!(h.status.status_of(&sidebar()), HealthStatus::Healthy);
    }

    #[test]
    fn test_fault_during_reset_fails_the_attempt() {
        let h = harness();
        let healing = Rc::downgrade(&h.healing);
        let armed = Rc::new(Cell::new(true));
        let trigger = armed.clone();
        h.state.subscribe_to_changes_as(
            OwnerTag::new("sidebar"),
            change_callback(move |_| {
                if trigger.replace(false) {
                    if let Some(healing) = healing.upgrade() {
                        healing.report(sidebar(), fault());
                    }
                }
                Ok(())
            }),
        );

        for _ in 0..3 {
            h.healing.report(sidebar(), fault());
        }
        h.advance(100);
        assert_eq!(h.healing.phase(&sidebar()), HealingPhase::Failed);
        assert!(!armed.get());

        h.advance(200);
        assert_eq!(h.healing.phase(&sidebar()), HealingPhase::Healthy);
        assert_eq!(h.healing.attempts(&sidebar()), 2);
    }

    #[test]
    fn test_state_manager_reset_rolls_back_to_known_good() {
        let h = harness();
        h.state
            .apply(StatePatch::new().with("title", json!("good")))
            .unwrap();
        h.healing.report(
            ComponentName::StateManager,
            HealthEvent::Fault(BridgeError::BridgeShutdown),
        );
        h.state
            .apply(StatePatch::new().with("title", json!("corrupt")))
            .unwrap();

        h.healing.reset_now(&ComponentName::StateManager).unwrap();
        assert_eq!(h.state.get("title"), Some(json!("good")));
        assert_eq!(
            h.status.status_of(&ComponentName::StateManager),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn test_warning_holds_degraded_until_recovered() {
        let h = harness();
        h.healing.report(
            ComponentName::MemoryManager,
            HealthEvent::Warning(BridgeError::SubscriptionLeak {
                count: 600,
                threshold: 500,
            }),
        );
        assert_eq!(
            h.status.status_of(&ComponentName::MemoryManager),
            HealthStatus::Degraded
        );

        h.clock.advance(Duration::from_secs(10));
        assert_eq!(h.healing.check(), 0);

        h.healing.recovered(ComponentName::MemoryManager);
        assert_eq!(
            h.status.status_of(&ComponentName::MemoryManager),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn test_attempts_settle_after_quiet_cooldown() {
        let h = harness();
        for _ in 0..3 {
            h.healing.report(sidebar(), fault());
        }
        h.advance(100);
        assert_eq!(h.healing.attempts(&sidebar()), 1);

        h.clock.advance(Duration::from_secs(5));
        h.healing.check();
        assert_eq!(h.healing.attempts(&sidebar()), 0);
    }
}
