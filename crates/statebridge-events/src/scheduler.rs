// ABOUTME: Cooperative tick scheduler standing in for the host event loop
// ABOUTME: Queues continuations for the next tick and fires delayed or repeating timers

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::time::{Duration, Instant};

use statebridge_logging::{trace, warn};
use statebridge_types::Clock;

/// A one-shot continuation.
pub type Task = Box<dyn FnOnce()>;

/// Upper bound on ticks run by `run_until_idle`, guards against tasks that
/// keep rescheduling themselves.
pub const MAX_IDLE_TICKS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

enum TimerTask {
    Once(Task),
    Repeating { every: Duration, task: Rc<dyn Fn()> },
}

struct Timer {
    id: TimerId,
    due: Instant,
    task: TimerTask,
}

/// Single-threaded scheduler driven explicitly by the host.
///
/// `run_tick` is the unit of the flush window: everything queued before a
/// tick starts runs in that tick, everything queued while it runs waits for
/// the next one.
pub struct Scheduler {
    clock: Rc<dyn Clock>,
    tick: Cell<u64>,
    queue: RefCell<VecDeque<Task>>,
    timers: RefCell<Vec<Timer>>,
    next_timer_id: Cell<u64>,
}

impl Scheduler {
    pub fn new(clock: Rc<dyn Clock>) -> Rc<Self> {
        Rc::new(Self {
            clock,
            tick: Cell::new(0),
            queue: RefCell::new(VecDeque::new()),
            timers: RefCell::new(Vec::new()),
            next_timer_id: Cell::new(1),
        })
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn clock(&self) -> &Rc<dyn Clock> {
        &self.clock
    }

    /// Number of ticks run so far.
    pub fn current_tick(&self) -> u64 {
        self.tick.get()
    }

    /// Queue a continuation for the next tick.
    pub fn schedule(&self, task: impl FnOnce() + 'static) {
        self.queue.borrow_mut().push_back(Box::new(task));
    }

    pub fn schedule_after(&self, delay: Duration, task: impl FnOnce() + 'static) -> TimerId {
        self.insert_timer(delay, TimerTask::Once(Box::new(task)))
    }

    /// Fire `task` every `every`, first after one full interval.
    pub fn schedule_repeating(&self, every: Duration, task: impl Fn() + 'static) -> TimerId {
        self.insert_timer(
            every,
            TimerTask::Repeating {
                every,
                task: Rc::new(task),
            },
        )
    }

    /// Cancel a timer. Returns false when it already fired or never existed.
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut timers = self.timers.borrow_mut();
        let before = timers.len();
        timers.retain(|timer| timer.id != id);
        timers.len() != before
    }

    pub fn pending_tasks(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Earliest timer deadline, if any timer is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.borrow().iter().map(|timer| timer.due).min()
    }

    /// True when a queued task or a due timer is ready to run.
    pub fn has_pending_work(&self) -> bool {
        if !self.queue.borrow().is_empty() {
            return true;
        }
        let now = self.now();
        self.timers.borrow().iter().any(|timer| timer.due <= now)
    }

    /// Run one tick. Returns how many tasks and timers ran.
    ///
    /// A panicking task is logged and skipped; the rest of the tick still runs.
    pub fn run_tick(&self) -> usize {
        let tick = self.tick.get() + 1;
        self.tick.set(tick);

        let tasks = std::mem::take(&mut *self.queue.borrow_mut());
        let due = self.take_due_timers();

        let ran = tasks.len() + due.len();
        if ran > 0 {
            trace!(tick, tasks = tasks.len(), timers = due.len(), "Running scheduler tick");
        }

        for task in tasks {
            Self::run_isolated(tick, "task", task);
        }
        for task in due {
            match task {
                TimerTask::Once(task) => Self::run_isolated(tick, "timer", task),
                TimerTask::Repeating { task, .. } => {
                    Self::run_isolated(tick, "repeating timer", || task())
                }
            }
        }

        ran
    }

    fn run_isolated(tick: u64, kind: &'static str, task: impl FnOnce()) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
            warn!(tick, kind, error = %panic_message(panic.as_ref()), "Scheduled work panicked");
        }
    }

    /// Run ticks until nothing is ready. Returns the number of ticks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ticks = 0;
        while self.has_pending_work() {
            if ticks == MAX_IDLE_TICKS {
                warn!(
                    max_ticks = MAX_IDLE_TICKS,
                    pending_tasks = self.pending_tasks(),
                    "Scheduler still busy after tick limit, yielding to host"
                );
                break;
            }
            self.run_tick();
            ticks += 1;
        }
        ticks
    }

    fn insert_timer(&self, delay: Duration, task: TimerTask) -> TimerId {
        let id = TimerId(self.next_timer_id.get());
        self.next_timer_id.set(id.0 + 1);
        let due = self.now() + delay;
        self.timers.borrow_mut().push(Timer { id, due, task });
        id
    }

    /// Remove due timers in deadline order, re-arming repeating ones.
    fn take_due_timers(&self) -> Vec<TimerTask> {
        let now = self.now();
        let mut timers = self.timers.borrow_mut();

        let mut due: Vec<Timer> = Vec::new();
        let mut index = 0;
        while index < timers.len() {
            if timers[index].due <= now {
                due.push(timers.swap_remove(index));
            } else {
                index += 1;
            }
        }
        due.sort_by_key(|timer| (timer.due, timer.id));

        due.into_iter()
            .map(|timer| match timer.task {
                TimerTask::Once(task) => TimerTask::Once(task),
                TimerTask::Repeating { every, task } => {
                    timers.push(Timer {
                        id: timer.id,
                        due: now + every,
                        task: TimerTask::Repeating {
                            every,
                            task: Rc::clone(&task),
                        },
                    });
                    TimerTask::Repeating { every, task }
                }
            })
            .collect()
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("tick", &self.tick.get())
            .field("pending_tasks", &self.pending_tasks())
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}
