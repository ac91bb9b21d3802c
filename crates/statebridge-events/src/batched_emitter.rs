// ABOUTME: Coalesces emissions per topic into one delivery per scheduler tick
// ABOUTME: Keeps a bounded flush history that the memory manager trims

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use statebridge_logging::{debug, trace};
use statebridge_types::{
    AllocationKind, AllocationRef, AllocationTracker, Payload, Sweepable, Topic,
};

use crate::scheduler::Scheduler;

/// Receiver of flushed batches. Returns how many subscribers were invoked.
pub trait FlushTarget {
    fn deliver(&self, topic: &Topic, payloads: Vec<Payload>) -> usize;
}

/// One flush, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushRecord {
    pub topic: Topic,
    pub payload_count: usize,
    pub subscriber_count: usize,
    pub tick: u64,
}

#[derive(Debug)]
struct PendingBatch {
    payloads: Vec<Payload>,
    generation: u64,
    /// Position of the batch's first emission across all topics
    seq: u64,
}

pub struct BatchedEventEmitter {
    scheduler: Rc<Scheduler>,
    target: Weak<dyn FlushTarget>,
    self_ref: Weak<Self>,
    max_batch_size: Option<usize>,
    pending: RefCell<HashMap<Topic, PendingBatch>>,
    next_generation: Cell<u64>,
    history: RefCell<VecDeque<(u64, FlushRecord)>>,
    next_record_id: Cell<u64>,
    tracker: RefCell<Option<Weak<dyn AllocationTracker>>>,
}

impl BatchedEventEmitter {
    pub fn new(
        scheduler: Rc<Scheduler>,
        max_batch_size: Option<usize>,
        target: Weak<dyn FlushTarget>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|self_ref| Self {
            scheduler,
            target,
            self_ref: self_ref.clone(),
            max_batch_size: max_batch_size.map(|cap| cap.max(1)),
            pending: RefCell::new(HashMap::new()),
            next_generation: Cell::new(1),
            history: RefCell::new(VecDeque::new()),
            next_record_id: Cell::new(1),
            tracker: RefCell::new(None),
        })
    }

    pub fn set_tracker(&self, tracker: Weak<dyn AllocationTracker>) {
        *self.tracker.borrow_mut() = Some(tracker);
    }

    /// Queue `payload` for `topic`, scheduling a flush on the next tick when
    /// the topic has none pending.
    pub fn emit(&self, topic: &Topic, payload: Payload) {
        let created = {
            let mut pending = self.pending.borrow_mut();
            match pending.get_mut(topic) {
                Some(batch) => {
                    batch.payloads.push(payload);
                    None
                }
                None => {
                    let generation = self.next_generation();
                    pending.insert(
                        topic.clone(),
                        PendingBatch {
                            payloads: vec![payload],
                            generation,
                            seq: generation,
                        },
                    );
                    Some(generation)
                }
            }
        };

        if let Some(generation) = created {
            self.schedule_flush(topic, generation);
        }
    }

    /// Deliver pending payloads now, for one topic or for every topic in
    /// first-emission order. Returns the number of flushed batches.
    pub fn flush_now(&self, topic: Option<&Topic>) -> usize {
        match topic {
            Some(topic) => usize::from(self.flush_topic(topic, None)),
            None => {
                let mut topics: Vec<(u64, Topic)> = self
                    .pending
                    .borrow()
                    .iter()
                    .map(|(topic, batch)| (batch.seq, topic.clone()))
                    .collect();
                topics.sort();
                topics
                    .into_iter()
                    .filter(|(_, topic)| self.flush_topic(topic, None))
                    .count()
            }
        }
    }

    pub fn pending_count(&self, topic: &Topic) -> usize {
        self.pending
            .borrow()
            .get(topic)
            .map_or(0, |batch| batch.payloads.len())
    }

    pub fn pending_topics(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Drop the pending batch for `topic`. Returns the dropped payload count.
    pub fn clear(&self, topic: &Topic) -> usize {
        let dropped = self
            .pending
            .borrow_mut()
            .remove(topic)
            .map_or(0, |batch| batch.payloads.len());
        if dropped > 0 {
            debug!(topic = %topic, dropped, "Pending batch cleared");
        }
        dropped
    }

    pub fn clear_all(&self) -> usize {
        let drained: Vec<PendingBatch> = self
            .pending
            .borrow_mut()
            .drain()
            .map(|(_, batch)| batch)
            .collect();
        let dropped = drained.iter().map(|batch| batch.payloads.len()).sum();
        if dropped > 0 {
            debug!(topics = drained.len(), dropped, "All pending batches cleared");
        }
        dropped
    }

    /// Flush history, oldest first.
    pub fn history(&self) -> Vec<FlushRecord> {
        self.history
            .borrow()
            .iter()
            .map(|(_, record)| record.clone())
            .collect()
    }

    fn next_generation(&self) -> u64 {
        let generation = self.next_generation.get();
        self.next_generation.set(generation + 1);
        generation
    }

    fn schedule_flush(&self, topic: &Topic, generation: u64) {
        trace!(topic = %topic, generation, "Batch scheduled");
        let emitter = self.self_ref.clone();
        let topic = topic.clone();
        self.scheduler.schedule(move || {
            if let Some(emitter) = emitter.upgrade() {
                emitter.flush_scheduled(&topic, generation);
            }
        });
    }

    fn flush_scheduled(&self, topic: &Topic, generation: u64) {
        let current = self
            .pending
            .borrow()
            .get(topic)
            .map(|batch| batch.generation);
        if current == Some(generation) {
            self.flush_topic(topic, self.max_batch_size);
        } else {
            trace!(topic = %topic, generation, "Scheduled flush found nothing pending");
        }
    }

    /// Deliver the pending batch, or its first `limit` payloads. An overflow
    /// stays pending under a new generation and flushes on the next tick.
    fn flush_topic(&self, topic: &Topic, limit: Option<usize>) -> bool {
        let (payloads, carried) = {
            let mut pending = self.pending.borrow_mut();
            let Some(mut batch) = pending.remove(topic) else {
                return false;
            };
            match limit {
                Some(cap) if batch.payloads.len() > cap => {
                    let overflow = batch.payloads.split_off(cap);
                    let generation = self.next_generation();
                    let carried = overflow.len();
                    pending.insert(
                        topic.clone(),
                        PendingBatch {
                            payloads: overflow,
                            generation,
                            seq: batch.seq,
                        },
                    );
                    (batch.payloads, Some((generation, carried)))
                }
                _ => (batch.payloads, None),
            }
        };
        if let Some((generation, carried)) = carried {
            debug!(topic = %topic, carried, "Batch over max_batch_size, rest waits a tick");
            self.schedule_flush(topic, generation);
        }
        let payload_count = payloads.len();

        // Delivery may re-enter emit, so no borrow is held here
        let subscriber_count = match self.target.upgrade() {
            Some(target) => target.deliver(topic, payloads),
            None => 0,
        };

        let record = FlushRecord {
            topic: topic.clone(),
            payload_count,
            subscriber_count,
            tick: self.scheduler.current_tick(),
        };
        debug!(
            topic = %topic,
            payloads = payload_count,
            subscribers = subscriber_count,
            tick = record.tick,
            "Batch flushed"
        );

        let record_id = self.next_record_id.get();
        self.next_record_id.set(record_id + 1);
        self.history.borrow_mut().push_back((record_id, record));
        self.with_tracker(|tracker| {
            tracker.track_allocation(AllocationKind::BatchHistory, AllocationRef::new(record_id))
        });
        true
    }

    fn with_tracker(&self, f: impl FnOnce(&dyn AllocationTracker)) {
        let tracker = self.tracker.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(tracker) = tracker {
            f(tracker.as_ref());
        }
    }
}

impl Sweepable for BatchedEventEmitter {
    fn kind(&self) -> AllocationKind {
        AllocationKind::BatchHistory
    }

    fn retained(&self) -> usize {
        self.history.borrow().len()
    }

    fn trim_to(&self, window: usize) -> usize {
        let evicted: Vec<u64> = {
            let mut history = self.history.borrow_mut();
            let excess = history.len().saturating_sub(window);
            history.drain(..excess).map(|(id, _)| id).collect()
        };
        for id in &evicted {
            self.with_tracker(|tracker| {
                tracker.release(AllocationKind::BatchHistory, &AllocationRef::new(*id))
            });
        }
        evicted.len()
    }
}

impl fmt::Debug for BatchedEventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchedEventEmitter")
            .field("max_batch_size", &self.max_batch_size)
            .field("pending_topics", &self.pending_topics())
            .field("history", &self.history.borrow().len())
            .finish_non_exhaustive()
    }
}
