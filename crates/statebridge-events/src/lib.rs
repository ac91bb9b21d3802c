// ABOUTME: Event plumbing for the statebridge (Layer 2)
// ABOUTME: Tick scheduler, subscription registry, per-tick batching and the event bus

pub mod batched_emitter;
pub mod event_bus;
pub mod listener_manager;
pub mod scheduler;

pub use batched_emitter::{BatchedEventEmitter, FlushRecord, FlushTarget};
pub use event_bus::{DISPATCH_LABEL, OptimizedEventBus};
pub use listener_manager::{Callback, DeliveryMode, EventListenerManager, Subscription, callback};
pub use scheduler::{Scheduler, Task, TimerId};
