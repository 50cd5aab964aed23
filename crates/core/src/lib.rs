pub mod event_bus;
pub mod queue_service;
pub mod transition;

pub use event_bus::{EventBus, EventHandler, FnEventHandler, SubscriptionId};
pub use queue_service::{EnqueueDefaults, QueueService};
pub use transition::{CommittedTransition, StatusTransitioner};
