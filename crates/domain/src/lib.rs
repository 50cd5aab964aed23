pub mod entities;
pub mod events;
pub mod repositories;
pub mod schedule;
pub mod task;
pub mod value_objects;

pub use entities::*;
pub use events::*;
pub use repositories::*;
pub use schedule::*;
pub use shipqueue_errors::{QueueError, QueueResult, TaskExecutionError};
pub use task::*;
pub use value_objects::*;
