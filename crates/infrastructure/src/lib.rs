//! 队列存储实现与可观测性辅助

pub mod observability;
pub mod storage;

pub use observability::{MetricsCollector, StructuredLogger};
pub use storage::{InMemoryQueueStorage, SqliteQueueStorage};
