//! shipqueue: 持久化任务队列、任务运行器和日程调度器的组装与进程生命周期

pub mod app;
pub mod common;
pub mod shutdown;
pub mod tasks;

pub use app::{create_storage, AppMode, Application};
pub use common::{init_logging, load_config, parse_app_mode, start_application, StartupConfig};
pub use shutdown::ShutdownManager;
pub use tasks::{builtin_registry, QueueCleanupTask};
