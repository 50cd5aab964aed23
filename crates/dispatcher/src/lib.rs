//! 定时计划：把日程规则转换为入队操作

pub mod entry;
pub mod scheduler;
pub mod service;

pub use entry::{ScheduleEntry, ScheduledTaskFactory};
pub use scheduler::{Scheduler, TickReport};
pub use service::SchedulerService;
