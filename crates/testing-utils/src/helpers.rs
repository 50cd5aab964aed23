//! Test helper utilities

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use shipqueue_core::{EventBus, QueueService};
use shipqueue_domain::{QueueStorage, TaskRegistry};
use shipqueue_infrastructure::InMemoryQueueStorage;
use tokio::time::sleep;

pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }
        false
    }

    /// Fixed UTC instant for calendar-based assertions
    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// In-memory storage, event bus and queue service wired together
pub struct TestHarness {
    pub storage: Arc<dyn QueueStorage>,
    pub event_bus: Arc<EventBus>,
    pub registry: Arc<TaskRegistry>,
    pub queue_service: Arc<QueueService>,
}

impl TestHarness {
    pub fn new(registry: TaskRegistry) -> Self {
        Self::with_storage(Arc::new(InMemoryQueueStorage::new()), registry)
    }

    pub fn with_storage(storage: Arc<dyn QueueStorage>, registry: TaskRegistry) -> Self {
        let event_bus = Arc::new(EventBus::new());
        let registry = Arc::new(registry);
        let queue_service = Arc::new(QueueService::new(
            Arc::clone(&storage),
            Arc::clone(&event_bus),
            Arc::clone(&registry),
        ));
        Self {
            storage,
            event_bus,
            registry,
            queue_service,
        }
    }
}
