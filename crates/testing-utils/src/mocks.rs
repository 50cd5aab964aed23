//! Storage doubles that simulate outages

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use shipqueue_domain::{Condition, QueueItem, QueueItemFilter, QueueStorage};
use shipqueue_errors::{QueueError, QueueResult};
use shipqueue_infrastructure::InMemoryQueueStorage;

/// In-memory storage that can be switched off
///
/// While unavailable every call fails with `StorageUnavailable`.
#[derive(Debug, Default)]
pub struct SwitchableStorage {
    inner: InMemoryQueueStorage,
    unavailable: AtomicBool,
}

impl SwitchableStorage {
    pub fn new() -> Self {
        Self {
            inner: InMemoryQueueStorage::new(),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryQueueStorage {
        &self.inner
    }

    fn check(&self) -> QueueResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::storage_unavailable("simulated outage"));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStorage for SwitchableStorage {
    async fn find_oldest_queued_per_queue(&self, limit: usize) -> QueueResult<Vec<QueueItem>> {
        self.check()?;
        self.inner.find_oldest_queued_per_queue(limit).await
    }

    async fn save_with_condition(
        &self,
        item: &QueueItem,
        conditions: &[Condition],
    ) -> QueueResult<QueueItem> {
        self.check()?;
        self.inner.save_with_condition(item, conditions).await
    }

    async fn delete_where(&self, filter: Option<&QueueItemFilter>) -> QueueResult<u64> {
        self.check()?;
        self.inner.delete_where(filter).await
    }

    async fn find_by_id(&self, id: i64) -> QueueResult<Option<QueueItem>> {
        self.check()?;
        self.inner.find_by_id(id).await
    }

    async fn find(&self, filter: &QueueItemFilter) -> QueueResult<Vec<QueueItem>> {
        self.check()?;
        self.inner.find(filter).await
    }

    async fn count(&self, filter: &QueueItemFilter) -> QueueResult<u64> {
        self.check()?;
        self.inner.count(filter).await
    }
}
