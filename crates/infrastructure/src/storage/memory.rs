use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use shipqueue_domain::{
    Condition, QueueItem, QueueItemFilter, QueueItemStatus, QueueStorage,
};
use shipqueue_errors::{QueueError, QueueResult};
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryState {
    items: BTreeMap<i64, QueueItem>,
    next_id: i64,
}

/// 内存队列存储
///
/// 所有读写在同一把锁内完成，条件写入天然原子，适用于单进程部署和测试。
#[derive(Debug, Default)]
pub struct InMemoryQueueStorage {
    state: Mutex<MemoryState>,
}

impl InMemoryQueueStorage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                items: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| QueueError::storage_unavailable("内存存储锁已损坏"))
    }

    /// 当前保存的全部队列项，按标识升序
    pub fn snapshot(&self) -> QueueResult<Vec<QueueItem>> {
        Ok(self.lock()?.items.values().cloned().collect())
    }
}

#[async_trait]
impl QueueStorage for InMemoryQueueStorage {
    async fn find_oldest_queued_per_queue(&self, limit: usize) -> QueueResult<Vec<QueueItem>> {
        let state = self.lock()?;

        let busy: HashSet<&str> = state
            .items
            .values()
            .filter(|item| item.status == QueueItemStatus::Running)
            .map(|item| item.queue_name.as_str())
            .collect();

        let mut oldest: HashMap<&str, &QueueItem> = HashMap::new();
        for item in state.items.values() {
            if item.status != QueueItemStatus::Queued || busy.contains(item.queue_name.as_str()) {
                continue;
            }
            oldest
                .entry(item.queue_name.as_str())
                .and_modify(|current| {
                    if (item.created_at, item.id) < (current.created_at, current.id) {
                        *current = item;
                    }
                })
                .or_insert(item);
        }

        let mut candidates: Vec<QueueItem> = oldest.into_values().cloned().collect();
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn save_with_condition(
        &self,
        item: &QueueItem,
        conditions: &[Condition],
    ) -> QueueResult<QueueItem> {
        let mut state = self.lock()?;

        match item.id {
            None => {
                let id = state.next_id.max(1);
                state.next_id = id + 1;
                let mut created = item.clone();
                created.id = Some(id);
                state.items.insert(id, created.clone());
                debug!(queue_item.id = id, "内存存储插入队列项");
                Ok(created)
            }
            Some(id) => {
                if conditions.contains(&Condition::NoOtherRunningInQueue) {
                    let busy = state.items.values().any(|other| {
                        other.id != Some(id)
                            && other.queue_name == item.queue_name
                            && other.status == QueueItemStatus::Running
                    });
                    if busy {
                        return Err(QueueError::conflict(
                            Some(id),
                            format!("队列 {} 已有运行中的队列项", item.queue_name),
                        ));
                    }
                }

                let stored = state
                    .items
                    .get_mut(&id)
                    .ok_or_else(|| QueueError::item_not_found(id))?;
                if let Some(failed) = conditions.iter().find(|c| !c.holds_for(stored)) {
                    return Err(QueueError::conflict(
                        Some(id),
                        format!("前置条件不成立: {failed:?}，当前状态 {}", stored.status),
                    ));
                }
                *stored = item.clone();
                Ok(item.clone())
            }
        }
    }

    async fn delete_where(&self, filter: Option<&QueueItemFilter>) -> QueueResult<u64> {
        let mut state = self.lock()?;
        let before = state.items.len();
        match filter {
            None => state.items.clear(),
            Some(filter) => state.items.retain(|_, item| !filter.matches(item)),
        }
        Ok((before - state.items.len()) as u64)
    }

    async fn find_by_id(&self, id: i64) -> QueueResult<Option<QueueItem>> {
        Ok(self.lock()?.items.get(&id).cloned())
    }

    async fn find(&self, filter: &QueueItemFilter) -> QueueResult<Vec<QueueItem>> {
        let state = self.lock()?;
        let matching = state.items.values().filter(|item| filter.matches(item)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn count(&self, filter: &QueueItemFilter) -> QueueResult<u64> {
        let state = self.lock()?;
        Ok(state.items.values().filter(|item| filter.matches(item)).count() as u64)
    }
}
