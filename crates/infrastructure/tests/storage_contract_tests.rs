//! 两种存储实现需要表现一致的行为

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use shipqueue_domain::{Condition, QueueItem, QueueItemFilter, QueueItemStatus, QueueStorage};
use shipqueue_infrastructure::{InMemoryQueueStorage, SqliteQueueStorage};
use tempfile::TempDir;

async fn backends() -> (TempDir, Vec<(&'static str, Arc<dyn QueueStorage>)>) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("contract.db").display());
    let sqlite = SqliteQueueStorage::connect(&url, 4, Duration::from_secs(5))
        .await
        .unwrap();
    let backends: Vec<(&'static str, Arc<dyn QueueStorage>)> = vec![
        ("memory", Arc::new(InMemoryQueueStorage::new())),
        ("sqlite", Arc::new(sqlite)),
    ];
    (dir, backends)
}

#[tokio::test]
async fn test_only_one_concurrent_claim_wins() {
    let (_dir, backends) = backends().await;
    for (name, storage) in backends {
        let item = storage
            .save_with_condition(&QueueItem::new("labels", "", "T", json!({}), Utc::now()), &[])
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let storage = Arc::clone(&storage);
            let item = item.clone();
            handles.push(tokio::spawn(async move {
                let next = item.transitioned(QueueItemStatus::Running, Utc::now())?;
                storage
                    .save_with_condition(&next, &Condition::snapshot_of(&item))
                    .await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(e) => assert!(e.is_conflict(), "{name}: 意外错误 {e}"),
            }
        }
        assert_eq!(wins, 1, "{name}: 只能有一个认领成功");
    }
}

#[tokio::test]
async fn test_stale_candidate_cannot_claim_busy_queue() {
    let (_dir, backends) = backends().await;
    let base = Utc::now();
    for (name, storage) in backends {
        let older = base - chrono::Duration::seconds(10);
        let mut retrying = QueueItem::new("q", "", "T", json!({}), older);
        retrying.status = QueueItemStatus::Retrying;
        retrying.scheduled_at = base - chrono::Duration::seconds(1);
        let retrying = storage.save_with_condition(&retrying, &[]).await.unwrap();
        storage
            .save_with_condition(&QueueItem::new("q", "", "T", json!({}), base), &[])
            .await
            .unwrap();

        // 运行器 A 读到的候选项是较新的那一个
        let stale = storage.find_oldest_queued_per_queue(10).await.unwrap();
        assert_eq!(stale.len(), 1, "{name}");
        let stale = stale[0].clone();
        assert_ne!(stale.id, retrying.id, "{name}");

        // 运行器 B 推进到期的旧队列项并认领
        let promoted = retrying.transitioned(QueueItemStatus::Queued, base).unwrap();
        let promoted = storage
            .save_with_condition(&promoted, &Condition::for_transition(&retrying, &promoted))
            .await
            .unwrap();
        let running = promoted.transitioned(QueueItemStatus::Running, base).unwrap();
        storage
            .save_with_condition(&running, &Condition::for_transition(&promoted, &running))
            .await
            .unwrap();

        let next = stale.transitioned(QueueItemStatus::Running, base).unwrap();
        let err = storage
            .save_with_condition(&next, &Condition::for_transition(&stale, &next))
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "{name}: {err}");

        let running_in_queue = QueueItemFilter::new()
            .with_status(QueueItemStatus::Running)
            .with_queue_name("q");
        assert_eq!(storage.count(&running_in_queue).await.unwrap(), 1, "{name}");
    }
}

#[tokio::test]
async fn test_backends_agree_on_candidate_selection() {
    let (_dir, backends) = backends().await;
    let base = Utc::now();
    for (name, storage) in backends {
        for (queue, priority, offset) in [("a", 0, 0), ("a", 0, 1), ("b", 5, 2), ("c", 1, 3)] {
            let item = QueueItem::new(
                queue,
                "",
                "T",
                json!({}),
                base + chrono::Duration::seconds(offset),
            )
            .with_priority(priority);
            storage.save_with_condition(&item, &[]).await.unwrap();
        }

        let picked: Vec<String> = storage
            .find_oldest_queued_per_queue(2)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.queue_name)
            .collect();
        assert_eq!(picked, vec!["b".to_string(), "c".to_string()], "{name}");

        let all = storage
            .find_oldest_queued_per_queue(10)
            .await
            .unwrap();
        let a = all.iter().find(|i| i.queue_name == "a").unwrap();
        assert_eq!(a.created_at, shipqueue_domain::truncate_to_micros(base), "{name}");

        let queued = QueueItemFilter::new().with_status(QueueItemStatus::Queued);
        assert_eq!(storage.count(&queued).await.unwrap(), 4, "{name}");
        assert_eq!(storage.delete_where(None).await.unwrap(), 4, "{name}");
    }
}
