use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shipqueue_core::{EnqueueDefaults, EventBus, QueueService, StatusTransitioner};
use shipqueue_domain::{
    to_task_map, utc_now, Condition, Event, EventKind, ExecutionConfig, NamedTask, QueueError,
    QueueItem, QueueItemFilter, QueueItemStatus, QueueResult, QueueStorage, Task, TaskContext,
    TaskExecutionError, TaskRegistry,
};
use shipqueue_infrastructure::InMemoryQueueStorage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ShipmentLabelTask {
    shipment_id: i64,
}

impl NamedTask for ShipmentLabelTask {
    const TASK_TYPE: &'static str = "ShipmentLabelTask";
}

#[async_trait]
impl Task for ShipmentLabelTask {
    fn task_type(&self) -> &str {
        Self::TASK_TYPE
    }

    fn to_serializable(&self) -> QueueResult<Value> {
        to_task_map(self)
    }

    fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig::default()
            .with_queue_name("labels")
            .with_priority(5)
            .with_max_attempts(7)
    }

    async fn execute(&self, _ctx: &dyn TaskContext) -> Result<(), TaskExecutionError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PlainTask {}

impl NamedTask for PlainTask {
    const TASK_TYPE: &'static str = "PlainTask";
}

#[async_trait]
impl Task for PlainTask {
    fn task_type(&self) -> &str {
        Self::TASK_TYPE
    }

    fn to_serializable(&self) -> QueueResult<Value> {
        to_task_map(self)
    }

    async fn execute(&self, _ctx: &dyn TaskContext) -> Result<(), TaskExecutionError> {
        Ok(())
    }
}

struct Fixture {
    storage: Arc<dyn QueueStorage>,
    bus: Arc<EventBus>,
    service: QueueService,
}

fn fixture() -> Fixture {
    let storage: Arc<dyn QueueStorage> = Arc::new(InMemoryQueueStorage::new());
    let bus = Arc::new(EventBus::new());
    let registry = TaskRegistry::new()
        .with_type::<ShipmentLabelTask>()
        .with_type::<PlainTask>();
    let service = QueueService::new(Arc::clone(&storage), Arc::clone(&bus), Arc::new(registry));
    Fixture {
        storage,
        bus,
        service,
    }
}

#[tokio::test]
async fn test_enqueue_uses_task_hints() {
    let f = fixture();
    let item = f
        .service
        .enqueue(None, &ShipmentLabelTask { shipment_id: 9 }, "shop-3")
        .await
        .unwrap();

    assert!(item.id.is_some());
    assert_eq!(item.status, QueueItemStatus::Queued);
    assert_eq!(item.queue_name, "labels");
    assert_eq!(item.priority, 5);
    assert_eq!(item.max_attempts, 7);
    assert_eq!(item.context, "shop-3");
    assert_eq!(item.serialized_task, json!({"shipment_id": 9}));

    let stored = f.storage.find_by_id(item.id.unwrap()).await.unwrap();
    assert_eq!(stored, Some(item));
}

#[tokio::test]
async fn test_queue_name_resolution_order() {
    let f = fixture();
    let explicit = f
        .service
        .enqueue(Some("express"), &ShipmentLabelTask { shipment_id: 1 }, "")
        .await
        .unwrap();
    assert_eq!(explicit.queue_name, "express");

    let fallback = f.service.enqueue(None, &PlainTask {}, "").await.unwrap();
    assert_eq!(fallback.queue_name, "default");
    assert_eq!(fallback.max_attempts, 3);

    let custom = QueueService::new(
        Arc::clone(&f.storage),
        Arc::clone(&f.bus),
        Arc::new(TaskRegistry::new().with_type::<PlainTask>()),
    )
    .with_defaults(EnqueueDefaults {
        queue_name: "bulk".to_string(),
        max_attempts: 5,
    });
    let item = custom.enqueue(None, &PlainTask {}, "").await.unwrap();
    assert_eq!(item.queue_name, "bulk");
    assert_eq!(item.max_attempts, 5);
}

#[tokio::test]
async fn test_unregistered_task_is_rejected() {
    let f = fixture();
    let service = QueueService::new(
        Arc::clone(&f.storage),
        Arc::clone(&f.bus),
        Arc::new(TaskRegistry::new()),
    );
    let err = service.enqueue(None, &PlainTask {}, "").await.unwrap_err();
    assert!(matches!(err, QueueError::UnknownTaskType { .. }));
    assert_eq!(f.storage.count(&QueueItemFilter::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_delayed_enqueue_creates_scheduled_item() {
    let f = fixture();
    let before = utc_now();
    let item = f
        .service
        .enqueue_delayed(None, &PlainTask {}, "", Duration::minutes(5))
        .await
        .unwrap();

    assert_eq!(item.status, QueueItemStatus::Scheduled);
    assert!(item.scheduled_at >= before + Duration::minutes(5));
    assert_eq!(item.queued_at, None);

    let past = f
        .service
        .enqueue_at(None, &PlainTask {}, "", Some(before - Duration::minutes(1)), before)
        .await
        .unwrap();
    assert_eq!(past.status, QueueItemStatus::Queued);
}

#[tokio::test]
async fn test_cancel_publishes_status_change() {
    let f = fixture();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    f.bus
        .subscribe_fn(EventKind::StatusChanged, "audit", move |event| {
            if let Event::QueueStatusChanged {
                item,
                previous_status,
                ..
            } = event
            {
                sink.lock().unwrap().push((*previous_status, item.status));
            }
            Ok(())
        })
        .await;

    let item = f.service.enqueue(None, &PlainTask {}, "").await.unwrap();
    let canceled = f.service.cancel(item.id.unwrap()).await.unwrap();

    assert_eq!(canceled.status, QueueItemStatus::Canceled);
    assert!(canceled.finished_at.is_some());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(QueueItemStatus::Queued, QueueItemStatus::Canceled)]
    );
}

#[tokio::test]
async fn test_cancel_rejects_terminal_and_missing_items() {
    let f = fixture();
    let item = f.service.enqueue(None, &PlainTask {}, "").await.unwrap();
    f.service.cancel(item.id.unwrap()).await.unwrap();

    let err = f.service.cancel(item.id.unwrap()).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { .. }));

    let err = f.service.cancel(404).await.unwrap_err();
    assert!(matches!(err, QueueError::QueueItemNotFound { id: 404 }));
}

#[tokio::test]
async fn test_vetoed_cancel_leaves_item_untouched() {
    let f = fixture();
    f.bus
        .subscribe_fn(EventKind::BeforeStatusChange, "guard", |_| {
            Err(anyhow::anyhow!("cancellation frozen"))
        })
        .await;

    let item = f.service.enqueue(None, &PlainTask {}, "").await.unwrap();
    let err = f.service.cancel(item.id.unwrap()).await.unwrap_err();
    assert!(matches!(err, QueueError::EventHandler { .. }));

    let stored = f.storage.find_by_id(item.id.unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueItemStatus::Queued);
}

#[tokio::test]
async fn test_requeue_creates_new_item() {
    let f = fixture();
    let item = f
        .service
        .enqueue(None, &ShipmentLabelTask { shipment_id: 2 }, "shop")
        .await
        .unwrap();

    let err = f.service.requeue(item.id.unwrap()).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { .. }));

    f.service.cancel(item.id.unwrap()).await.unwrap();
    let copy = f.service.requeue(item.id.unwrap()).await.unwrap();

    assert_ne!(copy.id, item.id);
    assert_eq!(copy.status, QueueItemStatus::Queued);
    assert_eq!(copy.serialized_task, item.serialized_task);
    assert_eq!(copy.queue_name, "labels");
    assert_eq!(copy.retries, 0);

    let original = f.service.find_item(item.id.unwrap()).await.unwrap().unwrap();
    assert_eq!(original.status, QueueItemStatus::Canceled);

    let queued = f
        .service
        .find_items(&QueueItemFilter::new().with_status(QueueItemStatus::Queued))
        .await
        .unwrap();
    assert_eq!(queued.len(), 1);
}

#[tokio::test]
async fn test_transitioner_detects_stale_snapshot() {
    let f = fixture();
    let transitioner = StatusTransitioner::new(Arc::clone(&f.storage), Arc::clone(&f.bus));
    let item = f.service.enqueue(None, &PlainTask {}, "").await.unwrap();

    let running = item
        .transitioned(QueueItemStatus::Running, utc_now())
        .unwrap();
    transitioner.commit(&item, running.clone()).await.unwrap();

    let err = transitioner.commit(&item, running).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_transitioner_rejects_unlisted_edges() {
    let f = fixture();
    let transitioner = StatusTransitioner::new(Arc::clone(&f.storage), Arc::clone(&f.bus));
    let item = f.service.enqueue(None, &PlainTask {}, "").await.unwrap();

    let mut completed: QueueItem = item.clone();
    completed.status = QueueItemStatus::Completed;
    let err = transitioner.commit(&item, completed).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_post_commit_failure_is_reported_not_rolled_back() {
    let f = fixture();
    let transitioner = StatusTransitioner::new(Arc::clone(&f.storage), Arc::clone(&f.bus));
    f.bus
        .subscribe_fn(EventKind::StatusChanged, "mailer", |_| {
            Err(anyhow::anyhow!("smtp down"))
        })
        .await;
    let item = f.service.enqueue(None, &PlainTask {}, "").await.unwrap();

    let next = item
        .transitioned(QueueItemStatus::Running, utc_now())
        .unwrap();
    let committed = transitioner.commit(&item, next).await.unwrap();
    assert!(committed.notification_error.is_some());

    let stored = f.storage.find_by_id(item.id.unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueItemStatus::Running);
    assert!(Condition::Status(QueueItemStatus::Running).holds_for(&stored));
}
