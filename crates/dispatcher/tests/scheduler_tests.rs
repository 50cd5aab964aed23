use std::sync::Arc;

use chrono::Duration;
use shipqueue_dispatcher::{ScheduleEntry, Scheduler};
use shipqueue_domain::{
    EventKind, QueueError, QueueItemFilter, QueueItemStatus, QueueStorage, ScheduleConfig, Task,
    TimeWindow,
};
use shipqueue_testing_utils::{
    sample_registry, ProgressTask, RecordingHandler, SwitchableStorage, TestEnv, TestHarness,
};

fn progress_entry(name: &str, rule: ScheduleConfig) -> ScheduleEntry {
    ScheduleEntry::new(name, rule, || {
        Ok(Box::new(ProgressTask { steps: 2 }) as Box<dyn Task>)
    })
    .unwrap()
}

fn scheduler(h: &TestHarness, entries: Vec<ScheduleEntry>) -> Scheduler {
    let mut scheduler = Scheduler::new(Arc::clone(&h.queue_service), Arc::clone(&h.event_bus));
    for entry in entries {
        scheduler.add_entry(entry).unwrap();
    }
    scheduler
}

async fn item_count(h: &TestHarness) -> u64 {
    h.storage.count(&QueueItemFilter::new()).await.unwrap()
}

#[tokio::test]
async fn test_daily_rule_fires_once_per_day() {
    let h = TestHarness::new(sample_registry());
    let scheduler = scheduler(
        &h,
        vec![progress_entry("nightly-sync", ScheduleConfig::daily(3, 0)).with_queue_name("sync")],
    );

    let first = TestEnv::at(2026, 3, 10, 3, 0);
    let report = scheduler.tick(first).await.unwrap();
    assert_eq!(report.enqueued.len(), 1);
    let (name, item) = &report.enqueued[0];
    assert_eq!(name, "nightly-sync");
    assert_eq!(item.status, QueueItemStatus::Queued);
    assert_eq!(item.queue_name, "sync");
    assert_eq!(item.task_type, "ProgressTask");

    assert!(scheduler.tick(first).await.unwrap().enqueued.is_empty());
    assert!(scheduler
        .tick(first + Duration::seconds(30))
        .await
        .unwrap()
        .enqueued
        .is_empty());
    assert!(scheduler
        .tick(TestEnv::at(2026, 3, 10, 3, 5))
        .await
        .unwrap()
        .enqueued
        .is_empty());
    assert_eq!(item_count(&h).await, 1);

    let next_day = scheduler.tick(TestEnv::at(2026, 3, 11, 3, 0)).await.unwrap();
    assert_eq!(next_day.enqueued.len(), 1);
    assert_eq!(item_count(&h).await, 2);
    assert_eq!(
        scheduler.last_fired("nightly-sync").await,
        Some(TestEnv::at(2026, 3, 11, 3, 0))
    );
}

#[tokio::test]
async fn test_concurrent_ticks_enqueue_once() {
    let h = TestHarness::new(sample_registry());
    let scheduler = scheduler(&h, vec![progress_entry("daily", ScheduleConfig::daily(3, 0))]);
    let now = TestEnv::at(2026, 3, 10, 3, 0);

    let (a, b) = tokio::join!(scheduler.tick(now), scheduler.tick(now));
    assert_eq!(a.unwrap().enqueued.len() + b.unwrap().enqueued.len(), 1);
    assert_eq!(item_count(&h).await, 1);
}

#[tokio::test]
async fn test_hourly_rule() {
    let h = TestHarness::new(sample_registry());
    let scheduler = scheduler(&h, vec![progress_entry("hourly", ScheduleConfig::hourly(15))]);

    assert_eq!(scheduler.tick(TestEnv::at(2026, 3, 10, 10, 14)).await.unwrap().enqueued.len(), 0);
    assert_eq!(scheduler.tick(TestEnv::at(2026, 3, 10, 10, 15)).await.unwrap().enqueued.len(), 1);
    assert_eq!(scheduler.tick(TestEnv::at(2026, 3, 10, 10, 15)).await.unwrap().enqueued.len(), 0);
    assert_eq!(scheduler.tick(TestEnv::at(2026, 3, 10, 11, 15)).await.unwrap().enqueued.len(), 1);
}

#[tokio::test]
async fn test_weekly_rule_matches_listed_days() {
    let h = TestHarness::new(sample_registry());
    // 1 = 周一，3 = 周三
    let scheduler = scheduler(
        &h,
        vec![progress_entry("weekly", ScheduleConfig::weekly(vec![1, 3], 9, 0))],
    );

    // 2026-03-09 是周一
    assert_eq!(scheduler.tick(TestEnv::at(2026, 3, 9, 9, 0)).await.unwrap().enqueued.len(), 1);
    assert_eq!(scheduler.tick(TestEnv::at(2026, 3, 10, 9, 0)).await.unwrap().enqueued.len(), 0);
    assert_eq!(scheduler.tick(TestEnv::at(2026, 3, 11, 9, 0)).await.unwrap().enqueued.len(), 1);
}

#[tokio::test]
async fn test_window_with_interval() {
    let h = TestHarness::new(sample_registry());
    let rule = ScheduleConfig::daily(0, 0)
        .with_window(TimeWindow::new(8, 0, 10, 0))
        .with_interval(30);
    let scheduler = scheduler(&h, vec![progress_entry("throttled", rule)]);

    let fired = |report: shipqueue_dispatcher::TickReport| report.enqueued.len();
    assert_eq!(fired(scheduler.tick(TestEnv::at(2026, 3, 10, 7, 30)).await.unwrap()), 0);
    assert_eq!(fired(scheduler.tick(TestEnv::at(2026, 3, 10, 8, 0)).await.unwrap()), 1);
    assert_eq!(fired(scheduler.tick(TestEnv::at(2026, 3, 10, 8, 10)).await.unwrap()), 0);
    assert_eq!(fired(scheduler.tick(TestEnv::at(2026, 3, 10, 8, 30)).await.unwrap()), 1);
    assert_eq!(fired(scheduler.tick(TestEnv::at(2026, 3, 10, 10, 30)).await.unwrap()), 0);
}

#[tokio::test]
async fn test_one_shot_rule_fires_once_ever() {
    let h = TestHarness::new(sample_registry());
    let scheduler = scheduler(
        &h,
        vec![progress_entry("migration", ScheduleConfig::daily(3, 0).one_shot())],
    );

    assert_eq!(scheduler.tick(TestEnv::at(2026, 3, 10, 3, 0)).await.unwrap().enqueued.len(), 1);
    assert_eq!(scheduler.tick(TestEnv::at(2026, 3, 11, 3, 0)).await.unwrap().enqueued.len(), 0);
}

#[tokio::test]
async fn test_storage_outage_does_not_advance_bookkeeping() {
    let storage = Arc::new(SwitchableStorage::new());
    let h = TestHarness::with_storage(storage.clone(), sample_registry());
    let scheduler = scheduler(&h, vec![progress_entry("daily", ScheduleConfig::daily(3, 0))]);
    let now = TestEnv::at(2026, 3, 10, 3, 0);

    storage.set_available(false);
    let err = scheduler.tick(now).await.unwrap_err();
    assert!(err.is_storage_unavailable());
    assert_eq!(scheduler.last_fired("daily").await, None);

    storage.set_available(true);
    assert_eq!(scheduler.tick(now).await.unwrap().enqueued.len(), 1);
}

#[tokio::test]
async fn test_delayed_entry_creates_scheduled_item() {
    let h = TestHarness::new(sample_registry());
    let scheduler = scheduler(
        &h,
        vec![progress_entry("delayed", ScheduleConfig::daily(3, 0))
            .with_delay(Duration::minutes(10))
            .with_context("tenant-7")],
    );
    let now = TestEnv::at(2026, 3, 10, 3, 0);

    let report = scheduler.tick(now).await.unwrap();
    let (_, item) = &report.enqueued[0];
    assert_eq!(item.status, QueueItemStatus::Scheduled);
    assert_eq!(item.scheduled_at, now + Duration::minutes(10));
    assert_eq!(item.context, "tenant-7");
}

#[tokio::test]
async fn test_failing_entry_does_not_block_others() {
    let h = TestHarness::new(sample_registry());
    let broken = ScheduleEntry::new("broken", ScheduleConfig::daily(3, 0), || {
        Err(QueueError::Internal("factory exploded".into()))
    })
    .unwrap();
    let scheduler = scheduler(
        &h,
        vec![broken, progress_entry("healthy", ScheduleConfig::daily(3, 0))],
    );
    let now = TestEnv::at(2026, 3, 10, 3, 0);

    let report = scheduler.tick(now).await.unwrap();
    assert_eq!(report.enqueued.len(), 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].0, "broken");
    assert_eq!(scheduler.last_fired("broken").await, None);
}

#[tokio::test]
async fn test_tick_event_is_published() {
    let h = TestHarness::new(sample_registry());
    let ticks = Arc::new(RecordingHandler::new("ticks"));
    h.event_bus.subscribe(EventKind::Tick, ticks.clone()).await;
    let scheduler = scheduler(&h, vec![]);

    scheduler.tick(TestEnv::at(2026, 3, 10, 3, 0)).await.unwrap();
    assert_eq!(ticks.len(), 1);
}

#[tokio::test]
async fn test_failing_tick_handler_is_reported() {
    let h = TestHarness::new(sample_registry());
    h.event_bus
        .subscribe_fn(EventKind::Tick, "broken-listener", |_| {
            Err(anyhow::anyhow!("listener down"))
        })
        .await;
    let scheduler = scheduler(&h, vec![progress_entry("daily", ScheduleConfig::daily(3, 0))]);

    let report = scheduler.tick(TestEnv::at(2026, 3, 10, 3, 0)).await.unwrap();
    assert_eq!(report.enqueued.len(), 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].0, "tick");
}

#[test]
fn test_duplicate_entry_names_rejected() {
    let h = TestHarness::new(sample_registry());
    let mut scheduler = Scheduler::new(Arc::clone(&h.queue_service), Arc::clone(&h.event_bus));
    scheduler
        .add_entry(progress_entry("same", ScheduleConfig::daily(3, 0)))
        .unwrap();
    let err = scheduler
        .add_entry(progress_entry("same", ScheduleConfig::hourly(0)))
        .unwrap_err();
    assert!(matches!(err, QueueError::Configuration(_)));
}
