//! 进程内事件总线
//!
//! 同步发布/订阅：`publish` 按注册顺序依次等待每个处理器完成，
//! 第一个失败的处理器会中止后续分发并把错误返回给发布者。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use shipqueue_domain::{Event, EventKind};
use shipqueue_errors::{QueueError, QueueResult};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// 事件处理器
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn handler_name(&self) -> &str;

    /// 事件以只读引用传入
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// 以同步闭包实现的处理器
pub struct FnEventHandler<F> {
    name: String,
    handler: F,
}

impl<F> FnEventHandler<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

#[async_trait]
impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn handler_name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        (self.handler)(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
}

pub struct EventBus {
    subscriptions: RwLock<HashMap<EventKind, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 注册处理器，同一事件类型的多个处理器按注册顺序调用
    pub async fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(
            handler = handler.handler_name(),
            event_kind = ?kind,
            "注册事件处理器"
        );
        self.subscriptions
            .write()
            .await
            .entry(kind)
            .or_default()
            .push(Subscription { id, handler });
        id
    }

    pub async fn subscribe_fn<F>(&self, kind: EventKind, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(kind, Arc::new(FnEventHandler::new(name, handler)))
            .await
    }

    /// 注销处理器，返回是否存在该订阅
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let mut removed = false;
        for handlers in subscriptions.values_mut() {
            let before = handlers.len();
            handlers.retain(|s| s.id != id);
            removed |= handlers.len() != before;
        }
        subscriptions.retain(|_, handlers| !handlers.is_empty());
        removed
    }

    pub async fn handler_count(&self, kind: EventKind) -> usize {
        self.subscriptions
            .read()
            .await
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// 发布事件
    ///
    /// 分发前复制处理器列表并释放锁，处理器内部可以安全地订阅或注销。
    pub async fn publish(&self, event: &Event) -> QueueResult<()> {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subscriptions = self.subscriptions.read().await;
            match subscriptions.get(&event.kind()) {
                Some(list) => list.iter().map(|s| Arc::clone(&s.handler)).collect(),
                None => return Ok(()),
            }
        };

        for handler in handlers {
            if let Err(e) = handler.handle(event).await {
                warn!(
                    handler = handler.handler_name(),
                    event_type = event.event_type(),
                    error = %e,
                    "事件处理器执行失败"
                );
                return Err(QueueError::event_handler(
                    handler.handler_name(),
                    format!("{e:#}"),
                ));
            }
        }

        Ok(())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    fn tick() -> Event {
        Event::Tick { at: Utc::now() }
    }

    #[tokio::test]
    async fn test_handlers_called_in_registration_order() {
        let bus = EventBus::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let calls = Arc::clone(&calls);
            bus.subscribe_fn(EventKind::Tick, name, move |_| {
                calls.lock().unwrap().push(name);
                Ok(())
            })
            .await;
        }

        bus.publish(&tick()).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_only_matching_kind_is_dispatched() {
        let bus = EventBus::new();
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        bus.subscribe_fn(EventKind::Progress, "progress", move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        })
        .await;

        bus.publish(&tick()).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_surfaces_and_stops_dispatch() {
        let bus = EventBus::new();
        let reached = Arc::new(Mutex::new(false));

        bus.subscribe_fn(EventKind::Tick, "veto", |_| Err(anyhow::anyhow!("rejected")))
            .await;
        let flag = Arc::clone(&reached);
        bus.subscribe_fn(EventKind::Tick, "after", move |_| {
            *flag.lock().unwrap() = true;
            Ok(())
        })
        .await;

        let err = bus.publish(&tick()).await.unwrap_err();
        match err {
            QueueError::EventHandler { handler, message } => {
                assert_eq!(handler, "veto");
                assert!(message.contains("rejected"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!*reached.lock().unwrap());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus
            .subscribe_fn(EventKind::Tick, "temp", |_| Ok(()))
            .await;
        assert_eq!(bus.handler_count(EventKind::Tick).await, 1);

        assert!(bus.unsubscribe(id).await);
        assert!(!bus.unsubscribe(id).await);
        assert_eq!(bus.handler_count(EventKind::Tick).await, 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert!(bus.publish(&tick()).await.is_ok());
    }
}
