use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

/// 把一次关闭请求扇出给所有运行中的组件
///
/// 克隆共享同一个通道，关闭后再订阅的接收器会立即收到信号。
#[derive(Clone)]
pub struct ShutdownManager {
    sender: Arc<Mutex<Option<broadcast::Sender<()>>>>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);

        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        match self.sender.lock().await.as_ref() {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = broadcast::channel(1);
                let _ = sender.send(());
                receiver
            }
        }
    }

    /// 触发关闭，重复调用无效果
    pub async fn shutdown(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!("关闭已经触发过");
            return;
        }

        if let Some(sender) = self.sender.lock().await.take() {
            debug!(subscribers = sender.receiver_count(), "广播关闭信号");
            // 没有订阅者时发送失败，忽略
            let _ = sender.send(());
        }
        info!("关闭信号已发送");
    }

    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
