//! Event handlers that record what they see

use std::sync::Mutex;

use async_trait::async_trait;
use shipqueue_core::EventHandler;
use shipqueue_domain::{Event, QueueItemStatus};

/// Keeps a copy of every event it receives
pub struct RecordingHandler {
    name: String,
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Progress values reported for one item, in publish order
    pub fn progress_of(&self, item_id: i64) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::QueueItemProgress {
                    item_id: id,
                    base_points,
                    ..
                } if id == item_id => Some(base_points),
                _ => None,
            })
            .collect()
    }

    /// Committed status path of one item starting from its first recorded previous status
    pub fn status_path(&self, item_id: i64) -> Vec<QueueItemStatus> {
        let mut path = Vec::new();
        for event in self.events() {
            if let Event::QueueStatusChanged {
                item,
                previous_status,
                ..
            } = event
            {
                if item.id != Some(item_id) {
                    continue;
                }
                if path.is_empty() {
                    path.push(previous_status);
                }
                path.push(item.status);
            }
        }
        path
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn handler_name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("recording handler lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}
