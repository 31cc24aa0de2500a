use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::lead::DripMessage;
use crate::queue::{MessageQueue, QueueError, QueueMessage};

struct StoredMessage {
    msg_id: i64,
    read_ct: i32,
    enqueued_at: chrono::DateTime<chrono::Utc>,
    visible_at: chrono::DateTime<chrono::Utc>,
    message: DripMessage,
}

#[derive(Default)]
struct QueueState {
    queues: HashMap<String, Vec<StoredMessage>>,
    next_id: i64,
}

/// In-memory queue with the same leasing semantics as [`super::PgQueue`].
/// Time comes from the injected clock so visibility-timeout behavior is
/// testable without sleeping.
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            clock,
        }
    }

    /// Number of messages currently in a queue, leased or not. Test hook.
    pub async fn len(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(queue).map(|q| q.len()).unwrap_or(0)
    }

    /// Whether a queue exists at all. Test hook.
    pub async fn exists(&self, queue: &str) -> bool {
        let state = self.state.lock().await;
        state.queues.contains_key(queue)
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn create(&self, queue: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn drop_queue(&self, queue: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.queues.remove(queue);
        Ok(())
    }

    async fn send(&self, queue: &str, message: &DripMessage) -> Result<i64, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let msg_id = state.next_id;

        let entries = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        entries.push(StoredMessage {
            msg_id,
            read_ct: 0,
            enqueued_at: now,
            visible_at: now,
            message: message.clone(),
        });

        Ok(msg_id)
    }

    async fn read(
        &self,
        queue: &str,
        vt_secs: u32,
        qty: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let Some(entries) = state.queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let mut leased = Vec::new();
        for entry in entries.iter_mut() {
            if leased.len() >= qty {
                break;
            }
            if entry.visible_at > now {
                continue;
            }
            entry.visible_at = now + Duration::seconds(i64::from(vt_secs));
            entry.read_ct += 1;
            leased.push(QueueMessage {
                msg_id: entry.msg_id,
                read_ct: entry.read_ct,
                enqueued_at: entry.enqueued_at,
                visible_at: entry.visible_at,
                message: entry.message.clone(),
            });
        }

        Ok(leased)
    }

    async fn archive(&self, queue: &str, msg_id: i64) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if let Some(entries) = state.queues.get_mut(queue) {
            entries.retain(|entry| entry.msg_id != msg_id);
        }
        Ok(())
    }
}
