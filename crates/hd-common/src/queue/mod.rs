//! Date-partitioned message queues with leased delivery.
//!
//! The contract is deliberately small: idempotent create/drop, send,
//! visibility-timeout read, idempotent archive. [`PgQueue`] is the durable
//! implementation shared by all workers; [`InMemoryQueue`] backs tests.

mod memory;
mod name;
mod pg;

pub use memory::InMemoryQueue;
pub use name::{day_queue_name, parse_day_queue_name};
pub use pg::PgQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::PoolError;
use thiserror::Error;
use tokio_postgres::Error as PgError;

use crate::lead::DripMessage;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
    #[error("failed to map queue message: {0}")]
    Mapping(String),
}

impl QueueError {
    /// Transient errors are retryable: the scheduler logs and moves on,
    /// the worker skips the tick and relies on the next poll.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Pool(_) | QueueError::Postgres(_))
    }
}

/// A message leased out of a queue. Invisible to other readers until
/// `visible_at`; permanently removed once archived.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: DateTime<Utc>,
    pub visible_at: DateTime<Utc>,
    pub message: DripMessage,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Idempotent: creating an existing queue is a no-op success.
    async fn create(&self, queue: &str) -> Result<(), QueueError>;

    /// Idempotent: dropping a non-existent queue is a no-op success.
    /// Destroys all messages still in the queue.
    async fn drop_queue(&self, queue: &str) -> Result<(), QueueError>;

    /// Append one entry; returns a stable id usable with `archive`.
    async fn send(&self, queue: &str, message: &DripMessage) -> Result<i64, QueueError>;

    /// Lease up to `qty` visible messages for `vt_secs` seconds. Returns an
    /// empty list when nothing is visible; never blocks beyond the query.
    async fn read(
        &self,
        queue: &str,
        vt_secs: u32,
        qty: usize,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Permanently remove a message. Idempotent on already-archived ids.
    async fn archive(&self, queue: &str, msg_id: i64) -> Result<(), QueueError>;
}
