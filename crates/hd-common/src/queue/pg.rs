use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tokio_postgres::Row;
use tokio_postgres::types::Json;
use tracing::instrument;

use crate::db::PgPool;
use crate::lead::DripMessage;
use crate::queue::{MessageQueue, QueueError, QueueMessage};

/// Postgres-backed queue. Queues live in a registry table; messages are
/// leased with `FOR UPDATE SKIP LOCKED` so any number of workers can read
/// concurrently, and archived rows are moved to `drip.queue_archive`.
pub struct PgQueue {
    pool: PgPool,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_message(row: &Row) -> Result<QueueMessage, QueueError> {
    let payload: Value = row.try_get("payload")?;
    let message: DripMessage = serde_json::from_value(payload)
        .map_err(|err| QueueError::Mapping(format!("bad payload: {err}")))?;

    Ok(QueueMessage {
        msg_id: row.try_get("id")?,
        read_ct: row.try_get("read_ct")?,
        enqueued_at: row.try_get("enqueued_at")?,
        visible_at: row.try_get("vt")?,
        message,
    })
}

#[async_trait]
impl MessageQueue for PgQueue {
    #[instrument(skip(self))]
    async fn create(&self, queue: &str) -> Result<(), QueueError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO drip.queues (queue_name) VALUES ($1)
                 ON CONFLICT (queue_name) DO NOTHING",
                &[&queue],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn drop_queue(&self, queue: &str) -> Result<(), QueueError> {
        let client = self.pool.get().await?;
        // Messages cascade with the registry row.
        client
            .execute("DELETE FROM drip.queues WHERE queue_name = $1", &[&queue])
            .await?;
        Ok(())
    }

    #[instrument(skip(self, message))]
    async fn send(&self, queue: &str, message: &DripMessage) -> Result<i64, QueueError> {
        let payload =
            serde_json::to_value(message).map_err(|err| QueueError::Mapping(err.to_string()))?;

        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "INSERT INTO drip.queue_messages (queue_id, payload, enqueued_at, vt)
                 SELECT id, $2, $3, $3 FROM drip.queues WHERE queue_name = $1
                 RETURNING id",
                &[&queue, &Json(&payload), &Utc::now()],
            )
            .await?;

        match row {
            Some(row) => Ok(row.try_get("id")?),
            None => Err(QueueError::UnknownQueue(queue.to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn read(
        &self,
        queue: &str,
        vt_secs: u32,
        qty: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let now = Utc::now();
        let lease_until = now + Duration::seconds(i64::from(vt_secs));
        let qty = i64::try_from(qty).unwrap_or(i64::MAX);

        let client = self.pool.get().await?;
        let stmt = client
            .prepare(
                "UPDATE drip.queue_messages m
                 SET vt = $3, read_ct = m.read_ct + 1
                 WHERE m.id IN (
                     SELECT qm.id
                     FROM drip.queue_messages qm
                     JOIN drip.queues q ON q.id = qm.queue_id
                     WHERE q.queue_name = $1
                       AND qm.vt <= $2
                     ORDER BY qm.id
                     LIMIT $4
                     FOR UPDATE OF qm SKIP LOCKED
                 )
                 RETURNING m.id, m.read_ct, m.enqueued_at, m.vt, m.payload",
            )
            .await?;

        let rows = client
            .query(&stmt, &[&queue, &now, &lease_until, &qty])
            .await?;

        rows.iter().map(row_to_message).collect()
    }

    #[instrument(skip(self))]
    async fn archive(&self, queue: &str, msg_id: i64) -> Result<(), QueueError> {
        let client = self.pool.get().await?;
        // Move-to-archive in one statement; zero rows means the message was
        // already archived, which is a no-op success.
        client
            .execute(
                "WITH removed AS (
                     DELETE FROM drip.queue_messages m
                     USING drip.queues q
                     WHERE q.id = m.queue_id
                       AND q.queue_name = $1
                       AND m.id = $2
                     RETURNING m.id, m.payload, m.read_ct, m.enqueued_at
                 )
                 INSERT INTO drip.queue_archive
                     (original_msg_id, queue_name, payload, read_ct, enqueued_at)
                 SELECT id, $1, payload, read_ct, enqueued_at FROM removed",
                &[&queue, &msg_id],
            )
            .await?;
        Ok(())
    }
}
