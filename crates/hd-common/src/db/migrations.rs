use thiserror::Error;
use tracing::{info, instrument};

use crate::db::{DbPoolError, PgPool};
use deadpool_postgres::PoolError;
use tokio_postgres::Error as PgError;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("failed to run migration: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to build pool: {0}")]
    PoolBuild(#[from] DbPoolError),
}

struct Migration {
    id: i32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    id: 1,
    description: "leads table and date-partitioned queue storage",
    sql: r#"
CREATE TABLE IF NOT EXISTS drip.leads (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    phone TEXT NOT NULL,
    notes TEXT,
    max_messages INTEGER NOT NULL CHECK (max_messages > 0),
    message_count INTEGER NOT NULL DEFAULT 0
        CHECK (message_count >= 0 AND message_count <= max_messages),
    last_sent_at TIMESTAMPTZ,
    next_scheduled_for DATE,
    status TEXT NOT NULL DEFAULT 'active'
        CHECK (status IN ('active', 'completed', 'failed')),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_leads_email ON drip.leads(email);
CREATE UNIQUE INDEX IF NOT EXISTS uq_leads_phone ON drip.leads(phone);
CREATE INDEX IF NOT EXISTS idx_leads_next_scheduled
    ON drip.leads(next_scheduled_for, status);
CREATE INDEX IF NOT EXISTS idx_leads_last_sent ON drip.leads(last_sent_at);

CREATE TABLE IF NOT EXISTS drip.queues (
    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    queue_name TEXT NOT NULL UNIQUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS drip.queue_messages (
    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    queue_id BIGINT NOT NULL REFERENCES drip.queues(id) ON DELETE CASCADE,
    payload JSONB NOT NULL,
    read_ct INTEGER NOT NULL DEFAULT 0,
    enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    vt TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_queue_messages_ready
    ON drip.queue_messages(queue_id, vt, id);

CREATE TABLE IF NOT EXISTS drip.queue_archive (
    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    original_msg_id BIGINT NOT NULL,
    queue_name TEXT NOT NULL,
    payload JSONB NOT NULL,
    read_ct INTEGER NOT NULL,
    enqueued_at TIMESTAMPTZ NOT NULL,
    archived_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#,
}];

#[instrument(skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrationError> {
    let mut client = pool.get().await?;
    client
        .batch_execute(
            "CREATE SCHEMA IF NOT EXISTS drip;
             CREATE TABLE IF NOT EXISTS drip.schema_migrations (
                id INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
             );",
        )
        .await?;

    for migration in MIGRATIONS {
        let already_applied: bool = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM drip.schema_migrations WHERE id = $1)",
                &[&migration.id],
            )
            .await?
            .get(0);

        if already_applied {
            continue;
        }

        let tx = client.transaction().await?;
        tx.batch_execute(migration.sql).await?;
        tx.execute(
            "INSERT INTO drip.schema_migrations (id, description) VALUES ($1, $2)",
            &[&migration.id, &migration.description],
        )
        .await?;
        tx.commit().await?;

        info!(
            id = migration.id,
            description = migration.description,
            "applied migration"
        );
    }

    Ok(())
}
