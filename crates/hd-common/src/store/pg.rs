use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use tokio_postgres::Row;
use tokio_postgres::error::SqlState;
use tracing::instrument;

use crate::db::PgPool;
use crate::lead::{Lead, LeadDraft, LeadStatus};
use crate::store::{LeadAdvance, LeadStore, StoreError};

/// Postgres lead store. One row per lead in `drip.leads`, unique indices on
/// email and phone; conditional updates carry the row lock that serializes
/// concurrent worker advances.
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_status(value: &str) -> Result<LeadStatus, StoreError> {
    LeadStatus::parse(value)
        .ok_or_else(|| StoreError::Mapping(format!("unknown lead status: {value}")))
}

fn count_from_db(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Mapping(format!("negative {column}: {value}")))
}

fn row_to_lead(row: &Row) -> Result<Lead, StoreError> {
    Ok(Lead {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        notes: row.try_get("notes")?,
        max_messages: count_from_db(row.try_get("max_messages")?, "max_messages")?,
        message_count: count_from_db(row.try_get("message_count")?, "message_count")?,
        last_sent_at: row.try_get("last_sent_at")?,
        next_scheduled_for: row.try_get("next_scheduled_for")?,
        status: parse_status(row.try_get::<_, String>("status")?.as_str())?,
        created_at: row.try_get("created_at")?,
    })
}

fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_time(NaiveTime::MIN).and_utc();
    let end = (day + Days::new(1)).and_time(NaiveTime::MIN).and_utc();
    (start, end)
}

#[async_trait]
impl LeadStore for PgLeadStore {
    #[instrument(skip(self, draft), fields(email = %draft.email))]
    async fn create(&self, draft: &LeadDraft, now: DateTime<Utc>) -> Result<Lead, StoreError> {
        let lead = Lead::admitted(draft, now);
        let max_messages = i32::try_from(lead.max_messages).unwrap_or(i32::MAX);

        let client = self.pool.get().await?;
        let result = client
            .execute(
                "INSERT INTO drip.leads
                     (id, name, email, phone, notes, max_messages, message_count,
                      last_sent_at, next_scheduled_for, status, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, 0, NULL, NULL, $7, $8)",
                &[
                    &lead.id,
                    &lead.name,
                    &lead.email,
                    &lead.phone,
                    &lead.notes,
                    &max_messages,
                    &lead.status.as_str(),
                    &lead.created_at,
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(lead),
            Err(err) if err.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                Err(StoreError::DuplicateKey(err.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<Option<Lead>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, name, email, phone, notes, max_messages, message_count,
                        last_sent_at, next_scheduled_for, status, created_at
                 FROM drip.leads WHERE id = $1",
                &[&id],
            )
            .await?;

        row.as_ref().map(row_to_lead).transpose()
    }

    #[instrument(skip(self, patch))]
    async fn advance(
        &self,
        id: &str,
        expected_count: u32,
        patch: &LeadAdvance,
    ) -> Result<bool, StoreError> {
        let expected = i32::try_from(expected_count).unwrap_or(i32::MAX);
        let new_count = i32::try_from(patch.message_count).unwrap_or(i32::MAX);

        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE drip.leads SET
                     message_count = $2,
                     last_sent_at = $3,
                     next_scheduled_for = $4,
                     status = $5
                 WHERE id = $1
                   AND status = 'active'
                   AND message_count = $6",
                &[
                    &id,
                    &new_count,
                    &patch.last_sent_at,
                    &patch.next_scheduled_for,
                    &patch.status.as_str(),
                    &expected,
                ],
            )
            .await?;

        Ok(updated == 1)
    }

    #[instrument(skip(self))]
    async fn set_next_scheduled(&self, id: &str, day: NaiveDate) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE drip.leads SET next_scheduled_for = $2 WHERE id = $1",
                &[&id, &day],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn sent_count_on(&self, day: NaiveDate) -> Result<u64, StoreError> {
        let (start, end) = day_bounds(day);

        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) AS sent FROM drip.leads
                 WHERE last_sent_at >= $1 AND last_sent_at < $2",
                &[&start, &end],
            )
            .await?;

        let sent: i64 = row.try_get("sent")?;
        u64::try_from(sent).map_err(|_| StoreError::Mapping(format!("negative count: {sent}")))
    }
}
