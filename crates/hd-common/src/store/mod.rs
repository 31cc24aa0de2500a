//! Durable per-lead state.
//!
//! Worker advances use compare-and-set: `advance` only commits when the
//! stored `message_count` still matches the expected value, so two workers
//! racing the same `(lead, message_number)` pair serialize on the row and
//! exactly one of them wins.

mod memory;
mod pg;

pub use memory::InMemoryLeadStore;
pub use pg::PgLeadStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::PoolError;
use thiserror::Error;
use tokio_postgres::Error as PgError;

use crate::lead::{Lead, LeadDraft, LeadStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to map lead row: {0}")]
    Mapping(String),
}

/// New values for a committed advance, computed by the worker from the lead
/// it loaded. Safe to precompute because `max_messages` is immutable and the
/// conditional update only applies while `message_count` is unchanged.
#[derive(Debug, Clone)]
pub struct LeadAdvance {
    pub message_count: u32,
    pub last_sent_at: DateTime<Utc>,
    pub next_scheduled_for: Option<NaiveDate>,
    pub status: LeadStatus,
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Persist a new lead. Fails with [`StoreError::DuplicateKey`] when the
    /// email or phone is already taken.
    async fn create(&self, draft: &LeadDraft, now: DateTime<Utc>) -> Result<Lead, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Lead>, StoreError>;

    /// Conditionally advance a lead: applies `patch` only if the lead is
    /// still ACTIVE with `message_count == expected_count`. Returns whether
    /// the advance committed.
    async fn advance(
        &self,
        id: &str,
        expected_count: u32,
        patch: &LeadAdvance,
    ) -> Result<bool, StoreError>;

    /// Record the date of the next expected advance.
    async fn set_next_scheduled(&self, id: &str, day: NaiveDate) -> Result<(), StoreError>;

    /// How many leads had their most recent send within civil day `day`
    /// (UTC). Feeds the capacity oracle.
    async fn sent_count_on(&self, day: NaiveDate) -> Result<u64, StoreError>;
}
