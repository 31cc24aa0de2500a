use chrono::{Days, NaiveDate};
use thiserror::Error;
use tracing::{info, warn};

use crate::capacity::CapacityOracle;
use crate::clock::Clock;
use crate::config::DripConfig;
use crate::lead::{DripMessage, Lead};
use crate::queue::{MessageQueue, QueueError, day_queue_name};
use crate::store::{LeadStore, StoreError};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened to one message of a lead's sequence. `msg_id` is `None`
/// when the enqueue failed and the entry was skipped (partial schedule).
#[derive(Debug, Clone)]
pub struct ScheduledMessage {
    pub message_number: u32,
    pub day: NaiveDate,
    pub queue: String,
    pub msg_id: Option<i64>,
}

/// Fan an admitted lead out into one queue entry per future message.
///
/// For each message number m the preferred day is `today + (m-1)`; the
/// capacity oracle scans forward from there and clamps at the horizon. The
/// target day-queue is created idempotently before the entry is enqueued.
///
/// Not transactional with the lead row: a transient queue failure drops
/// that message from the schedule (logged) and the remaining messages are
/// still attempted. Store failures propagate to the admission caller.
pub async fn schedule_lead<Q, S>(
    queue: &Q,
    store: &S,
    config: &DripConfig,
    clock: &dyn Clock,
    lead: &Lead,
) -> Result<Vec<ScheduledMessage>, ScheduleError>
where
    Q: MessageQueue + ?Sized,
    S: LeadStore + ?Sized,
{
    let today = clock.today();
    let oracle = CapacityOracle::new(store, config.daily_max);

    let mut planned = Vec::with_capacity(lead.max_messages as usize);

    for message_number in 1..=lead.max_messages {
        let preferred = today + Days::new(u64::from(message_number - 1));
        let pick = oracle
            .first_open_day(preferred, config.overflow_horizon_days)
            .await?;

        if pick.overflowed {
            warn!(
                lead_id = %lead.id,
                message_number,
                %preferred,
                assigned = %pick.day,
                "capacity horizon exhausted; clamping to last scanned day"
            );
        }

        let queue_name = day_queue_name(pick.day, config.test_mode);
        let payload = DripMessage {
            lead_id: lead.id.clone(),
            email: lead.email.clone(),
            message_number,
            scheduled_date: pick.day,
        };

        let msg_id = match enqueue(queue, &queue_name, &payload).await {
            Ok(msg_id) => {
                info!(
                    lead_id = %lead.id,
                    message_number,
                    queue = %queue_name,
                    msg_id,
                    "scheduled drip message"
                );
                Some(msg_id)
            }
            Err(err) => {
                warn!(
                    lead_id = %lead.id,
                    message_number,
                    queue = %queue_name,
                    error = %err,
                    "failed to enqueue drip message; continuing with partial schedule"
                );
                None
            }
        };

        planned.push(ScheduledMessage {
            message_number,
            day: pick.day,
            queue: queue_name,
            msg_id,
        });
    }

    store.set_next_scheduled(&lead.id, today).await?;

    Ok(planned)
}

async fn enqueue<Q: MessageQueue + ?Sized>(
    queue: &Q,
    queue_name: &str,
    payload: &DripMessage,
) -> Result<i64, QueueError> {
    queue.create(queue_name).await?;
    queue.send(queue_name, payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::lead::{LeadDraft, LeadStatus};
    use crate::queue::{InMemoryQueue, QueueMessage};
    use crate::store::{InMemoryLeadStore, LeadAdvance};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed_clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap(),
        ))
    }

    fn draft(n: u32, max_messages: u32) -> LeadDraft {
        LeadDraft {
            name: format!("Lead {n}"),
            email: format!("lead{n}@example.com"),
            phone: format!("+8190000000{n:02}"),
            notes: None,
            max_messages,
        }
    }

    async fn read_all(queue: &InMemoryQueue, name: &str) -> Vec<QueueMessage> {
        // vt of zero keeps entries visible for later assertions.
        queue.read(name, 0, usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn happy_path_spreads_messages_over_consecutive_days() {
        let clock = fixed_clock();
        let queue = InMemoryQueue::new(clock.clone());
        let store = InMemoryLeadStore::new();
        let config = DripConfig::default();

        let lead = store.create(&draft(1, 5), clock.now()).await.unwrap();
        let planned = schedule_lead(&queue, &store, &config, clock.as_ref(), &lead)
            .await
            .unwrap();

        assert_eq!(planned.len(), 5);
        for (idx, scheduled) in planned.iter().enumerate() {
            let m = idx as u32 + 1;
            let expected_day = NaiveDate::from_ymd_opt(2025, 1, 15 + idx as u32).unwrap();
            assert_eq!(scheduled.message_number, m);
            assert_eq!(scheduled.day, expected_day);
            assert_eq!(
                scheduled.queue,
                format!("drip-messages-2025-01-{:02}", 15 + idx)
            );
            assert!(scheduled.msg_id.is_some());

            let entries = read_all(&queue, &scheduled.queue).await;
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].message.message_number, m);
            assert_eq!(entries[0].message.scheduled_date, expected_day);
            assert_eq!(entries[0].message.lead_id, lead.id);
            assert_eq!(entries[0].message.email, lead.email);
        }

        let stored = store.get(&lead.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LeadStatus::Active);
        assert_eq!(
            stored.next_scheduled_for,
            NaiveDate::from_ymd_opt(2025, 1, 15)
        );
    }

    #[tokio::test]
    async fn full_day_pushes_the_assignment_forward() {
        let clock = fixed_clock();
        let queue = InMemoryQueue::new(clock.clone());
        let store = InMemoryLeadStore::new();
        let config = DripConfig {
            daily_max: 2,
            ..DripConfig::default()
        };

        // Two leads already advanced today consume the whole budget.
        for n in 1..=2 {
            let lead = store.create(&draft(n, 1), clock.now()).await.unwrap();
            let patch = LeadAdvance {
                message_count: 1,
                last_sent_at: clock.now(),
                next_scheduled_for: None,
                status: LeadStatus::Completed,
            };
            assert!(store.advance(&lead.id, 0, &patch).await.unwrap());
        }

        let lead = store.create(&draft(3, 1), clock.now()).await.unwrap();
        let planned = schedule_lead(&queue, &store, &config, clock.as_ref(), &lead)
            .await
            .unwrap();

        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].day, NaiveDate::from_ymd_opt(2025, 1, 16).unwrap());
        assert_eq!(planned[0].queue, "drip-messages-2025-01-16");

        let entries = read_all(&queue, "drip-messages-2025-01-16").await;
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].message.scheduled_date,
            NaiveDate::from_ymd_opt(2025, 1, 16).unwrap()
        );
    }

    #[tokio::test]
    async fn zero_daily_max_overflows_to_the_horizon() {
        let clock = fixed_clock();
        let queue = InMemoryQueue::new(clock.clone());
        let store = InMemoryLeadStore::new();
        let config = DripConfig {
            daily_max: 0,
            overflow_horizon_days: 30,
            ..DripConfig::default()
        };

        let lead = store.create(&draft(1, 1), clock.now()).await.unwrap();
        let planned = schedule_lead(&queue, &store, &config, clock.as_ref(), &lead)
            .await
            .unwrap();

        // today + horizon - 1
        assert_eq!(planned[0].day, NaiveDate::from_ymd_opt(2025, 2, 13).unwrap());
    }

    #[tokio::test]
    async fn test_mode_prefixes_queue_names() {
        let clock = fixed_clock();
        let queue = InMemoryQueue::new(clock.clone());
        let store = InMemoryLeadStore::new();
        let config = DripConfig {
            test_mode: true,
            ..DripConfig::default()
        };

        let lead = store.create(&draft(1, 1), clock.now()).await.unwrap();
        let planned = schedule_lead(&queue, &store, &config, clock.as_ref(), &lead)
            .await
            .unwrap();

        assert_eq!(planned[0].queue, "test-drip-messages-2025-01-15");
        assert!(queue.exists("test-drip-messages-2025-01-15").await);
    }

    /// Queue that fails every `send`, for exercising partial schedules.
    struct BrokenSendQueue {
        inner: InMemoryQueue,
        failures: AtomicU32,
    }

    #[async_trait]
    impl MessageQueue for BrokenSendQueue {
        async fn create(&self, queue: &str) -> Result<(), QueueError> {
            self.inner.create(queue).await
        }

        async fn drop_queue(&self, queue: &str) -> Result<(), QueueError> {
            self.inner.drop_queue(queue).await
        }

        async fn send(&self, queue: &str, _message: &DripMessage) -> Result<i64, QueueError> {
            self.failures.fetch_add(1, Ordering::SeqCst);
            Err(QueueError::UnknownQueue(queue.to_string()))
        }

        async fn read(
            &self,
            queue: &str,
            vt_secs: u32,
            qty: usize,
        ) -> Result<Vec<QueueMessage>, QueueError> {
            self.inner.read(queue, vt_secs, qty).await
        }

        async fn archive(&self, queue: &str, msg_id: i64) -> Result<(), QueueError> {
            self.inner.archive(queue, msg_id).await
        }
    }

    #[tokio::test]
    async fn enqueue_failures_leave_a_partial_schedule() {
        let clock = fixed_clock();
        let queue = BrokenSendQueue {
            inner: InMemoryQueue::new(clock.clone()),
            failures: AtomicU32::new(0),
        };
        let store = InMemoryLeadStore::new();
        let config = DripConfig::default();

        let lead = store.create(&draft(1, 3), clock.now()).await.unwrap();
        let planned = schedule_lead(&queue, &store, &config, clock.as_ref(), &lead)
            .await
            .unwrap();

        // All three attempts failed but the schedule call itself succeeded
        // and the lead row was still stamped.
        assert_eq!(planned.len(), 3);
        assert!(planned.iter().all(|entry| entry.msg_id.is_none()));
        assert_eq!(queue.failures.load(Ordering::SeqCst), 3);

        let stored = store.get(&lead.id).await.unwrap().unwrap();
        assert_eq!(
            stored.next_scheduled_for,
            NaiveDate::from_ymd_opt(2025, 1, 15)
        );
    }
}
