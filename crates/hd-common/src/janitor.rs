use std::time::Duration;

use chrono::{Days, NaiveDate};
use tracing::{debug, info, warn};

use crate::config::DripConfig;
use crate::queue::{MessageQueue, day_queue_name};

/// Dates whose day-queues have aged out of the retention horizon: the
/// window of `retention_days` dates starting at `today - retention_days`
/// and walking further back. Queues newer than that survive.
pub fn stale_dates(today: NaiveDate, retention_days: u32) -> Vec<NaiveDate> {
    (retention_days..retention_days.saturating_mul(2))
        .map(|age| today - Days::new(u64::from(age)))
        .collect()
}

/// Drop day-queues older than the retention horizon. Runs at worker startup.
///
/// Both plain and `test-` prefixed names are dropped regardless of the
/// current test-mode flag. Individual failures are ignored; the whole sweep
/// is abandoned once the janitor timeout elapses.
pub async fn purge_stale_queues<Q: MessageQueue + ?Sized>(
    queue: &Q,
    today: NaiveDate,
    config: &DripConfig,
) {
    let dates = stale_dates(today, config.retention_days);
    if dates.is_empty() {
        return;
    }

    let sweep = async {
        let mut dropped = 0usize;
        for date in &dates {
            for test_prefix in [false, true] {
                let name = day_queue_name(*date, test_prefix);
                match queue.drop_queue(&name).await {
                    Ok(()) => {
                        dropped += 1;
                        debug!(queue = %name, "dropped stale day-queue");
                    }
                    Err(err) => {
                        debug!(queue = %name, error = %err, "ignoring failed queue drop");
                    }
                }
            }
        }
        dropped
    };

    let timeout = Duration::from_secs(config.janitor_timeout_secs);
    match tokio::time::timeout(timeout, sweep).await {
        Ok(dropped) => {
            info!(
                oldest = %dates.last().map(|d| d.to_string()).unwrap_or_default(),
                newest = %dates[0],
                dropped,
                "queue janitor finished"
            );
        }
        Err(_) => {
            warn!(
                timeout_secs = config.janitor_timeout_secs,
                "queue janitor timed out; remaining drops abandoned"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::queue::InMemoryQueue;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn stale_window_starts_past_the_retention_horizon() {
        let dates = stale_dates(day(2025, 1, 22), 7);
        assert_eq!(dates.len(), 7);
        assert_eq!(dates[0], day(2025, 1, 15));
        assert_eq!(dates[6], day(2025, 1, 9));
    }

    #[test]
    fn zero_retention_means_nothing_to_drop() {
        assert!(stale_dates(day(2025, 1, 22), 0).is_empty());
    }

    #[tokio::test]
    async fn purge_drops_aged_queues_and_spares_recent_ones() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 1, 22, 0, 0, 0).unwrap(),
        ));
        let queue = InMemoryQueue::new(clock.clone());

        for name in [
            "drip-messages-2025-01-15",
            "test-drip-messages-2025-01-15",
            "drip-messages-2025-01-16",
            "drip-messages-2025-01-22",
        ] {
            queue.create(name).await.unwrap();
        }

        let config = DripConfig::default();
        purge_stale_queues(&queue, day(2025, 1, 22), &config).await;

        assert!(!queue.exists("drip-messages-2025-01-15").await);
        assert!(!queue.exists("test-drip-messages-2025-01-15").await);
        assert!(queue.exists("drip-messages-2025-01-16").await);
        assert!(queue.exists("drip-messages-2025-01-22").await);
    }
}
