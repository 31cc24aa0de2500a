use chrono::{Days, NaiveDate};

use crate::store::{LeadStore, StoreError};

/// Day picked by the forward scan. `overflowed` is set when every day within
/// the horizon was at capacity and the last scanned day was assigned anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPick {
    pub day: NaiveDate,
    pub overflowed: bool,
}

/// Answers "how many sends have been attributed to day D so far?" by
/// consulting the lead store. The count covers completed advances only, so
/// the scheduler's forward estimate is optimistic: entries queued for D but
/// not yet sent are invisible here.
pub struct CapacityOracle<'a, S: LeadStore + ?Sized> {
    store: &'a S,
    daily_max: u32,
}

impl<'a, S: LeadStore + ?Sized> CapacityOracle<'a, S> {
    pub fn new(store: &'a S, daily_max: u32) -> Self {
        Self { store, daily_max }
    }

    /// Completed sends already attributed to `day`.
    pub async fn used(&self, day: NaiveDate) -> Result<u64, StoreError> {
        self.store.sent_count_on(day).await
    }

    /// Scan forward from `preferred` for up to `horizon_days` days and pick
    /// the first day with spare capacity. When the horizon is exhausted the
    /// last scanned day is assigned, at degraded fidelity.
    pub async fn first_open_day(
        &self,
        preferred: NaiveDate,
        horizon_days: u32,
    ) -> Result<SlotPick, StoreError> {
        let horizon_days = horizon_days.max(1);

        for offset in 0..horizon_days {
            let day = preferred + Days::new(u64::from(offset));
            if self.used(day).await? < u64::from(self.daily_max) {
                return Ok(SlotPick {
                    day,
                    overflowed: false,
                });
            }
        }

        Ok(SlotPick {
            day: preferred + Days::new(u64::from(horizon_days - 1)),
            overflowed: true,
        })
    }
}
