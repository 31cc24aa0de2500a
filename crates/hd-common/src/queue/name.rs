use chrono::NaiveDate;

/// Canonical prefix for day-queues.
pub const QUEUE_PREFIX: &str = "drip-messages-";

/// Additional prefix applied under test mode.
pub const TEST_PREFIX: &str = "test-";

/// Name of the day-queue holding all messages scheduled for `day`:
/// `drip-messages-YYYY-MM-DD`, prefixed with `test-` in test mode.
pub fn day_queue_name(day: NaiveDate, test_mode: bool) -> String {
    let base = format!("{QUEUE_PREFIX}{}", day.format("%Y-%m-%d"));
    if test_mode { format!("{TEST_PREFIX}{base}") } else { base }
}

/// Inverse of [`day_queue_name`]. Accepts both plain and test-prefixed
/// names; rejects anything whose date component is not strict `YYYY-MM-DD`.
pub fn parse_day_queue_name(name: &str) -> Option<NaiveDate> {
    let name = name.strip_prefix(TEST_PREFIX).unwrap_or(name);
    let date = name.strip_prefix(QUEUE_PREFIX)?;
    if date.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}
