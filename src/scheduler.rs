//! Scheduler Hook (C10): a daily-at-configured-hour trigger that purges
//! log records older than the retention window.
//!
//! Sleeps until the next wall-clock occurrence of `cleanup_hour`, not a
//! fixed 24h interval — the job must fire once per calendar day at a
//! specific hour, even across restarts at arbitrary times.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveTime, TimeZone};

use crate::sink::LogSink;

/// Spawn the background retention job. Call once at startup.
pub fn spawn(sink: Arc<dyn LogSink>, cleanup_hour: u32, retention_days: u32) {
    tokio::spawn(async move {
        loop {
            let sleep_for = time_until_next_occurrence(cleanup_hour);
            tokio::time::sleep(sleep_for).await;

            match sink.delete_older_than(retention_days).await {
                Ok(deleted) => tracing::info!(deleted, "purged expired log records"),
                Err(e) => tracing::error!(error = %e, "log retention purge failed; will retry on the next tick"),
            }
        }
    });
}

fn time_until_next_occurrence(hour: u32) -> Duration {
    let now = Local::now();
    let target_time = NaiveTime::from_hms_opt(hour, 0, 0).expect("hour is validated to be 0..=23 at config load");
    let mut target = Local.from_local_datetime(&now.date_naive().and_time(target_time)).single().unwrap_or(now);
    if target <= now {
        target += chrono::Duration::days(1);
    }
    (target - now).to_std().unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_occurrence_is_always_in_the_future() {
        for hour in 0..24 {
            let wait = time_until_next_occurrence(hour);
            assert!(wait <= Duration::from_secs(24 * 3600));
        }
    }
}
