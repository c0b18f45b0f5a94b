//! Daily scheduler (`ksync schedule`, or alongside the server with
//! `ksync serve --schedule`).
//!
//! Sleeps until the next `[schedule] hour:minute` in local time, runs
//! `sync all`, and repeats until Ctrl-C. A failed run is logged and the
//! scheduler keeps going; the retry pass of the next run picks up whatever
//! was left pending.
//!
//! Scheduled runs go through [`AppState::run_exclusive`], the same run lock
//! `POST /sync` takes. A tick that finds a run in progress is skipped.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Days, Local, NaiveTime, TimeZone};
use tracing::{info, warn};

use crate::config::Config;
use crate::server::{AppState, ConfigRunner, LastRun};
use crate::sync_cmd::SyncTarget;

/// First instant strictly after `now` whose wall-clock time is `hour:minute`.
///
/// Days where that wall-clock time does not exist (DST gap) are skipped.
pub fn next_run<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32, minute: u32) -> Option<DateTime<Tz>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let tz = now.timezone();
    (0..=2u64).find_map(|offset| {
        let date = now.date_naive().checked_add_days(Days::new(offset))?;
        let candidate = tz.from_local_datetime(&date.and_time(time)).earliest()?;
        (candidate > *now).then_some(candidate)
    })
}

/// `ksync schedule`: the scheduler on its own, until Ctrl-C.
pub async fn run_scheduler(config: &Config) -> Result<()> {
    let (hour, minute) = (config.schedule.hour, config.schedule.minute);
    let state = AppState::new(Arc::new(ConfigRunner::new(Arc::new(config.clone()))));
    println!(
        "Scheduler started: sync all daily at {:02}:{:02} local time (Ctrl-C to stop)",
        hour, minute
    );

    tokio::select! {
        result = schedule_loop(state, hour, minute) => result,
        _ = tokio::signal::ctrl_c() => {
            println!("Scheduler stopped.");
            Ok(())
        }
    }
}

/// Sleep until each `hour:minute` and run a scheduled sync against `state`.
pub async fn schedule_loop(state: AppState, hour: u32, minute: u32) -> Result<()> {
    loop {
        let now = Local::now();
        let next = next_run(&now, hour, minute)
            .with_context(|| format!("no valid local time for {:02}:{:02}", hour, minute))?;
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next = %next.to_rfc3339(), "next scheduled sync");

        tokio::time::sleep(wait).await;
        run_scheduled(&state).await;
    }
}

/// One scheduled `sync all`. Returns `None` when another run holds the lock.
pub async fn run_scheduled(state: &AppState) -> Option<LastRun> {
    let Some(record) = state.run_exclusive(SyncTarget::All, "schedule").await else {
        warn!("scheduled sync skipped: another run is in progress");
        return None;
    };

    if let Some(summary) = &record.summary {
        for outcome in &summary.sources {
            match (&outcome.report, &outcome.error) {
                (Some(report), _) => info!(
                    source = outcome.source.as_str(),
                    created = report.created,
                    updated = report.updated,
                    failed = report.failed,
                    pending_retry = report.pending_retry,
                    "scheduled sync finished"
                ),
                (None, Some(e)) => warn!(
                    source = outcome.source.as_str(),
                    error = e.as_str(),
                    "scheduled sync failed"
                ),
                (None, None) => {}
            }
        }
    }
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn next_run_later_today() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 3, 59, 0).unwrap();
        assert_eq!(
            next_run(&now, 4, 0),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 4, 0, 0).unwrap())
        );
    }

    #[test]
    fn next_run_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 4, 0, 0).unwrap();
        assert_eq!(
            next_run(&now, 4, 0),
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 4, 0, 0).unwrap())
        );
    }

    #[test]
    fn invalid_time_has_no_next_run() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(next_run(&now, 24, 0), None);
    }
}
