//! Cooperative single-worker loops: the integrator's periodic tick and the
//! daily venue refresh sweep. Both honor the process-wide shutdown flag; a
//! chunk that is already running always finishes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use afisz_core::error::AfiszError;
use afisz_domains::events::EventIntegrator;
use afisz_domains::venues::VenueEnricher;
use chrono::{DateTime, Duration as ChronoDuration, Local, Timelike};
use tracing::{error, info, warn};

/// Largest slice we sleep before re-checking the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_secs(30);

/// Install a ctrl-c handler that flips the returned flag.
pub fn shutdown_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown signal received");
            handler_flag.store(true, Ordering::SeqCst);
        }
    });
    flag
}

/// Tick the integrator until its pending queue drains or shutdown is
/// requested. Tick failures are logged and the loop keeps going; the tick
/// interval keeps a failing database from being hammered.
pub async fn drain_integrator(
    integrator: &EventIntegrator,
    tick: Duration,
    shutdown: &AtomicBool,
) -> Result<(), AfiszError> {
    while integrator.has_pending().await {
        if shutdown.load(Ordering::SeqCst) {
            info!("shutdown requested, stopping after current chunk");
            return Ok(());
        }
        sleep_with_shutdown(tick, shutdown).await;
        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = integrator.tick().await {
            error!(error = %err, "integration tick failed");
        }
    }
    Ok(())
}

/// Run the venue refresh sweep every day at the configured hour until
/// shutdown.
pub async fn venue_refresh_loop(
    enricher: Arc<VenueEnricher>,
    hour: u32,
    sweep_limit: i64,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        let wait = seconds_until_hour(Local::now(), hour);
        info!(wait_secs = wait, hour, "next venue refresh sweep scheduled");

        let mut remaining = Duration::from_secs(wait);
        while !remaining.is_zero() {
            if shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested, stopping venue refresh loop");
                return;
            }
            let slice = remaining.min(SHUTDOWN_POLL);
            tokio::time::sleep(slice).await;
            remaining -= slice;
        }
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        match enricher.refresh_stale_venues(sweep_limit).await {
            Ok(count) => info!(count, "venue refresh sweep finished"),
            Err(err) => error!(error = %err, "venue refresh sweep failed"),
        }
    }
}

async fn sleep_with_shutdown(duration: Duration, shutdown: &AtomicBool) {
    let mut remaining = duration;
    while !remaining.is_zero() && !shutdown.load(Ordering::SeqCst) {
        let slice = remaining.min(SHUTDOWN_POLL);
        tokio::time::sleep(slice).await;
        remaining -= slice;
    }
}

/// Seconds until the next occurrence of `hour:00` local time.
fn seconds_until_hour(now: DateTime<Local>, hour: u32) -> u64 {
    let target_today = now
        .with_hour(hour)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    let next = if target_today > now {
        target_today
    } else {
        target_today + ChronoDuration::days(1)
    };
    (next - now).num_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_sweep_is_later_today_when_before_the_hour() {
        let now = Local.with_ymd_and_hms(2025, 6, 1, 1, 30, 0).unwrap();
        assert_eq!(seconds_until_hour(now, 3), 90 * 60);
    }

    #[test]
    fn next_sweep_rolls_to_tomorrow_when_past_the_hour() {
        let now = Local.with_ymd_and_hms(2025, 6, 1, 3, 0, 1).unwrap();
        assert_eq!(seconds_until_hour(now, 3), 24 * 3600 - 1);
    }
}
