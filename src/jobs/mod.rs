//! Background jobs.
//!
//! - Walk reminders run every hour, starting right away.
//! - Retention nudges run once a day at 17:00 UTC.
//!
//! Both loops are aborted when the [`Scheduler`] shuts down.

pub mod reminders;
pub mod retention;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use tokio::task::JoinHandle;

pub use reminders::ReminderMarker;
pub use retention::{RetentionNotification, RetentionRun};

use crate::notify::Notifier;
use crate::store::Database;
use crate::weather::WeatherProvider;

const REMINDER_INTERVAL: Duration = Duration::from_secs(60 * 60);
const RETENTION_HOUR_UTC: u32 = 17;

/// Everything a job needs to run.
#[derive(Clone)]
pub struct JobContext {
    pub db: Arc<Database>,
    pub notifier: Notifier,
    pub weather: Arc<dyn WeatherProvider>,
    /// Pause between two retention pushes.
    pub retention_delay: Duration,
}

impl JobContext {
    pub async fn run_reminders(&self) {
        if let Err(e) = reminders::send_due_reminders(&self.db, &self.notifier, Utc::now()).await {
            tracing::error!("Reminder job failed: {}", e);
        }
    }

    pub async fn run_retention(&self) -> Option<RetentionRun> {
        match retention::run(
            &self.db,
            &self.notifier,
            self.weather.as_ref(),
            Utc::now(),
            self.retention_delay,
        )
        .await
        {
            Ok(run) => Some(run),
            Err(e) => {
                tracing::error!("Retention job failed: {}", e);
                None
            }
        }
    }
}

/// Time left until the next `hour:00` UTC strictly after `now`.
pub fn until_next_daily(now: DateTime<Utc>, hour: u32) -> Duration {
    let at = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let mut next = now.date_naive().and_time(at).and_utc();
    if next <= now {
        next += chrono::Duration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Handles of the running job loops.
pub struct Scheduler {
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(ctx: JobContext) -> Self {
        let reminder_ctx = ctx.clone();
        let reminders = tokio::spawn(async move {
            loop {
                reminder_ctx.run_reminders().await;
                tokio::time::sleep(REMINDER_INTERVAL).await;
            }
        });

        let retention = tokio::spawn(async move {
            loop {
                tokio::time::sleep(until_next_daily(Utc::now(), RETENTION_HOUR_UTC)).await;
                ctx.run_retention().await;
            }
        });

        tracing::info!("Scheduler started: reminders hourly, retention daily at 17:00 UTC");
        Self {
            handles: vec![reminders, retention],
        }
    }

    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
        tracing::info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_until_next_daily() {
        let morning = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(
            until_next_daily(morning, 17),
            Duration::from_secs(7 * 3600 + 30 * 60)
        );

        let on_the_hour = Utc.with_ymd_and_hms(2026, 3, 1, 17, 0, 0).unwrap();
        assert_eq!(until_next_daily(on_the_hour, 17), Duration::from_secs(24 * 3600));

        let evening = Utc.with_ymd_and_hms(2026, 3, 1, 18, 0, 0).unwrap();
        assert_eq!(until_next_daily(evening, 17), Duration::from_secs(23 * 3600));
    }
}
