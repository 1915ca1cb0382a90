use crate::config::SchedulerConfig;
use crate::db::Repository;
use crate::error::Result;
use crate::pipeline::Pipeline;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use cron::Schedule;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Drives the ingestion cycle and the daily aggregation job.
///
/// Both jobs run inside the same loop, so an ingestion cycle never starts
/// while the previous one or the aggregation job is still running. Ticks
/// missed during a long cycle are skipped rather than replayed.
pub struct Scheduler {
    config: SchedulerConfig,
    aggregate_schedule: Schedule,
    pipeline: Pipeline,
    repository: Arc<Repository>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        pipeline: Pipeline,
        repository: Arc<Repository>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self> {
        let aggregate_schedule = config.aggregate_schedule()?;

        Ok(Self {
            config,
            aggregate_schedule,
            pipeline,
            repository,
            shutdown_rx,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        let initial_delay = Duration::from_secs(self.config.initial_delay_seconds);
        let poll_interval = Duration::from_secs(self.config.interval_minutes * 60);

        info!(
            "Scheduler starting with {}s initial delay, {}m interval, aggregation cron '{}' (UTC)",
            self.config.initial_delay_seconds,
            self.config.interval_minutes,
            self.config.aggregate_cron
        );

        tokio::select! {
            _ = tokio::time::sleep(initial_delay) => {},
            _ = self.shutdown_rx.changed() => {
                info!("Shutdown received during initial delay");
                return Ok(());
            }
        }

        let mut next_aggregation = self.next_aggregation_deadline();
        let aggregation = tokio::time::sleep_until(next_aggregation.unwrap_or_else(Instant::now));
        tokio::pin!(aggregation);

        // First tick completes immediately, which runs the first cycle now
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.pipeline.run_cycle().await;
                }
                _ = &mut aggregation, if next_aggregation.is_some() => {
                    self.run_aggregation(previous_day(Utc::now())).await;
                    next_aggregation = self.next_aggregation_deadline();
                    if let Some(deadline) = next_aggregation {
                        aggregation.as_mut().reset(deadline);
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn run_aggregation(&self, date: NaiveDate) {
        info!("Computing daily aggregates for {}", date);
        match self.repository.compute_daily_aggregates(date).await {
            Ok(rows) => info!("Daily aggregates for {}: {} locations written", date, rows),
            Err(e) => error!("Daily aggregation for {} failed: {}", date, e),
        }
    }

    fn next_aggregation_deadline(&self) -> Option<Instant> {
        let now = Utc::now();
        let Some(next) = next_run_after(&self.aggregate_schedule, now) else {
            warn!(
                "Aggregation cron '{}' has no future occurrence, daily aggregation disabled",
                self.config.aggregate_cron
            );
            return None;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        Some(Instant::now() + wait)
    }
}

/// Next occurrence of `schedule` strictly after `now`.
pub fn next_run_after(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&now).next()
}

/// The UTC day before the one containing `now`.
pub fn previous_day(now: DateTime<Utc>) -> NaiveDate {
    (now - ChronoDuration::days(1)).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schedule(expr: &str) -> Schedule {
        SchedulerConfig {
            aggregate_cron: expr.to_string(),
            ..SchedulerConfig::default()
        }
        .aggregate_schedule()
        .unwrap()
    }

    #[test]
    fn test_next_run_later_today() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        assert_eq!(
            next_run_after(&schedule("30 23 * * *"), now),
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 23, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_default_schedule_rolls_to_next_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        assert_eq!(
            next_run_after(&schedule(&SchedulerConfig::default().aggregate_cron), now),
            Some(Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_next_run_exactly_at_time_is_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(
            next_run_after(&schedule("0 0 * * *"), now),
            Some(Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_previous_day_crosses_month() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 5).unwrap();
        assert_eq!(previous_day(now), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }
}
