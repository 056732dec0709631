//! Recurring-job scheduler.
//!
//! Schedules live in Postgres under stable string identities, so
//! registering the same schedule twice is a no-op and restarts never
//! double-fire. The tick loop evaluates trigger times in each schedule's
//! own timezone and enqueues a job with a date-stamped deterministic id;
//! the queue's id conflict handling absorbs any race between ticks.

use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde_json::json;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use synapse_common::{Config, SynapseError};

use crate::memo::MemoEntry;
use crate::queue::{self, JOB_DAILY_BRIEFING, JOB_NIGHTLY_REFLECTION};

pub const SCHEDULE_DAILY_BRIEFING: &str = "daily_briefing";
pub const SCHEDULE_NIGHTLY_REFLECTION: &str = "nightly_reflection";

const BRIEFING_TRIGGER: &str = "08:00";
const REFLECTION_TRIGGER: &str = "02:30";

const TICK_INTERVAL: StdDuration = StdDuration::from_secs(30);

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Schedule {
    pub id: String,
    pub job_name: String,
    /// Local wall-clock trigger, "HH:MM".
    pub trigger_time: String,
    /// IANA timezone name the trigger is evaluated in.
    pub timezone: String,
    pub last_run_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Register the built-in schedules. Stable ids make this idempotent:
/// re-registering an existing schedule changes nothing, including its
/// `last_run_date`.
pub async fn register_schedules(pool: &PgPool, config: &Config) -> Result<(), SynapseError> {
    for (id, job_name, trigger) in [
        (SCHEDULE_DAILY_BRIEFING, JOB_DAILY_BRIEFING, BRIEFING_TRIGGER),
        (
            SCHEDULE_NIGHTLY_REFLECTION,
            JOB_NIGHTLY_REFLECTION,
            REFLECTION_TRIGGER,
        ),
    ] {
        let result = sqlx::query(
            r#"
            INSERT INTO schedules (id, job_name, trigger_time, timezone)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(job_name)
        .bind(trigger)
        .bind(&config.briefing_timezone)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(schedule = id, trigger, tz = %config.briefing_timezone, "schedule registered");
        }
    }
    Ok(())
}

/// Whether a schedule should fire now: at most once per local day, at or
/// after the trigger time.
pub fn is_due(trigger: NaiveTime, last_run_date: Option<NaiveDate>, local_now: DateTime<Tz>) -> bool {
    let today = local_now.date_naive();
    if last_run_date.is_some_and(|d| d >= today) {
        return false;
    }
    local_now.time() >= trigger
}

/// Deterministic job id for one schedule firing on one local date.
pub fn schedule_job_id(job_name: &str, date: NaiveDate) -> String {
    format!("{job_name}:{date}")
}

pub struct Scheduler {
    pool: PgPool,
}

impl Scheduler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("scheduler started");
            loop {
                if let Err(e) = self.tick().await {
                    error!(error = %e, "scheduler tick failed");
                }
                tokio::time::sleep(TICK_INTERVAL).await;
            }
        })
    }

    async fn tick(&self) -> Result<(), SynapseError> {
        let schedules =
            sqlx::query_as::<_, Schedule>("SELECT * FROM schedules ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        for schedule in schedules {
            let Ok(tz) = schedule.timezone.parse::<Tz>() else {
                warn!(schedule = %schedule.id, tz = %schedule.timezone, "unknown timezone, skipping");
                continue;
            };
            let Ok(trigger) = NaiveTime::parse_from_str(&schedule.trigger_time, "%H:%M") else {
                warn!(schedule = %schedule.id, trigger = %schedule.trigger_time, "bad trigger time, skipping");
                continue;
            };

            let local_now = Utc::now().with_timezone(&tz);
            if !is_due(trigger, schedule.last_run_date, local_now) {
                continue;
            }

            let date = local_now.date_naive();
            let job_id = schedule_job_id(&schedule.job_name, date);
            let payload = json!({
                "date": date,
                "timezone": schedule.timezone,
                "force_refresh": false,
            });
            queue::enqueue(&self.pool, &job_id, &schedule.job_name, &payload).await?;

            sqlx::query(
                "UPDATE schedules SET last_run_date = $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(&schedule.id)
            .bind(date)
            .execute(&self.pool)
            .await?;

            info!(schedule = %schedule.id, %date, "schedule fired");
        }

        // Housekeeping rides along on the tick.
        if let Ok(evicted) = MemoEntry::evict_expired(&self.pool).await {
            if evicted > 0 {
                info!(evicted, "expired memo entries evicted");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn lisbon(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        chrono_tz::Europe::Lisbon
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
    }

    #[test]
    fn fires_once_per_local_day() {
        let trigger = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();

        // Before the trigger: not due
        assert!(!is_due(trigger, None, lisbon(2026, 3, 10, 7, 59)));
        // At and after the trigger: due, but only until it runs
        assert!(is_due(trigger, None, lisbon(2026, 3, 10, 8, 0)));
        assert!(is_due(
            trigger,
            Some(today.pred_opt().unwrap()),
            lisbon(2026, 3, 10, 23, 0)
        ));
        assert!(!is_due(trigger, Some(today), lisbon(2026, 3, 10, 9, 0)));
    }

    #[test]
    fn job_id_is_date_stamped() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        assert_eq!(
            schedule_job_id(JOB_DAILY_BRIEFING, date),
            "daily_briefing:2026-03-10"
        );
    }
}
