//! Pure next-run calculation for scheduled tasks.
//!
//! A [`Recurrence`] is parsed from a task's `(schedule_type, schedule_config)`
//! pair and asked for the next fire time with an explicit `now`, so the
//! calculator touches no clock and no storage. All times are UTC.
//!
//! Every recurring policy returns an instant strictly after `now`. Only
//! [`Recurrence::Once`] may return a past instant: it always yields its
//! configured timestamp, and the dispatcher deactivates the task when the
//! recomputed next run has not advanced.
//!
//! Cron support is deliberately narrow: `M H * * *` where `M` and `H` are a
//! literal or `*`. Anything that constrains day, month or weekday is rejected
//! as [`SchedulerError::UnsupportedCron`] instead of being mis-evaluated.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::Deserialize;
use serde_json::Value;
use steno_store::ScheduleType;

use crate::error::{SchedulerError, SchedulerResult};

/// A parsed, validated schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Recurrence {
    /// Fire at one fixed instant.
    Once { at: DateTime<Utc> },
    /// Fire every `minutes` minutes, anchored on the previous run.
    Interval { minutes: u32 },
    /// Fire daily at a time of day.
    Daily { time: NaiveTime },
    /// Fire weekly on a weekday (0 = Sunday) at a time of day.
    Weekly { weekday: u32, time: NaiveTime },
    /// Fire monthly on a day of month (1-31, clamped) at a time of day.
    Monthly { day: u32, time: NaiveTime },
    /// Reduced cron: minute and hour only, `None` meaning `*`.
    Cron {
        minute: Option<u32>,
        hour: Option<u32>,
    },
}

#[derive(Deserialize)]
struct OnceConfig {
    at: String,
}

#[derive(Deserialize)]
struct IntervalConfig {
    minutes: u32,
}

#[derive(Deserialize)]
struct DailyConfig {
    time: String,
}

#[derive(Deserialize)]
struct WeeklyConfig {
    time: String,
    day_of_week: u32,
}

#[derive(Deserialize)]
struct MonthlyConfig {
    time: String,
    day_of_month: u32,
}

#[derive(Deserialize)]
struct CronConfig {
    expression: String,
}

impl Recurrence {
    /// Parse and validate a schedule configuration.
    pub fn parse(schedule_type: ScheduleType, config: &Value) -> SchedulerResult<Self> {
        match schedule_type {
            ScheduleType::Once => {
                let cfg: OnceConfig = from_config(config)?;
                let at = DateTime::parse_from_rfc3339(&cfg.at)
                    .map_err(|e| {
                        SchedulerError::InvalidSchedule(format!(
                            "invalid `at` timestamp `{}`: {e}",
                            cfg.at
                        ))
                    })?
                    .with_timezone(&Utc);
                Ok(Self::Once { at })
            }
            ScheduleType::Interval => {
                let cfg: IntervalConfig = from_config(config)?;
                if cfg.minutes < 1 {
                    return Err(SchedulerError::InvalidSchedule(
                        "interval must be at least one minute".to_string(),
                    ));
                }
                Ok(Self::Interval {
                    minutes: cfg.minutes,
                })
            }
            ScheduleType::Daily => {
                let cfg: DailyConfig = from_config(config)?;
                Ok(Self::Daily {
                    time: parse_time_of_day(&cfg.time)?,
                })
            }
            ScheduleType::Weekly => {
                let cfg: WeeklyConfig = from_config(config)?;
                if cfg.day_of_week > 6 {
                    return Err(SchedulerError::InvalidSchedule(format!(
                        "day_of_week must be 0-6 (0 = Sunday), got {}",
                        cfg.day_of_week
                    )));
                }
                Ok(Self::Weekly {
                    weekday: cfg.day_of_week,
                    time: parse_time_of_day(&cfg.time)?,
                })
            }
            ScheduleType::Monthly => {
                let cfg: MonthlyConfig = from_config(config)?;
                if !(1..=31).contains(&cfg.day_of_month) {
                    return Err(SchedulerError::InvalidSchedule(format!(
                        "day_of_month must be 1-31, got {}",
                        cfg.day_of_month
                    )));
                }
                Ok(Self::Monthly {
                    day: cfg.day_of_month,
                    time: parse_time_of_day(&cfg.time)?,
                })
            }
            ScheduleType::Cron => {
                let cfg: CronConfig = from_config(config)?;
                parse_cron(&cfg.expression)
            }
        }
    }

    /// Compute the next fire time.
    ///
    /// # Arguments
    ///
    /// * `last_run` -- When the task last ran, if ever. Only interval
    ///   schedules are anchored on it; wall-clock schedules ignore it.
    /// * `now` -- The caller's current instant.
    pub fn next_run(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Self::Once { at } => at,
            Self::Interval { minutes } => {
                let step = Duration::minutes(i64::from(minutes));
                match last_run {
                    Some(last) => {
                        let next = last + step;
                        if next > now {
                            next
                        } else {
                            // Jump straight past `now` instead of stepping
                            // through every missed run.
                            let skips = (now - last).num_minutes() / i64::from(minutes) + 1;
                            last + Duration::minutes(skips * i64::from(minutes))
                        }
                    }
                    None => now + step,
                }
            }
            Self::Daily { time } => next_daily(now, time),
            Self::Weekly { weekday, time } => {
                let today = now.weekday().num_days_from_sunday();
                let days_ahead = i64::from((weekday + 7 - today) % 7);
                let candidate = utc_at(now.date_naive(), time) + Duration::days(days_ahead);
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::weeks(1)
                }
            }
            Self::Monthly { day, time } => {
                let candidate = monthly_at(now.year(), now.month(), day, time);
                if candidate > now {
                    candidate
                } else {
                    let (year, month) = if now.month() == 12 {
                        (now.year() + 1, 1)
                    } else {
                        (now.year(), now.month() + 1)
                    };
                    monthly_at(year, month, day, time)
                }
            }
            Self::Cron { minute, hour } => {
                let minute = minute.unwrap_or(0);
                match hour {
                    // A literal hour behaves like a daily schedule.
                    Some(hour) => next_daily(now, time_of_day(hour, minute)),
                    // `*` hour: the next time the minute hand reaches `minute`.
                    None => {
                        let candidate = utc_at(now.date_naive(), time_of_day(now.hour(), minute));
                        if candidate > now {
                            candidate
                        } else {
                            candidate + Duration::hours(1)
                        }
                    }
                }
            }
        }
    }
}

/// Parse the reduced cron grammar: `M H` or `M H * * *`.
fn parse_cron(expression: &str) -> SchedulerResult<Recurrence> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let (minute, hour) = match fields.as_slice() {
        [minute, hour] => (*minute, *hour),
        [minute, hour, dom, month, dow] => {
            if [*dom, *month, *dow].iter().any(|field| *field != "*") {
                return Err(SchedulerError::UnsupportedCron(format!(
                    "day, month and weekday fields must be `*`, got `{expression}`"
                )));
            }
            (*minute, *hour)
        }
        _ => {
            return Err(SchedulerError::UnsupportedCron(format!(
                "expected `M H` or `M H * * *`, got `{expression}`"
            )));
        }
    };
    Ok(Recurrence::Cron {
        minute: parse_cron_field(minute, 59, "minute")?,
        hour: parse_cron_field(hour, 23, "hour")?,
    })
}

/// Parse one cron field: `*` or a bare literal. Lists, ranges and steps all
/// fall through to the error arm.
fn parse_cron_field(field: &str, max: u32, name: &str) -> SchedulerResult<Option<u32>> {
    if field == "*" {
        return Ok(None);
    }
    match field.parse::<u32>() {
        Ok(value) if value <= max => Ok(Some(value)),
        _ => Err(SchedulerError::UnsupportedCron(format!(
            "{name} field must be `*` or 0-{max}, got `{field}`"
        ))),
    }
}

fn from_config<T: serde::de::DeserializeOwned>(config: &Value) -> SchedulerResult<T> {
    serde_json::from_value(config.clone())
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))
}

fn parse_time_of_day(s: &str) -> SchedulerResult<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| {
        SchedulerError::InvalidSchedule(format!("invalid time of day `{s}`, expected HH:MM"))
    })
}

/// Build a time of day from components already validated to be in range.
fn time_of_day(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn utc_at(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

fn next_daily(now: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
    let candidate = utc_at(now.date_naive(), time);
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

/// The requested day clamps to the month's last day, so "the 31st" reads as
/// "month end" in shorter months.
fn monthly_at(year: i32, month: u32, day: u32, time: NaiveTime) -> DateTime<Utc> {
    let clamped = day.min(days_in_month(year, month));
    let date = NaiveDate::from_ymd_opt(year, month, clamped).unwrap_or_default();
    utc_at(date, time)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(28, |last| last.day())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
