//! 随访时间计算
//!
//! 在用户所在时区取「今天 preferredHour:preferredMinute」，若已过则滚动到下一个周期（每日 +1 天，每周 +7 天）。
//! 结果严格晚于 now。夏令时跳过的时刻取跳变后的第一个有效分钟；重复的时刻取较早的一次。

use chrono::{DateTime, Days, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_HOUR: u32 = 9;
pub const DEFAULT_TIMEZONE: &str = "UTC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    Weekly,
}

impl Cadence {
    fn step(&self) -> Days {
        match self {
            Cadence::Daily => Days::new(1),
            Cadence::Weekly => Days::new(7),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRequest {
    pub timezone: String,
    pub cadence: Cadence,
    pub preferred_hour: Option<u32>,
    pub preferred_minute: Option<u32>,
}

impl CheckInRequest {
    pub fn new(timezone: impl Into<String>, cadence: Cadence) -> Self {
        Self {
            timezone: timezone.into(),
            cadence,
            preferred_hour: None,
            preferred_minute: None,
        }
    }

    pub fn at(mut self, hour: u32, minute: u32) -> Self {
        self.preferred_hour = Some(hour);
        self.preferred_minute = Some(minute);
        self
    }

    fn hour(&self) -> u32 {
        self.preferred_hour.unwrap_or(DEFAULT_HOUR)
    }

    fn minute(&self) -> u32 {
        self.preferred_minute.unwrap_or(0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Preferred hour out of range (0-23): {0}")]
    InvalidHour(u32),

    #[error("Preferred minute out of range (0-59): {0}")]
    InvalidMinute(u32),

    #[error("No future occurrence for schedule")]
    NoOccurrence,
}

pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::UnknownTimezone(name.to_string()))
}

/// 本地时刻映射为 UTC
fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => (1..=180).find_map(|minutes| {
            match tz.from_local_datetime(&(naive + Duration::minutes(minutes))) {
                LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
                LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
                LocalResult::None => None,
            }
        }),
    }
}

fn candidate_on(tz: &Tz, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    resolve_local(tz, date.and_hms_opt(hour, minute, 0)?)
}

/// 计算下一次随访时间（严格晚于 now）
pub fn compute_next_check_in(req: &CheckInRequest, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
    let tz = parse_timezone(&req.timezone)?;
    let hour = req.hour();
    if hour > 23 {
        return Err(ScheduleError::InvalidHour(hour));
    }
    let minute = req.minute();
    if minute > 59 {
        return Err(ScheduleError::InvalidMinute(minute));
    }

    let mut date = now.with_timezone(&tz).date_naive();
    // 今天 + 至多两个周期即可越过 now（夏令时回拨最多让当天候选落后一次）
    for _ in 0..3 {
        if let Some(candidate) = candidate_on(&tz, date, hour, minute) {
            if candidate > now {
                return Ok(candidate);
            }
        }
        date = date
            .checked_add_days(req.cadence.step())
            .ok_or(ScheduleError::NoOccurrence)?;
    }
    Err(ScheduleError::NoOccurrence)
}

/// 人类可读的计划描述，如 "Every day at 9:00 America/New_York"
pub fn describe_schedule(req: &CheckInRequest, first_run: DateTime<Utc>) -> String {
    let time = format!("{}:{:02} {}", req.hour(), req.minute(), req.timezone);
    match req.cadence {
        Cadence::Daily => format!("Every day at {time}"),
        Cadence::Weekly => {
            let weekday = match parse_timezone(&req.timezone) {
                Ok(tz) => first_run.with_timezone(&tz).format("%A").to_string(),
                Err(_) => first_run.format("%A").to_string(),
            };
            format!("Every {weekday} at {time}")
        }
    }
}
