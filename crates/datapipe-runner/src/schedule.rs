//! Weekly trigger for `datapipe serve`.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Weekday};

use crate::error::ConfigError;

/// Fires once a week at a fixed weekday and wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySchedule {
    weekday: Weekday,
    time: NaiveTime,
}

impl WeeklySchedule {
    pub fn new(weekday: Weekday, hour: u32, minute: u32) -> Result<Self, ConfigError> {
        let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| {
            ConfigError::Invalid(format!("invalid schedule time {hour:02}:{minute:02}"))
        })?;
        Ok(Self { weekday, time })
    }

    pub fn weekday(&self) -> Weekday {
        self.weekday
    }

    pub fn time(&self) -> NaiveTime {
        self.time
    }

    /// First trigger strictly after `now`, in `now`'s timezone.
    ///
    /// Wall-clock times skipped by a DST jump fall through to the next week.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let tz = now.timezone();
        let today = now.date_naive();
        let ahead = (7 + self.weekday.num_days_from_monday()
            - today.weekday().num_days_from_monday())
            % 7;

        let mut date = today + Duration::days(ahead as i64);
        loop {
            if let Some(candidate) = tz.from_local_datetime(&date.and_time(self.time)).earliest() {
                if candidate > *now {
                    return candidate;
                }
            }
            date += Duration::days(7);
        }
    }
}

impl Default for WeeklySchedule {
    /// Mondays at 09:00.
    fn default() -> Self {
        Self {
            weekday: Weekday::Mon,
            time: NaiveTime::MIN + Duration::hours(9),
        }
    }
}

impl std::fmt::Display for WeeklySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "every {} at {}", self.weekday, self.time.format("%H:%M"))
    }
}

/// Parse a weekday name such as `monday` or `Mon`.
pub fn parse_weekday(value: &str) -> Result<Weekday, ConfigError> {
    value
        .parse::<Weekday>()
        .map_err(|_| ConfigError::Invalid(format!("unknown weekday '{value}'")))
}
