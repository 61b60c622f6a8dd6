//! Closed-open time windows `[start, end)` in UTC.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum WindowError {
    #[error("invalid time interval {start} - {end}")]
    Inverted {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("window length must be at least one day, got {0}")]
    EmptyDelta(i64),
    #[error("{days} days is outside the supported date range")]
    OutOfRange { days: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if end <= start {
            return Err(WindowError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window between two dates, each taken at midnight UTC.
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Result<Self, WindowError> {
        Self::new(midnight(start), midnight(end))
    }

    /// Window of `delta` days starting at `start`.
    pub fn starting(start: NaiveDate, delta: i64) -> Result<Self, WindowError> {
        if delta < 1 {
            return Err(WindowError::EmptyDelta(delta));
        }
        let end = shift(start, delta)?;
        Self::from_dates(start, end)
    }

    /// Window of `delta` days ending `delay` days before `today`.
    pub fn trailing_days(today: NaiveDate, delta: i64, delay: i64) -> Result<Self, WindowError> {
        if delta < 1 {
            return Err(WindowError::EmptyDelta(delta));
        }
        let back = delay
            .checked_neg()
            .ok_or(WindowError::OutOfRange { days: delay })?;
        let end = shift(today, back)?;
        let start = shift(end, -delta)?;
        Self::from_dates(start, end)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    /// Smallest window covering both.
    pub fn span(&self, other: &Window) -> Window {
        Window {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// `date` moved by `days`, failing instead of overflowing the calendar.
fn shift(date: NaiveDate, days: i64) -> Result<NaiveDate, WindowError> {
    Duration::try_days(days)
        .and_then(|delta| date.checked_add_signed(delta))
        .ok_or(WindowError::OutOfRange { days })
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}
