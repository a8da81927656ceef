//! Date windows scoping the aggregates.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

/// Half-open interval `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        self.begin <= date && date < self.end
    }
}

/// The recent window: 32 days ending tomorrow, so all of today is included.
pub fn recent_window(now: DateTime<Utc>) -> DateWindow {
    let end = now + Duration::days(1);
    DateWindow {
        begin: end - Duration::days(32),
        end,
    }
}

/// `[first of month, first of next month)`, or `None` for an invalid month.
pub fn month_window(year: i32, month: u32) -> Option<DateWindow> {
    let begin = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let end = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()?;
    Some(DateWindow { begin, end })
}

/// The `count` calendar months preceding the month of `now`, most recent first.
pub fn previous_months(now: DateTime<Utc>, count: u32) -> Vec<(i32, u32)> {
    let mut year = now.year();
    let mut month = now.month();
    let mut months = Vec::new();
    for _ in 0..count {
        if month == 1 {
            year -= 1;
            month = 12;
        } else {
            month -= 1;
        }
        months.push((year, month));
    }
    months
}
