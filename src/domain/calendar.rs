// Calendar period resolution over epoch seconds
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

pub const MINUTE_SECS: i64 = 60;
pub const HOUR_SECS: i64 = 3_600;
pub const AMPM_SECS: i64 = 12 * HOUR_SECS;
pub const DAY_SECS: i64 = 24 * HOUR_SECS;
pub const WEEK_SECS: i64 = 7 * DAY_SECS;
pub const MONTH_SECS: i64 = 30 * DAY_SECS;
pub const QUARTER_SECS: i64 = 3 * MONTH_SECS;
pub const YEAR_SECS: i64 = 365 * DAY_SECS;

/// 1970-01-05 was the first Monday after the epoch.
const WEEK_ANCHOR_SECS: i64 = 4 * DAY_SECS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    None,
    Minute,
    Hour,
    #[serde(rename = "ampm")]
    AmPm,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Period {
    /// Nominal length; calendar-aware boundaries come from the resolver.
    pub fn seconds(self) -> i64 {
        match self {
            Period::None => 0,
            Period::Minute => MINUTE_SECS,
            Period::Hour => HOUR_SECS,
            Period::AmPm => AMPM_SECS,
            Period::Day => DAY_SECS,
            Period::Week => WEEK_SECS,
            Period::Month => MONTH_SECS,
            Period::Quarter => QUARTER_SECS,
            Period::Year => YEAR_SECS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Period::None => "none",
            Period::Minute => "minute",
            Period::Hour => "hour",
            Period::AmPm => "ampm",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Quarter => "quarter",
            Period::Year => "year",
        }
    }

    pub fn from_name(name: &str) -> Option<Period> {
        let period = match name.trim().to_ascii_lowercase().as_str() {
            "none" => Period::None,
            "minute" => Period::Minute,
            "hour" => Period::Hour,
            "ampm" => Period::AmPm,
            "day" => Period::Day,
            "week" => Period::Week,
            "month" => Period::Month,
            "quarter" => Period::Quarter,
            "year" => Period::Year,
            _ => return None,
        };
        Some(period)
    }

    fn is_calendar_month_based(self) -> bool {
        matches!(self, Period::Month | Period::Quarter | Period::Year)
    }
}

/// Broken-down local time. `month` is 1-based, `day_of_week` is 0 for Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarFields {
    pub year: i32,
    pub month: u32,
    pub day_of_month: u32,
    pub day_of_week: u32,
    pub hour: u32,
    pub minute: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MonthBoundary {
    year: i32,
    month: u32,
    start: i64,
}

/// Answers period-boundary questions in a fixed UTC offset.
///
/// Month starts for the configured year span are precomputed into a sorted
/// table so month, quarter and year lookups are a binary search. Timestamps
/// outside the span fall back to computing the boundary directly.
#[derive(Debug, Clone)]
pub struct CalendarPeriodResolver {
    offset: FixedOffset,
    boundaries: Vec<MonthBoundary>,
}

impl Default for CalendarPeriodResolver {
    fn default() -> Self {
        Self::new(Utc.fix(), 1970, 2100)
    }
}

impl CalendarPeriodResolver {
    pub fn new(offset: FixedOffset, first_year: i32, last_year: i32) -> Self {
        let mut resolver = Self {
            offset,
            boundaries: Vec::new(),
        };
        let (first_year, last_year) = if first_year <= last_year {
            (first_year, last_year)
        } else {
            (last_year, first_year)
        };

        // One extra January so the last year still has a next boundary.
        let mut boundaries = Vec::with_capacity(((last_year - first_year + 1) * 12 + 1) as usize);
        for year in first_year..=last_year {
            for month in 1..=12 {
                boundaries.push(resolver.compute_boundary(year, month));
            }
        }
        boundaries.push(resolver.compute_boundary(last_year + 1, 1));
        resolver.boundaries = boundaries;

        tracing::debug!(
            "Built month boundary table for {}..={} ({} entries)",
            first_year,
            last_year,
            resolver.boundaries.len()
        );
        resolver
    }

    pub fn with_offset_minutes(offset_minutes: i32, first_year: i32, last_year: i32) -> Self {
        let offset = FixedOffset::east_opt(offset_minutes * 60).unwrap_or_else(|| {
            tracing::warn!("Invalid UTC offset of {} minutes, using UTC", offset_minutes);
            Utc.fix()
        });
        Self::new(offset, first_year, last_year)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn fields(&self, secs: i64) -> CalendarFields {
        let local = DateTime::from_timestamp(secs, 0)
            .unwrap_or_default()
            .with_timezone(&self.offset);
        CalendarFields {
            year: local.year(),
            month: local.month(),
            day_of_month: local.day(),
            day_of_week: local.weekday().num_days_from_monday(),
            hour: local.hour(),
            minute: local.minute(),
        }
    }

    pub fn period_start(&self, secs: i64, period: Period) -> i64 {
        match period {
            Period::None => secs,
            Period::Month | Period::Quarter | Period::Year => {
                let (index, boundary) = self.containing_boundary(secs);
                let back = months_into_period(boundary.month, period);
                self.step(index, boundary, -back).start
            }
            _ => self.truncate(secs, period),
        }
    }

    pub fn period_end(&self, secs: i64, period: Period) -> i64 {
        match period {
            Period::None => secs,
            Period::Month | Period::Quarter | Period::Year => {
                let (index, boundary) = self.containing_boundary(secs);
                let back = months_into_period(boundary.month, period);
                let span = match period {
                    Period::Month => 1,
                    Period::Quarter => 3,
                    _ => 12,
                };
                self.step(index, boundary, span - back).start - 1
            }
            _ => self.truncate(secs, period) + period.seconds() - 1,
        }
    }

    pub fn next_period_start(&self, secs: i64, period: Period) -> i64 {
        match period {
            Period::None => secs,
            _ => self.period_end(secs, period) + 1,
        }
    }

    pub fn seconds_to_next_period(&self, secs: i64, period: Period) -> i64 {
        self.period_end(secs, period) - secs + 1
    }

    pub fn same_period(&self, a: i64, b: i64, period: Period) -> bool {
        match period {
            Period::None => a == b,
            _ => self.period_start(a, period) == self.period_start(b, period),
        }
    }

    /// Coarsest granularity that still shows several periods over the range.
    pub fn pick_display_period(start: i64, end: i64) -> Period {
        let span = end.saturating_sub(start);
        if span > 3 * YEAR_SECS {
            Period::Year
        } else if span > 6 * QUARTER_SECS {
            Period::Quarter
        } else if span > 6 * MONTH_SECS {
            Period::Month
        } else if span > 4 * WEEK_SECS {
            Period::Week
        } else if span > 5 * DAY_SECS {
            Period::Day
        } else if span > 5 * HOUR_SECS {
            Period::Hour
        } else {
            Period::Minute
        }
    }

    fn truncate(&self, secs: i64, period: Period) -> i64 {
        debug_assert!(!period.is_calendar_month_based());
        let len = period.seconds();
        let anchor = if period == Period::Week { WEEK_ANCHOR_SECS } else { 0 };
        let local = secs + self.offset.local_minus_utc() as i64;
        let start_local = anchor + (local - anchor).div_euclid(len) * len;
        start_local - self.offset.local_minus_utc() as i64
    }

    /// Month boundary at or before `secs`, with its table index when inside the table.
    fn containing_boundary(&self, secs: i64) -> (Option<usize>, MonthBoundary) {
        let idx = self.boundaries.partition_point(|b| b.start <= secs);
        if idx > 0 && idx < self.boundaries.len() {
            return (Some(idx - 1), self.boundaries[idx - 1]);
        }

        let fields = self.fields(secs);
        let mut boundary = self.compute_boundary(fields.year, fields.month);
        // Offset shifts can land just before the computed local month start.
        if boundary.start > secs {
            let (year, month) = shift_month(fields.year, fields.month, -1);
            boundary = self.compute_boundary(year, month);
        }
        (None, boundary)
    }

    fn step(&self, index: Option<usize>, boundary: MonthBoundary, months: i32) -> MonthBoundary {
        if let Some(index) = index {
            let target = index as i64 + months as i64;
            if target >= 0 && (target as usize) < self.boundaries.len() {
                return self.boundaries[target as usize];
            }
        }
        let (year, month) = shift_month(boundary.year, boundary.month, months);
        self.compute_boundary(year, month)
    }

    fn compute_boundary(&self, year: i32, month: u32) -> MonthBoundary {
        let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN);
        let local_midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        MonthBoundary {
            year,
            month,
            start: local_midnight.and_utc().timestamp() - self.offset.local_minus_utc() as i64,
        }
    }
}

/// Months between the start of `period` and the month `month` (1-based).
fn months_into_period(month: u32, period: Period) -> i32 {
    let zero_based = month as i32 - 1;
    match period {
        Period::Quarter => zero_based % 3,
        Period::Year => zero_based,
        _ => 0,
    }
}

fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let total = year as i64 * 12 + (month as i64 - 1) + delta as i64;
    (total.div_euclid(12) as i32, (total.rem_euclid(12) + 1) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> i64 {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
            .and_utc()
            .timestamp()
    }

    #[test]
    fn test_fields() {
        let resolver = CalendarPeriodResolver::default();
        // 2024-02-29 was a Thursday.
        let fields = resolver.fields(ts(2024, 2, 29, 13, 45, 10));
        assert_eq!(
            fields,
            CalendarFields {
                year: 2024,
                month: 2,
                day_of_month: 29,
                day_of_week: 3,
                hour: 13,
                minute: 45,
            }
        );
    }

    #[test]
    fn test_sub_month_periods_truncate() {
        let resolver = CalendarPeriodResolver::default();
        let t = ts(2024, 5, 15, 14, 37, 12);

        assert_eq!(resolver.period_start(t, Period::Hour), ts(2024, 5, 15, 14, 0, 0));
        assert_eq!(resolver.period_end(t, Period::Hour), ts(2024, 5, 15, 14, 59, 59));
        assert_eq!(resolver.period_start(t, Period::AmPm), ts(2024, 5, 15, 12, 0, 0));
        assert_eq!(resolver.period_start(t, Period::Day), ts(2024, 5, 15, 0, 0, 0));
        // 2024-05-13 is the Monday of that week.
        assert_eq!(resolver.period_start(t, Period::Week), ts(2024, 5, 13, 0, 0, 0));
        assert_eq!(resolver.period_end(t, Period::Week), ts(2024, 5, 19, 23, 59, 59));
    }

    #[test]
    fn test_month_quarter_year_boundaries() {
        let resolver = CalendarPeriodResolver::default();
        let t = ts(2024, 5, 15, 14, 37, 12);

        assert_eq!(resolver.period_start(t, Period::Month), ts(2024, 5, 1, 0, 0, 0));
        assert_eq!(resolver.period_end(t, Period::Month), ts(2024, 5, 31, 23, 59, 59));
        assert_eq!(resolver.period_start(t, Period::Quarter), ts(2024, 4, 1, 0, 0, 0));
        assert_eq!(resolver.period_end(t, Period::Quarter), ts(2024, 6, 30, 23, 59, 59));
        assert_eq!(resolver.period_start(t, Period::Year), ts(2024, 1, 1, 0, 0, 0));
        assert_eq!(resolver.period_end(t, Period::Year), ts(2024, 12, 31, 23, 59, 59));

        // Exactly on a boundary belongs to the new period.
        let march = ts(2023, 3, 1, 0, 0, 0);
        assert_eq!(resolver.period_start(march, Period::Month), march);
        assert_eq!(resolver.period_end(march - 1, Period::Month), march - 1);
        assert_eq!(resolver.period_end(ts(2023, 2, 10, 0, 0, 0), Period::Month), march - 1);
    }

    #[test]
    fn test_outside_table_falls_back() {
        let resolver = CalendarPeriodResolver::new(Utc.fix(), 2020, 2021);
        let t = ts(1999, 11, 20, 5, 0, 0);
        assert_eq!(resolver.period_start(t, Period::Quarter), ts(1999, 10, 1, 0, 0, 0));
        assert_eq!(resolver.period_end(t, Period::Quarter), ts(1999, 12, 31, 23, 59, 59));

        let late = ts(2021, 12, 31, 23, 0, 0);
        assert_eq!(resolver.period_end(late, Period::Year), ts(2021, 12, 31, 23, 59, 59));
    }

    #[test]
    fn test_offset_shifts_day_boundaries() {
        let resolver = CalendarPeriodResolver::with_offset_minutes(-300, 2000, 2030);
        // 03:00 UTC is 22:00 the previous day at UTC-5.
        let t = ts(2024, 3, 1, 3, 0, 0);
        assert_eq!(resolver.period_start(t, Period::Day), ts(2024, 2, 29, 5, 0, 0));
        assert_eq!(resolver.period_start(t, Period::Month), ts(2024, 2, 1, 5, 0, 0));
    }

    #[test]
    fn test_seconds_to_next_period() {
        let resolver = CalendarPeriodResolver::default();
        let t = ts(2024, 5, 15, 23, 59, 0);
        assert_eq!(resolver.seconds_to_next_period(t, Period::Day), 60);
        assert_eq!(resolver.next_period_start(t, Period::Day), ts(2024, 5, 16, 0, 0, 0));
        assert!(resolver.same_period(t, ts(2024, 5, 15, 0, 0, 0), Period::Day));
        assert!(!resolver.same_period(t, ts(2024, 5, 16, 0, 0, 0), Period::Day));
    }

    #[test]
    fn test_pick_display_period() {
        assert_eq!(CalendarPeriodResolver::pick_display_period(0, 4 * YEAR_SECS), Period::Year);
        assert_eq!(CalendarPeriodResolver::pick_display_period(0, 2 * YEAR_SECS), Period::Quarter);
        assert_eq!(CalendarPeriodResolver::pick_display_period(0, YEAR_SECS), Period::Month);
        assert_eq!(CalendarPeriodResolver::pick_display_period(0, 60 * DAY_SECS), Period::Week);
        assert_eq!(CalendarPeriodResolver::pick_display_period(0, 10 * DAY_SECS), Period::Day);
        assert_eq!(CalendarPeriodResolver::pick_display_period(0, DAY_SECS), Period::Hour);
        assert_eq!(CalendarPeriodResolver::pick_display_period(0, HOUR_SECS), Period::Minute);
        assert_eq!(CalendarPeriodResolver::pick_display_period(10, 0), Period::Minute);
    }

    #[test]
    fn test_period_names() {
        assert_eq!(Period::from_name("AmPm"), Some(Period::AmPm));
        assert_eq!(Period::from_name("fortnight"), None);
        assert_eq!(Period::Quarter.name(), "quarter");
    }
}
