use chrono::{Datelike, Duration as ChronoDuration, NaiveDate};
use serde::Serialize;

use crate::{
    aggregate::{UNKNOWN_DATE, UsageTable},
    error::UsageError,
};

/// Filter names offered by the dashboard menu, in menu order.
pub const NAMED_FILTERS: [&str; 7] = [
    "all",
    "today",
    "yesterday",
    "this-week",
    "last-week",
    "this-month",
    "last-month",
];

pub const ALL: &str = "all";

/// Inclusive date range. `start > end` is valid and matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    pub fn contains_key(&self, date: &str) -> bool {
        if date == UNKNOWN_DATE {
            return false;
        }
        let start = iso(self.start);
        let end = iso(self.end);
        start.as_str() <= date && date <= end.as_str()
    }
}

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Resolves a range expression against an explicit reference date.
pub fn resolve(spec: &str, reference: NaiveDate) -> Result<DateRange, UsageError> {
    let spec = spec.trim();
    let range = match spec {
        "today" => DateRange::new(reference, reference),
        "yesterday" => {
            let day = reference - ChronoDuration::days(1);
            DateRange::new(day, day)
        }
        "this-week" => DateRange::new(monday_of(reference), reference),
        "last-week" => {
            let start = monday_of(reference) - ChronoDuration::days(7);
            DateRange::new(start, start + ChronoDuration::days(6))
        }
        "this-month" => DateRange::new(first_of_month(reference), reference),
        "last-month" => {
            let end = first_of_month(reference) - ChronoDuration::days(1);
            DateRange::new(first_of_month(end), end)
        }
        literal => parse_literal(literal).ok_or_else(|| UsageError::InvalidRangeSpec {
            spec: spec.to_string(),
        })?,
    };
    Ok(range)
}

/// Like [`resolve`] but accepts `all`, which resolves to no range.
pub fn resolve_filter(spec: &str, reference: NaiveDate) -> Result<Option<DateRange>, UsageError> {
    if spec.trim() == ALL {
        return Ok(None);
    }
    resolve(spec, reference).map(Some)
}

fn parse_literal(spec: &str) -> Option<DateRange> {
    let (start, end) = spec.split_once(':')?;
    let start = NaiveDate::parse_from_str(start.trim(), "%Y-%m-%d").ok()?;
    let end = NaiveDate::parse_from_str(end.trim(), "%Y-%m-%d").ok()?;
    Some(DateRange::new(start, end))
}

fn monday_of(date: NaiveDate) -> NaiveDate {
    date - ChronoDuration::days(date.weekday().num_days_from_monday() as i64)
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - ChronoDuration::days(date.day0() as i64)
}

/// Keeps the dates inside `range`; `unknown` is always dropped.
pub fn filter(table: &UsageTable, range: &DateRange) -> UsageTable {
    table.retain_dates(|date| range.contains_key(date))
}

/// Applies an optional range; without one only the `unknown` key is dropped.
pub fn apply(table: &UsageTable, range: Option<&DateRange>) -> UsageTable {
    match range {
        Some(range) => filter(table, range),
        None => table.retain_dates(|date| date != UNKNOWN_DATE),
    }
}
