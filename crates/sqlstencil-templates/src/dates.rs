//! Compact `yyyymmdd` date arithmetic

use chrono::{Days, Months, NaiveDate};
use regex::Regex;
use std::sync::LazyLock;

/// Format of 8-digit dates used throughout templates
pub const COMPACT_DATE_FORMAT: &str = "%Y%m%d";

// <yyyymmdd><+|-><N><d|w|m>, whitespace tolerated around the operator
static RELATIVE_OFFSET_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{8})\s*([+-])\s*(\d+)\s*([dwmDWM])$").expect("valid regex")
});

/// Parse an 8-digit `yyyymmdd` date. Anything else yields `None`.
pub fn parse_compact_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(value, COMPACT_DATE_FORMAT).ok()
}

pub fn format_compact_date(date: NaiveDate) -> String {
    date.format(COMPACT_DATE_FORMAT).to_string()
}

/// Shift an 8-digit date string by `days` (negative moves backwards)
pub fn add_days(value: &str, days: i64) -> Option<String> {
    let date = parse_compact_date(value)?;
    shift_days(date, days).map(format_compact_date)
}

fn shift_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    if days >= 0 {
        date.checked_add_days(Days::new(days.unsigned_abs()))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    }
}

fn shift_months(date: NaiveDate, months: i64) -> Option<NaiveDate> {
    let count = u32::try_from(months.unsigned_abs()).ok()?;
    if months >= 0 {
        date.checked_add_months(Months::new(count))
    } else {
        date.checked_sub_months(Months::new(count))
    }
}

/// Apply a relative offset expression such as `20240131+1m` or `20240110 - 2w`.
///
/// Returns `None` when the input is not an offset expression.
pub fn apply_relative_offset(value: &str) -> Option<String> {
    let caps = RELATIVE_OFFSET_REGEX.captures(value.trim())?;
    let date = parse_compact_date(&caps[1])?;
    let amount: i64 = caps[3].parse().ok()?;
    let amount = if &caps[2] == "-" { -amount } else { amount };

    let shifted = match caps[4].to_ascii_lowercase().as_str() {
        "d" => shift_days(date, amount),
        "w" => shift_days(date, amount.checked_mul(7)?),
        "m" => shift_months(date, amount),
        _ => None,
    }?;
    Some(format_compact_date(shifted))
}
