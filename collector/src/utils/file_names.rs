use chrono::{DateTime, NaiveDate, Utc};
use common::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

// `..._YYYYMMDDHHMM.json`
static MINUTE_SUFFIX_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"_(?P<year>\d{4})(?P<month>\d{2})(?P<day>\d{2})",
        r"(?P<hour>\d{2})(?P<minute>\d{2})\.json$"
    ))
    .expect("Invalid minute suffix regex")
});

// Older dumps: 10-digit unix seconds or 12 digits somewhere near the end.
static LEGACY_STAMP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^0-9])(?P<stamp>\d{12}|\d{10})[^0-9]*\.json$")
        .expect("Invalid legacy timestamp regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    MinuteSuffix,
    Legacy,
    ModifiedTime,
}

fn from_parts(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(hour, minute, 0)
        .map(|naive| naive.and_utc())
}

fn parse_compact(stamp: &str) -> Option<DateTime<Utc>> {
    if stamp.len() != 12 {
        return None;
    }
    from_parts(
        stamp[0..4].parse().ok()?,
        stamp[4..6].parse().ok()?,
        stamp[6..8].parse().ok()?,
        stamp[8..10].parse().ok()?,
        stamp[10..12].parse().ok()?,
    )
}

/// Parses the timestamp embedded in a replay filename.
///
/// The `YYYYMMDDHHMM` suffix is tried first, then the legacy patterns.
/// Files with neither need a filesystem fallback from the caller.
pub fn parse_file_timestamp(file_name: &str) -> Result<(DateTime<Utc>, TimestampSource)> {
    let strict = MINUTE_SUFFIX_REGEX.captures(file_name).and_then(|caps| {
        from_parts(
            caps.name("year")?.as_str().parse().ok()?,
            caps.name("month")?.as_str().parse().ok()?,
            caps.name("day")?.as_str().parse().ok()?,
            caps.name("hour")?.as_str().parse().ok()?,
            caps.name("minute")?.as_str().parse().ok()?,
        )
    });
    if let Some(ts) = strict {
        return Ok((ts, TimestampSource::MinuteSuffix));
    }

    LEGACY_STAMP_REGEX
        .captures(file_name)
        .and_then(|caps| {
            let stamp = caps.name("stamp")?.as_str();
            match stamp.len() {
                10 => DateTime::from_timestamp(stamp.parse().ok()?, 0),
                _ => parse_compact(stamp),
            }
        })
        .map(|ts| (ts, TimestampSource::Legacy))
        .ok_or_else(|| {
            Error::InvalidInput(format!("No timestamp in file name: {}", file_name))
        })
}

/// Minutes since the unix epoch.
pub fn minute_bucket(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(60)
}
