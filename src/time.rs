//! Night index, Julian date, and archive date-field helpers.
//!
//! The archive counts observing nights from 2017-01-01 UTC. A night index is
//! `floor(JD - JD(2017-01-01T00:00Z))`, which is computed here on whole UTC
//! days so the value never wobbles around midnight from float rounding.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Julian date of the Unix epoch (1970-01-01T00:00Z).
pub const UNIX_EPOCH_JD: f64 = 2_440_587.5;

/// Julian date of the night-index epoch (2017-01-01T00:00Z).
pub const NIGHT_EPOCH_JD: f64 = 2_457_754.5;

/// Whole days between 1970-01-01 and 2017-01-01.
const NIGHT_EPOCH_UNIX_DAYS: i64 = 17_167;

const SECONDS_PER_DAY: i64 = 86_400;

/// Source of "now" for anything that chunks ranges up to the present.
pub trait Clock: Send + Sync {
    /// Current UTC instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant, for reproducible range planning.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Whole nights elapsed since 2017-01-01 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NightCursor(i64);

impl NightCursor {
    /// Wraps a raw night index.
    #[must_use]
    pub const fn new(night: i64) -> Self {
        Self(night)
    }

    /// Night index for the current UTC date.
    #[must_use]
    pub fn today() -> Self {
        Self::at(Utc::now())
    }

    /// Night index containing `instant`.
    #[must_use]
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self(instant.timestamp().div_euclid(SECONDS_PER_DAY) - NIGHT_EPOCH_UNIX_DAYS)
    }

    /// Night index of a calendar date.
    #[must_use]
    pub fn from_date(date: NaiveDate) -> Self {
        Self::at(date.and_time(chrono::NaiveTime::MIN).and_utc())
    }

    /// Raw index value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Calendar date the night starts on, if representable.
    #[must_use]
    pub fn to_date(self) -> Option<NaiveDate> {
        let seconds = self
            .0
            .checked_add(NIGHT_EPOCH_UNIX_DAYS)?
            .checked_mul(SECONDS_PER_DAY)?;
        DateTime::from_timestamp(seconds, 0).map(|t| t.date_naive())
    }

    /// Julian date at 00:00 UTC of this night.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn start_jd(self) -> f64 {
        NIGHT_EPOCH_JD + self.0 as f64
    }
}

impl std::fmt::Display for NightCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Julian date of a UTC instant.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn datetime_to_jd(instant: DateTime<Utc>) -> f64 {
    let seconds =
        instant.timestamp() as f64 + f64::from(instant.timestamp_subsec_nanos()) / 1e9;
    UNIX_EPOCH_JD + seconds / SECONDS_PER_DAY as f64
}

/// UTC instant of a Julian date, or `None` for non-finite / out-of-range input.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn jd_to_datetime(jd: f64) -> Option<DateTime<Utc>> {
    let seconds = (jd - UNIX_EPOCH_JD) * SECONDS_PER_DAY as f64;
    if !seconds.is_finite() || seconds.abs() > 1e15 {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Parses an archive observation date such as `2017-10-14 03:25:33+00`.
///
/// The trailing UTC offset is dropped; the archive always reports UTC.
#[must_use]
pub fn parse_obsdate(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    let without_offset = trimmed.split('+').next().unwrap_or(trimmed).trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(without_offset, format).ok())
        .map(|naive| naive.and_utc())
}

/// Formats an instant the way the archive's `startobsdate` predicates expect.
#[must_use]
pub fn format_obsdate(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Calendar components extracted from an archive date field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateParts {
    /// Four-digit year.
    pub year: String,
    /// Two-digit month.
    pub month: String,
    /// Two-digit day.
    pub day: String,
    /// Six-digit sub-day fraction, present only for `filefracday` values.
    pub fraction: Option<String>,
}

impl DateParts {
    /// `YYYYMMDD`.
    #[must_use]
    pub fn ymd(&self) -> String {
        format!("{}{}{}", self.year, self.month, self.day)
    }

    /// `MMDD`, the day directory of data URLs.
    #[must_use]
    pub fn month_day(&self) -> String {
        format!("{}{}", self.month, self.day)
    }
}

/// Splits a `filefracday` value (`YYYYMMDDffffff`).
#[must_use]
pub fn parse_filefracday(value: &str) -> Option<DateParts> {
    let value = value.trim();
    if value.len() != 14 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut parts = parse_date_prefix(value)?;
    parts.fraction = Some(value[8..14].to_string());
    Some(parts)
}

/// Splits a `filestartdate` / `nightdate` value (`YYYYMMDD`, extra digits ignored).
#[must_use]
pub fn parse_filestartdate(value: &str) -> Option<DateParts> {
    let value = value.trim();
    if value.len() < 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    parse_date_prefix(value)
}

fn parse_date_prefix(value: &str) -> Option<DateParts> {
    let month: u32 = value[4..6].parse().ok()?;
    let day: u32 = value[6..8].parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(DateParts {
        year: value[0..4].to_string(),
        month: value[4..6].to_string(),
        day: value[6..8].to_string(),
        fraction: None,
    })
}
