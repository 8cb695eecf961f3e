//! Textual timestamps of the form `DD-MM-YYYY hh:mm AM|PM`.
//!
//! Every wall-clock string is read and written at one fixed offset,
//! UTC+05:30. Stored instants are plain `Ms`; the offset only matters at
//! the text boundary and for calendar arithmetic (due dates, months).

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Timelike, Utc};

use crate::engine::EngineError;
use crate::model::{Ms, Span};

/// UTC+05:30 in seconds.
pub const CANONICAL_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

pub fn canonical_offset() -> FixedOffset {
    FixedOffset::east_opt(CANONICAL_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Parse `DD-MM-YYYY hh:mm AM|PM` into an instant.
///
/// Strict on width: every field is zero-padded, the hour is 01..=12, and
/// the date must exist. Anything else is `MalformedTimestamp`.
pub fn parse(text: &str) -> Result<Ms, EngineError> {
    let malformed = || EngineError::MalformedTimestamp(text.to_string());

    let [date, time, meridiem] = fields::<3>(text, ' ').ok_or_else(malformed)?;
    let [day, month, year] = fields::<3>(date, '-').ok_or_else(malformed)?;
    let [hour, minute] = fields::<2>(time, ':').ok_or_else(malformed)?;

    let day = digits(day, 2).ok_or_else(malformed)?;
    let month = digits(month, 2).ok_or_else(malformed)?;
    let year = digits(year, 4).ok_or_else(malformed)?;
    let hour = digits(hour, 2).ok_or_else(malformed)?;
    let minute = digits(minute, 2).ok_or_else(malformed)?;

    if !(1..=12).contains(&hour) {
        return Err(malformed());
    }
    let hour24 = match (meridiem, hour) {
        ("AM", 12) => 0,
        ("AM", h) => h,
        ("PM", 12) => 12,
        ("PM", h) => h + 12,
        _ => return Err(malformed()),
    };

    let date = NaiveDate::from_ymd_opt(year as i32, month, day).ok_or_else(malformed)?;
    let time = NaiveTime::from_hms_opt(hour24, minute, 0).ok_or_else(malformed)?;
    let local = canonical_offset()
        .from_local_datetime(&NaiveDateTime::new(date, time))
        .single()
        .ok_or_else(malformed)?;
    Ok(local.timestamp_millis())
}

/// Format an instant as `DD-MM-YYYY hh:mm AM|PM`, truncated to the minute.
pub fn format(t: Ms) -> Result<String, EngineError> {
    let local = to_local(t)?;
    let (pm, hour) = local.hour12();
    Ok(format!(
        "{:02}-{:02}-{:04} {:02}:{:02} {}",
        local.day(),
        local.month(),
        local.year(),
        hour,
        local.minute(),
        if pm { "PM" } else { "AM" },
    ))
}

/// Parse a start/end pair into a span, rejecting `end <= start`.
pub fn parse_span(start: &str, end: &str) -> Result<Span, EngineError> {
    let span = Span::new(parse(start)?, parse(end)?);
    if !span.is_valid() {
        return Err(EngineError::InvalidInterval {
            start: span.start,
            end: span.end,
        });
    }
    Ok(span)
}

/// Calendar date of an instant at the canonical offset.
pub fn local_date(t: Ms) -> Result<NaiveDate, EngineError> {
    Ok(to_local(t)?.date_naive())
}

/// Whole calendar days from `now` to `due`. Negative once the due date has passed.
pub fn days_until(now: Ms, due: Ms) -> Result<i64, EngineError> {
    Ok((local_date(due)? - local_date(now)?).num_days())
}

/// `[first instant of the month, first instant of the next month)`.
pub fn month_span(year: i32, month: u32) -> Result<Span, EngineError> {
    let invalid = || EngineError::MalformedTimestamp(format!("{year:04}-{month:02}"));
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;
    Ok(Span::new(start_of_day(first)?, start_of_day(next)?))
}

fn start_of_day(date: NaiveDate) -> Result<Ms, EngineError> {
    let midnight = NaiveDateTime::new(date, NaiveTime::MIN);
    canonical_offset()
        .from_local_datetime(&midnight)
        .single()
        .map(|dt| dt.timestamp_millis())
        .ok_or(EngineError::LimitExceeded("timestamp out of range"))
}

fn to_local(t: Ms) -> Result<DateTime<FixedOffset>, EngineError> {
    DateTime::from_timestamp_millis(t)
        .map(|utc| utc.with_timezone(&canonical_offset()))
        .ok_or(EngineError::LimitExceeded("timestamp out of range"))
}

/// Split into exactly `N` fields.
fn fields<const N: usize>(s: &str, sep: char) -> Option<[&str; N]> {
    s.split(sep).collect::<Vec<_>>().try_into().ok()
}

/// Fixed-width unsigned decimal field.
fn digits(s: &str, width: usize) -> Option<u32> {
    if s.len() != width || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
