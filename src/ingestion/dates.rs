//! Date normalization for the loosely formatted date columns of lead exports
//!
//! Every function here is total: anything that cannot be read as a real
//! calendar date becomes `None`, never an error.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};

/// Parse a date in any of the formats seen in exports.
///
/// Attempts, in order:
/// 1. Text containing `T` or `Z` is read as ISO-8601.
/// 2. Text containing `/` is split into three numbers `a/b/c`. When `a <= 12`
///    and `b > 12` it is `MM/DD/YYYY`, otherwise `DD/MM/YYYY`. A four digit
///    first part means `YYYY/MM/DD`. A trailing `HH:MM[:SS]` is allowed.
/// 3. `YYYY-MM-DD` or `DD-MM-YYYY`.
/// 4. A handful of generic formats (RFC 2822, `YYYY-MM-DD HH:MM[:SS]`, ...).
///
/// Ambiguous slash dates such as `03/04/2024` always resolve day-first.
/// Values without an offset are taken as UTC.
pub fn normalize_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") || s == "undefined" {
        return None;
    }

    if s.contains('T') || s.contains('Z') {
        if let Some(parsed) = parse_iso(s) {
            return Some(parsed);
        }
        // RFC 2822 weekdays ("Tue, ...") land here too
        return parse_generic(s);
    }

    if s.contains('/') {
        return parse_slashed(s);
    }

    if let Some(matched) = parse_hyphenated(s) {
        return matched;
    }

    parse_generic(s)
}

/// RFC 3339 text with millisecond precision and a `Z` suffix
pub fn canonical(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = s.strip_suffix('Z').unwrap_or(s);
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|dt| dt.and_utc())
}

fn parse_slashed(s: &str) -> Option<DateTime<Utc>> {
    let (date_part, time_part) = match s.split_once(char::is_whitespace) {
        Some((date, time)) => (date, Some(time.trim())),
        None => (s, None),
    };

    let parts: Vec<&str> = date_part.split('/').collect();
    let [a, b, c] = parts.as_slice() else {
        return None;
    };

    let date = if a.len() == 4 {
        ymd(a, b, c)?
    } else {
        if c.len() != 4 {
            return None;
        }
        let (first, second) = (number(a)?, number(b)?);
        if first <= 12 && second > 12 {
            // MM/DD/YYYY
            NaiveDate::from_ymd_opt(year(c)?, first, second)?
        } else {
            // DD/MM/YYYY
            NaiveDate::from_ymd_opt(year(c)?, second, first)?
        }
    };

    let time = match time_part {
        None => NaiveTime::MIN,
        Some(t) => NaiveTime::parse_from_str(t, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
            .ok()?,
    };

    Some(date.and_time(time).and_utc())
}

/// `Some(result)` when the text has the hyphenated date shape, `None` otherwise
fn parse_hyphenated(s: &str) -> Option<Option<DateTime<Utc>>> {
    let parts: Vec<&str> = s.split('-').collect();
    let [a, b, c] = parts.as_slice() else {
        return None;
    };
    if !parts.iter().all(|p| number(p).is_some()) {
        return None;
    }

    let date = if a.len() == 4 && b.len() <= 2 && c.len() <= 2 {
        ymd(a, b, c)
    } else if a.len() <= 2 && b.len() <= 2 && c.len() == 4 {
        ymd(c, b, a)
    } else {
        return None;
    };

    Some(date.map(midnight))
}

fn parse_generic(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }

    const DATETIME_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%d.%m.%Y %H:%M:%S",
        "%d.%m.%Y %H:%M",
    ];
    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(dt.and_utc());
    }

    const DATE_FORMATS: [&str; 4] = ["%d.%m.%Y", "%B %d, %Y", "%b %d, %Y", "%d %B %Y"];
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .map(midnight)
}

fn ymd(y: &str, m: &str, d: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year(y)?, number(m)?, number(d)?)
}

fn number(part: &str) -> Option<u32> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

fn year(part: &str) -> Option<i32> {
    number(part).and_then(|y| i32::try_from(y).ok())
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
