use crate::model::{CANONICAL_FORMAT, Timestamp};
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

const DATETIME_FORMATS: &[&[BorrowedFormatItem<'_>]] = &[
    format_description!(
        "[month repr:long case_sensitive:false] [day padding:none], [year] [hour repr:12 padding:none]:[minute] [period case_sensitive:false]"
    ),
    format_description!(
        "[month repr:long case_sensitive:false] [day padding:none], [year] [hour repr:12 padding:none]:[minute]:[second] [period case_sensitive:false]"
    ),
    format_description!(
        "[month repr:short case_sensitive:false] [day padding:none], [year] [hour repr:12 padding:none]:[minute] [period case_sensitive:false]"
    ),
    format_description!(
        "[month repr:short case_sensitive:false] [day padding:none], [year] [hour repr:12 padding:none]:[minute]:[second] [period case_sensitive:false]"
    ),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]"),
    format_description!(
        "[month padding:none]/[day padding:none]/[year] [hour padding:none]:[minute]:[second]"
    ),
    format_description!("[month padding:none]/[day padding:none]/[year] [hour padding:none]:[minute]"),
    format_description!(
        "[month padding:none]/[day padding:none]/[year] [hour repr:12 padding:none]:[minute]:[second] [period case_sensitive:false]"
    ),
];

const DATE_FORMATS: &[&[BorrowedFormatItem<'_>]] = &[
    format_description!("[year]-[month]-[day]"),
    format_description!("[month padding:none]/[day padding:none]/[year]"),
    format_description!("[month repr:long case_sensitive:false] [day padding:none], [year]"),
    format_description!("[month repr:short case_sensitive:false] [day padding:none], [year]"),
];

const MISSING_TOKENS: &[&str] = &["nan", "nat", "none", "null"];

const AT_CONNECTIVE: &str = " at ";

pub fn normalize_timestamp(raw: &str) -> Option<Timestamp> {
    let cleaned = clean_value(raw);
    if cleaned.is_empty()
        || MISSING_TOKENS
            .iter()
            .any(|token| cleaned.eq_ignore_ascii_case(token))
    {
        return None;
    }

    if let Ok(datetime) = PrimitiveDateTime::parse(&cleaned, CANONICAL_FORMAT) {
        return Timestamp::from_datetime(datetime);
    }

    if let Some(ts) = parse_rfc3339(&cleaned) {
        return Some(ts);
    }

    let candidate = separate_meridiem(short_month_spelling(cleaned.replace(AT_CONNECTIVE, " ")));

    parse_naive(&candidate)
        .or_else(|| expand_short_year(&candidate).and_then(|expanded| parse_naive(&expanded)))
        .and_then(Timestamp::from_datetime)
}

pub fn normalize_to_iso(raw: &str) -> Option<String> {
    normalize_timestamp(raw).map(|ts| ts.to_string())
}

fn parse_naive(value: &str) -> Option<PrimitiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|format| PrimitiveDateTime::parse(value, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| Date::parse(value, format).ok())
                .map(|date| PrimitiveDateTime::new(date, Time::MIDNIGHT))
        })
}

fn short_month_spelling(value: String) -> String {
    match value.split_once(' ') {
        Some((month, rest)) if month.trim_end_matches('.').eq_ignore_ascii_case("sept") => {
            format!("Sep {rest}")
        }
        _ => value,
    }
}

/// "7/6/25" -> "7/6/2025". Two-digit years below 69 are 20xx, the rest 19xx.
fn expand_short_year(value: &str) -> Option<String> {
    let (date, rest) = match value.split_once(' ') {
        Some((date, rest)) => (date, Some(rest)),
        None => (value, None),
    };
    let mut parts = date.split('/');
    let (Some(month), Some(day), Some(year), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    if year.len() != 2 || !year.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let short: u16 = year.parse().ok()?;
    let full = if short < 69 { 2000 + short } else { 1900 + short };
    let expanded = format!("{month}/{day}/{full}");
    Some(match rest {
        Some(rest) => format!("{expanded} {rest}"),
        None => expanded,
    })
}

fn clean_value(raw: &str) -> String {
    let unquoted = raw
        .trim()
        .trim_matches(|ch| ch == '"' || ch == '\'')
        .trim();
    unquoted.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_rfc3339(value: &str) -> Option<Timestamp> {
    let parsed = OffsetDateTime::parse(value, &Rfc3339).ok()?;
    let utc = OffsetDateTime::from_unix_timestamp(parsed.unix_timestamp()).ok()?;
    Timestamp::from_datetime(PrimitiveDateTime::new(utc.date(), utc.time()))
}

/// "2:30PM" -> "2:30 PM" so one pattern covers both spellings.
fn separate_meridiem(value: String) -> String {
    let bytes = value.as_bytes();
    let len = bytes.len();
    if len < 3 {
        return value;
    }
    let is_meridiem = bytes[len - 1].eq_ignore_ascii_case(&b'm')
        && matches!(bytes[len - 2].to_ascii_lowercase(), b'a' | b'p');
    if is_meridiem && bytes[len - 3].is_ascii_digit() {
        let (head, tail) = value.split_at(len - 2);
        return format!("{head} {tail}");
    }
    value
}
