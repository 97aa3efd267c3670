use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};

/// This is the standard way of converting a date to a string in playtally.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Calendar day of `instant` as seen in `tz`.
pub fn day_in<Tz: TimeZone>(instant: DateTime<Utc>, tz: &Tz) -> NaiveDate {
    instant.with_timezone(tz).date_naive()
}

/// Returns `days` consecutive dates ending with `end` (inclusive), oldest first.
pub fn trailing_days(end: NaiveDate, days: u32) -> impl Iterator<Item = NaiveDate> {
    (0..days)
        .rev()
        .filter_map(move |offset| end.checked_sub_days(Days::new(offset.into())))
}
