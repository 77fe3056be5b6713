use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::BTreeSet;

pub const RECENT_WEEKDAYS: usize = 30;
pub const HALF_YEAR_LOOKBACK_DAYS: i64 = 180;
pub const ONE_YEAR_LOOKBACK_DAYS: i64 = 365;

pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Steps back to the closest weekday on or before `date`.
pub fn weekday_on_or_before(date: NaiveDate) -> NaiveDate {
    let mut current = date;
    while !is_weekday(current) {
        current -= Duration::days(1);
    }
    current
}

/// The most recent `count` weekdays ending at `as_of`, oldest first.
pub fn recent_weekdays(as_of: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(count);
    let mut current = as_of;
    while dates.len() < count {
        if is_weekday(current) {
            dates.push(current);
        }
        current -= Duration::days(1);
    }
    dates.reverse();
    dates
}

/// Dates fetched by the daily batch: the last 30 weekdays plus one reference
/// weekday roughly six months and one year back. Ascending, without duplicates.
pub fn screening_dates(as_of: NaiveDate) -> Vec<NaiveDate> {
    let mut dates: BTreeSet<NaiveDate> = recent_weekdays(as_of, RECENT_WEEKDAYS)
        .into_iter()
        .collect();
    dates.insert(weekday_on_or_before(
        as_of - Duration::days(HALF_YEAR_LOOKBACK_DAYS),
    ));
    dates.insert(weekday_on_or_before(
        as_of - Duration::days(ONE_YEAR_LOOKBACK_DAYS),
    ));
    dates.into_iter().collect()
}
