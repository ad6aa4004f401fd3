//! Monthly quota reset dates

use chrono::{Datelike, Months, NaiveDate};

/// Next monthly anniversary of `registration` strictly after `today`
///
/// Anniversaries on days the month lacks fall on its last day. Without a
/// registration date the quota resets on the first of next month.
pub fn next_reset_date(registration: Option<NaiveDate>, today: NaiveDate) -> NaiveDate {
    let Some(registration) = registration else {
        return first_of_next_month(today);
    };

    let day = registration.day();
    let this_month = anniversary(today.year(), today.month(), day);
    if this_month > today {
        return this_month;
    }

    let next = first_of_next_month(today);
    anniversary(next.year(), next.month(), day)
}

fn anniversary(year: i32, month: u32, day: u32) -> NaiveDate {
    let day = day.min(last_day_of_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .unwrap_or(NaiveDate::MAX)
}

pub fn last_day_of_month(year: i32, month: u32) -> u32 {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .and_then(|next| next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}
