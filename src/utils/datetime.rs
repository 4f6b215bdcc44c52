use chrono::{Datelike, Days, NaiveDate};

pub fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// First day of the month containing `today`, and the day after `today`
pub fn month_to_tomorrow(today: &NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = today.with_day(1).unwrap_or(*today);
    let end = today.checked_add_days(Days::new(1)).unwrap_or(*today);

    (start, end)
}
