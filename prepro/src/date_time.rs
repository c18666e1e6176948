//! Formatting for the `__DATE__` and `__TIME__` builtin macros.
//!
//! Both are captured once when a macro table is created, so a translation
//! unit sees a single consistent timestamp.

use std::time::{SystemTime, UNIX_EPOCH};

const SECONDS_PER_DAY: u64 = 86_400;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Seconds since the Unix epoch, saturating to 0 for pre-epoch clocks.
pub(crate) fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Format a UTC timestamp the way `__DATE__` expects: `"Mmm dd yyyy"`,
/// with the day space-padded to two characters.
pub(crate) fn format_date(epoch_secs: u64) -> String {
    let (year, month, day) = civil_from_days(epoch_secs / SECONDS_PER_DAY);
    format!("{} {:2} {}", MONTHS[(month - 1) as usize], day, year)
}

/// Format a UTC timestamp the way `__TIME__` expects: `"hh:mm:ss"`.
pub(crate) fn format_time(epoch_secs: u64) -> String {
    let secs = epoch_secs % SECONDS_PER_DAY;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

fn is_leap_year(year: u64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: u64, month: u64) -> u64 {
    match month {
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

fn civil_from_days(mut days: u64) -> (u64, u64, u64) {
    let mut year = 1970;
    loop {
        let year_days = if is_leap_year(year) { 366 } else { 365 };
        if days < year_days {
            break;
        }
        days -= year_days;
        year += 1;
    }
    let mut month = 1;
    loop {
        let month_days = days_in_month(year, month);
        if days < month_days {
            break;
        }
        days -= month_days;
        month += 1;
    }
    (year, month, days + 1)
}
