//! Trading session dates.
//!
//! Exchange holidays are not modelled; a holiday simply returns no rows.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc, Weekday,
};

/// Beijing time offset (UTC+8)
const BEIJING_OFFSET_SECS: i32 = 8 * 3600;

/// Daily data for a session is complete shortly after the 15:00 close.
const SESSION_SETTLED: (u32, u32) = (15, 30);

fn beijing() -> FixedOffset {
    FixedOffset::east_opt(BEIJING_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Latest weekday whose session has settled as of `now`.
pub fn latest_session_date(now: DateTime<Utc>) -> NaiveDate {
    let local = now.with_timezone(&beijing());
    let settled = NaiveTime::from_hms_opt(SESSION_SETTLED.0, SESSION_SETTLED.1, 0)
        .unwrap_or(NaiveTime::MIN);

    let mut date = local.date_naive();
    if local.time() < settled {
        date = date - Duration::days(1);
    }
    while !is_weekday(date) {
        date = date - Duration::days(1);
    }
    date
}

/// Latest settled session as of the current time.
pub fn today_session() -> NaiveDate {
    latest_session_date(Utc::now())
}
