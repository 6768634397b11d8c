//! Date-range partitioning. Each fetch is bounded to a 7-day window so the
//! insights payload per call stays manageable.

use chrono::{Duration, NaiveDate};

/// Inclusive [since, until] sub-range; `until - since <= 6` days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

/// Inclusive span of a full window: 7 days.
const WINDOW_SPAN_DAYS: i64 = 6;

/// Cover [start, end] with consecutive non-overlapping 7-day windows, the
/// last clipped to `end`. Empty when `start > end`.
pub fn partition(start: NaiveDate, end: NaiveDate) -> Vec<DateWindow> {
    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let until = (cursor + Duration::days(WINDOW_SPAN_DAYS)).min(end);
        windows.push(DateWindow {
            since: cursor,
            until,
        });
        cursor = until + Duration::days(1);
    }
    windows
}
