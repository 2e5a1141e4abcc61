use std::cmp::{max, min};

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// Half-open date interval `[start, stop)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Period {
    pub start: NaiveDate,
    pub stop: NaiveDate,
}

impl Period {
    pub fn new(start: NaiveDate, stop: NaiveDate) -> Self {
        Self { start, stop }
    }

    /// Zero-length (or inverted) periods cover no days.
    pub fn is_empty(&self) -> bool {
        self.start >= self.stop
    }

    pub fn days(&self) -> i64 {
        (self.stop - self.start).num_days().max(0)
    }

    pub fn overlaps(&self, other: &Period) -> bool {
        self.start < other.stop && other.start < self.stop
    }

    /// Intersection with `other`, `None` when they share no day.
    pub fn intersect(&self, other: &Period) -> Option<Period> {
        let start = max(self.start, other.start);
        let stop = min(self.stop, other.stop);
        (start < stop).then_some(Period { start, stop })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error(
    "interval {item_start}..{item_stop} lies outside window {window_start}..{window_stop}"
)]
pub struct IntervalError {
    pub window_start: NaiveDate,
    pub window_stop: NaiveDate,
    pub item_start: NaiveDate,
    pub item_stop: NaiveDate,
}

/// Returns the maximal disjoint sub-intervals of `window` not covered by any
/// period in `occupied`, ascending by start. Occupied periods may be unsorted,
/// overlapping, or reach outside the window.
pub fn find_gaps(window: Period, occupied: &[Period]) -> Vec<Period> {
    let mut covered = occupied
        .iter()
        .filter_map(|period| period.intersect(&window))
        .collect::<Vec<_>>();
    if covered.is_empty() {
        return vec![window];
    }
    covered.sort();

    let mut gaps = Vec::new();
    let mut cursor = window.start;
    for period in covered {
        if period.start > cursor {
            gaps.push(Period::new(cursor, period.start));
        }
        cursor = max(cursor, period.stop);
    }
    if cursor < window.stop {
        gaps.push(Period::new(cursor, window.stop));
    }
    gaps
}

/// Clamps `item` to `window`. An item touching the window edge clamps to a
/// zero-length period; an item entirely outside the window is an error.
pub fn contain_date_range(window: Period, item: Period) -> Result<Period, IntervalError> {
    let start = max(window.start, item.start);
    let stop = min(window.stop, item.stop);
    if start > stop {
        return Err(IntervalError {
            window_start: window.start,
            window_stop: window.stop,
            item_start: item.start,
            item_stop: item.stop,
        });
    }
    Ok(Period::new(start, stop))
}
