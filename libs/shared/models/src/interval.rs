use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Half-open interval intersection: `[a1, a2)` meets `[b1, b2)` iff
/// `a1 < b2 && b1 < a2`. Appointment conflicts and same-day rule validation
/// both go through this single predicate; intervals that merely touch at an
/// endpoint do not overlap.
pub fn half_open_overlap<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

/// A concrete `[start, end)` span on the UTC timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        half_open_overlap(self.start, self.end, other.start, other.end)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}
