// libs/availability-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Granularity of the slot grid, equal to the shortest supported session.
pub const TICK_MINUTES: i64 = 30;

/// Session lengths a professional may offer.
pub const SUPPORTED_SESSION_DURATIONS: [i32; 2] = [30, 60];

/// One recurring weekly open-hours window. Rules are only ever written as a
/// full per-professional set through `ScheduleService::replace_schedule`;
/// nothing mutates a single row in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Uuid,
    pub professional_id: Uuid,
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub session_duration: i32,
    pub active: bool,
}

/// An incoming rule in a schedule-replace request, before ids are assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub session_duration: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceScheduleRequest {
    pub rules: Vec<RuleSpec>,
}

/// A discretized tick of a professional's day. Derived per query, never
/// persisted. `available_duration` is the longest contiguous free run (in
/// minutes) starting at this tick, capped at the end of its rule window, so a
/// caller can tell whether a 60-minute session fits at a 30-minute tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub available: bool,
    pub available_duration: i64,
}

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub date: NaiveDate,
    /// Requested session length; when present, ticks whose free run is
    /// shorter are reported as unavailable.
    pub duration: Option<i32>,
}

/// Minimal projection of a booked appointment, enough for occupancy marking.
#[derive(Debug, Clone, Deserialize)]
pub struct BookedInterval {
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
}

impl BookedInterval {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + chrono::Duration::minutes(self.duration_minutes as i64)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScheduleError {
    #[error("Rule {index} is invalid: {reason}")]
    InvalidRule { index: usize, reason: String },

    #[error("Rules {first} and {second} overlap on day {day_of_week}")]
    RuleOverlap {
        first: usize,
        second: usize,
        day_of_week: i16,
    },

    #[error("Professional not found")]
    ProfessionalNotFound,

    #[error("Database error: {0}")]
    Database(String),
}
