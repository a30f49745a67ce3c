// libs/availability-cell/src/services/slots.rs
use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::interval::{half_open_overlap, TimeRange};

use crate::models::{AvailabilityRule, BookedInterval, Slot, SlotQuery, TICK_MINUTES};

/// 0 = Sunday .. 6 = Saturday, matching the stored rule encoding.
pub fn weekday_index(date: NaiveDate) -> i16 {
    date.weekday().num_days_from_sunday() as i16
}

/// Derive the discretized slot grid for one date. Pure function of its
/// inputs: rule windows minus booked intervals, on a fixed 30-minute grid.
/// Two calls with the same inputs return identical output.
pub fn compute_day_slots(
    date: NaiveDate,
    rules: &[AvailabilityRule],
    booked: &[TimeRange],
    requested_duration: Option<i32>,
) -> Vec<Slot> {
    let mut slots = Vec::new();

    for rule in rules.iter().filter(|r| r.active) {
        let window_start = date.and_time(rule.start_time).and_utc();
        let window_end = date.and_time(rule.end_time).and_utc();

        let mut ticks: Vec<(DateTime<Utc>, bool)> = Vec::new();
        let mut tick = window_start;
        while tick + Duration::minutes(TICK_MINUTES) <= window_end {
            let tick_end = tick + Duration::minutes(TICK_MINUTES);
            let occupied = booked
                .iter()
                .any(|b| half_open_overlap(tick, tick_end, b.start, b.end));
            ticks.push((tick, occupied));
            tick = tick_end;
        }

        // Walk backwards so each tick knows the free run ahead of it,
        // capped at the end of this rule window.
        let mut free_run_after = 0i64;
        let mut runs = vec![0i64; ticks.len()];
        for (i, (_, occupied)) in ticks.iter().enumerate().rev() {
            free_run_after = if *occupied {
                0
            } else {
                free_run_after + TICK_MINUTES
            };
            runs[i] = free_run_after;
        }

        for ((start, occupied), run) in ticks.into_iter().zip(runs) {
            let fits_request = requested_duration.map_or(true, |d| run >= d as i64);
            slots.push(Slot {
                start_time: start,
                end_time: start + Duration::minutes(TICK_MINUTES),
                available: !occupied && fits_request,
                available_duration: run,
            });
        }
    }

    slots.sort_by(|a, b| a.start_time.cmp(&b.start_time));
    slots
}

pub struct AvailabilityService {
    supabase: SupabaseClient,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Compute the free/occupied slot grid for a professional on one date.
    /// No rules for that weekday is an empty grid, not an error.
    pub async fn get_available_slots(
        &self,
        professional_id: Uuid,
        query: SlotQuery,
        auth_token: &str,
    ) -> Result<Vec<Slot>> {
        debug!(
            "Calculating slots for professional {} on {}",
            professional_id, query.date
        );

        let rules = self
            .rules_for_day(professional_id, weekday_index(query.date), auth_token)
            .await?;
        if rules.is_empty() {
            return Ok(vec![]);
        }

        let booked = self
            .booked_intervals(professional_id, query.date, auth_token)
            .await?;

        let slots = compute_day_slots(query.date, &rules, &booked, query.duration);
        debug!("Derived {} slots ({} booked intervals)", slots.len(), booked.len());
        Ok(slots)
    }

    /// Full stored rule set for a professional, all weekdays.
    pub async fn get_schedule(
        &self,
        professional_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<AvailabilityRule>> {
        let path = format!(
            "/rest/v1/availability_rules?professional_id=eq.{}&order=day_of_week.asc,start_time.asc",
            professional_id
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let rules = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<AvailabilityRule>, _>>()?;
        Ok(rules)
    }

    async fn rules_for_day(
        &self,
        professional_id: Uuid,
        day_of_week: i16,
        auth_token: &str,
    ) -> Result<Vec<AvailabilityRule>> {
        let path = format!(
            "/rest/v1/availability_rules?professional_id=eq.{}&day_of_week=eq.{}&active=eq.true&order=start_time.asc",
            professional_id, day_of_week
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let rules = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<AvailabilityRule>, _>>()?;
        Ok(rules)
    }

    /// Non-cancelled appointments intersecting the date. The fetch window
    /// starts an hour before midnight because a session is at most 60 minutes
    /// and may straddle the boundary.
    async fn booked_intervals(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<TimeRange>> {
        let day_start = date.and_time(chrono::NaiveTime::MIN).and_utc();
        let day_end = day_start + Duration::days(1);
        let fetch_from = day_start - Duration::minutes(60);

        let path = format!(
            "/rest/v1/appointments?professional_id=eq.{}&status=neq.cancelled&start_time=gte.{}&start_time=lt.{}&select=start_time,duration_minutes&order=start_time.asc",
            professional_id,
            urlencoding::encode(&fetch_from.to_rfc3339()),
            urlencoding::encode(&day_end.to_rfc3339()),
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let intervals = result
            .into_iter()
            .map(serde_json::from_value::<BookedInterval>)
            .collect::<std::result::Result<Vec<BookedInterval>, _>>()?;

        Ok(intervals
            .into_iter()
            .map(|b| TimeRange::new(b.start_time, b.end_time()))
            .collect())
    }
}
