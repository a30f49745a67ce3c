// libs/availability-cell/src/services/schedule.rs
use chrono::Duration;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::interval::half_open_overlap;

use crate::models::{
    AvailabilityRule, RuleSpec, ScheduleError, SUPPORTED_SESSION_DURATIONS, TICK_MINUTES,
};

/// Check a full replacement rule set before anything is written. Each rule
/// must be well-formed on its own, and no two active rules on the same
/// weekday may overlap. Errors carry the offending indices so the caller can
/// point at the exact rules in the request body.
pub fn validate_rule_set(rules: &[RuleSpec]) -> Result<(), ScheduleError> {
    for (index, rule) in rules.iter().enumerate() {
        if !(0..=6).contains(&rule.day_of_week) {
            return Err(ScheduleError::InvalidRule {
                index,
                reason: format!("day_of_week must be 0-6, got {}", rule.day_of_week),
            });
        }

        if rule.end_time <= rule.start_time {
            return Err(ScheduleError::InvalidRule {
                index,
                reason: "end_time must be after start_time".to_string(),
            });
        }

        let window = rule.end_time - rule.start_time;
        if window < Duration::minutes(TICK_MINUTES) {
            return Err(ScheduleError::InvalidRule {
                index,
                reason: format!("window must span at least {} minutes", TICK_MINUTES),
            });
        }

        if !SUPPORTED_SESSION_DURATIONS.contains(&rule.session_duration) {
            return Err(ScheduleError::InvalidRule {
                index,
                reason: format!(
                    "session_duration must be one of {:?}, got {}",
                    SUPPORTED_SESSION_DURATIONS, rule.session_duration
                ),
            });
        }
    }

    for (first, a) in rules.iter().enumerate() {
        if !a.active {
            continue;
        }
        for (offset, b) in rules[first + 1..].iter().enumerate() {
            let second = first + 1 + offset;
            if !b.active || a.day_of_week != b.day_of_week {
                continue;
            }
            if half_open_overlap(a.start_time, a.end_time, b.start_time, b.end_time) {
                return Err(ScheduleError::RuleOverlap {
                    first,
                    second,
                    day_of_week: a.day_of_week,
                });
            }
        }
    }

    Ok(())
}

pub struct ScheduleService {
    supabase: SupabaseClient,
}

impl ScheduleService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Validate and atomically swap a professional's entire rule set. The
    /// swap runs inside a single database function, so a failure partway
    /// leaves the previous schedule untouched and an empty rule list clears
    /// the schedule entirely.
    pub async fn replace_schedule(
        &self,
        professional_id: Uuid,
        rules: Vec<RuleSpec>,
        auth_token: &str,
    ) -> Result<Vec<AvailabilityRule>, ScheduleError> {
        validate_rule_set(&rules)?;

        self.ensure_professional_exists(professional_id, auth_token)
            .await?;

        let args = json!({
            "p_professional_id": professional_id,
            "p_rules": rules,
        });

        let result: Vec<Value> = self
            .supabase
            .rpc("replace_professional_schedule", Some(auth_token), args)
            .await
            .map_err(|e| ScheduleError::Database(e.to_string()))?;

        let stored = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<AvailabilityRule>, _>>()
            .map_err(|e| ScheduleError::Database(e.to_string()))?;

        info!(
            "Replaced schedule for professional {}: {} rules",
            professional_id,
            stored.len()
        );

        self.record_schedule_change(professional_id, stored.len(), auth_token)
            .await;

        Ok(stored)
    }

    async fn ensure_professional_exists(
        &self,
        professional_id: Uuid,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        let path = format!(
            "/rest/v1/professionals?id=eq.{}&select=id",
            professional_id
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(ScheduleError::ProfessionalNotFound);
        }
        Ok(())
    }

    /// Audit writes are best effort; the schedule change already committed.
    async fn record_schedule_change(
        &self,
        professional_id: Uuid,
        rule_count: usize,
        auth_token: &str,
    ) {
        let event = json!({
            "event_type": "schedule_replaced",
            "subject_id": professional_id,
            "detail": { "rule_count": rule_count },
        });

        let result: Result<Vec<Value>, _> = self
            .supabase
            .request(
                Method::POST,
                "/rest/v1/audit_events",
                Some(auth_token),
                Some(event),
            )
            .await;

        if let Err(e) = result {
            warn!("Failed to record schedule change audit event: {}", e);
        }
    }
}
