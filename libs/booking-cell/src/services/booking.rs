// libs/booking-cell/src/services/booking.rs
use chrono::{DateTime, NaiveTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use availability_cell::models::{AvailabilityRule, SUPPORTED_SESSION_DURATIONS};
use availability_cell::services::slots::weekday_index;
use shared_config::AppConfig;
use shared_database::supabase::{as_postgrest_error, SupabaseClient};

use crate::models::{Appointment, BookAppointmentRequest, BookingError, BookingResponse, Modality};
use crate::services::repository::AppointmentRepository;

#[derive(Debug, Deserialize)]
struct ProfessionalProfile {
    tariff: f64,
}

/// True when some active rule window for the start's weekday contains the
/// start's time of day. Only the start has to fall inside the window; a
/// session may run past the window edge.
pub fn rule_covers_start(rules: &[AvailabilityRule], start: DateTime<Utc>) -> bool {
    let day = weekday_index(start.date_naive());
    let time_of_day = start.time();
    rules
        .iter()
        .filter(|r| r.active && r.day_of_week == day)
        .any(|r| r.start_time <= time_of_day && time_of_day < r.end_time)
}

fn validate_request(request: &BookAppointmentRequest, now: DateTime<Utc>) -> Result<(), BookingError> {
    if !SUPPORTED_SESSION_DURATIONS.contains(&request.duration_minutes) {
        return Err(BookingError::Validation(format!(
            "duration_minutes must be one of {:?}, got {}",
            SUPPORTED_SESSION_DURATIONS, request.duration_minutes
        )));
    }
    request
        .modality
        .parse::<Modality>()
        .map_err(BookingError::Validation)?;
    if request.start_time <= now {
        return Err(BookingError::Validation(
            "start_time must be in the future".to_string(),
        ));
    }
    Ok(())
}

pub struct BookingService {
    repository: AppointmentRepository,
    supabase: SupabaseClient,
    daily_limit: usize,
}

impl BookingService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            repository: AppointmentRepository::new(config),
            supabase: SupabaseClient::new(config),
            daily_limit: config.booking_daily_limit.max(0) as usize,
        }
    }

    /// Run the booking pipeline. Checks run in a fixed order so a request
    /// failing several of them always reports the same error, and nothing is
    /// written until every check has passed. The final insert goes through a
    /// database function that re-verifies the interval, so a conflict that
    /// appears between the pre-check and the commit still comes back as
    /// `SlotConflict` rather than a double booking.
    pub async fn book(
        &self,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<BookingResponse, BookingError> {
        match self.run_checks_and_commit(&request, auth_token).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.record_booking_failure(&request, &e, auth_token).await;
                Err(e)
            }
        }
    }

    async fn run_checks_and_commit(
        &self,
        request: &BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<BookingResponse, BookingError> {
        validate_request(request, Utc::now())?;

        self.ensure_consent(request.patient_id, auth_token).await?;
        self.ensure_under_daily_limit(request.patient_id, auth_token)
            .await?;

        let professional = self
            .fetch_approved_professional(request.professional_id, auth_token)
            .await?;

        self.ensure_within_schedule(request, auth_token).await?;
        self.ensure_slot_free(request, auth_token).await?;

        let appointment = self.commit(request, auth_token).await?;

        info!(
            "Booked appointment {} for patient {} with professional {}",
            appointment.id, appointment.patient_id, appointment.professional_id
        );

        self.record_booking(&appointment, auth_token).await;
        self.notify_booked(&appointment, auth_token).await;

        Ok(BookingResponse {
            appointment_id: appointment.id,
            start_time: appointment.start_time,
            duration_minutes: appointment.duration_minutes,
            status: appointment.status,
            modality: appointment.modality,
            tariff: professional.tariff,
        })
    }

    /// Consent reads fail closed: any error fetching the consent row is
    /// treated the same as an absent one.
    async fn ensure_consent(&self, patient_id: Uuid, auth_token: &str) -> Result<(), BookingError> {
        let path = format!(
            "/rest/v1/consents?patient_id=eq.{}&scope=eq.health_data&granted=eq.true&select=id",
            patient_id
        );
        let result: Result<Vec<Value>, _> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await;

        match result {
            Ok(rows) if !rows.is_empty() => Ok(()),
            Ok(_) => Err(BookingError::ConsentMissing),
            Err(e) => {
                warn!("Consent lookup failed for patient {}: {}", patient_id, e);
                Err(BookingError::ConsentMissing)
            }
        }
    }

    /// Best-effort throttle: counts rows created since UTC midnight. A
    /// cancelled booking still counts toward the day's total.
    async fn ensure_under_daily_limit(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<(), BookingError> {
        let midnight = Utc::now()
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc();

        let created_today = self
            .repository
            .count_created_since(patient_id, midnight, auth_token)
            .await
            .map_err(|e| BookingError::Database(e.to_string()))?;

        if created_today >= self.daily_limit {
            debug!(
                "Patient {} hit the daily booking limit ({})",
                patient_id, self.daily_limit
            );
            return Err(BookingError::RateLimitExceeded);
        }
        Ok(())
    }

    async fn fetch_approved_professional(
        &self,
        professional_id: Uuid,
        auth_token: &str,
    ) -> Result<ProfessionalProfile, BookingError> {
        let path = format!(
            "/rest/v1/professionals?id=eq.{}&approved=eq.true&select=tariff",
            professional_id
        );
        let result: Vec<ProfessionalProfile> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::Database(e.to_string()))?;

        result
            .into_iter()
            .next()
            .ok_or(BookingError::ProfessionalNotFound)
    }

    async fn ensure_within_schedule(
        &self,
        request: &BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<(), BookingError> {
        let day = weekday_index(request.start_time.date_naive());
        let path = format!(
            "/rest/v1/availability_rules?professional_id=eq.{}&day_of_week=eq.{}&active=eq.true",
            request.professional_id, day
        );
        let rules: Vec<AvailabilityRule> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::Database(e.to_string()))?;

        if rule_covers_start(&rules, request.start_time) {
            Ok(())
        } else {
            Err(BookingError::ProfessionalUnavailable)
        }
    }

    /// Advisory pre-check. The database function repeats this atomically;
    /// catching the common case here keeps the error ordering stable.
    async fn ensure_slot_free(
        &self,
        request: &BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<(), BookingError> {
        let end = request.start_time + chrono::Duration::minutes(request.duration_minutes as i64);
        let overlapping = self
            .repository
            .find_overlapping(request.professional_id, request.start_time, end, auth_token)
            .await
            .map_err(|e| BookingError::Database(e.to_string()))?;

        if overlapping.is_empty() {
            Ok(())
        } else {
            Err(BookingError::SlotConflict)
        }
    }

    async fn commit(
        &self,
        request: &BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        self.repository
            .book(
                request.patient_id,
                request.professional_id,
                request.start_time,
                request.duration_minutes,
                &request.modality,
                request.reason.as_deref(),
                auth_token,
            )
            .await
            .map_err(|e| {
                if as_postgrest_error(&e).is_some_and(|pg| pg.is_exclusion_violation()) {
                    BookingError::SlotConflict
                } else {
                    BookingError::Database(e.to_string())
                }
            })
    }

    /// Audit writes are best effort; the booking already committed.
    async fn record_booking(&self, appointment: &Appointment, auth_token: &str) {
        let event = json!({
            "event_type": "appointment_booked",
            "subject_id": appointment.id,
            "detail": {
                "patient_id": appointment.patient_id,
                "professional_id": appointment.professional_id,
                "start_time": appointment.start_time,
            },
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
            warn!(
                "Failed to record booking audit event for {}: {}",
                appointment.id, e
            );
        }
    }

    /// Rejected bookings are audited too. The detail carries the error kind,
    /// never the patient's reason text.
    async fn record_booking_failure(
        &self,
        request: &BookAppointmentRequest,
        error: &BookingError,
        auth_token: &str,
    ) {
        let event = json!({
            "event_type": "appointment_booking_rejected",
            "subject_id": request.professional_id,
            "detail": {
                "patient_id": request.patient_id,
                "start_time": request.start_time,
                "error": error.to_string(),
            },
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
            warn!("Failed to record booking rejection audit event: {}", e);
        }
    }

    /// Reminder row for the patient; best effort like the audit write.
    async fn notify_booked(&self, appointment: &Appointment, auth_token: &str) {
        let notification = json!({
            "recipient_id": appointment.patient_id,
            "kind": "appointment_booked",
            "payload": {
                "appointment_id": appointment.id,
                "start_time": appointment.start_time,
            },
        });

        let result: Result<Vec<Value>, _> = self
            .supabase
            .request(
                Method::POST,
                "/rest/v1/notifications",
                Some(auth_token),
                Some(notification),
            )
            .await;

        if let Err(e) = result {
            warn!(
                "Failed to write booking notification for {}: {}",
                appointment.id, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn request(start: DateTime<Utc>, duration: i32) -> BookAppointmentRequest {
        BookAppointmentRequest {
            patient_id: Uuid::new_v4(),
            professional_id: Uuid::new_v4(),
            start_time: start,
            duration_minutes: duration,
            modality: "virtual".to_string(),
            reason: None,
        }
    }

    fn rule(day: i16, start: (u32, u32), end: (u32, u32)) -> AvailabilityRule {
        AvailabilityRule {
            id: Uuid::new_v4(),
            professional_id: Uuid::new_v4(),
            day_of_week: day,
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            session_duration: 60,
            active: true,
        }
    }

    fn monday_at(h: u32, m: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
            .and_utc()
    }

    #[test]
    fn rejects_unsupported_duration() {
        let now = Utc::now();
        let err = validate_request(&request(now + Duration::hours(1), 45), now).unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[test]
    fn rejects_past_start_time() {
        let now = Utc::now();
        let err = validate_request(&request(now - Duration::hours(1), 60), now).unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[test]
    fn accepts_future_supported_request() {
        let now = Utc::now();
        assert!(validate_request(&request(now + Duration::hours(1), 30), now).is_ok());
        assert!(validate_request(&request(now + Duration::hours(1), 60), now).is_ok());
    }

    #[test]
    fn rejects_unknown_modality() {
        let now = Utc::now();
        let mut bad = request(now + Duration::hours(1), 60);
        bad.modality = "teleportation".to_string();

        let err = validate_request(&bad, now).unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[test]
    fn both_modalities_parse() {
        assert_eq!("virtual".parse::<Modality>(), Ok(Modality::Virtual));
        assert_eq!("in_person".parse::<Modality>(), Ok(Modality::InPerson));
        assert!("Virtual".parse::<Modality>().is_err());
    }

    #[test]
    fn start_inside_window_is_covered() {
        let rules = [rule(1, (8, 0), (12, 0))];
        assert!(rule_covers_start(&rules, monday_at(8, 0)));
        assert!(rule_covers_start(&rules, monday_at(11, 30)));
    }

    #[test]
    fn window_end_is_exclusive() {
        let rules = [rule(1, (8, 0), (12, 0))];
        assert!(!rule_covers_start(&rules, monday_at(12, 0)));
    }

    #[test]
    fn only_the_start_must_fit_the_window() {
        // An 11:30 start for a 60-minute session runs past 12:00, which is
        // allowed as long as the start itself is inside the window.
        let rules = [rule(1, (8, 0), (12, 0))];
        assert!(rule_covers_start(&rules, monday_at(11, 30)));
    }

    #[test]
    fn wrong_day_is_not_covered() {
        let rules = [rule(2, (8, 0), (12, 0))];
        assert!(!rule_covers_start(&rules, monday_at(9, 0)));
    }

    #[test]
    fn inactive_rules_never_cover() {
        let mut inactive = rule(1, (8, 0), (12, 0));
        inactive.active = false;
        assert!(!rule_covers_start(&[inactive], monday_at(9, 0)));
    }
}
