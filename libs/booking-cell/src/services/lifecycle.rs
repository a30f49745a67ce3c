// libs/booking-cell/src/services/lifecycle.rs
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{Appointment, AppointmentStatus, BookingError, CancelledBy};
use crate::services::repository::AppointmentRepository;

/// Transitions allowed out of each status. Completed, cancelled and no-show
/// are terminal.
pub fn valid_transitions(status: AppointmentStatus) -> &'static [AppointmentStatus] {
    match status {
        AppointmentStatus::Pending => &[AppointmentStatus::Confirmed, AppointmentStatus::Cancelled],
        AppointmentStatus::Confirmed => &[
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ],
        AppointmentStatus::Completed
        | AppointmentStatus::Cancelled
        | AppointmentStatus::NoShow => &[],
    }
}

pub fn validate_transition(
    current: AppointmentStatus,
    next: AppointmentStatus,
) -> Result<(), BookingError> {
    if valid_transitions(current).contains(&next) {
        Ok(())
    } else {
        Err(BookingError::InvalidStatusTransition(current))
    }
}

pub struct LifecycleService {
    repository: AppointmentRepository,
}

impl LifecycleService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            repository: AppointmentRepository::new(config),
        }
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        self.repository
            .get_appointment(appointment_id, auth_token)
            .await
            .map_err(|e| BookingError::Database(e.to_string()))?
            .ok_or(BookingError::NotFound)
    }

    pub async fn search(
        &self,
        query: &crate::models::AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, BookingError> {
        self.repository
            .search_appointments(query, auth_token)
            .await
            .map_err(|e| BookingError::Database(e.to_string()))
    }

    /// Move an appointment to a new status, enforcing the state machine.
    /// Cancelling releases the interval the moment the update commits; the
    /// row itself stays for history.
    pub async fn transition(
        &self,
        appointment_id: Uuid,
        next: AppointmentStatus,
        cancelled_by: Option<CancelledBy>,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let current = self.get_appointment(appointment_id, auth_token).await?;
        validate_transition(current.status, next)?;

        if next == AppointmentStatus::Cancelled && current.start_time <= Utc::now() {
            return Err(BookingError::Validation(
                "Cannot cancel an appointment that has already started".to_string(),
            ));
        }

        let updated = self
            .repository
            .update_status(appointment_id, next, cancelled_by, auth_token)
            .await
            .map_err(|e| BookingError::Database(e.to_string()))?
            .ok_or(BookingError::NotFound)?;

        info!(
            "Appointment {} moved {} -> {}",
            appointment_id, current.status, next
        );

        self.record_transition(&updated, current.status, auth_token)
            .await;
        self.notify_status_change(&updated, auth_token).await;

        Ok(updated)
    }

    /// Audit writes are best effort; the transition already committed.
    async fn record_transition(
        &self,
        appointment: &Appointment,
        previous: AppointmentStatus,
        auth_token: &str,
    ) {
        let event = json!({
            "event_type": "appointment_status_changed",
            "subject_id": appointment.id,
            "detail": {
                "from": previous,
                "to": appointment.status,
                "cancelled_by": appointment.cancelled_by,
            },
        });

        let result: Result<Vec<Value>, _> = self
            .repository
            .client()
            .request(
                Method::POST,
                "/rest/v1/audit_events",
                Some(auth_token),
                Some(event),
            )
            .await;

        if let Err(e) = result {
            warn!(
                "Failed to record status-change audit event for {}: {}",
                appointment.id, e
            );
        }
    }

    /// Notification rows are best effort; the status change already stands.
    async fn notify_status_change(&self, appointment: &Appointment, auth_token: &str) {
        let notification = json!({
            "recipient_id": appointment.patient_id,
            "kind": format!("appointment_{}", appointment.status),
            "payload": {
                "appointment_id": appointment.id,
                "start_time": appointment.start_time,
            },
        });

        let result: Result<Vec<Value>, _> = self
            .repository
            .client()
            .request(
                Method::POST,
                "/rest/v1/notifications",
                Some(auth_token),
                Some(notification),
            )
            .await;

        if let Err(e) = result {
            warn!(
                "Failed to write notification for appointment {}: {}",
                appointment.id, e
            );
        }
    }
}
