// libs/booking-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Virtual,
    InPerson,
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modality::Virtual => write!(f, "virtual"),
            Modality::InPerson => write!(f, "in_person"),
        }
    }
}

impl std::str::FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "virtual" => Ok(Modality::Virtual),
            "in_person" => Ok(Modality::InPerson),
            other => Err(format!(
                "modality must be virtual or in_person, got {}",
                other
            )),
        }
    }
}

/// Appointment lifecycle. `Cancelled` is a terminal soft state: the row stays
/// for history and audit but its interval is immediately free again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

impl AppointmentStatus {
    /// True while the appointment still occupies its interval.
    pub fn blocks_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub professional_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub modality: Modality,
    pub status: AppointmentStatus,
    /// Free text supplied by the patient; stored and echoed back verbatim.
    pub reason: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub professional_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    /// Kept as a raw string so an unknown value fails request validation
    /// with a proper error body instead of a body-decode rejection.
    pub modality: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingResponse {
    pub appointment_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub modality: Modality,
    /// Session price at booking time, copied from the professional's profile.
    pub tariff: f64,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentSearchQuery {
    pub patient_id: Option<Uuid>,
    pub professional_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Patient,
    Professional,
    System,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAppointmentRequest {
    pub cancelled_by: CancelledBy,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BookingError {
    #[error("Invalid booking request: {0}")]
    Validation(String),

    #[error("Patient has not granted the required consent")]
    ConsentMissing,

    #[error("Daily booking limit reached")]
    RateLimitExceeded,

    #[error("Professional not found")]
    ProfessionalNotFound,

    #[error("Professional is not available at the requested time")]
    ProfessionalUnavailable,

    #[error("The requested slot is already booked")]
    SlotConflict,

    #[error("Appointment not found")]
    NotFound,

    #[error("Appointment in status {0} does not allow this transition")]
    InvalidStatusTransition(AppointmentStatus),

    #[error("Database error: {0}")]
    Database(String),
}
