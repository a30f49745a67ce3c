// libs/booking-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    Appointment, AppointmentSearchQuery, AppointmentStatus, BookAppointmentRequest, BookingError,
    CancelAppointmentRequest,
};
use crate::services::{BookingService, LifecycleService};

fn map_booking_error(e: BookingError) -> AppError {
    match e {
        BookingError::Validation(msg) => AppError::BadRequest(msg),
        BookingError::ConsentMissing => AppError::Forbidden(e.to_string()),
        BookingError::RateLimitExceeded => AppError::RateLimit(e.to_string()),
        BookingError::ProfessionalNotFound | BookingError::NotFound => {
            AppError::NotFound(e.to_string())
        }
        BookingError::ProfessionalUnavailable => AppError::Unavailable(e.to_string()),
        BookingError::SlotConflict => AppError::Conflict(e.to_string()),
        BookingError::InvalidStatusTransition(_) => AppError::InvalidTransition(e.to_string()),
        BookingError::Database(msg) => AppError::Database(msg),
    }
}

fn is_participant(user: &User, appointment: &Appointment) -> bool {
    user.id == appointment.patient_id.to_string()
        || user.id == appointment.professional_id.to_string()
}

fn is_the_professional(user: &User, appointment: &Appointment) -> bool {
    user.id == appointment.professional_id.to_string()
}

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    // Patients book for themselves; admins may book on a patient's behalf.
    if user.id != request.patient_id.to_string() && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Not authorized to book for this patient".to_string(),
        ));
    }

    let booking_service = BookingService::new(&state);

    let response = booking_service
        .book(request, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!(response)))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let lifecycle_service = LifecycleService::new(&state);

    let appointment = lifecycle_service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_booking_error)?;

    if !is_participant(&user, &appointment) && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Not authorized to view this appointment".to_string(),
        ));
    }

    Ok(Json(json!(appointment)))
}

/// Search is always scoped: non-admin callers only ever see appointments
/// they participate in, whatever filters they pass.
#[axum::debug_handler]
pub async fn search_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(mut query): Query<AppointmentSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !user.is_admin() {
        let own_id = Uuid::parse_str(&user.id)
            .map_err(|_| AppError::Auth("Invalid user id in token".to_string()))?;
        if user.is_professional() {
            query.professional_id = Some(own_id);
        } else {
            query.patient_id = Some(own_id);
        }
    }

    let lifecycle_service = LifecycleService::new(&state);

    let appointments = lifecycle_service
        .search(&query, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({ "appointments": appointments })))
}

#[axum::debug_handler]
pub async fn confirm_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    transition_as_professional(
        &state,
        appointment_id,
        AppointmentStatus::Confirmed,
        auth.token(),
        &user,
    )
    .await
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let lifecycle_service = LifecycleService::new(&state);

    let appointment = lifecycle_service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_booking_error)?;

    if !is_participant(&user, &appointment) && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Not authorized to cancel this appointment".to_string(),
        ));
    }

    let updated = lifecycle_service
        .transition(
            appointment_id,
            AppointmentStatus::Cancelled,
            Some(request.cancelled_by),
            token,
        )
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!(updated)))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    transition_as_professional(
        &state,
        appointment_id,
        AppointmentStatus::Completed,
        auth.token(),
        &user,
    )
    .await
}

#[axum::debug_handler]
pub async fn mark_no_show(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    transition_as_professional(
        &state,
        appointment_id,
        AppointmentStatus::NoShow,
        auth.token(),
        &user,
    )
    .await
}

/// Confirm, complete and no-show are the professional's calls to make.
async fn transition_as_professional(
    state: &Arc<AppConfig>,
    appointment_id: Uuid,
    next: AppointmentStatus,
    token: &str,
    user: &User,
) -> Result<Json<Value>, AppError> {
    let lifecycle_service = LifecycleService::new(state);

    let appointment = lifecycle_service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_booking_error)?;

    if !is_the_professional(user, &appointment) && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Not authorized to update this appointment".to_string(),
        ));
    }

    let updated = lifecycle_service
        .transition(appointment_id, next, None, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!(updated)))
}
