// libs/availability-cell/src/handlers.rs
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

use crate::models::{ReplaceScheduleRequest, ScheduleError, SlotQuery, SUPPORTED_SESSION_DURATIONS};
use crate::services::{AvailabilityService, ScheduleService};

fn map_schedule_error(e: ScheduleError) -> AppError {
    match e {
        ScheduleError::InvalidRule { .. } | ScheduleError::RuleOverlap { .. } => {
            AppError::BadRequest(e.to_string())
        }
        ScheduleError::ProfessionalNotFound => {
            AppError::NotFound("Professional not found".to_string())
        }
        ScheduleError::Database(msg) => AppError::Database(msg),
    }
}

/// Slot grid for one professional on one date. Any authenticated user may
/// look, this is how patients find a bookable time.
#[axum::debug_handler]
pub async fn get_slots(
    State(state): State<Arc<AppConfig>>,
    Path(professional_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if let Some(duration) = query.duration {
        if !SUPPORTED_SESSION_DURATIONS.contains(&duration) {
            return Err(AppError::BadRequest(format!(
                "duration must be one of {:?}",
                SUPPORTED_SESSION_DURATIONS
            )));
        }
    }

    let availability_service = AvailabilityService::new(&state);

    let slots = availability_service
        .get_available_slots(professional_id, query, token)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(Json(json!({ "slots": slots })))
}

/// Full weekly rule set. Only the professional themselves or an admin may
/// read it; patients see derived slots instead.
#[axum::debug_handler]
pub async fn get_schedule(
    State(state): State<Arc<AppConfig>>,
    Path(professional_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if user.id != professional_id.to_string() && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Not authorized to view this schedule".to_string(),
        ));
    }

    let availability_service = AvailabilityService::new(&state);

    let rules = availability_service
        .get_schedule(professional_id, token)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(Json(json!({ "rules": rules })))
}

/// Replace the professional's entire weekly schedule in one shot. The request
/// carries the complete desired rule set; an empty list clears the schedule.
#[axum::debug_handler]
pub async fn replace_schedule(
    State(state): State<Arc<AppConfig>>,
    Path(professional_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<ReplaceScheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if user.id != professional_id.to_string() && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Not authorized to modify this schedule".to_string(),
        ));
    }

    let schedule_service = ScheduleService::new(&state);

    let rules = schedule_service
        .replace_schedule(professional_id, request.rules, token)
        .await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({ "rules_configured": rules.len(), "rules": rules })))
}
