// libs/booking-cell/src/services/repository.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, AppointmentSearchQuery, AppointmentStatus, CancelledBy};

/// PostgREST access for the appointments table. Row creation is not here;
/// booking goes through a database function so the slot-conflict check and
/// the insert commit together.
pub struct AppointmentRepository {
    supabase: SupabaseClient,
}

impl AppointmentRepository {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<Appointment>> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        Ok(result.into_iter().next())
    }

    pub async fn search_appointments(
        &self,
        query: &AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>> {
        let mut path = String::from("/rest/v1/appointments?");

        if let Some(patient_id) = query.patient_id {
            path.push_str(&format!("patient_id=eq.{}&", patient_id));
        }
        if let Some(professional_id) = query.professional_id {
            path.push_str(&format!("professional_id=eq.{}&", professional_id));
        }
        if let Some(status) = query.status {
            path.push_str(&format!("status=eq.{}&", status));
        }
        if let Some(from) = query.from {
            path.push_str(&format!(
                "start_time=gte.{}&",
                urlencoding::encode(&from.to_rfc3339())
            ));
        }
        if let Some(to) = query.to {
            path.push_str(&format!(
                "start_time=lt.{}&",
                urlencoding::encode(&to.to_rfc3339())
            ));
        }

        let limit = query.limit.unwrap_or(50).clamp(1, 200);
        let offset = query.offset.unwrap_or(0).max(0);
        path.push_str(&format!(
            "order=start_time.desc&limit={}&offset={}",
            limit, offset
        ));

        let result: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        Ok(result)
    }

    /// How many appointments this patient has created since `since`,
    /// regardless of their current status.
    pub async fn count_created_since(
        &self,
        patient_id: Uuid,
        since: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<usize> {
        let path = format!(
            "/rest/v1/appointments?patient_id=eq.{}&created_at=gte.{}&select=id",
            patient_id,
            urlencoding::encode(&since.to_rfc3339())
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        Ok(result.len())
    }

    /// Non-cancelled appointments whose interval intersects [start, end).
    /// `end_time` is a generated column, so the half-open comparison runs
    /// inside the database.
    pub async fn find_overlapping(
        &self,
        professional_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>> {
        let path = format!(
            "/rest/v1/appointments?professional_id=eq.{}&status=neq.cancelled&end_time=gt.{}&start_time=lt.{}",
            professional_id,
            urlencoding::encode(&start.to_rfc3339()),
            urlencoding::encode(&end.to_rfc3339()),
        );
        let result: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        Ok(result)
    }

    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        cancelled_by: Option<CancelledBy>,
        auth_token: &str,
    ) -> Result<Option<Appointment>> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);

        let mut body = json!({
            "status": new_status,
            "updated_at": Utc::now(),
        });
        if let Some(by) = cancelled_by {
            body["cancelled_by"] = json!(by);
        }

        // PostgREST only echoes the updated row when asked to.
        let mut prefer = reqwest::header::HeaderMap::new();
        prefer.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Appointment> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(body), Some(prefer))
            .await?;
        Ok(result.into_iter().next())
    }

    /// Insert through the `book_appointment` database function. The function
    /// re-checks the interval under an exclusion constraint, so two racing
    /// bookings cannot both land.
    pub async fn book(
        &self,
        patient_id: Uuid,
        professional_id: Uuid,
        start: DateTime<Utc>,
        duration_minutes: i32,
        modality: &str,
        reason: Option<&str>,
        auth_token: &str,
    ) -> Result<Appointment> {
        let args = json!({
            "p_patient_id": patient_id,
            "p_professional_id": professional_id,
            "p_start_time": start,
            "p_duration_minutes": duration_minutes,
            "p_modality": modality,
            "p_reason": reason,
        });

        let result: Vec<Appointment> = self
            .supabase
            .rpc("book_appointment", Some(auth_token), args)
            .await?;

        result
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("book_appointment returned no row"))
    }

    pub(crate) fn client(&self) -> &SupabaseClient {
        &self.supabase
    }
}
