use anyhow::Result;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Postgres error class raised by an exclusion-constraint violation. PostgREST
/// surfaces it when two transactions insert overlapping appointment ranges;
/// the losing request must become a slot conflict, never a silent success.
pub const PG_EXCLUSION_VIOLATION: &str = "23P01";

/// A failed PostgREST call, preserving the HTTP status and the Postgres error
/// code so callers can map storage-level constraint violations onto domain
/// errors instead of string-matching messages.
#[derive(Debug, Clone, Error)]
#[error("PostgREST error ({status}): {message}")]
pub struct PostgrestError {
    pub status: u16,
    pub code: Option<String>,
    pub message: String,
}

impl PostgrestError {
    /// Only the `23P01` code counts. PostgREST also answers 409 for foreign
    /// key and unique violations, which are not slot conflicts.
    pub fn is_exclusion_violation(&self) -> bool {
        self.code.as_deref() == Some(PG_EXCLUSION_VIOLATION)
    }
}

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.clone(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn headers(&self, auth_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.anon_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", token))?);
        }

        Ok(headers)
    }

    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making request to {}", url);

        let mut headers = self.headers(auth_token)?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url).headers(headers);
        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("PostgREST error ({}): {}", status, error_text);

            // PostgREST error bodies carry the Postgres error code as "code".
            let code = serde_json::from_str::<Value>(&error_text)
                .ok()
                .and_then(|v| v.get("code").and_then(Value::as_str).map(str::to_string));
            let message = serde_json::from_str::<Value>(&error_text)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(error_text);

            return Err(PostgrestError {
                status: status.as_u16(),
                code,
                message,
            }
            .into());
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// Call a stored procedure via `/rest/v1/rpc/<function>`. The atomic
    /// operations (booking insert, full-schedule replace) live server-side so
    /// their check-and-write runs as one transaction.
    pub async fn rpc<T>(&self, function: &str, auth_token: Option<&str>, args: Value) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let path = format!("/rest/v1/rpc/{}", function);
        self.request(Method::POST, &path, auth_token, Some(args)).await
    }
}

/// Inspect an `anyhow` chain for a typed PostgREST failure.
pub fn as_postgrest_error(err: &anyhow::Error) -> Option<&PostgrestError> {
    err.downcast_ref::<PostgrestError>()
}
