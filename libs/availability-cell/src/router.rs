// libs/availability-cell/src/router.rs
use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn availability_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route(
            "/professionals/{professional_id}/slots",
            get(handlers::get_slots),
        )
        .route(
            "/professionals/{professional_id}/schedule",
            get(handlers::get_schedule).put(handlers::replace_schedule),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
