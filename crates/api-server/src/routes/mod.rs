//! Route handlers

pub mod health;
pub mod task;

use axum::{
    http::{Method, Uri},
    middleware, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::rate_limit;
use crate::state::AppState;

/// Full application router: health endpoints, rate-limited `/api/v1`, 404 fallback
pub fn router(state: AppState) -> Router {
    let api = Router::new().merge(task::router()).route_layer(
        middleware::from_fn_with_state(state.clone(), rate_limit::enforce),
    );

    Router::new()
        .merge(health::router())
        .nest("/api/v1", api)
        .fallback(not_found)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

async fn not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::NotFound(format!("Endpoint {} {} not found", method, uri.path()))
}
