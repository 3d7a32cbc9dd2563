//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `auth` - OTP login and session token checks
//! - `profile` - Profile updates for users and specialists
//! - `home` - Home screen and specialist lookup
//! - `reservation` - Availability publishing and booking
//! - `health` - Service health checks
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::http::{header, Method};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod auth;
pub mod error;
pub mod health;
pub mod home;
pub mod openapi;
pub mod profile;
pub mod reservation;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};

// Re-export OpenAPI utilities for the gen-openapi binary
pub use openapi::{get_openapi_json, ApiDoc};

/// `status` value of every successful mutation response.
pub const STATUS_SUCCESS: &str = "success";

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                 - Health check
/// /auth                   - send_otp, verify_otp, check_jwt
/// /profile                - set_user_profile, set_spe_profile
/// /home                   - homepage, get_spe_info
/// /reservation            - set_spe_avi_slots, set_user_slot,
///                           get_reserved_slots, del_reserved_slots
/// /api/openapi.json       - OpenAPI specification
/// /swagger-ui             - Interactive documentation
/// ```
pub fn create_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .nest("/health", health::router())
        .nest("/auth", auth::router())
        .nest("/profile", profile::router())
        .nest("/home", home::router())
        .nest("/reservation", reservation::router())
        .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
