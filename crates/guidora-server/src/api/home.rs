//! Home screen and specialist directory endpoints.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use guidora_core::{Directory, SpecialistDetails};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::api::auth::{authorize, TokenRequest};
use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the home router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/homepage", post(homepage))
        .route("/get_spe_info", post(get_specialist_info))
}

/// Request body for a specialist lookup.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SpecialistInfoRequest {
    /// Caller uid.
    pub uid: String,
    /// Caller session token.
    #[serde(alias = "jwt")]
    pub token: String,
    /// Specialist first name.
    pub fname: String,
    /// Specialist last name.
    pub lname: String,
}

/// The caller's account plus every specialist.
#[utoipa::path(
    post,
    path = "/home/homepage",
    tag = "directory",
    operation_id = "homepage",
    summary = "Home screen data",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Current account and specialist list", body = Directory),
        (status = 401, description = "Invalid session", body = ErrorResponse)
    )
)]
pub async fn homepage(
    State(state): State<SharedState>,
    Json(request): Json<TokenRequest>,
) -> ApiResult<Json<Directory>> {
    let account = authorize(&state, &request.uid, &request.token).await?;
    Ok(Json(state.profiles.home(&account).await?))
}

/// One specialist's public profile and open time.
#[utoipa::path(
    post,
    path = "/home/get_spe_info",
    tag = "directory",
    operation_id = "getSpecialistInfo",
    summary = "Specialist profile",
    description = "Looks a specialist up by first and last name (case-insensitive) and \
        returns their profile with available time consolidated per day.",
    request_body = SpecialistInfoRequest,
    responses(
        (status = 200, description = "Specialist found", body = SpecialistDetails),
        (status = 401, description = "Invalid session", body = ErrorResponse),
        (status = 404, description = "No specialist with this name", body = ErrorResponse)
    )
)]
pub async fn get_specialist_info(
    State(state): State<SharedState>,
    Json(request): Json<SpecialistInfoRequest>,
) -> ApiResult<Json<SpecialistDetails>> {
    authorize(&state, &request.uid, &request.token).await?;
    let details = state
        .profiles
        .specialist_info(&request.fname, &request.lname)
        .await?;
    Ok(Json(details))
}
