//! Profile endpoints.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use guidora_core::{CapabilityTag, SpecialistProfileInput, UserProfileInput};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::auth::authorize;
use crate::api::error::{ApiResult, ErrorResponse};
use crate::api::STATUS_SUCCESS;
use crate::state::SharedState;

/// Creates the profile router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/set_user_profile", post(set_user_profile))
        .route("/set_spe_profile", post(set_specialist_profile))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for a user's profile.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "uid": "3f1c...",
    "token": "eyJ...",
    "fname": "Ali",
    "lname": "Rezaei",
    "age": 29,
    "gender": "man"
}))]
pub struct SetUserProfileRequest {
    /// Account uid.
    pub uid: String,
    /// Session token.
    pub token: String,
    /// First name, up to 70 characters.
    pub fname: String,
    /// Last name, up to 70 characters.
    pub lname: String,
    /// Age, 10 to 99.
    pub age: u32,
    /// `man` or `woman`.
    pub gender: String,
}

/// One tag, or a list that must contain exactly one.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum TagInput {
    /// A single tag.
    One(String),
    /// A list of tags.
    Many(Vec<String>),
}

impl TagInput {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(tag) => vec![tag],
            Self::Many(tags) => tags,
        }
    }
}

/// Request body for a specialist's profile.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "uid": "3f1c...",
    "token": "eyJ...",
    "fname": "Sara",
    "lname": "Karimi",
    "age": 41,
    "gender": "woman",
    "bio": "Family lawyer",
    "credential": "LLB, University of Tehran",
    "tag": "law"
}))]
pub struct SetSpecialistProfileRequest {
    /// Account uid.
    pub uid: String,
    /// Session token.
    pub token: String,
    /// First name, up to 70 characters.
    pub fname: String,
    /// Last name, up to 70 characters.
    pub lname: String,
    /// Age, 10 to 99.
    pub age: u32,
    /// `man` or `woman`.
    pub gender: String,
    /// Biography, up to 250 characters.
    #[serde(default, alias = "about")]
    pub bio: String,
    /// Education or certification, up to 150 characters.
    #[serde(default, alias = "educert")]
    pub credential: String,
    /// `law` or `edu`.
    pub tag: TagInput,
}

/// Response after a profile update.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProfileUpdatedResponse {
    /// Always `success`.
    pub status: String,
    /// Stored tag, for specialists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<CapabilityTag>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Update a user's profile.
#[utoipa::path(
    post,
    path = "/profile/set_user_profile",
    tag = "profile",
    operation_id = "setUserProfile",
    summary = "Update a user profile",
    request_body = SetUserProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = ProfileUpdatedResponse),
        (status = 400, description = "Invalid field", body = ErrorResponse),
        (status = 401, description = "Invalid session", body = ErrorResponse),
        (status = 403, description = "Not a user", body = ErrorResponse)
    )
)]
pub async fn set_user_profile(
    State(state): State<SharedState>,
    Json(request): Json<SetUserProfileRequest>,
) -> ApiResult<Json<ProfileUpdatedResponse>> {
    let account = authorize(&state, &request.uid, &request.token).await?;
    let input = UserProfileInput {
        first_name: request.fname,
        last_name: request.lname,
        age: request.age,
        gender: request.gender,
    };
    state.profiles.set_user_profile(&account.uid, &input).await?;

    Ok(Json(ProfileUpdatedResponse {
        status: STATUS_SUCCESS.to_string(),
        tag: None,
    }))
}

/// Update a specialist's profile.
#[utoipa::path(
    post,
    path = "/profile/set_spe_profile",
    tag = "profile",
    operation_id = "setSpecialistProfile",
    summary = "Update a specialist profile",
    description = "Sets names, age, gender, bio, credential and the capability tag. \
        The tag must be exactly one of `law` or `edu`.",
    request_body = SetSpecialistProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = ProfileUpdatedResponse),
        (status = 400, description = "Invalid field or tag", body = ErrorResponse),
        (status = 401, description = "Invalid session", body = ErrorResponse),
        (status = 403, description = "Not a specialist", body = ErrorResponse)
    )
)]
pub async fn set_specialist_profile(
    State(state): State<SharedState>,
    Json(request): Json<SetSpecialistProfileRequest>,
) -> ApiResult<Json<ProfileUpdatedResponse>> {
    let account = authorize(&state, &request.uid, &request.token).await?;
    let input = SpecialistProfileInput {
        first_name: request.fname,
        last_name: request.lname,
        age: request.age,
        gender: request.gender,
        bio: request.bio,
        credential_text: request.credential,
        tags: request.tag.into_vec(),
    };
    let updated = state
        .profiles
        .set_specialist_profile(&account.uid, &input)
        .await?;

    Ok(Json(ProfileUpdatedResponse {
        status: STATUS_SUCCESS.to_string(),
        tag: updated.as_specialist().and_then(|s| s.capability_tag),
    }))
}
