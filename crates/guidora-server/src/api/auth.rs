//! Login endpoints.
//!
//! A phone number receives a six-digit code by SMS; submitting it returns a
//! session token. Every other endpoint takes `uid` and `token` in the body
//! and checks them with [`authorize`].

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use guidora_core::{Account, BookingError, Role};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::{AppState, SharedState};

/// Creates the auth router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/send_otp", post(send_otp))
        .route("/verify_otp", post(verify_otp))
        .route("/check_jwt", post(check_jwt))
}

/// Validate a session token and return the account it belongs to.
pub(crate) async fn authorize(state: &AppState, uid: &str, token: &str) -> ApiResult<Account> {
    Ok(state.tokens.validate(uid, token).await?)
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for sending a code.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({"number": "09123456789", "role": "user"}))]
pub struct SendOtpRequest {
    /// Phone number, `09` followed by nine digits.
    #[schema(example = "09123456789")]
    pub number: String,
    /// Account kind to log in as.
    #[serde(default)]
    pub role: Role,
}

/// Response after a code was stored and texted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendOtpResponse {
    /// Always `true`.
    pub ok: bool,
    /// Whether the SMS provider accepted the message.
    pub sms_sent: bool,
}

/// Request body for submitting a code.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({"number": "09123456789", "otp": "482913", "role": "user"}))]
pub struct VerifyOtpRequest {
    /// Phone number the code was sent to.
    pub number: String,
    /// The six-digit code.
    #[schema(example = "482913")]
    pub otp: String,
    /// Account kind to log in as.
    #[serde(default)]
    pub role: Role,
}

/// A fresh session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerifyOtpResponse {
    /// Session token. Any earlier token for this account stops working.
    pub token: String,
    /// Account uid.
    pub uid: String,
}

/// Session credentials.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// Account uid.
    pub uid: String,
    /// Session token.
    pub token: String,
}

/// Token check result.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckTokenResponse {
    /// Always `true`; failures are reported as 401.
    pub ok: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Send a one-time code.
#[utoipa::path(
    post,
    path = "/auth/send_otp",
    tag = "auth",
    operation_id = "sendOtp",
    summary = "Send a login code by SMS",
    description = "Creates the account on first use. The code is valid for three minutes. \
        If the SMS provider fails the code is still stored and the response is 502.",
    request_body = SendOtpRequest,
    responses(
        (status = 200, description = "Code stored and sent", body = SendOtpResponse),
        (status = 400, description = "Malformed phone number", body = ErrorResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse),
        (status = 502, description = "SMS provider failed", body = ErrorResponse)
    )
)]
pub async fn send_otp(
    State(state): State<SharedState>,
    Json(request): Json<SendOtpRequest>,
) -> ApiResult<Json<SendOtpResponse>> {
    let issued = state.otp.request_otp(&request.number, request.role).await?;

    if let Some(err) = issued.sms_error {
        return Err(BookingError::from(err).into());
    }

    Ok(Json(SendOtpResponse {
        ok: true,
        sms_sent: issued.sms_sent,
    }))
}

/// Exchange a code for a session token.
#[utoipa::path(
    post,
    path = "/auth/verify_otp",
    tag = "auth",
    operation_id = "verifyOtp",
    summary = "Verify a login code",
    description = "Consumes the code and returns a new session token. Earlier tokens \
        for the account are revoked.",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Logged in", body = VerifyOtpResponse),
        (status = 400, description = "Invalid or expired code", body = ErrorResponse),
        (status = 404, description = "No account for this number", body = ErrorResponse),
        (status = 500, description = "Token or storage failure", body = ErrorResponse)
    )
)]
pub async fn verify_otp(
    State(state): State<SharedState>,
    Json(request): Json<VerifyOtpRequest>,
) -> ApiResult<Json<VerifyOtpResponse>> {
    let verified = state
        .otp
        .verify_otp(&request.number, &request.otp, request.role)
        .await?;

    Ok(Json(VerifyOtpResponse {
        token: verified.token,
        uid: verified.uid,
    }))
}

/// Check a session token.
#[utoipa::path(
    post,
    path = "/auth/check_jwt",
    tag = "auth",
    operation_id = "checkToken",
    summary = "Check a session token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token is current", body = CheckTokenResponse),
        (status = 401, description = "Token is invalid, expired or revoked", body = ErrorResponse)
    )
)]
pub async fn check_jwt(
    State(state): State<SharedState>,
    Json(request): Json<TokenRequest>,
) -> ApiResult<Json<CheckTokenResponse>> {
    authorize(&state, &request.uid, &request.token).await?;
    Ok(Json(CheckTokenResponse { ok: true }))
}
