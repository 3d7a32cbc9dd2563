//! OpenAPI specification generation for the guidora API.
//!
//! The document is served at `/api/openapi.json`, browsable at `/swagger-ui`,
//! and written to disk by the `gen-openapi` binary for client generation.

use guidora_core::{
    AccountSummary, CapabilityTag, Directory, Gender, Role, SpecialistDetails,
    SpecialistSummary, TimeSpan,
};
use utoipa::OpenApi;

use super::auth::{
    CheckTokenResponse, SendOtpRequest, SendOtpResponse, TokenRequest, VerifyOtpRequest,
    VerifyOtpResponse,
};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::home::SpecialistInfoRequest;
use super::profile::{
    ProfileUpdatedResponse, SetSpecialistProfileRequest, SetUserProfileRequest, TagInput,
};
use super::reservation::{
    CancelReservationRequest, CancelReservationResponse, ReserveSlotsRequest,
    ReserveSlotsResponse, ReservedSlotsResponse, SetAvailabilityRequest,
    SetAvailabilityResponse, SlotItem,
};

/// Returns the OpenAPI specification as pretty JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for guidora.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "guidora API",
        version = "0.1.0",
        description = r#"
# guidora API

Book time with specialists (lawyers and educators) in 30-minute slots.

## Flow

1. **Login**: `sendOtp` texts a six-digit code; `verifyOtp` exchanges it for a session token.
2. **Profile**: set names and details; specialists also choose a tag (`law` or `edu`).
3. **Availability**: specialists publish ranges with `setSpecialistSlots`.
4. **Booking**: users browse with `homepage` / `getSpecialistInfo` and book with `reserveSlots`.

Every request except login and health carries `uid` and `token` in the JSON body.
Logging in again revokes the previous token.

## Time format

Days are `YYYY-MM-DD`, times are `HH:MM` on the hour or half hour, all in UTC.
Booked slots are reported as instants such as `2025-12-28T08:00:00Z`.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local guidora server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "auth", description = "Phone-number login and session tokens"),
        (name = "profile", description = "Profile updates"),
        (name = "directory", description = "Home screen and specialist lookup"),
        (name = "reservation", description = "Availability publishing and booking")
    ),
    paths(
        super::health::health_check,
        super::auth::send_otp,
        super::auth::verify_otp,
        super::auth::check_jwt,
        super::profile::set_user_profile,
        super::profile::set_specialist_profile,
        super::home::homepage,
        super::home::get_specialist_info,
        super::reservation::set_specialist_slots,
        super::reservation::reserve_slots,
        super::reservation::get_reserved_slots,
        super::reservation::cancel_reservation,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            // Auth
            SendOtpRequest,
            SendOtpResponse,
            VerifyOtpRequest,
            VerifyOtpResponse,
            TokenRequest,
            CheckTokenResponse,
            // Profile
            SetUserProfileRequest,
            SetSpecialistProfileRequest,
            TagInput,
            ProfileUpdatedResponse,
            // Directory
            SpecialistInfoRequest,
            Directory,
            AccountSummary,
            SpecialistSummary,
            SpecialistDetails,
            Role,
            Gender,
            CapabilityTag,
            // Reservation
            SlotItem,
            TimeSpan,
            SetAvailabilityRequest,
            SetAvailabilityResponse,
            ReserveSlotsRequest,
            ReserveSlotsResponse,
            ReservedSlotsResponse,
            CancelReservationRequest,
            CancelReservationResponse,
        )
    )
)]
pub struct ApiDoc;
