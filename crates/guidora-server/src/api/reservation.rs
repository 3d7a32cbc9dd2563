//! Availability and booking endpoints.
//!
//! Specialists publish ranges which are stored as 30-minute chunks. A
//! booking either takes every requested chunk or none of them, and records
//! the specialist it was made with.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use guidora_core::{Chunk, DaySchedule, SlotError, SlotRange};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::auth::{authorize, TokenRequest};
use crate::api::error::{ApiResult, ErrorResponse};
use crate::api::STATUS_SUCCESS;
use crate::state::SharedState;

/// Creates the reservation router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/set_spe_avi_slots", post(set_specialist_slots))
        .route("/set_user_slot", post(reserve_slots))
        .route("/get_reserved_slots", post(get_reserved_slots))
        .route("/del_reserved_slots", post(cancel_reservation))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// A time range on one day, end exclusive.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"day": "2025-12-28", "start": "08:00", "end": "09:00"}))]
pub struct SlotItem {
    /// `YYYY-MM-DD`.
    #[schema(example = "2025-12-28")]
    pub day: String,
    /// `HH:MM`, on the hour or half hour.
    #[schema(example = "08:00")]
    pub start: String,
    /// `HH:MM`, on the hour or half hour. `24:00` ends the day.
    #[schema(example = "09:00")]
    pub end: String,
}

impl SlotItem {
    fn parse(&self) -> Result<SlotRange, SlotError> {
        SlotRange::parse(&self.day, &self.start, &self.end)
    }
}

fn parse_slots(items: &[SlotItem]) -> Result<Vec<SlotRange>, SlotError> {
    items.iter().map(SlotItem::parse).collect()
}

/// Request body for publishing availability.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SetAvailabilityRequest {
    /// Specialist uid.
    pub uid: String,
    /// Session token.
    pub token: String,
    /// Ranges to offer. Replaces any earlier availability.
    pub slots: Vec<SlotItem>,
}

/// Response after publishing availability.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"status": "success", "total_slots": 2}))]
pub struct SetAvailabilityResponse {
    /// Always `success`.
    pub status: String,
    /// Number of 30-minute chunks now on offer.
    pub total_slots: usize,
}

/// Request body for booking.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReserveSlotsRequest {
    /// User uid.
    pub uid: String,
    /// Session token.
    pub token: String,
    /// Specialist first name.
    pub fname: String,
    /// Specialist last name.
    pub lname: String,
    /// Ranges to book.
    pub slots: Vec<SlotItem>,
}

/// Response after booking.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "success",
    "reserved_count": 1,
    "reserved_slots": ["2025-12-28T08:00:00Z"]
}))]
pub struct ReserveSlotsResponse {
    /// Always `success`.
    pub status: String,
    /// Number of chunks booked.
    pub reserved_count: usize,
    /// Booked chunk start times, ascending.
    #[schema(value_type = Vec<String>)]
    pub reserved_slots: Vec<Chunk>,
}

/// A user's appointments.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "fname": "ali",
    "lname": "rostami",
    "specialist_fname": "sara",
    "specialist_lname": "karimi",
    "slots": {"2025-12-28": [{"start": "08:00", "end": "09:00"}]}
}))]
pub struct ReservedSlotsResponse {
    /// The caller's first name, empty before the profile is set.
    pub fname: String,
    /// The caller's last name, empty before the profile is set.
    pub lname: String,
    /// First name of the specialist last booked, empty when nothing is booked.
    pub specialist_fname: String,
    /// Last name of the specialist last booked, empty when nothing is booked.
    pub specialist_lname: String,
    /// Appointments per day.
    #[schema(value_type = Object)]
    pub slots: DaySchedule,
}

/// Request body for cancelling.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CancelReservationRequest {
    /// User uid.
    pub uid: String,
    /// Session token.
    pub token: String,
    /// Specialist first name.
    pub fname: String,
    /// Specialist last name.
    pub lname: String,
}

/// Response after cancelling.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancelReservationResponse {
    /// Always `success`.
    pub status: String,
    /// What was cancelled.
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Publish a specialist's availability.
#[utoipa::path(
    post,
    path = "/reservation/set_spe_avi_slots",
    tag = "reservation",
    operation_id = "setSpecialistSlots",
    summary = "Publish availability",
    description = "Replaces the specialist's offered time with the given ranges. Chunks \
        already booked are not offered again. Requires a capability tag on the profile.",
    request_body = SetAvailabilityRequest,
    responses(
        (status = 200, description = "Availability replaced", body = SetAvailabilityResponse),
        (status = 400, description = "Malformed or misaligned range", body = ErrorResponse),
        (status = 401, description = "Invalid session", body = ErrorResponse),
        (status = 403, description = "Not a specialist", body = ErrorResponse),
        (status = 404, description = "Account not found", body = ErrorResponse)
    )
)]
pub async fn set_specialist_slots(
    State(state): State<SharedState>,
    Json(request): Json<SetAvailabilityRequest>,
) -> ApiResult<Json<SetAvailabilityResponse>> {
    let account = authorize(&state, &request.uid, &request.token).await?;
    let ranges = parse_slots(&request.slots)?;

    let total_slots = state
        .reservations
        .publish_availability(&account.uid, &ranges)
        .await?;

    Ok(Json(SetAvailabilityResponse {
        status: STATUS_SUCCESS.to_string(),
        total_slots,
    }))
}

/// Book chunks with a specialist.
#[utoipa::path(
    post,
    path = "/reservation/set_user_slot",
    tag = "reservation",
    operation_id = "reserveSlots",
    summary = "Reserve slots",
    description = "Books every chunk in the given ranges with the named specialist, or \
        nothing if any chunk is unavailable. The booking replaces the specialist recorded \
        on the caller's reservation.",
    request_body = ReserveSlotsRequest,
    responses(
        (status = 200, description = "Slots booked", body = ReserveSlotsResponse),
        (status = 400, description = "Malformed range or slot conflict", body = ErrorResponse),
        (status = 401, description = "Invalid session", body = ErrorResponse),
        (status = 403, description = "Not a user", body = ErrorResponse),
        (status = 404, description = "Specialist not found", body = ErrorResponse)
    )
)]
pub async fn reserve_slots(
    State(state): State<SharedState>,
    Json(request): Json<ReserveSlotsRequest>,
) -> ApiResult<Json<ReserveSlotsResponse>> {
    let account = authorize(&state, &request.uid, &request.token).await?;
    let ranges = parse_slots(&request.slots)?;

    let result = state
        .reservations
        .reserve_slots(&account.uid, &request.fname, &request.lname, &ranges)
        .await?;

    Ok(Json(ReserveSlotsResponse {
        status: STATUS_SUCCESS.to_string(),
        reserved_count: result.reserved.len(),
        reserved_slots: result.reserved,
    }))
}

/// List the caller's appointments.
#[utoipa::path(
    post,
    path = "/reservation/get_reserved_slots",
    tag = "reservation",
    operation_id = "getReservedSlots",
    summary = "List reserved slots",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Appointments per day", body = ReservedSlotsResponse),
        (status = 401, description = "Invalid session", body = ErrorResponse),
        (status = 403, description = "Not a user", body = ErrorResponse),
        (status = 404, description = "Account not found", body = ErrorResponse)
    )
)]
pub async fn get_reserved_slots(
    State(state): State<SharedState>,
    Json(request): Json<TokenRequest>,
) -> ApiResult<Json<ReservedSlotsResponse>> {
    let account = authorize(&state, &request.uid, &request.token).await?;
    let reserved = state.reservations.list_reserved_slots(&account.uid).await?;

    let (specialist_fname, specialist_lname) = reserved
        .specialist
        .map(|s| (s.first_name, s.last_name))
        .unwrap_or_default();

    Ok(Json(ReservedSlotsResponse {
        fname: account.first_name.unwrap_or_default(),
        lname: account.last_name.unwrap_or_default(),
        specialist_fname,
        specialist_lname,
        slots: reserved.schedule,
    }))
}

/// Cancel the caller's appointments with a specialist.
#[utoipa::path(
    post,
    path = "/reservation/del_reserved_slots",
    tag = "reservation",
    operation_id = "cancelReservation",
    summary = "Cancel a reservation",
    description = "Drops every appointment when the name matches the specialist on the \
        caller's reservation. The time is not offered again until the specialist \
        republishes it.",
    request_body = CancelReservationRequest,
    responses(
        (status = 200, description = "Reservation cancelled", body = CancelReservationResponse),
        (status = 400, description = "Nothing to cancel", body = ErrorResponse),
        (status = 401, description = "Invalid session", body = ErrorResponse),
        (status = 500, description = "Booked slots could not be released", body = ErrorResponse)
    )
)]
pub async fn cancel_reservation(
    State(state): State<SharedState>,
    Json(request): Json<CancelReservationRequest>,
) -> ApiResult<Json<CancelReservationResponse>> {
    let account = authorize(&state, &request.uid, &request.token).await?;
    let specialist = state
        .reservations
        .cancel_reservation(&account.uid, &request.fname, &request.lname)
        .await?;

    Ok(Json(CancelReservationResponse {
        status: STATUS_SUCCESS.to_string(),
        message: format!(
            "Reservation with {} {} cancelled",
            specialist.first_name, specialist.last_name
        ),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slots_rejects_any_bad_item() {
        let good = SlotItem {
            day: "2025-12-28".into(),
            start: "08:00".into(),
            end: "09:00".into(),
        };
        let bad = SlotItem {
            day: "28/12/2025".into(),
            ..good.clone()
        };

        assert_eq!(parse_slots(&[good.clone()]).unwrap().len(), 1);
        assert!(parse_slots(&[good, bad]).is_err());
    }

    #[test]
    fn test_reserve_response_uses_wire_chunks() {
        let response = ReserveSlotsResponse {
            status: STATUS_SUCCESS.into(),
            reserved_count: 1,
            reserved_slots: vec!["2025-12-28T08:00:00Z".parse().unwrap()],
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["reserved_slots"][0], "2025-12-28T08:00:00Z");
    }
}
