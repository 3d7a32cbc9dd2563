//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use guidora_core::BookingError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input, bad code, or a slot conflict.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional structured details.
        details: Option<Value>,
    },

    /// 401 Unauthorized - Missing, invalid, expired or revoked token.
    Unauthorized {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 403 Forbidden - The account has the wrong role.
    Forbidden {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - Resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 502 Bad Gateway - The SMS provider rejected or failed the request.
    BadGateway {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Provider error.
        details: Option<Value>,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details, e.g. what needs reconciling.
        details: Option<Value>,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "invalid_phone_number",
    "message": "Invalid phone number '0912'. Expected 09 followed by 9 digits.",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "slot_conflict").
    #[schema(example = "invalid_phone_number")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Invalid phone number '0912'. Expected 09 followed by 9 digits.")]
    pub message: String,

    /// Optional additional details.
    #[schema(nullable)]
    pub details: Option<Value>,
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn into_body(self) -> ErrorResponse {
        let (error, message, details) = match self {
            Self::Unauthorized {
                error_code,
                message,
            }
            | Self::Forbidden {
                error_code,
                message,
            }
            | Self::NotFound {
                error_code,
                message,
            } => (error_code, message, None),

            Self::BadRequest {
                error_code,
                message,
                details,
            }
            | Self::BadGateway {
                error_code,
                message,
                details,
            }
            | Self::InternalError {
                error_code,
                message,
                details,
            } => (error_code, message, details),
        };

        ErrorResponse {
            error,
            message,
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );
            }
            Self::BadGateway {
                error_code,
                message,
                ..
            } => {
                tracing::warn!(error_code = %error_code, message = %message, "Upstream failure");
            }
            _ => {}
        }

        (status, Json(self.into_body())).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::Unauthorized { message, .. } => write!(f, "Unauthorized: {message}"),
            Self::Forbidden { message, .. } => write!(f, "Forbidden: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::BadGateway { message, .. } => write!(f, "Bad Gateway: {message}"),
            Self::InternalError { message, .. } => {
                write!(f, "Internal Error: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from the core error, keeping its status and code.
impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        let error_code = err.error_code().to_ascii_lowercase();
        let message = err.to_string();
        let details = match &err {
            BookingError::SlotConflict { unavailable } => {
                Some(serde_json::json!({ "unavailable": unavailable }))
            }
            BookingError::TransferIncomplete {
                specialist_uid,
                user_uid,
                chunks,
                reason,
            } => Some(serde_json::json!({
                "specialist_uid": specialist_uid,
                "user_uid": user_uid,
                "chunks": chunks,
                "reason": reason,
            })),
            BookingError::SmsProvider(reason) => Some(Value::String(reason.clone())),
            _ => None,
        };

        match err.http_status_code() {
            400 => Self::BadRequest {
                error_code,
                message,
                details,
            },
            401 => Self::Unauthorized {
                error_code,
                message,
            },
            403 => Self::Forbidden {
                error_code,
                message,
            },
            404 => Self::NotFound {
                error_code,
                message,
            },
            502 => Self::BadGateway {
                error_code,
                message,
                details,
            },
            _ => Self::InternalError {
                error_code,
                message,
                details,
            },
        }
    }
}

macro_rules! via_booking_error {
    ($($source:ty),+ $(,)?) => {
        $(
            impl From<$source> for ApiError {
                fn from(err: $source) -> Self {
                    Self::from(BookingError::from(err))
                }
            }
        )+
    };
}

via_booking_error!(
    guidora_core::OtpError,
    guidora_core::TokenError,
    guidora_core::ReservationError,
    guidora_core::ProfileError,
    guidora_core::SlotError,
    guidora_core::SmsError,
    guidora_core::StoreError,
);
