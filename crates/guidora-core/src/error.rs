//! Unified error types for the guidora core library.
//!
//! Each module has its own error enum ([`SlotError`](crate::SlotError),
//! [`OtpError`](crate::OtpError), [`ReservationError`](crate::ReservationError),
//! ...). All of them convert into [`BookingError`], which carries the HTTP
//! status and machine-readable code the API layer reports.
//!
//! # Example
//!
//! ```rust
//! use guidora_core::error::{BookingError, Result};
//! use guidora_core::otp::is_valid_phone_number;
//!
//! fn check(phone: &str) -> Result<()> {
//!     if !is_valid_phone_number(phone) {
//!         return Err(BookingError::InvalidPhoneNumber(phone.to_string()));
//!     }
//!     Ok(())
//! }
//!
//! assert_eq!(check("123").unwrap_err().http_status_code(), 400);
//! ```

use thiserror::Error;

use crate::account::Role;
use crate::slots::Chunk;

/// The unified error type for all booking operations.
#[derive(Debug, Error)]
pub enum BookingError {
    // =========================================================================
    // VALIDATION ERRORS
    // =========================================================================
    /// Phone number is not `09` followed by nine digits.
    #[error("Invalid phone number '{0}'. Expected 09 followed by 9 digits.")]
    InvalidPhoneNumber(String),

    /// A day, time or range could not be used.
    #[error("{0}")]
    InvalidSlot(String),

    /// A profile field failed validation.
    #[error("{0}")]
    InvalidProfile(String),

    /// Availability cannot be published before a tag is set.
    #[error("Specialist {0} must set a tag ('law' or 'edu') before publishing availability")]
    MissingCapabilityTag(String),

    /// A booking request named no slots.
    #[error("No slots requested")]
    EmptyReservation,

    // =========================================================================
    // OTP ERRORS
    // =========================================================================
    /// No pending code, or the code does not match.
    #[error("Invalid verification code")]
    InvalidOtp,

    /// The code is past its lifetime.
    #[error("Verification code has expired. Request a new one.")]
    OtpExpired,

    // =========================================================================
    // SESSION ERRORS
    // =========================================================================
    /// The token could not be decoded.
    #[error("Malformed token: {0}")]
    TokenMalformed(String),

    /// The token was not signed by this server.
    #[error("Token signature is invalid")]
    TokenSignatureInvalid,

    /// The token is past its expiry.
    #[error("Token has expired. Log in again.")]
    TokenExpired,

    /// A newer token has been issued for the account.
    #[error("Token has been revoked. Log in again.")]
    TokenRevoked,

    // =========================================================================
    // ACCESS & LOOKUP ERRORS
    // =========================================================================
    /// The account exists but has the other role.
    #[error("Account {uid} is not a {expected}")]
    WrongRole {
        /// The caller's uid.
        uid: String,
        /// Role the operation needs.
        expected: Role,
    },

    /// No account with this uid.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// No account with this phone number.
    #[error("No account found for {0}")]
    PhoneNotFound(String),

    /// No specialist with this name.
    #[error("Specialist '{first_name} {last_name}' not found")]
    SpecialistNotFound {
        /// Requested first name.
        first_name: String,
        /// Requested last name.
        last_name: String,
    },

    // =========================================================================
    // RESERVATION CONFLICTS
    // =========================================================================
    /// Some requested chunks are not available. Nothing was booked.
    #[error("{} requested slot(s) are not available", .unavailable.len())]
    SlotConflict {
        /// Chunks that were not available.
        unavailable: Vec<Chunk>,
    },

    /// No reservation with the named specialist.
    #[error("No reservation to cancel with this specialist")]
    NothingToCancel,

    // =========================================================================
    // UPSTREAM ERRORS
    // =========================================================================
    /// The SMS provider did not accept the message.
    #[error("SMS provider error: {0}")]
    SmsProvider(String),

    // =========================================================================
    // PERSISTENCE & INTERNAL ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Chunks are in neither the specialist's nor the user's set.
    #[error(
        "Transfer of {} slot(s) from {specialist_uid} to {user_uid} is incomplete: {reason}",
        .chunks.len()
    )]
    TransferIncomplete {
        /// Specialist the chunks were taken from.
        specialist_uid: String,
        /// User they were meant for.
        user_uid: String,
        /// The chunks in limbo.
        chunks: Vec<Chunk>,
        /// What failed.
        reason: String,
    },

    /// A session token could not be signed.
    #[error("Failed to issue token: {0}")]
    TokenIssue(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for booking operations.
pub type Result<T> = std::result::Result<T, BookingError>;

/// Short alias for [`BookingError`].
pub type Error = BookingError;

impl BookingError {
    /// Returns `true` for malformed input.
    #[inline]
    #[must_use]
    pub const fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPhoneNumber(_)
                | Self::InvalidSlot(_)
                | Self::InvalidProfile(_)
                | Self::MissingCapabilityTag(_)
                | Self::EmptyReservation
        )
    }

    /// Returns `true` if the caller failed to prove who they are.
    #[inline]
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidOtp
                | Self::OtpExpired
                | Self::TokenMalformed(_)
                | Self::TokenSignatureInvalid
                | Self::TokenExpired
                | Self::TokenRevoked
        )
    }

    /// Returns `true` if a looked-up entity does not exist.
    #[inline]
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::AccountNotFound(_) | Self::PhoneNotFound(_) | Self::SpecialistNotFound { .. }
        )
    }

    /// Returns `true` if the request clashed with current booking state.
    #[inline]
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::SlotConflict { .. } | Self::NothingToCancel)
    }

    /// Returns `true` if an external provider failed.
    #[inline]
    #[must_use]
    pub const fn is_upstream_error(&self) -> bool {
        matches!(self, Self::SmsProvider(_))
    }

    /// Returns `true` for server-side persistence failures.
    #[inline]
    #[must_use]
    pub const fn is_storage_error(&self) -> bool {
        matches!(
            self,
            Self::PersistenceError(_) | Self::TransferIncomplete { .. } | Self::IoError(_)
        )
    }

    /// Returns `true` if this error needs an operator to reconcile state.
    #[inline]
    #[must_use]
    pub const fn needs_reconciliation(&self) -> bool {
        matches!(self, Self::TransferIncomplete { .. })
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input, bad codes, slot conflicts
            Self::InvalidPhoneNumber(_)
            | Self::InvalidSlot(_)
            | Self::InvalidProfile(_)
            | Self::MissingCapabilityTag(_)
            | Self::EmptyReservation
            | Self::InvalidOtp
            | Self::OtpExpired
            | Self::SlotConflict { .. }
            | Self::NothingToCancel => 400,

            // 401 Unauthorized - bad session
            Self::TokenMalformed(_)
            | Self::TokenSignatureInvalid
            | Self::TokenExpired
            | Self::TokenRevoked => 401,

            // 403 Forbidden - right account, wrong role
            Self::WrongRole { .. } => 403,

            // 404 Not Found
            Self::AccountNotFound(_) | Self::PhoneNotFound(_) | Self::SpecialistNotFound { .. } => {
                404
            }

            // 502 Bad Gateway - SMS provider
            Self::SmsProvider(_) => 502,

            // 500 Internal Server Error
            Self::PersistenceError(_)
            | Self::TransferIncomplete { .. }
            | Self::TokenIssue(_)
            | Self::Config(_)
            | Self::IoError(_) => 500,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPhoneNumber(_) => "INVALID_PHONE_NUMBER",
            Self::InvalidSlot(_) => "INVALID_SLOT",
            Self::InvalidProfile(_) => "INVALID_PROFILE",
            Self::MissingCapabilityTag(_) => "MISSING_CAPABILITY_TAG",
            Self::EmptyReservation => "EMPTY_RESERVATION",
            Self::InvalidOtp => "INVALID_OTP",
            Self::OtpExpired => "OTP_EXPIRED",
            Self::TokenMalformed(_) => "TOKEN_MALFORMED",
            Self::TokenSignatureInvalid => "TOKEN_SIGNATURE_INVALID",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::WrongRole { .. } => "WRONG_ROLE",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::PhoneNotFound(_) => "PHONE_NOT_FOUND",
            Self::SpecialistNotFound { .. } => "SPECIALIST_NOT_FOUND",
            Self::SlotConflict { .. } => "SLOT_CONFLICT",
            Self::NothingToCancel => "NOTHING_TO_CANCEL",
            Self::SmsProvider(_) => "SMS_PROVIDER_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::TransferIncomplete { .. } => "TRANSFER_INCOMPLETE",
            Self::TokenIssue(_) => "TOKEN_ISSUE_FAILED",
            Self::Config(_) => "CONFIG_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::slots::SlotError> for BookingError {
    fn from(err: crate::slots::SlotError) -> Self {
        Self::InvalidSlot(err.to_string())
    }
}

impl From<crate::store::StoreError> for BookingError {
    fn from(err: crate::store::StoreError) -> Self {
        use crate::store::StoreError;
        match err {
            StoreError::AccountNotFound { uid } => Self::AccountNotFound(uid),
            StoreError::WrongRole { uid, expected } => Self::WrongRole { uid, expected },
            other => Self::PersistenceError(other.to_string()),
        }
    }
}

impl From<crate::sms::SmsError> for BookingError {
    fn from(err: crate::sms::SmsError) -> Self {
        Self::SmsProvider(err.to_string())
    }
}

impl From<crate::token::TokenError> for BookingError {
    fn from(err: crate::token::TokenError) -> Self {
        use crate::token::TokenError;
        match err {
            TokenError::Malformed(message) => Self::TokenMalformed(message),
            TokenError::SignatureInvalid => Self::TokenSignatureInvalid,
            TokenError::Expired => Self::TokenExpired,
            TokenError::Revoked { .. } => Self::TokenRevoked,
            TokenError::Encode(message) => Self::TokenIssue(message),
            TokenError::Store(e) => e.into(),
        }
    }
}

impl From<crate::otp::OtpError> for BookingError {
    fn from(err: crate::otp::OtpError) -> Self {
        use crate::otp::OtpError;
        match err {
            OtpError::InvalidPhoneNumber(phone) => Self::InvalidPhoneNumber(phone),
            OtpError::NotFound { phone_number } => Self::PhoneNotFound(phone_number),
            OtpError::InvalidCode => Self::InvalidOtp,
            OtpError::Expired => Self::OtpExpired,
            OtpError::Token(e) => e.into(),
            OtpError::Store(e) => e.into(),
        }
    }
}

impl From<crate::reservation::ReservationError> for BookingError {
    fn from(err: crate::reservation::ReservationError) -> Self {
        use crate::reservation::ReservationError;
        match err {
            ReservationError::AccountNotFound { uid } => Self::AccountNotFound(uid),
            ReservationError::SpecialistNotFound {
                first_name,
                last_name,
            } => Self::SpecialistNotFound {
                first_name,
                last_name,
            },
            ReservationError::NotASpecialist { uid } => Self::WrongRole {
                uid,
                expected: Role::Specialist,
            },
            ReservationError::NotAUser { uid } => Self::WrongRole {
                uid,
                expected: Role::User,
            },
            ReservationError::MissingCapabilityTag { uid } => Self::MissingCapabilityTag(uid),
            ReservationError::SlotConflict { unavailable } => Self::SlotConflict { unavailable },
            ReservationError::EmptyRequest => Self::EmptyReservation,
            ReservationError::NothingToCancel => Self::NothingToCancel,
            ReservationError::TransferIncomplete {
                specialist_uid,
                user_uid,
                chunks,
                reason,
            } => Self::TransferIncomplete {
                specialist_uid,
                user_uid,
                chunks,
                reason,
            },
            ReservationError::Slot(e) => e.into(),
            ReservationError::Store(e) => e.into(),
        }
    }
}

impl From<crate::profile::ProfileError> for BookingError {
    fn from(err: crate::profile::ProfileError) -> Self {
        use crate::profile::ProfileError;
        match err {
            ProfileError::AccountNotFound { uid } => Self::AccountNotFound(uid),
            ProfileError::SpecialistNotFound {
                first_name,
                last_name,
            } => Self::SpecialistNotFound {
                first_name,
                last_name,
            },
            ProfileError::WrongRole { uid, expected } => Self::WrongRole { uid, expected },
            ProfileError::Store(e) => e.into(),
            invalid => Self::InvalidProfile(invalid.to_string()),
        }
    }
}

impl From<crate::config::ConfigError> for BookingError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::OtpError;
    use crate::profile::ProfileError;
    use crate::reservation::ReservationError;
    use crate::store::StoreError;
    use crate::token::TokenError;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_auth_error_classification() {
        assert!(BookingError::InvalidOtp.is_auth_error());
        assert!(BookingError::OtpExpired.is_auth_error());
        assert!(BookingError::TokenRevoked.is_auth_error());
        assert!(BookingError::TokenMalformed("x".into()).is_auth_error());

        assert!(!BookingError::NothingToCancel.is_auth_error());
    }

    #[test]
    fn test_conflict_classification() {
        assert!(BookingError::SlotConflict {
            unavailable: vec![]
        }
        .is_conflict());
        assert!(BookingError::NothingToCancel.is_conflict());

        assert!(!BookingError::InvalidOtp.is_conflict());
    }

    #[test]
    fn test_storage_classification() {
        assert!(BookingError::PersistenceError("disk full".into()).is_storage_error());
        assert!(BookingError::IoError(IoErr::new(ErrorKind::Other, "x")).is_storage_error());
        let incomplete = BookingError::TransferIncomplete {
            specialist_uid: "s".into(),
            user_uid: "u".into(),
            chunks: vec![],
            reason: "down".into(),
        };
        assert!(incomplete.is_storage_error());
        assert!(incomplete.needs_reconciliation());
        assert!(!BookingError::PersistenceError("x".into()).needs_reconciliation());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(
            BookingError::InvalidPhoneNumber("1".into()).http_status_code(),
            400
        );
        assert_eq!(BookingError::OtpExpired.http_status_code(), 400);
        assert_eq!(
            BookingError::SlotConflict {
                unavailable: vec![]
            }
            .http_status_code(),
            400
        );
        assert_eq!(BookingError::TokenRevoked.http_status_code(), 401);
        assert_eq!(
            BookingError::WrongRole {
                uid: "u".into(),
                expected: Role::Specialist
            }
            .http_status_code(),
            403
        );
        assert_eq!(
            BookingError::PhoneNotFound("09123456789".into()).http_status_code(),
            404
        );
        assert_eq!(BookingError::SmsProvider("x".into()).http_status_code(), 502);
        assert_eq!(
            BookingError::PersistenceError("x".into()).http_status_code(),
            500
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(BookingError::InvalidOtp.error_code(), "INVALID_OTP");
        assert_eq!(BookingError::TokenExpired.error_code(), "TOKEN_EXPIRED");
        assert_eq!(
            BookingError::SmsProvider("x".into()).error_code(),
            "SMS_PROVIDER_ERROR"
        );
    }

    #[test]
    fn test_from_otp_error() {
        let err: BookingError = OtpError::NotFound {
            phone_number: "09123456789".into(),
        }
        .into();
        assert!(matches!(err, BookingError::PhoneNotFound(_)));

        let err: BookingError = OtpError::Token(TokenError::Encode("boom".into())).into();
        assert!(matches!(err, BookingError::TokenIssue(_)));
    }

    #[test]
    fn test_from_reservation_error() {
        let err: BookingError = ReservationError::NotAUser { uid: "u".into() }.into();
        assert!(matches!(
            err,
            BookingError::WrongRole {
                expected: Role::User,
                ..
            }
        ));

        let err: BookingError = ReservationError::TransferIncomplete {
            specialist_uid: "s".into(),
            user_uid: "u".into(),
            chunks: vec![],
            reason: "release refused".into(),
        }
        .into();
        assert!(err.needs_reconciliation());
        assert_eq!(err.http_status_code(), 500);

        let err: BookingError =
            ReservationError::Store(StoreError::Unavailable("down".into())).into();
        assert!(matches!(err, BookingError::PersistenceError(_)));
    }

    #[test]
    fn test_from_profile_error() {
        let err: BookingError = ProfileError::TooManyTags(2).into();
        assert!(matches!(err, BookingError::InvalidProfile(_)));
        assert!(err.is_validation_error());

        let err: BookingError = ProfileError::AccountNotFound { uid: "u".into() }.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BookingError>();
        assert_sync::<BookingError>();
    }
}
