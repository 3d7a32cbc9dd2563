//! # guidora-core
//!
//! Core business logic for the guidora appointment-booking backend.
//!
//! This crate provides:
//! - Phone-number OTP login with time-boxed codes
//! - Signed session tokens that the server can revoke
//! - Discretization of time ranges into 30-minute chunks and back
//! - Atomic transfer of chunks from a specialist's availability to a user
//! - Profile management and the specialist directory
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`account`] - Account model shared by users and specialists
//! - [`store`] - The [`AccountStore`] persistence seam and its local implementation
//! - [`otp`] - One-time code issuance, verification and expiry
//! - [`token`] - Session token issuance and validation
//! - [`slots`] - Chunk expansion and consolidation
//! - [`reservation`] - Availability publishing and booking
//! - [`profile`] - Profile updates and the specialist directory
//! - [`sms`] - SMS delivery collaborator
//! - [`clock`] - Injectable time source
//! - [`config`] - Application configuration loading and validation
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod account;
pub mod clock;
pub mod config;
pub mod error;
pub mod otp;
pub mod profile;
pub mod reservation;
pub mod slots;
pub mod sms;
pub mod store;
pub mod token;

// Re-export primary types for convenience
pub use account::{
    generate_uid, Account, CapabilityTag, Gender, OtpState, Profile, Role, SpecialistProfile,
    SpecialistSnapshot, UserProfile,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AppConfig, AuthConfig, ConfigError, ConfigResult, ReservationConfig, ServerConfig, SmsConfig,
    StorageConfig,
};
pub use error::{BookingError, Error, Result};
pub use otp::{is_valid_phone_number, OtpError, OtpIssueResult, OtpManager, VerifyResult};
pub use profile::{
    AccountSummary, Directory, ProfileError, ProfileService, SpecialistDetails,
    SpecialistProfileInput, SpecialistSummary, UserProfileInput,
};
pub use reservation::{ReservationEngine, ReservationError, ReservationResult, ReservedSlots};
pub use slots::{
    consolidate, expand, expand_ranges, group_by_day, Chunk, ConsolidatedRange, DaySchedule,
    SlotError, SlotRange, TimeOfDay, TimeSpan, CHUNK_MINUTES,
};
#[cfg(any(test, feature = "mock-sms"))]
pub use sms::MockSms;
pub use sms::{DisabledSms, HttpSmsGateway, SmsError, SmsSender};
pub use store::{
    AccountStore, LocalStore, ProfileUpdate, SlotTake, SpecialistFields, StoreError, StoreResult,
};
pub use token::{Claims, TokenAuthenticator, TokenError};
