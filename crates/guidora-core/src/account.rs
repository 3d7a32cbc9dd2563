//! Account model shared by users and specialists.
//!
//! Every account carries the same identity, OTP and session fields; the
//! role-specific payload lives in [`Profile`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::profile::ProfileError;
use crate::slots::Chunk;

/// Generate a fresh account identifier (32 lowercase hex characters).
#[must_use]
pub fn generate_uid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Which kind of account a phone number logs in as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Books appointments.
    #[default]
    User,
    /// Publishes availability.
    Specialist,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Specialist => f.write_str("specialist"),
        }
    }
}

/// Account gender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    /// man
    Man,
    /// woman
    Woman,
}

impl FromStr for Gender {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "man" => Ok(Self::Man),
            "woman" => Ok(Self::Woman),
            _ => Err(ProfileError::InvalidGender(s.to_string())),
        }
    }
}

/// The single area a specialist works in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityTag {
    /// Legal counselling.
    Law,
    /// Education counselling.
    Edu,
}

impl CapabilityTag {
    /// Resolve a submitted tag list, which must hold exactly one valid value.
    ///
    /// Blank entries are ignored and matching is case-insensitive.
    ///
    /// # Errors
    ///
    /// - [`ProfileError::TagRequired`] if no tag is given
    /// - [`ProfileError::TooManyTags`] if more than one is given
    /// - [`ProfileError::InvalidTag`] if the value is not `law` or `edu`
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Result<Self, ProfileError> {
        let given: Vec<&str> = tags
            .iter()
            .map(|t| t.as_ref().trim())
            .filter(|t| !t.is_empty())
            .collect();
        match given.as_slice() {
            [] => Err(ProfileError::TagRequired),
            [tag] => tag.parse(),
            many => Err(ProfileError::TooManyTags(many.len())),
        }
    }
}

impl FromStr for CapabilityTag {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "law" => Ok(Self::Law),
            "edu" => Ok(Self::Edu),
            _ => Err(ProfileError::InvalidTag(s.to_string())),
        }
    }
}

impl fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Law => f.write_str("law"),
            Self::Edu => f.write_str("edu"),
        }
    }
}

/// A pending one-time code. Code and issue time are always set together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpState {
    /// Six-digit code.
    pub code: String,
    /// When the code was issued.
    pub issued_at: DateTime<Utc>,
}

impl OtpState {
    /// Whether the code is older than `ttl` at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.issued_at > ttl
    }
}

/// Specialist details copied onto a user at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SpecialistSnapshot {
    /// Specialist account id.
    pub uid: String,
    /// First name at booking time.
    pub first_name: String,
    /// Last name at booking time.
    pub last_name: String,
    /// Phone number at booking time.
    pub phone_number: String,
}

impl SpecialistSnapshot {
    /// Capture the current identity of a specialist account.
    #[must_use]
    pub fn of(account: &Account) -> Self {
        Self {
            uid: account.uid.clone(),
            first_name: account.first_name.clone().unwrap_or_default(),
            last_name: account.last_name.clone().unwrap_or_default(),
            phone_number: account.phone_number.clone(),
        }
    }

    /// Case-insensitive name match.
    #[must_use]
    pub fn matches_name(&self, first_name: &str, last_name: &str) -> bool {
        self.first_name.eq_ignore_ascii_case(first_name.trim())
            && self.last_name.eq_ignore_ascii_case(last_name.trim())
    }
}

/// Fields only users have.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Chunks the user currently holds.
    #[serde(default)]
    pub appointments: BTreeSet<Chunk>,

    /// Who the appointments are with.
    #[serde(default)]
    pub reserved_specialist: Option<SpecialistSnapshot>,
}

/// Fields only specialists have.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialistProfile {
    /// Area of work; unset until the profile is filled in.
    #[serde(default)]
    pub capability_tag: Option<CapabilityTag>,

    /// Short biography.
    #[serde(default)]
    pub bio: String,

    /// Education or certification text.
    #[serde(default)]
    pub credential_text: String,

    /// Chunks currently offered for booking.
    #[serde(default)]
    pub available_slots: BTreeSet<Chunk>,

    /// Chunks handed to users and not yet cancelled.
    #[serde(default)]
    pub booked_slots: BTreeSet<Chunk>,
}

/// Role-specific account payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Profile {
    /// A plain user.
    User(UserProfile),
    /// A specialist.
    Specialist(SpecialistProfile),
}

impl Profile {
    /// Empty payload for a new account of `role`.
    #[must_use]
    pub fn empty(role: Role) -> Self {
        match role {
            Role::User => Self::User(UserProfile::default()),
            Role::Specialist => Self::Specialist(SpecialistProfile::default()),
        }
    }
}

/// A user or specialist account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable identifier, never changes once assigned.
    pub uid: String,
    /// `09` followed by nine digits.
    pub phone_number: String,
    /// Lower-cased first name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Lower-cased last name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Gender, once the profile is filled in.
    #[serde(default)]
    pub gender: Option<Gender>,
    /// Age in years (10-99).
    #[serde(default)]
    pub age: Option<u8>,
    /// Pending one-time code.
    #[serde(default)]
    pub otp: Option<OtpState>,
    /// The only session token currently accepted for this account.
    #[serde(default)]
    pub session_token: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Role-specific payload.
    pub profile: Profile,
}

impl Account {
    /// A fresh account for a phone number that has never logged in.
    #[must_use]
    pub fn new(phone_number: &str, role: Role, now: DateTime<Utc>) -> Self {
        Self {
            uid: generate_uid(),
            phone_number: phone_number.to_string(),
            first_name: None,
            last_name: None,
            gender: None,
            age: None,
            otp: None,
            session_token: None,
            created_at: now,
            updated_at: now,
            profile: Profile::empty(role),
        }
    }

    /// The account's role.
    #[must_use]
    pub const fn role(&self) -> Role {
        match self.profile {
            Profile::User(_) => Role::User,
            Profile::Specialist(_) => Role::Specialist,
        }
    }

    /// User payload, if this is a user.
    #[must_use]
    pub const fn as_user(&self) -> Option<&UserProfile> {
        match &self.profile {
            Profile::User(user) => Some(user),
            Profile::Specialist(_) => None,
        }
    }

    /// Specialist payload, if this is a specialist.
    #[must_use]
    pub const fn as_specialist(&self) -> Option<&SpecialistProfile> {
        match &self.profile {
            Profile::Specialist(specialist) => Some(specialist),
            Profile::User(_) => None,
        }
    }

    /// Mutable user payload.
    pub fn as_user_mut(&mut self) -> Option<&mut UserProfile> {
        match &mut self.profile {
            Profile::User(user) => Some(user),
            Profile::Specialist(_) => None,
        }
    }

    /// Mutable specialist payload.
    pub fn as_specialist_mut(&mut self) -> Option<&mut SpecialistProfile> {
        match &mut self.profile {
            Profile::Specialist(specialist) => Some(specialist),
            Profile::User(_) => None,
        }
    }

    /// Case-insensitive match on first and last name.
    #[must_use]
    pub fn has_name(&self, first_name: &str, last_name: &str) -> bool {
        let eq = |stored: &Option<String>, given: &str| {
            stored
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(given.trim()))
        };
        eq(&self.first_name, first_name) && eq(&self.last_name, last_name)
    }
}
