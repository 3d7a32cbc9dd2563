//! Profile updates and the specialist directory.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::account::{Account, CapabilityTag, Gender, Role};
use crate::slots::{consolidate, group_by_day, DaySchedule};
use crate::store::{AccountStore, ProfileUpdate, SpecialistFields, StoreError};

/// Longest accepted first or last name.
pub const MAX_NAME_LEN: usize = 70;
/// Longest accepted biography.
pub const MAX_BIO_LEN: usize = 250;
/// Longest accepted credential text.
pub const MAX_CREDENTIAL_LEN: usize = 150;
/// Youngest accepted age.
pub const MIN_AGE: u32 = 10;
/// Oldest accepted age.
pub const MAX_AGE: u32 = 99;

/// Profile validation and lookup errors.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// Tag is not `law` or `edu`.
    #[error("Invalid tag '{0}'. Must be 'law' or 'edu'.")]
    InvalidTag(String),

    /// No tag was given.
    #[error("A specialist must have exactly one tag ('law' or 'edu')")]
    TagRequired,

    /// More than one tag was given.
    #[error("A specialist must have exactly one tag, got {0}")]
    TooManyTags(usize),

    /// Age outside 10-99.
    #[error("Age must be between 10 and 99 (got {0})")]
    InvalidAge(u32),

    /// Gender is not `man` or `woman`.
    #[error("Invalid gender '{0}'. Must be 'man' or 'woman'.")]
    InvalidGender(String),

    /// A free-text field is too long.
    #[error("{field} exceeds maximum length of {max} characters (got {actual})")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// Maximum allowed length.
        max: usize,
        /// Actual length provided.
        actual: usize,
    },

    /// A name field is blank.
    #[error("{0} cannot be empty")]
    EmptyName(&'static str),

    /// No account with this uid.
    #[error("Account not found: {uid}")]
    AccountNotFound {
        /// The missing uid.
        uid: String,
    },

    /// No specialist with this name.
    #[error("Specialist '{first_name} {last_name}' not found")]
    SpecialistNotFound {
        /// Requested first name.
        first_name: String,
        /// Requested last name.
        last_name: String,
    },

    /// The account has the other role.
    #[error("Account {uid} is not a {expected}")]
    WrongRole {
        /// The account's uid.
        uid: String,
        /// Role the operation needs.
        expected: Role,
    },

    /// The store failed.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ProfileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound { uid } => Self::AccountNotFound { uid },
            StoreError::WrongRole { uid, expected } => Self::WrongRole { uid, expected },
            other => Self::Store(other),
        }
    }
}

/// Fields a user may set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, ToSchema)]
pub struct UserProfileInput {
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Age in years.
    pub age: u32,
    /// `man` or `woman`.
    pub gender: String,
}

/// Fields a specialist may set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, ToSchema)]
pub struct SpecialistProfileInput {
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Age in years.
    pub age: u32,
    /// `man` or `woman`.
    pub gender: String,
    /// Short biography.
    #[serde(default)]
    pub bio: String,
    /// Education or certification text.
    #[serde(default)]
    pub credential_text: String,
    /// Exactly one of `law` / `edu`.
    pub tags: Vec<String>,
}

/// Public view of the current account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AccountSummary {
    /// Account uid.
    pub uid: String,
    /// Phone number.
    pub phone_number: String,
    /// First name, empty until set.
    pub first_name: String,
    /// Last name, empty until set.
    pub last_name: String,
    /// Account role.
    pub role: Role,
    /// Gender, once set.
    pub gender: Option<Gender>,
    /// Age, once set.
    pub age: Option<u8>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            uid: account.uid.clone(),
            phone_number: account.phone_number.clone(),
            first_name: account.first_name.clone().unwrap_or_default(),
            last_name: account.last_name.clone().unwrap_or_default(),
            role: account.role(),
            gender: account.gender,
            age: account.age,
        }
    }
}

/// A directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SpecialistSummary {
    /// Specialist uid.
    pub uid: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Area of work, once set.
    pub tag: Option<CapabilityTag>,
    /// Biography.
    pub bio: String,
    /// Credential text.
    pub credential_text: String,
}

impl SpecialistSummary {
    fn of(account: &Account) -> Option<Self> {
        let specialist = account.as_specialist()?;
        Some(Self {
            uid: account.uid.clone(),
            first_name: account.first_name.clone().unwrap_or_default(),
            last_name: account.last_name.clone().unwrap_or_default(),
            tag: specialist.capability_tag,
            bio: specialist.bio.clone(),
            credential_text: specialist.credential_text.clone(),
        })
    }
}

/// The home screen payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Directory {
    /// Who is asking.
    pub current: AccountSummary,
    /// Every specialist.
    pub specialists: Vec<SpecialistSummary>,
}

/// One specialist's public profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SpecialistDetails {
    /// Directory fields.
    pub specialist: SpecialistSummary,
    /// Contact number.
    pub phone_number: String,
    /// Gender, once set.
    pub gender: Option<Gender>,
    /// Age, once set.
    pub age: Option<u8>,
    /// Offered time, consolidated per day.
    #[schema(value_type = Object)]
    pub available_slots: DaySchedule,
}

fn normalize(field: &'static str, value: &str, max: usize) -> Result<String, ProfileError> {
    let value = value.trim().to_lowercase();
    let actual = value.chars().count();
    if actual > max {
        return Err(ProfileError::FieldTooLong { field, max, actual });
    }
    Ok(value)
}

fn normalize_name(field: &'static str, value: &str) -> Result<String, ProfileError> {
    let value = normalize(field, value, MAX_NAME_LEN)?;
    if value.is_empty() {
        return Err(ProfileError::EmptyName(field));
    }
    Ok(value)
}

fn validate_age(age: u32) -> Result<u8, ProfileError> {
    if (MIN_AGE..=MAX_AGE).contains(&age) {
        u8::try_from(age).map_err(|_| ProfileError::InvalidAge(age))
    } else {
        Err(ProfileError::InvalidAge(age))
    }
}

impl UserProfileInput {
    fn validate(&self) -> Result<ProfileUpdate, ProfileError> {
        Ok(ProfileUpdate {
            first_name: normalize_name("first_name", &self.first_name)?,
            last_name: normalize_name("last_name", &self.last_name)?,
            age: validate_age(self.age)?,
            gender: self.gender.parse()?,
            specialist: None,
        })
    }
}

impl SpecialistProfileInput {
    fn validate(&self) -> Result<ProfileUpdate, ProfileError> {
        Ok(ProfileUpdate {
            first_name: normalize_name("first_name", &self.first_name)?,
            last_name: normalize_name("last_name", &self.last_name)?,
            age: validate_age(self.age)?,
            gender: self.gender.parse()?,
            specialist: Some(SpecialistFields {
                capability_tag: CapabilityTag::from_tags(self.tags.as_slice())?,
                bio: normalize("bio", &self.bio, MAX_BIO_LEN)?,
                credential_text: normalize(
                    "credential_text",
                    &self.credential_text,
                    MAX_CREDENTIAL_LEN,
                )?,
            }),
        })
    }
}

/// Profile writes and directory reads.
#[derive(Debug, Clone)]
pub struct ProfileService {
    store: Arc<dyn AccountStore>,
}

impl ProfileService {
    /// Create a service over `store`.
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Update a user's profile.
    ///
    /// # Errors
    ///
    /// Validation errors, [`ProfileError::WrongRole`] for a specialist
    /// account, or a store failure.
    pub async fn set_user_profile(
        &self,
        uid: &str,
        input: &UserProfileInput,
    ) -> Result<Account, ProfileError> {
        let update = input.validate()?;
        let account = self.store.update_profile(uid, update).await?;
        tracing::info!(uid = %uid, "Updated user profile");
        Ok(account)
    }

    /// Update a specialist's profile, including the capability tag.
    ///
    /// # Errors
    ///
    /// Validation errors, [`ProfileError::WrongRole`] for a user account, or
    /// a store failure.
    pub async fn set_specialist_profile(
        &self,
        uid: &str,
        input: &SpecialistProfileInput,
    ) -> Result<Account, ProfileError> {
        let update = input.validate()?;
        let account = self.store.update_profile(uid, update).await?;
        tracing::info!(uid = %uid, "Updated specialist profile");
        Ok(account)
    }

    /// The current account plus every specialist.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn home(&self, current: &Account) -> Result<Directory, ProfileError> {
        let specialists = self
            .store
            .list_specialists()
            .await?
            .iter()
            .filter_map(SpecialistSummary::of)
            .collect();
        Ok(Directory {
            current: AccountSummary::from(current),
            specialists,
        })
    }

    /// One specialist's public profile and availability.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::SpecialistNotFound`] if no specialist has
    /// this name.
    pub async fn specialist_info(
        &self,
        first_name: &str,
        last_name: &str,
    ) -> Result<SpecialistDetails, ProfileError> {
        let not_found = || ProfileError::SpecialistNotFound {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        };
        let account = self
            .store
            .find_specialist_by_name(first_name, last_name)
            .await?
            .ok_or_else(not_found)?;
        let specialist = SpecialistSummary::of(&account).ok_or_else(not_found)?;
        let available = account
            .as_specialist()
            .map(|s| group_by_day(&consolidate(s.available_slots.iter().copied())))
            .unwrap_or_default();

        Ok(SpecialistDetails {
            specialist,
            phone_number: account.phone_number,
            gender: account.gender,
            age: account.age,
            available_slots: available,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::OtpState;
    use crate::slots::Chunk;
    use crate::store::LocalStore;
    use chrono::Utc;

    async fn account(store: &Arc<dyn AccountStore>, phone: &str, role: Role) -> String {
        store
            .upsert_otp(
                phone,
                role,
                OtpState {
                    code: "123456".into(),
                    issued_at: Utc::now(),
                },
            )
            .await
            .unwrap()
            .uid
    }

    fn user_input() -> UserProfileInput {
        UserProfileInput {
            first_name: " Ali ".into(),
            last_name: "Ahmadi".into(),
            age: 30,
            gender: "Man".into(),
        }
    }

    fn specialist_input(tags: &[&str]) -> SpecialistProfileInput {
        SpecialistProfileInput {
            first_name: "Sara".into(),
            last_name: "Karimi".into(),
            age: 41,
            gender: "woman".into(),
            bio: "Family LAW".into(),
            credential_text: "LLM".into(),
            tags: tags.iter().map(ToString::to_string).collect(),
        }
    }

    fn service() -> (ProfileService, Arc<dyn AccountStore>) {
        let store: Arc<dyn AccountStore> = Arc::new(LocalStore::in_memory());
        (ProfileService::new(Arc::clone(&store)), store)
    }

    #[tokio::test]
    async fn test_user_profile_is_normalized() {
        let (service, store) = service();
        let uid = account(&store, "09123456789", Role::User).await;

        let updated = service.set_user_profile(&uid, &user_input()).await.unwrap();
        assert_eq!(updated.first_name.as_deref(), Some("ali"));
        assert_eq!(updated.last_name.as_deref(), Some("ahmadi"));
        assert_eq!(updated.gender, Some(Gender::Man));
        assert_eq!(updated.age, Some(30));
    }

    #[tokio::test]
    async fn test_user_profile_validation() {
        let (service, store) = service();
        let uid = account(&store, "09123456789", Role::User).await;

        let mut input = user_input();
        input.age = 9;
        let err = service.set_user_profile(&uid, &input).await.unwrap_err();
        assert!(matches!(err, ProfileError::InvalidAge(9)));

        let mut input = user_input();
        input.gender = "other".into();
        let err = service.set_user_profile(&uid, &input).await.unwrap_err();
        assert!(matches!(err, ProfileError::InvalidGender(_)));

        let mut input = user_input();
        input.first_name = "a".repeat(71);
        let err = service.set_user_profile(&uid, &input).await.unwrap_err();
        assert!(matches!(
            err,
            ProfileError::FieldTooLong {
                max: 70,
                actual: 71,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_role_is_enforced() {
        let (service, store) = service();
        let user = account(&store, "09123456789", Role::User).await;
        let specialist = account(&store, "09120000000", Role::Specialist).await;

        let err = service
            .set_specialist_profile(&user, &specialist_input(&["law"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileError::WrongRole { .. }));

        let err = service
            .set_user_profile(&specialist, &user_input())
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileError::WrongRole { .. }));

        let err = service
            .set_user_profile("missing", &user_input())
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileError::AccountNotFound { .. }));
    }

    #[tokio::test]
    async fn test_specialist_tag_rules() {
        let (service, store) = service();
        let uid = account(&store, "09120000000", Role::Specialist).await;

        let err = service
            .set_specialist_profile(&uid, &specialist_input(&["law", "edu"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileError::TooManyTags(2)));

        let err = service
            .set_specialist_profile(&uid, &specialist_input(&["medicine"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileError::InvalidTag(_)));

        let updated = service
            .set_specialist_profile(&uid, &specialist_input(&["EDU"]))
            .await
            .unwrap();
        let profile = updated.as_specialist().unwrap();
        assert_eq!(profile.capability_tag, Some(CapabilityTag::Edu));
        assert_eq!(profile.bio, "family law");
    }

    #[tokio::test]
    async fn test_directory_and_specialist_info() {
        let (service, store) = service();
        let user = account(&store, "09123456789", Role::User).await;
        let specialist = account(&store, "09120000000", Role::Specialist).await;
        service
            .set_specialist_profile(&specialist, &specialist_input(&["law"]))
            .await
            .unwrap();
        let slots = ["2025-12-28T08:00:00Z", "2025-12-28T08:30:00Z", "2025-12-29T10:00:00Z"]
            .iter()
            .map(|s| s.parse::<Chunk>().unwrap())
            .collect();
        store
            .replace_available_slots(&specialist, slots)
            .await
            .unwrap();

        let current = store.get(&user).await.unwrap().unwrap();
        let home = service.home(&current).await.unwrap();
        assert_eq!(home.current.uid, user);
        assert_eq!(home.current.role, Role::User);
        assert_eq!(home.specialists.len(), 1);
        assert_eq!(home.specialists[0].tag, Some(CapabilityTag::Law));

        let info = service.specialist_info("SARA", "karimi").await.unwrap();
        assert_eq!(info.specialist.uid, specialist);
        assert_eq!(info.available_slots["2025-12-28"][0].start, "08:00");
        assert_eq!(info.available_slots["2025-12-28"][0].end, "09:00");
        assert_eq!(info.available_slots["2025-12-29"][0].end, "10:30");

        let err = service.specialist_info("nobody", "here").await.unwrap_err();
        assert!(matches!(err, ProfileError::SpecialistNotFound { .. }));
    }
}
