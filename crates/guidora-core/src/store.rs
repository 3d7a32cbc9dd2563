//! Account persistence.
//!
//! [`AccountStore`] is the only shared mutable resource in the system. Each
//! method is a single conditional update against one account, so callers never
//! read-then-write across an await point.
//!
//! [`LocalStore`] keeps every account in memory and, when opened on a path,
//! rewrites a JSON snapshot after each mutation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::account::{Account, CapabilityTag, Gender, OtpState, Role, SpecialistSnapshot};
use crate::clock::{Clock, SystemClock};
use crate::slots::Chunk;

/// Errors raised by an [`AccountStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No account has this uid.
    #[error("Account not found: {uid}")]
    AccountNotFound {
        /// The missing uid.
        uid: String,
    },

    /// The account exists but has the other role.
    #[error("Account {uid} is not a {expected}")]
    WrongRole {
        /// The account's uid.
        uid: String,
        /// Role the operation needs.
        expected: Role,
    },

    /// The snapshot file could not be read.
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        /// Snapshot path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The snapshot file could not be written.
    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        /// Snapshot path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The data directory could not be created.
    #[error("Failed to create directory {}: {source}", .path.display())]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The snapshot file is not valid JSON.
    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        /// Snapshot path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Accounts could not be serialized.
    #[error("Failed to serialize accounts: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The backend is temporarily unable to serve the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome of a conditional removal from a specialist's availability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotTake {
    /// Every requested chunk was available and has been moved to the booked ledger.
    Taken,
    /// Nothing changed; these requested chunks were not available.
    Unavailable(Vec<Chunk>),
}

/// Specialist-only profile fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialistFields {
    /// Area of work.
    pub capability_tag: CapabilityTag,
    /// Biography, already normalized.
    pub bio: String,
    /// Credential text, already normalized.
    pub credential_text: String,
}

/// A validated profile write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileUpdate {
    /// Normalized first name.
    pub first_name: String,
    /// Normalized last name.
    pub last_name: String,
    /// Age in years.
    pub age: u8,
    /// Gender.
    pub gender: Gender,
    /// Present for specialist accounts, absent for users.
    pub specialist: Option<SpecialistFields>,
}

impl ProfileUpdate {
    const fn role(&self) -> Role {
        if self.specialist.is_some() {
            Role::Specialist
        } else {
            Role::User
        }
    }
}

/// Persistence seam for accounts.
#[async_trait]
pub trait AccountStore: Send + Sync + fmt::Debug {
    /// Fetch an account by uid.
    async fn get(&self, uid: &str) -> StoreResult<Option<Account>>;

    /// Fetch the account for a phone number and role.
    async fn find_by_phone(&self, phone_number: &str, role: Role) -> StoreResult<Option<Account>>;

    /// Fetch a specialist by case-insensitive first and last name.
    async fn find_specialist_by_name(
        &self,
        first_name: &str,
        last_name: &str,
    ) -> StoreResult<Option<Account>>;

    /// All specialist accounts.
    async fn list_specialists(&self) -> StoreResult<Vec<Account>>;

    /// Store a fresh OTP, creating the account if the phone number is new.
    async fn upsert_otp(&self, phone_number: &str, role: Role, otp: OtpState)
        -> StoreResult<Account>;

    /// Clear the OTP only if it is still the one issued at `issued_at`.
    ///
    /// Returns whether anything was cleared.
    async fn clear_otp(&self, uid: &str, issued_at: DateTime<Utc>) -> StoreResult<bool>;

    /// Clear the OTP only if both code and issue time still match.
    ///
    /// Returns whether this call consumed the code.
    async fn consume_otp(&self, uid: &str, code: &str, issued_at: DateTime<Utc>)
        -> StoreResult<bool>;

    /// Overwrite the account's session token.
    async fn set_session_token(&self, uid: &str, token: &str) -> StoreResult<()>;

    /// Apply a validated profile update.
    async fn update_profile(&self, uid: &str, update: ProfileUpdate) -> StoreResult<Account>;

    /// Replace a specialist's availability.
    ///
    /// Chunks held by any account (offered by another specialist, sitting in
    /// any booked ledger, or in a user's appointments) are skipped, so a chunk
    /// is never active in two accounts at once. Returns the number of chunks
    /// now offered.
    async fn replace_available_slots(&self, uid: &str, slots: BTreeSet<Chunk>)
        -> StoreResult<usize>;

    /// Move chunks from availability to the booked ledger if all are available.
    async fn take_available_slots(&self, uid: &str, slots: &BTreeSet<Chunk>)
        -> StoreResult<SlotTake>;

    /// Undo [`take_available_slots`](Self::take_available_slots).
    async fn return_available_slots(&self, uid: &str, slots: &BTreeSet<Chunk>)
        -> StoreResult<()>;

    /// Add chunks to a user's appointments and overwrite the specialist snapshot.
    async fn credit_appointments(
        &self,
        user_uid: &str,
        slots: &BTreeSet<Chunk>,
        specialist: SpecialistSnapshot,
    ) -> StoreResult<()>;

    /// Clear a user's appointments if they are with the named specialist.
    ///
    /// Returns the cleared snapshot and chunks, or `None` if nothing matched.
    async fn clear_appointments(
        &self,
        user_uid: &str,
        first_name: &str,
        last_name: &str,
    ) -> StoreResult<Option<(SpecialistSnapshot, BTreeSet<Chunk>)>>;

    /// Drop chunks from whichever specialist's booked ledger holds them.
    ///
    /// Returns how many chunks were released.
    async fn release_booked_slots(&self, slots: &BTreeSet<Chunk>) -> StoreResult<usize>;
}

type Accounts = BTreeMap<String, Account>;

/// In-process account store with optional JSON file persistence.
#[derive(Debug, Clone)]
pub struct LocalStore {
    accounts: Arc<Mutex<Accounts>>,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl LocalStore {
    /// Snapshot file name inside the data directory.
    pub const FILE_NAME: &'static str = "accounts.json";

    /// A store that never touches disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    /// In-memory store stamping `updated_at` from `clock`.
    #[must_use]
    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: Arc::new(Mutex::new(Accounts::new())),
            path: None,
            clock,
        }
    }

    /// Open (or create) the snapshot in `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or an existing
    /// snapshot cannot be read or parsed.
    pub async fn open(data_dir: &Path) -> StoreResult<Self> {
        Self::open_with_clock(data_dir, Arc::new(SystemClock)).await
    }

    /// Like [`open`](Self::open) with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub async fn open_with_clock(data_dir: &Path, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: data_dir.to_path_buf(),
                source,
            })?;

        let path = data_dir.join(Self::FILE_NAME);
        let accounts = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let list: Vec<Account> =
                    serde_json::from_str(&content).map_err(|source| StoreError::Parse {
                        path: path.clone(),
                        source,
                    })?;
                list.into_iter().map(|a| (a.uid.clone(), a)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Accounts::new(),
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        tracing::info!(path = %path.display(), accounts = accounts.len(), "Opened account store");

        Ok(Self {
            accounts: Arc::new(Mutex::new(accounts)),
            path: Some(path),
            clock,
        })
    }

    async fn read<T>(&self, f: impl FnOnce(&Accounts) -> T + Send) -> T {
        let accounts = self.accounts.lock().await;
        f(&accounts)
    }

    /// Apply `f` to a working copy, persist it, then publish it.
    ///
    /// An error from `f` or from persisting leaves the live map untouched.
    async fn mutate<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send,
        F: FnOnce(&mut Accounts, DateTime<Utc>) -> StoreResult<T> + Send,
    {
        let mut accounts = self.accounts.lock().await;
        let now = self.clock.now();

        let Some(path) = &self.path else {
            return f(&mut accounts, now);
        };

        let mut draft = accounts.clone();
        let out = f(&mut draft, now)?;
        persist(path, &draft).await?;
        *accounts = draft;
        Ok(out)
    }
}

async fn persist(path: &Path, accounts: &Accounts) -> StoreResult<()> {
    let list: Vec<&Account> = accounts.values().collect();
    let content = serde_json::to_string_pretty(&list).map_err(StoreError::Serialize)?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|source| StoreError::Write {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })
}

fn account_mut<'a>(accounts: &'a mut Accounts, uid: &str) -> StoreResult<&'a mut Account> {
    accounts
        .get_mut(uid)
        .ok_or_else(|| StoreError::AccountNotFound { uid: uid.to_string() })
}

fn wrong_role(uid: &str, expected: Role) -> StoreError {
    StoreError::WrongRole {
        uid: uid.to_string(),
        expected,
    }
}

/// Chunks active in any account other than `uid`.
fn held_chunks(accounts: &Accounts, uid: &str) -> BTreeSet<Chunk> {
    let mut held = BTreeSet::new();
    for account in accounts.values().filter(|a| a.uid != uid) {
        if let Some(specialist) = account.as_specialist() {
            held.extend(specialist.available_slots.iter().copied());
            held.extend(specialist.booked_slots.iter().copied());
        } else if let Some(user) = account.as_user() {
            held.extend(user.appointments.iter().copied());
        }
    }
    held
}

#[async_trait]
impl AccountStore for LocalStore {
    async fn get(&self, uid: &str) -> StoreResult<Option<Account>> {
        Ok(self.read(|accounts| accounts.get(uid).cloned()).await)
    }

    async fn find_by_phone(&self, phone_number: &str, role: Role) -> StoreResult<Option<Account>> {
        Ok(self
            .read(|accounts| {
                accounts
                    .values()
                    .find(|a| a.phone_number == phone_number && a.role() == role)
                    .cloned()
            })
            .await)
    }

    async fn find_specialist_by_name(
        &self,
        first_name: &str,
        last_name: &str,
    ) -> StoreResult<Option<Account>> {
        Ok(self
            .read(|accounts| {
                accounts
                    .values()
                    .find(|a| a.role() == Role::Specialist && a.has_name(first_name, last_name))
                    .cloned()
            })
            .await)
    }

    async fn list_specialists(&self) -> StoreResult<Vec<Account>> {
        Ok(self
            .read(|accounts| {
                accounts
                    .values()
                    .filter(|a| a.role() == Role::Specialist)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn upsert_otp(
        &self,
        phone_number: &str,
        role: Role,
        otp: OtpState,
    ) -> StoreResult<Account> {
        self.mutate(|accounts, now| {
            let existing = accounts
                .values()
                .find(|a| a.phone_number == phone_number && a.role() == role)
                .map(|a| a.uid.clone());

            let uid = if let Some(uid) = existing {
                uid
            } else {
                let account = Account::new(phone_number, role, now);
                let uid = account.uid.clone();
                tracing::info!(uid = %uid, role = %role, "Created account");
                accounts.insert(uid.clone(), account);
                uid
            };

            let account = account_mut(accounts, &uid)?;
            account.otp = Some(otp);
            account.updated_at = now;
            Ok(account.clone())
        })
        .await
    }

    async fn clear_otp(&self, uid: &str, issued_at: DateTime<Utc>) -> StoreResult<bool> {
        self.mutate(|accounts, now| {
            let Some(account) = accounts.get_mut(uid) else {
                return Ok(false);
            };
            match &account.otp {
                Some(otp) if otp.issued_at == issued_at => {
                    account.otp = None;
                    account.updated_at = now;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
        .await
    }

    async fn consume_otp(
        &self,
        uid: &str,
        code: &str,
        issued_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.mutate(|accounts, now| {
            let account = account_mut(accounts, uid)?;
            match &account.otp {
                Some(otp) if otp.code == code && otp.issued_at == issued_at => {
                    account.otp = None;
                    account.updated_at = now;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
        .await
    }

    async fn set_session_token(&self, uid: &str, token: &str) -> StoreResult<()> {
        self.mutate(|accounts, now| {
            let account = account_mut(accounts, uid)?;
            account.session_token = Some(token.to_string());
            account.updated_at = now;
            Ok(())
        })
        .await
    }

    async fn update_profile(&self, uid: &str, update: ProfileUpdate) -> StoreResult<Account> {
        self.mutate(|accounts, now| {
            let account = account_mut(accounts, uid)?;
            let expected = update.role();
            if account.role() != expected {
                return Err(wrong_role(uid, expected));
            }

            if let (Some(fields), Some(specialist)) =
                (update.specialist, account.as_specialist_mut())
            {
                specialist.capability_tag = Some(fields.capability_tag);
                specialist.bio = fields.bio;
                specialist.credential_text = fields.credential_text;
            }
            account.first_name = Some(update.first_name);
            account.last_name = Some(update.last_name);
            account.age = Some(update.age);
            account.gender = Some(update.gender);
            account.updated_at = now;
            Ok(account.clone())
        })
        .await
    }

    async fn replace_available_slots(
        &self,
        uid: &str,
        slots: BTreeSet<Chunk>,
    ) -> StoreResult<usize> {
        self.mutate(|accounts, now| {
            let held = held_chunks(accounts, uid);
            let account = account_mut(accounts, uid)?;
            let specialist = account
                .as_specialist_mut()
                .ok_or_else(|| wrong_role(uid, Role::Specialist))?;

            specialist.available_slots = slots
                .into_iter()
                .filter(|c| !specialist.booked_slots.contains(c) && !held.contains(c))
                .collect();
            let count = specialist.available_slots.len();
            account.updated_at = now;
            Ok(count)
        })
        .await
    }

    async fn take_available_slots(
        &self,
        uid: &str,
        slots: &BTreeSet<Chunk>,
    ) -> StoreResult<SlotTake> {
        self.mutate(|accounts, now| {
            let account = account_mut(accounts, uid)?;
            let specialist = account
                .as_specialist_mut()
                .ok_or_else(|| wrong_role(uid, Role::Specialist))?;

            let missing: Vec<Chunk> = slots
                .difference(&specialist.available_slots)
                .copied()
                .collect();
            if !missing.is_empty() {
                return Ok(SlotTake::Unavailable(missing));
            }

            for chunk in slots {
                specialist.available_slots.remove(chunk);
                specialist.booked_slots.insert(*chunk);
            }
            account.updated_at = now;
            Ok(SlotTake::Taken)
        })
        .await
    }

    async fn return_available_slots(
        &self,
        uid: &str,
        slots: &BTreeSet<Chunk>,
    ) -> StoreResult<()> {
        self.mutate(|accounts, now| {
            let account = account_mut(accounts, uid)?;
            let specialist = account
                .as_specialist_mut()
                .ok_or_else(|| wrong_role(uid, Role::Specialist))?;

            for chunk in slots {
                specialist.booked_slots.remove(chunk);
                specialist.available_slots.insert(*chunk);
            }
            account.updated_at = now;
            Ok(())
        })
        .await
    }

    async fn credit_appointments(
        &self,
        user_uid: &str,
        slots: &BTreeSet<Chunk>,
        specialist: SpecialistSnapshot,
    ) -> StoreResult<()> {
        self.mutate(|accounts, now| {
            let account = account_mut(accounts, user_uid)?;
            let user = account
                .as_user_mut()
                .ok_or_else(|| wrong_role(user_uid, Role::User))?;

            user.appointments.extend(slots.iter().copied());
            user.reserved_specialist = Some(specialist);
            account.updated_at = now;
            Ok(())
        })
        .await
    }

    async fn clear_appointments(
        &self,
        user_uid: &str,
        first_name: &str,
        last_name: &str,
    ) -> StoreResult<Option<(SpecialistSnapshot, BTreeSet<Chunk>)>> {
        self.mutate(|accounts, now| {
            let account = account_mut(accounts, user_uid)?;
            let user = account
                .as_user_mut()
                .ok_or_else(|| wrong_role(user_uid, Role::User))?;

            let matches = user
                .reserved_specialist
                .as_ref()
                .is_some_and(|s| s.matches_name(first_name, last_name));
            if user.appointments.is_empty() || !matches {
                return Ok(None);
            }

            let chunks = std::mem::take(&mut user.appointments);
            let Some(snapshot) = user.reserved_specialist.take() else {
                return Ok(None);
            };
            account.updated_at = now;
            Ok(Some((snapshot, chunks)))
        })
        .await
    }

    async fn release_booked_slots(&self, slots: &BTreeSet<Chunk>) -> StoreResult<usize> {
        self.mutate(|accounts, now| {
            let mut released = 0;
            for account in accounts.values_mut() {
                let Some(specialist) = account.as_specialist_mut() else {
                    continue;
                };
                let before = specialist.booked_slots.len();
                specialist.booked_slots.retain(|c| !slots.contains(c));
                let dropped = before - specialist.booked_slots.len();
                if dropped > 0 {
                    released += dropped;
                    account.updated_at = now;
                }
            }
            Ok(released)
        })
        .await
    }
}
