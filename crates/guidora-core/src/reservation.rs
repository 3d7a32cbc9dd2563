//! Availability publishing and booking.
//!
//! Booking moves chunks from a specialist's availability to a user's
//! appointments. The specialist side is a single conditional update ("take
//! these chunks only if all are still offered"), so two overlapping requests
//! can never both win. The user side is then credited with retries; if every
//! attempt fails the chunks are handed back to the specialist.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::account::{Role, SpecialistSnapshot};
use crate::slots::{
    consolidate, expand_ranges, group_by_day, Chunk, DaySchedule, SlotError, SlotRange,
};
use crate::store::{AccountStore, SlotTake, StoreError};

/// Default number of attempts at crediting the user side of a transfer.
pub const DEFAULT_TRANSFER_ATTEMPTS: u32 = 3;

const RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// Reservation errors.
#[derive(Debug, Error)]
pub enum ReservationError {
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

    /// Only specialists publish availability.
    #[error("Account {uid} is not a specialist")]
    NotASpecialist {
        /// The caller's uid.
        uid: String,
    },

    /// Only users book or cancel.
    #[error("Account {uid} is not a user")]
    NotAUser {
        /// The caller's uid.
        uid: String,
    },

    /// The specialist has not set a capability tag yet.
    #[error("Specialist {uid} must set a tag ('law' or 'edu') before publishing availability")]
    MissingCapabilityTag {
        /// The specialist's uid.
        uid: String,
    },

    /// At least one requested chunk is not offered. Nothing was booked.
    #[error("{} requested slot(s) are not available", .unavailable.len())]
    SlotConflict {
        /// The chunks that were not available.
        unavailable: Vec<Chunk>,
    },

    /// The booking request had no ranges.
    #[error("No slots requested")]
    EmptyRequest,

    /// No appointments with the named specialist.
    #[error("No reservation to cancel with this specialist")]
    NothingToCancel,

    /// Chunks were moved between accounts but one side of the move did not
    /// land: taken from the specialist and neither credited nor returned, or
    /// cleared from the user and left in the booked ledger. Needs manual
    /// reconciliation.
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
        /// Why the transfer and its rollback failed.
        reason: String,
    },

    /// A requested range is invalid.
    #[error(transparent)]
    Slot(#[from] SlotError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A successful booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationResult {
    /// Booked chunks, ascending.
    pub reserved: Vec<Chunk>,
    /// Who they are with.
    pub specialist: SpecialistSnapshot,
}

/// A user's current appointments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservedSlots {
    /// Who they are with, if anyone.
    pub specialist: Option<SpecialistSnapshot>,
    /// Appointments consolidated per day.
    pub schedule: DaySchedule,
}

/// Publishes availability and moves chunks between accounts.
#[derive(Debug, Clone)]
pub struct ReservationEngine {
    store: Arc<dyn AccountStore>,
    transfer_attempts: u32,
}

impl ReservationEngine {
    /// Create an engine with the default retry budget.
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self {
            store,
            transfer_attempts: DEFAULT_TRANSFER_ATTEMPTS,
        }
    }

    /// Override how many times the user side is attempted (at least once).
    #[must_use]
    pub fn with_transfer_attempts(mut self, attempts: u32) -> Self {
        self.transfer_attempts = attempts.max(1);
        self
    }

    /// Replace a specialist's availability with `ranges`.
    ///
    /// Chunks already held elsewhere (booked, in a user's appointments, or
    /// offered by another specialist) are skipped. Returns how many chunks are
    /// now available.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::AccountNotFound`] / [`ReservationError::NotASpecialist`]
    /// - [`ReservationError::MissingCapabilityTag`] if the profile has no tag
    /// - [`ReservationError::Slot`] for an invalid range
    pub async fn publish_availability(
        &self,
        specialist_uid: &str,
        ranges: &[SlotRange],
    ) -> Result<usize, ReservationError> {
        let account = self
            .store
            .get(specialist_uid)
            .await?
            .ok_or_else(|| ReservationError::AccountNotFound {
                uid: specialist_uid.to_string(),
            })?;
        let specialist = account
            .as_specialist()
            .ok_or_else(|| ReservationError::NotASpecialist {
                uid: specialist_uid.to_string(),
            })?;
        if specialist.capability_tag.is_none() {
            return Err(ReservationError::MissingCapabilityTag {
                uid: specialist_uid.to_string(),
            });
        }

        let chunks = expand_ranges(ranges)?;
        let requested = chunks.len();
        let total = self
            .store
            .replace_available_slots(specialist_uid, chunks)
            .await?;

        tracing::info!(
            uid = %specialist_uid,
            requested,
            total,
            "Published availability"
        );
        Ok(total)
    }

    /// Book every chunk in `ranges` with the named specialist, or none.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::EmptyRequest`] if `ranges` is empty
    /// - [`ReservationError::SpecialistNotFound`] if the name matches nobody
    /// - [`ReservationError::SlotConflict`] if any chunk is not offered
    /// - [`ReservationError::Store`] if crediting the user failed and the
    ///   chunks were returned to the specialist
    /// - [`ReservationError::TransferIncomplete`] if returning them failed too
    pub async fn reserve_slots(
        &self,
        user_uid: &str,
        first_name: &str,
        last_name: &str,
        ranges: &[SlotRange],
    ) -> Result<ReservationResult, ReservationError> {
        if ranges.is_empty() {
            return Err(ReservationError::EmptyRequest);
        }

        let user_account = self
            .store
            .get(user_uid)
            .await?
            .ok_or_else(|| ReservationError::AccountNotFound {
                uid: user_uid.to_string(),
            })?;
        if user_account.as_user().is_none() {
            return Err(ReservationError::NotAUser {
                uid: user_uid.to_string(),
            });
        }

        let specialist = self
            .store
            .find_specialist_by_name(first_name, last_name)
            .await?
            .ok_or_else(|| ReservationError::SpecialistNotFound {
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
            })?;

        let chunks = expand_ranges(ranges)?;
        let snapshot = SpecialistSnapshot::of(&specialist);

        if let SlotTake::Unavailable(unavailable) = self
            .store
            .take_available_slots(&specialist.uid, &chunks)
            .await?
        {
            tracing::debug!(
                user = %user_uid,
                specialist = %specialist.uid,
                unavailable = unavailable.len(),
                "Reservation rejected"
            );
            return Err(ReservationError::SlotConflict { unavailable });
        }

        self.credit_user(user_uid, &chunks, snapshot).await
    }

    /// Credit taken chunks to the user, retrying, and roll back on failure.
    ///
    /// A successful credit overwrites the user's specialist snapshot.
    async fn credit_user(
        &self,
        user_uid: &str,
        chunks: &BTreeSet<Chunk>,
        snapshot: SpecialistSnapshot,
    ) -> Result<ReservationResult, ReservationError> {
        let mut last_error = None;

        for attempt in 1..=self.transfer_attempts {
            match self
                .store
                .credit_appointments(user_uid, chunks, snapshot.clone())
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        user = %user_uid,
                        specialist = %snapshot.uid,
                        count = chunks.len(),
                        "Reserved slots"
                    );
                    return Ok(ReservationResult {
                        reserved: chunks.iter().copied().collect(),
                        specialist: snapshot,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        user = %user_uid,
                        attempt,
                        error = %e,
                        "Failed to credit reserved slots"
                    );
                    last_error = Some(e);
                    if attempt < self.transfer_attempts {
                        tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    }
                }
            }
        }

        let error = last_error.unwrap_or_else(|| StoreError::Unavailable("no attempts made".into()));
        self.give_back(user_uid, &snapshot.uid, chunks, &error.to_string())
            .await?;
        Err(ReservationError::Store(error))
    }

    /// Return taken chunks to the specialist after a failed credit.
    async fn give_back(
        &self,
        user_uid: &str,
        specialist_uid: &str,
        chunks: &BTreeSet<Chunk>,
        cause: &str,
    ) -> Result<(), ReservationError> {
        match self
            .store
            .return_available_slots(specialist_uid, chunks)
            .await
        {
            Ok(()) => {
                tracing::warn!(
                    user = %user_uid,
                    specialist = %specialist_uid,
                    count = chunks.len(),
                    cause,
                    "Rolled back reservation"
                );
                Ok(())
            }
            Err(e) => {
                let chunk_list: Vec<Chunk> = chunks.iter().copied().collect();
                tracing::error!(
                    user = %user_uid,
                    specialist = %specialist_uid,
                    chunks = ?chunk_list,
                    cause,
                    error = %e,
                    "Reservation transfer left incomplete"
                );
                Err(ReservationError::TransferIncomplete {
                    specialist_uid: specialist_uid.to_string(),
                    user_uid: user_uid.to_string(),
                    chunks: chunk_list,
                    reason: format!("{cause}; rollback failed: {e}"),
                })
            }
        }
    }

    /// A user's appointments, consolidated per day.
    ///
    /// # Errors
    ///
    /// [`ReservationError::AccountNotFound`] or [`ReservationError::NotAUser`].
    pub async fn list_reserved_slots(
        &self,
        user_uid: &str,
    ) -> Result<ReservedSlots, ReservationError> {
        let account = self
            .store
            .get(user_uid)
            .await?
            .ok_or_else(|| ReservationError::AccountNotFound {
                uid: user_uid.to_string(),
            })?;
        let user = account
            .as_user()
            .ok_or_else(|| ReservationError::NotAUser {
                uid: user_uid.to_string(),
            })?;

        Ok(ReservedSlots {
            specialist: user.reserved_specialist.clone(),
            schedule: group_by_day(&consolidate(user.appointments.iter().copied())),
        })
    }

    /// Drop all of a user's appointments if the name matches their snapshot.
    ///
    /// The chunks are not re-offered, but they leave the booked ledger so a
    /// later publish can offer them again.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::NothingToCancel`] if the user holds nothing or the
    ///   name does not match their reservation
    /// - [`ReservationError::TransferIncomplete`] if the appointments were
    ///   cleared but releasing the booked ledger failed on every attempt
    pub async fn cancel_reservation(
        &self,
        user_uid: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<SpecialistSnapshot, ReservationError> {
        let cleared = self
            .store
            .clear_appointments(user_uid, first_name, last_name)
            .await
            .map_err(|e| match e {
                StoreError::AccountNotFound { uid } => ReservationError::AccountNotFound { uid },
                StoreError::WrongRole {
                    uid,
                    expected: Role::User,
                } => ReservationError::NotAUser { uid },
                other => ReservationError::Store(other),
            })?;
        let Some((snapshot, chunks)) = cleared else {
            return Err(ReservationError::NothingToCancel);
        };

        self.release_ledger(user_uid, &snapshot.uid, &chunks).await?;

        tracing::info!(
            user = %user_uid,
            specialist = %snapshot.uid,
            count = chunks.len(),
            "Cancelled reservation"
        );
        Ok(snapshot)
    }

    /// Drop cancelled chunks from the booked ledger, retrying like the credit
    /// step of a booking.
    async fn release_ledger(
        &self,
        user_uid: &str,
        specialist_uid: &str,
        chunks: &BTreeSet<Chunk>,
    ) -> Result<(), ReservationError> {
        let mut last_error = None;

        for attempt in 1..=self.transfer_attempts {
            match self.store.release_booked_slots(chunks).await {
                Ok(released) => {
                    tracing::debug!(user = %user_uid, released, "Released booked slots");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        user = %user_uid,
                        attempt,
                        error = %e,
                        "Failed to release booked slots"
                    );
                    last_error = Some(e);
                    if attempt < self.transfer_attempts {
                        tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    }
                }
            }
        }

        let error = last_error.unwrap_or_else(|| StoreError::Unavailable("no attempts made".into()));
        let chunk_list: Vec<Chunk> = chunks.iter().copied().collect();
        tracing::error!(
            user = %user_uid,
            specialist = %specialist_uid,
            chunks = ?chunk_list,
            error = %error,
            "Cancelled reservation but booked slots were not released"
        );
        Err(ReservationError::TransferIncomplete {
            specialist_uid: specialist_uid.to_string(),
            user_uid: user_uid.to_string(),
            chunks: chunk_list,
            reason: format!("appointments cleared; releasing booked slots failed: {error}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::account::{Account, CapabilityTag, Gender, OtpState};
    use crate::store::{LocalStore, ProfileUpdate, SpecialistFields, StoreResult};

    fn range(day: &str, start: &str, end: &str) -> SlotRange {
        SlotRange::parse(day, start, end).unwrap()
    }

    fn chunk(s: &str) -> Chunk {
        s.parse().unwrap()
    }

    fn otp() -> OtpState {
        OtpState {
            code: "123456".into(),
            issued_at: Utc::now(),
        }
    }

    async fn specialist(store: &dyn AccountStore, phone: &str, first: &str, last: &str) -> String {
        let uid = store
            .upsert_otp(phone, Role::Specialist, otp())
            .await
            .unwrap()
            .uid;
        store
            .update_profile(
                &uid,
                ProfileUpdate {
                    first_name: first.into(),
                    last_name: last.into(),
                    age: 40,
                    gender: Gender::Woman,
                    specialist: Some(SpecialistFields {
                        capability_tag: CapabilityTag::Law,
                        bio: String::new(),
                        credential_text: String::new(),
                    }),
                },
            )
            .await
            .unwrap();
        uid
    }

    async fn user(store: &dyn AccountStore, phone: &str) -> String {
        store.upsert_otp(phone, Role::User, otp()).await.unwrap().uid
    }

    async fn available(store: &dyn AccountStore, uid: &str) -> BTreeSet<Chunk> {
        store
            .get(uid)
            .await
            .unwrap()
            .unwrap()
            .as_specialist()
            .unwrap()
            .available_slots
            .clone()
    }

    async fn appointments(store: &dyn AccountStore, uid: &str) -> BTreeSet<Chunk> {
        store
            .get(uid)
            .await
            .unwrap()
            .unwrap()
            .as_user()
            .unwrap()
            .appointments
            .clone()
    }

    #[tokio::test]
    async fn test_publish_then_reserve_one_chunk() {
        let store = Arc::new(LocalStore::in_memory());
        let engine = ReservationEngine::new(store.clone());
        let specialist_uid = specialist(store.as_ref(), "09120000000", "sara", "karimi").await;
        let usr = user(store.as_ref(), "09123456789").await;

        let total = engine
            .publish_availability(&specialist_uid, &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap();
        assert_eq!(total, 2);

        let result = engine
            .reserve_slots(&usr, "Sara", "Karimi", &[range("2025-12-28", "08:00", "08:30")])
            .await
            .unwrap();
        assert_eq!(result.reserved, vec![chunk("2025-12-28T08:00:00Z")]);
        assert_eq!(result.specialist.uid, specialist_uid);

        assert_eq!(
            available(store.as_ref(), &specialist_uid).await,
            [chunk("2025-12-28T08:30:00Z")].into()
        );
        assert_eq!(
            appointments(store.as_ref(), &usr).await,
            [chunk("2025-12-28T08:00:00Z")].into()
        );

        let listed = engine.list_reserved_slots(&usr).await.unwrap();
        assert_eq!(listed.specialist.unwrap().first_name, "sara");
        assert_eq!(listed.schedule["2025-12-28"][0].start, "08:00");
        assert_eq!(listed.schedule["2025-12-28"][0].end, "08:30");
    }

    #[tokio::test]
    async fn test_publish_replaces_and_checks_role() {
        let store = Arc::new(LocalStore::in_memory());
        let engine = ReservationEngine::new(store.clone());
        let specialist_uid = specialist(store.as_ref(), "09120000000", "sara", "karimi").await;
        let usr = user(store.as_ref(), "09123456789").await;

        engine
            .publish_availability(&specialist_uid, &[range("2025-12-28", "08:00", "10:00")])
            .await
            .unwrap();
        let total = engine
            .publish_availability(
                &specialist_uid,
                &[
                    range("2025-12-29", "08:00", "09:00"),
                    range("2025-12-29", "08:30", "09:30"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert!(available(store.as_ref(), &specialist_uid)
            .await
            .iter()
            .all(|c| c.to_string().starts_with("2025-12-29")));

        let err = engine
            .publish_availability(&usr, &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::NotASpecialist { .. }));

        let err = engine
            .publish_availability(&specialist_uid, &[range("2025-12-28", "09:00", "09:00")])
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::Slot(SlotError::InvalidRange { .. })));
    }

    #[tokio::test]
    async fn test_publish_requires_tag() {
        let store = Arc::new(LocalStore::in_memory());
        let engine = ReservationEngine::new(store.clone());
        let uid = store
            .upsert_otp("09120000000", Role::Specialist, otp())
            .await
            .unwrap()
            .uid;

        let err = engine
            .publish_availability(&uid, &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::MissingCapabilityTag { .. }));
    }

    #[tokio::test]
    async fn test_partial_overlap_books_nothing() {
        let store = Arc::new(LocalStore::in_memory());
        let engine = ReservationEngine::new(store.clone());
        let specialist_uid = specialist(store.as_ref(), "09120000000", "sara", "karimi").await;
        let usr = user(store.as_ref(), "09123456789").await;
        engine
            .publish_availability(&specialist_uid, &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap();

        let err = engine
            .reserve_slots(&usr, "sara", "karimi", &[range("2025-12-28", "08:30", "09:30")])
            .await
            .unwrap_err();
        match err {
            ReservationError::SlotConflict { unavailable } => {
                assert_eq!(unavailable, vec![chunk("2025-12-28T09:00:00Z")]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(available(store.as_ref(), &specialist_uid).await.len(), 2);
        assert!(appointments(store.as_ref(), &usr).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_overlapping_reservations() {
        let store = Arc::new(LocalStore::in_memory());
        let engine = ReservationEngine::new(store.clone());
        let specialist_uid = specialist(store.as_ref(), "09120000000", "sara", "karimi").await;
        engine
            .publish_availability(&specialist_uid, &[range("2025-12-28", "08:00", "12:00")])
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let usr = user(store.as_ref(), &format!("0912345670{i}")).await;
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .reserve_slots(&usr, "sara", "karimi", &[range("2025-12-28", "09:00", "10:00")])
                    .await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(ReservationError::SlotConflict { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(available(store.as_ref(), &specialist_uid).await.len(), 6);
    }

    #[tokio::test]
    async fn test_chunk_is_offered_by_one_specialist_only() {
        let store = Arc::new(LocalStore::in_memory());
        let engine = ReservationEngine::new(store.clone());
        let sara = specialist(store.as_ref(), "09120000000", "sara", "karimi").await;
        let reza = specialist(store.as_ref(), "09120000001", "reza", "ahmadi").await;
        let usr = user(store.as_ref(), "09123456789").await;

        let total = engine
            .publish_availability(&sara, &[range("2025-12-28", "08:00", "08:30")])
            .await
            .unwrap();
        assert_eq!(total, 1);
        let total = engine
            .publish_availability(&reza, &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(
            available(store.as_ref(), &reza).await,
            [chunk("2025-12-28T08:30:00Z")].into()
        );

        engine
            .reserve_slots(&usr, "sara", "karimi", &[range("2025-12-28", "08:00", "08:30")])
            .await
            .unwrap();
        let total = engine
            .publish_availability(&reza, &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert!(!available(store.as_ref(), &reza)
            .await
            .contains(&chunk("2025-12-28T08:00:00Z")));

        let err = engine
            .reserve_slots(&usr, "reza", "ahmadi", &[range("2025-12-28", "08:00", "08:30")])
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::SlotConflict { .. }));
    }

    #[tokio::test]
    async fn test_booking_another_specialist_overwrites_snapshot() {
        let store = Arc::new(LocalStore::in_memory());
        let engine = ReservationEngine::new(store.clone());
        let sara = specialist(store.as_ref(), "09120000000", "sara", "karimi").await;
        let reza = specialist(store.as_ref(), "09120000001", "reza", "ahmadi").await;
        let usr = user(store.as_ref(), "09123456789").await;
        engine
            .publish_availability(&sara, &[range("2025-12-28", "08:00", "08:30")])
            .await
            .unwrap();
        engine
            .publish_availability(&reza, &[range("2025-12-29", "08:00", "08:30")])
            .await
            .unwrap();

        engine
            .reserve_slots(&usr, "sara", "karimi", &[range("2025-12-28", "08:00", "08:30")])
            .await
            .unwrap();
        let result = engine
            .reserve_slots(&usr, "reza", "ahmadi", &[range("2025-12-29", "08:00", "08:30")])
            .await
            .unwrap();
        assert_eq!(result.specialist.uid, reza);

        let listed = engine.list_reserved_slots(&usr).await.unwrap();
        assert_eq!(listed.specialist.unwrap().first_name, "reza");
        assert_eq!(
            appointments(store.as_ref(), &usr).await,
            [chunk("2025-12-28T08:00:00Z"), chunk("2025-12-29T08:00:00Z")].into()
        );

        // Cancelling by the current snapshot frees both ledgers.
        let err = engine
            .cancel_reservation(&usr, "sara", "karimi")
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::NothingToCancel));
        engine
            .cancel_reservation(&usr, "reza", "ahmadi")
            .await
            .unwrap();
        let total = engine
            .publish_availability(&sara, &[range("2025-12-28", "08:00", "08:30")])
            .await
            .unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_cancel_releases_ledger_without_reoffering() {
        let store = Arc::new(LocalStore::in_memory());
        let engine = ReservationEngine::new(store.clone());
        let specialist_uid = specialist(store.as_ref(), "09120000000", "sara", "karimi").await;
        let usr = user(store.as_ref(), "09123456789").await;
        engine
            .publish_availability(&specialist_uid, &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap();
        engine
            .reserve_slots(&usr, "sara", "karimi", &[range("2025-12-28", "08:00", "08:30")])
            .await
            .unwrap();

        // Booked chunks are not re-offered while held.
        let total = engine
            .publish_availability(&specialist_uid, &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap();
        assert_eq!(total, 1);

        let err = engine
            .cancel_reservation(&usr, "reza", "ahmadi")
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::NothingToCancel));

        let snapshot = engine
            .cancel_reservation(&usr, "sara", "karimi")
            .await
            .unwrap();
        assert_eq!(snapshot.uid, specialist_uid);
        assert!(appointments(store.as_ref(), &usr).await.is_empty());
        assert_eq!(available(store.as_ref(), &specialist_uid).await.len(), 1);

        let total = engine
            .publish_availability(&specialist_uid, &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap();
        assert_eq!(total, 2);

        let err = engine
            .cancel_reservation(&usr, "sara", "karimi")
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::NothingToCancel));
    }

    #[tokio::test]
    async fn test_reserve_validation() {
        let store = Arc::new(LocalStore::in_memory());
        let engine = ReservationEngine::new(store.clone());
        let specialist_uid = specialist(store.as_ref(), "09120000000", "sara", "karimi").await;
        let usr = user(store.as_ref(), "09123456789").await;

        let err = engine
            .reserve_slots(&usr, "sara", "karimi", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::EmptyRequest));

        let err = engine
            .reserve_slots(&usr, "nobody", "here", &[range("2025-12-28", "08:00", "08:30")])
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::SpecialistNotFound { .. }));

        let err = engine
            .reserve_slots(&specialist_uid, "sara", "karimi", &[range("2025-12-28", "08:00", "08:30")])
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::NotAUser { .. }));

        let err = engine.list_reserved_slots("missing").await.unwrap_err();
        assert!(matches!(err, ReservationError::AccountNotFound { .. }));
    }

    /// Delegates to a [`LocalStore`] but fails the user-side credit and the
    /// ledger release a set number of times, and optionally the rollback too.
    #[derive(Debug)]
    struct FlakyStore {
        inner: LocalStore,
        credit_failures: AtomicU32,
        release_failures: AtomicU32,
        fail_return: bool,
    }

    impl FlakyStore {
        fn new(credit_failures: u32, fail_return: bool) -> Self {
            Self {
                inner: LocalStore::in_memory(),
                credit_failures: AtomicU32::new(credit_failures),
                release_failures: AtomicU32::new(0),
                fail_return,
            }
        }

        fn fail_releases(&self, count: u32) {
            self.release_failures.store(count, Ordering::SeqCst);
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[async_trait]
    impl AccountStore for FlakyStore {
        async fn get(&self, uid: &str) -> StoreResult<Option<Account>> {
            self.inner.get(uid).await
        }

        async fn find_by_phone(&self, phone: &str, role: Role) -> StoreResult<Option<Account>> {
            self.inner.find_by_phone(phone, role).await
        }

        async fn find_specialist_by_name(
            &self,
            first_name: &str,
            last_name: &str,
        ) -> StoreResult<Option<Account>> {
            self.inner.find_specialist_by_name(first_name, last_name).await
        }

        async fn list_specialists(&self) -> StoreResult<Vec<Account>> {
            self.inner.list_specialists().await
        }

        async fn upsert_otp(&self, phone: &str, role: Role, otp: OtpState) -> StoreResult<Account> {
            self.inner.upsert_otp(phone, role, otp).await
        }

        async fn clear_otp(&self, uid: &str, issued_at: DateTime<Utc>) -> StoreResult<bool> {
            self.inner.clear_otp(uid, issued_at).await
        }

        async fn consume_otp(
            &self,
            uid: &str,
            code: &str,
            issued_at: DateTime<Utc>,
        ) -> StoreResult<bool> {
            self.inner.consume_otp(uid, code, issued_at).await
        }

        async fn set_session_token(&self, uid: &str, token: &str) -> StoreResult<()> {
            self.inner.set_session_token(uid, token).await
        }

        async fn update_profile(&self, uid: &str, update: ProfileUpdate) -> StoreResult<Account> {
            self.inner.update_profile(uid, update).await
        }

        async fn replace_available_slots(
            &self,
            uid: &str,
            slots: BTreeSet<Chunk>,
        ) -> StoreResult<usize> {
            self.inner.replace_available_slots(uid, slots).await
        }

        async fn take_available_slots(
            &self,
            uid: &str,
            slots: &BTreeSet<Chunk>,
        ) -> StoreResult<SlotTake> {
            self.inner.take_available_slots(uid, slots).await
        }

        async fn return_available_slots(
            &self,
            uid: &str,
            slots: &BTreeSet<Chunk>,
        ) -> StoreResult<()> {
            if self.fail_return {
                return Err(StoreError::Unavailable("rollback refused".into()));
            }
            self.inner.return_available_slots(uid, slots).await
        }

        async fn credit_appointments(
            &self,
            user_uid: &str,
            slots: &BTreeSet<Chunk>,
            specialist: SpecialistSnapshot,
        ) -> StoreResult<()> {
            if take_failure(&self.credit_failures) {
                return Err(StoreError::Unavailable("credit refused".into()));
            }
            self.inner
                .credit_appointments(user_uid, slots, specialist)
                .await
        }

        async fn clear_appointments(
            &self,
            user_uid: &str,
            first_name: &str,
            last_name: &str,
        ) -> StoreResult<Option<(SpecialistSnapshot, BTreeSet<Chunk>)>> {
            self.inner
                .clear_appointments(user_uid, first_name, last_name)
                .await
        }

        async fn release_booked_slots(&self, slots: &BTreeSet<Chunk>) -> StoreResult<usize> {
            if take_failure(&self.release_failures) {
                return Err(StoreError::Unavailable("release refused".into()));
            }
            self.inner.release_booked_slots(slots).await
        }
    }

    async fn flaky_setup(
        credit_failures: u32,
        fail_return: bool,
    ) -> (Arc<FlakyStore>, ReservationEngine, String, String) {
        let store = Arc::new(FlakyStore::new(credit_failures, fail_return));
        let engine = ReservationEngine::new(store.clone()).with_transfer_attempts(3);
        let specialist_uid = specialist(store.as_ref(), "09120000000", "sara", "karimi").await;
        let usr = user(store.as_ref(), "09123456789").await;
        engine
            .publish_availability(&specialist_uid, &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap();
        (store, engine, specialist_uid, usr)
    }

    #[tokio::test]
    async fn test_credit_is_retried() {
        let (store, engine, _specialist_uid, usr) = flaky_setup(2, false).await;
        engine
            .reserve_slots(&usr, "sara", "karimi", &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap();
        assert_eq!(appointments(store.as_ref(), &usr).await.len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_restore_availability() {
        let (store, engine, specialist_uid, usr) = flaky_setup(3, false).await;
        let err = engine
            .reserve_slots(&usr, "sara", "karimi", &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::Store(StoreError::Unavailable(_))));
        assert_eq!(available(store.as_ref(), &specialist_uid).await.len(), 2);
        assert!(appointments(store.as_ref(), &usr).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_rollback_is_reported() {
        let (_store, engine, expected_specialist, usr) = flaky_setup(3, true).await;
        let err = engine
            .reserve_slots(&usr, "sara", "karimi", &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap_err();
        match err {
            ReservationError::TransferIncomplete {
                specialist_uid,
                user_uid,
                chunks,
                ..
            } => {
                assert_eq!(specialist_uid, expected_specialist);
                assert_eq!(user_uid, usr);
                assert_eq!(chunks.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_retries_ledger_release() {
        let (store, engine, specialist_uid, usr) = flaky_setup(0, false).await;
        engine
            .reserve_slots(&usr, "sara", "karimi", &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap();

        store.fail_releases(2);
        engine
            .cancel_reservation(&usr, "sara", "karimi")
            .await
            .unwrap();

        let total = engine
            .publish_availability(&specialist_uid, &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_failed_ledger_release_is_reported() {
        let (store, engine, expected_specialist, usr) = flaky_setup(0, false).await;
        engine
            .reserve_slots(&usr, "sara", "karimi", &[range("2025-12-28", "08:00", "09:00")])
            .await
            .unwrap();

        store.fail_releases(3);
        let err = engine
            .cancel_reservation(&usr, "sara", "karimi")
            .await
            .unwrap_err();
        match err {
            ReservationError::TransferIncomplete {
                specialist_uid,
                user_uid,
                chunks,
                reason,
            } => {
                assert_eq!(specialist_uid, expected_specialist);
                assert_eq!(user_uid, usr);
                assert_eq!(
                    chunks,
                    vec![chunk("2025-12-28T08:00:00Z"), chunk("2025-12-28T08:30:00Z")]
                );
                assert!(reason.contains("release refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(appointments(store.as_ref(), &usr).await.is_empty());
    }
}
