//! One-time code login.
//!
//! A code is stored on the account together with its issue time. It expires
//! after [`DEFAULT_OTP_TTL_SECS`]: lazily, whenever it is read, and
//! proactively, by a one-shot reaper spawned per issuance. The reaper only
//! clears the code it was scheduled for, so a late reaper never wipes a newer
//! code.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::account::{OtpState, Role};
use crate::clock::Clock;
use crate::sms::{otp_message, SmsError, SmsSender};
use crate::store::{AccountStore, StoreError};
use crate::token::{TokenAuthenticator, TokenError};

/// Seconds a code stays valid.
pub const DEFAULT_OTP_TTL_SECS: u32 = 180;

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^09\d{9}$").expect("valid regex"));

/// Whether `phone_number` is `09` followed by nine digits.
#[must_use]
pub fn is_valid_phone_number(phone_number: &str) -> bool {
    PHONE_RE.is_match(phone_number)
}

/// Uniform six-digit code from the OS random source.
fn generate_code() -> String {
    format!("{:06}", OsRng.gen_range(0..1_000_000u32))
}

/// OTP errors.
#[derive(Debug, Error)]
pub enum OtpError {
    /// The phone number does not match `09` + nine digits.
    #[error("Invalid phone number '{0}'. Expected 09 followed by 9 digits.")]
    InvalidPhoneNumber(String),

    /// No account for this phone number and role.
    #[error("No account found for {phone_number}")]
    NotFound {
        /// The phone number looked up.
        phone_number: String,
    },

    /// No pending code, or the code does not match.
    #[error("Invalid verification code")]
    InvalidCode,

    /// The code is older than the TTL.
    #[error("Verification code has expired")]
    Expired,

    /// Issuing the session token failed.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The account store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of [`OtpManager::request_otp`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtpIssueResult {
    /// The account the code was stored on.
    pub uid: String,
    /// When the code was issued.
    pub issued_at: DateTime<Utc>,
    /// Whether the SMS provider accepted the message.
    pub sms_sent: bool,
    /// Why delivery failed, if it did. The code is stored regardless.
    #[serde(skip)]
    pub sms_error: Option<SmsError>,
}

/// Outcome of a successful [`OtpManager::verify_otp`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyResult {
    /// Account uid.
    pub uid: String,
    /// Fresh session token; any older one is now revoked.
    pub token: String,
    /// Account role.
    pub role: Role,
}

/// Issues, verifies and expires one-time codes.
#[derive(Debug, Clone)]
pub struct OtpManager {
    store: Arc<dyn AccountStore>,
    sms: Arc<dyn SmsSender>,
    tokens: TokenAuthenticator,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl OtpManager {
    /// Create a manager with the default TTL.
    pub fn new(
        store: Arc<dyn AccountStore>,
        sms: Arc<dyn SmsSender>,
        tokens: TokenAuthenticator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            sms,
            tokens,
            clock,
            ttl: Duration::seconds(i64::from(DEFAULT_OTP_TTL_SECS)),
        }
    }

    /// Override how long codes stay valid.
    #[must_use]
    pub fn with_ttl_secs(mut self, secs: u32) -> Self {
        self.ttl = Duration::seconds(i64::from(secs));
        self
    }

    /// Store a new code for `phone_number`, schedule its expiry and text it.
    ///
    /// The account is created on first use. SMS failure is reported in the
    /// result, not as an error.
    ///
    /// # Errors
    ///
    /// - [`OtpError::InvalidPhoneNumber`] for a malformed number
    /// - [`OtpError::Store`] if the code cannot be stored
    pub async fn request_otp(
        &self,
        phone_number: &str,
        role: Role,
    ) -> Result<OtpIssueResult, OtpError> {
        let phone_number = phone_number.trim();
        if !is_valid_phone_number(phone_number) {
            return Err(OtpError::InvalidPhoneNumber(phone_number.to_string()));
        }

        let code = generate_code();
        let issued_at = self.clock.now();
        let account = self
            .store
            .upsert_otp(
                phone_number,
                role,
                OtpState {
                    code: code.clone(),
                    issued_at,
                },
            )
            .await?;

        self.schedule_expiry(account.uid.clone(), issued_at);

        let sms_error = match self.sms.send(phone_number, &otp_message(&code)).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(uid = %account.uid, error = %e, "OTP stored but SMS delivery failed");
                Some(e)
            }
        };

        tracing::info!(uid = %account.uid, role = %role, sms_sent = sms_error.is_none(), "Issued OTP");

        Ok(OtpIssueResult {
            uid: account.uid,
            issued_at,
            sms_sent: sms_error.is_none(),
            sms_error,
        })
    }

    /// Check a submitted code and, on success, issue a session token.
    ///
    /// # Errors
    ///
    /// - [`OtpError::InvalidPhoneNumber`] for a malformed number
    /// - [`OtpError::NotFound`] if no account has this number and role
    /// - [`OtpError::InvalidCode`] if no code is pending, it does not match, or
    ///   it was consumed concurrently
    /// - [`OtpError::Expired`] if the code is past its TTL (the code is cleared)
    pub async fn verify_otp(
        &self,
        phone_number: &str,
        code: &str,
        role: Role,
    ) -> Result<VerifyResult, OtpError> {
        let phone_number = phone_number.trim();
        if !is_valid_phone_number(phone_number) {
            return Err(OtpError::InvalidPhoneNumber(phone_number.to_string()));
        }

        let account = self
            .store
            .find_by_phone(phone_number, role)
            .await?
            .ok_or_else(|| OtpError::NotFound {
                phone_number: phone_number.to_string(),
            })?;

        let Some(otp) = account.otp else {
            return Err(OtpError::InvalidCode);
        };
        if otp.code != code.trim() {
            return Err(OtpError::InvalidCode);
        }

        if otp.is_expired(self.clock.now(), self.ttl) {
            self.store.clear_otp(&account.uid, otp.issued_at).await?;
            tracing::debug!(uid = %account.uid, "Rejected expired OTP");
            return Err(OtpError::Expired);
        }

        if !self
            .store
            .consume_otp(&account.uid, &otp.code, otp.issued_at)
            .await?
        {
            return Err(OtpError::InvalidCode);
        }

        let token = self.tokens.issue(&account.uid, phone_number, role).await?;
        tracing::info!(uid = %account.uid, "OTP verified");

        Ok(VerifyResult {
            uid: account.uid,
            token,
            role,
        })
    }

    /// Spawn the one-shot reaper for the code issued at `issued_at`.
    fn schedule_expiry(&self, uid: String, issued_at: DateTime<Utc>) {
        let store = Arc::clone(&self.store);
        let delay = self.ttl.to_std().unwrap_or_default();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match store.clear_otp(&uid, issued_at).await {
                Ok(true) => tracing::debug!(uid = %uid, "Reaped expired OTP"),
                Ok(false) => {}
                Err(e) => tracing::warn!(uid = %uid, error = %e, "Failed to reap expired OTP"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sms::MockSms;
    use crate::store::LocalStore;
    use chrono::TimeZone;

    const PHONE: &str = "09123456789";

    struct Fixture {
        otp: OtpManager,
        tokens: TokenAuthenticator,
        store: Arc<dyn AccountStore>,
        sms: MockSms,
        clock: ManualClock,
    }

    fn fixture_with(sms: MockSms) -> Fixture {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 12, 28, 8, 0, 0).unwrap());
        let store: Arc<dyn AccountStore> =
            Arc::new(LocalStore::in_memory_with_clock(Arc::new(clock.clone())));
        let tokens =
            TokenAuthenticator::new("test-secret", 3, Arc::clone(&store), Arc::new(clock.clone()));
        let otp = OtpManager::new(
            Arc::clone(&store),
            Arc::new(sms.clone()),
            tokens.clone(),
            Arc::new(clock.clone()),
        );
        Fixture {
            otp,
            tokens,
            store,
            sms,
            clock,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockSms::new())
    }

    #[test]
    fn test_phone_number_format() {
        assert!(is_valid_phone_number("09123456789"));
        assert!(!is_valid_phone_number("0912345678"));
        assert!(!is_valid_phone_number("091234567890"));
        assert!(!is_valid_phone_number("08123456789"));
        assert!(!is_valid_phone_number("+989123456789"));
        assert!(!is_valid_phone_number("09a23456789"));
    }

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_code_is_consumed_by_first_verify() {
        let f = fixture();
        let issued = f.otp.request_otp(PHONE, Role::User).await.unwrap();
        assert!(issued.sms_sent);

        let code = f.sms.last_code_for(PHONE).unwrap();
        f.clock.advance(Duration::seconds(179));
        let verified = f.otp.verify_otp(PHONE, &code, Role::User).await.unwrap();
        assert_eq!(verified.uid, issued.uid);
        assert!(f.tokens.validate(&verified.uid, &verified.token).await.is_ok());

        let err = f.otp.verify_otp(PHONE, &code, Role::User).await.unwrap_err();
        assert!(matches!(err, OtpError::InvalidCode));
    }

    #[tokio::test]
    async fn test_code_expires_after_ttl() {
        let f = fixture();
        let issued = f.otp.request_otp(PHONE, Role::User).await.unwrap();
        let code = f.sms.last_code_for(PHONE).unwrap();

        f.clock.advance(Duration::seconds(181));
        let err = f.otp.verify_otp(PHONE, &code, Role::User).await.unwrap_err();
        assert!(matches!(err, OtpError::Expired));

        let account = f.store.get(&issued.uid).await.unwrap().unwrap();
        assert!(account.otp.is_none());
    }

    #[tokio::test]
    async fn test_wrong_code_and_unknown_number() {
        let f = fixture();
        f.otp.request_otp(PHONE, Role::User).await.unwrap();
        let code = f.sms.last_code_for(PHONE).unwrap();
        let wrong = if code == "000000" { "000001" } else { "000000" };

        let err = f.otp.verify_otp(PHONE, wrong, Role::User).await.unwrap_err();
        assert!(matches!(err, OtpError::InvalidCode));

        let err = f
            .otp
            .verify_otp(PHONE, &code, Role::Specialist)
            .await
            .unwrap_err();
        assert!(matches!(err, OtpError::NotFound { .. }));

        let err = f.otp.request_otp("12345", Role::User).await.unwrap_err();
        assert!(matches!(err, OtpError::InvalidPhoneNumber(_)));
    }

    #[tokio::test]
    async fn test_sms_failure_keeps_code() {
        let f = fixture_with(MockSms::failing());
        let issued = f.otp.request_otp(PHONE, Role::User).await.unwrap();
        assert!(!issued.sms_sent);
        assert!(issued.sms_error.is_some());

        let account = f.store.get(&issued.uid).await.unwrap().unwrap();
        assert!(account.otp.is_some());
    }

    #[tokio::test]
    async fn test_second_verify_revokes_first_token() {
        let f = fixture();
        f.otp.request_otp(PHONE, Role::User).await.unwrap();
        let code = f.sms.last_code_for(PHONE).unwrap();
        let first = f.otp.verify_otp(PHONE, &code, Role::User).await.unwrap();

        f.clock.advance(Duration::seconds(5));
        f.otp.request_otp(PHONE, Role::User).await.unwrap();
        let code = f.sms.last_code_for(PHONE).unwrap();
        let second = f.otp.verify_otp(PHONE, &code, Role::User).await.unwrap();

        assert_eq!(first.uid, second.uid);
        let err = f.tokens.validate(&first.uid, &first.token).await.unwrap_err();
        assert!(matches!(err, TokenError::Revoked { .. }));
        assert!(f.tokens.validate(&second.uid, &second.token).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reaper_leaves_newer_code() {
        let f = fixture();
        let first = f.otp.request_otp(PHONE, Role::User).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(100)).await;
        f.clock.advance(Duration::seconds(100));
        let second = f.otp.request_otp(PHONE, Role::User).await.unwrap();
        assert_ne!(first.issued_at, second.issued_at);

        // First reaper fires at 180s.
        tokio::time::sleep(std::time::Duration::from_secs(90)).await;
        let account = f.store.get(&first.uid).await.unwrap().unwrap();
        assert_eq!(account.otp.map(|o| o.issued_at), Some(second.issued_at));

        // Second reaper fires at 280s.
        tokio::time::sleep(std::time::Duration::from_secs(100)).await;
        let account = f.store.get(&first.uid).await.unwrap().unwrap();
        assert!(account.otp.is_none());
    }
}
