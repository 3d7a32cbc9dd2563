//! Session tokens.
//!
//! Tokens are HS256-signed claims. A token is only accepted while it is also
//! the value stored on the account, so issuing a new one revokes the old one
//! even though the old signature stays valid.

use std::fmt;
use std::sync::Arc;

use chrono::Duration;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::account::{Account, Role};
use crate::clock::Clock;
use crate::store::{AccountStore, StoreError};

/// Token validation and issuance errors.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token could not be decoded.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// The signature does not match the server secret.
    #[error("Token signature is invalid")]
    SignatureInvalid,

    /// The `exp` claim has passed.
    #[error("Token has expired")]
    Expired,

    /// The token is well-formed but no longer the account's current session.
    #[error("Token has been revoked for account {uid}")]
    Revoked {
        /// Uid the caller presented.
        uid: String,
    },

    /// Signing failed.
    #[error("Failed to sign token: {0}")]
    Encode(String),

    /// The session could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Signed session claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Account uid.
    pub uid: String,
    /// Account phone number.
    pub phone_number: String,
    /// Account role.
    pub role: Role,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    /// Issue time, seconds since the epoch.
    pub iat: i64,
    /// Unique token id.
    pub jti: String,
}

/// Issues and validates revocable session tokens.
#[derive(Clone)]
pub struct TokenAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenAuthenticator {
    /// Create an authenticator signing with `secret`.
    pub fn new(
        secret: &str,
        ttl_days: u32,
        store: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::days(i64::from(ttl_days)),
            store,
            clock,
        }
    }

    /// Sign claims for an account without persisting them.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Encode`] if signing fails.
    pub fn sign(&self, uid: &str, phone_number: &str, role: Role) -> Result<String, TokenError> {
        let now = self.clock.now();
        let claims = Claims {
            uid: uid.to_string(),
            phone_number: phone_number.to_string(),
            role,
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Sign a token and make it the account's only accepted session.
    ///
    /// # Errors
    ///
    /// Fails if signing fails or the account cannot be updated.
    pub async fn issue(
        &self,
        uid: &str,
        phone_number: &str,
        role: Role,
    ) -> Result<String, TokenError> {
        let token = self.sign(uid, phone_number, role)?;
        self.store.set_session_token(uid, &token).await?;
        tracing::info!(uid = %uid, role = %role, "Issued session token");
        Ok(token)
    }

    /// Check the signature and decode claims. Expiry is not checked here.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::SignatureInvalid`] or [`TokenError::Malformed`].
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::SignatureInvalid,
                _ => TokenError::Malformed(e.to_string()),
            })
    }

    /// Validate a token presented for `uid` and return the account.
    ///
    /// # Errors
    ///
    /// - [`TokenError::Malformed`] / [`TokenError::SignatureInvalid`] if decoding fails
    /// - [`TokenError::Expired`] if `exp` has passed
    /// - [`TokenError::Revoked`] if the token belongs to another uid, the account
    ///   is gone, or a newer token has been issued
    pub async fn validate(&self, uid: &str, token: &str) -> Result<Account, TokenError> {
        let claims = self.decode(token)?;

        if self.clock.now().timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        let revoked = || TokenError::Revoked {
            uid: uid.to_string(),
        };
        if claims.uid != uid {
            return Err(revoked());
        }

        let account = self.store.get(uid).await?.ok_or_else(revoked)?;
        if account.session_token.as_deref() != Some(token) {
            tracing::debug!(uid = %uid, "Rejected superseded session token");
            return Err(revoked());
        }

        Ok(account)
    }
}
