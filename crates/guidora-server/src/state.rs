//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use guidora_core::{
    AccountStore, AppConfig, Clock, DisabledSms, HttpSmsGateway, LocalStore, OtpManager,
    ProfileService, ReservationEngine, SmsSender, SystemClock, TokenAuthenticator,
};
use tracing::{info, warn};

/// Services every handler can reach.
///
/// All members are cheap handles over the same [`AccountStore`].
#[derive(Debug, Clone)]
pub struct AppState {
    /// Account persistence.
    pub store: Arc<dyn AccountStore>,
    /// Session token signing and validation.
    pub tokens: TokenAuthenticator,
    /// One-time code issuance and verification.
    pub otp: OtpManager,
    /// Availability publishing and booking.
    pub reservations: ReservationEngine,
    /// Profile writes and directory reads.
    pub profiles: ProfileService,
}

/// State handle passed to axum.
pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the services together over the given collaborators.
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn AccountStore>,
        sms: Arc<dyn SmsSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tokens = TokenAuthenticator::new(
            &config.auth.jwt_secret,
            config.auth.token_ttl_days,
            store.clone(),
            clock.clone(),
        );
        let otp = OtpManager::new(store.clone(), sms, tokens.clone(), clock)
            .with_ttl_secs(config.auth.otp_ttl_secs);
        let reservations = ReservationEngine::new(store.clone())
            .with_transfer_attempts(config.reservation.transfer_retries);
        let profiles = ProfileService::new(store.clone());

        Self {
            store,
            tokens,
            otp,
            reservations,
            profiles,
        }
    }

    /// Open the file-backed store and the configured SMS provider.
    ///
    /// # Errors
    ///
    /// Fails if the data directory cannot be determined or opened, or the
    /// SMS client cannot be built.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let data_dir = config.data_dir()?;
        let store: Arc<dyn AccountStore> =
            Arc::new(LocalStore::open_with_clock(&data_dir, clock.clone()).await?);

        let sms: Arc<dyn SmsSender> = match config.sms.api_url.as_deref() {
            Some(url) => {
                info!(url = %url, "Using HTTP SMS gateway");
                Arc::new(HttpSmsGateway::new(
                    url,
                    &config.sms.api_key,
                    Duration::from_secs(config.sms.timeout_secs),
                )?)
            }
            None => {
                warn!("sms.api_url is not set; OTP codes will not be delivered");
                Arc::new(DisabledSms)
            }
        };

        Ok(Self::new(config, store, sms, clock))
    }

    /// Wrap in the handle axum expects.
    #[must_use]
    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }
}
