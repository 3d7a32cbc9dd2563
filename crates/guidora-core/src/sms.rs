//! SMS delivery.
//!
//! OTP codes are handed to an [`SmsSender`]. Delivery is best effort: a
//! failure is reported to the caller but never undoes the stored code.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Errors from an SMS provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SmsError {
    /// No provider URL is configured.
    #[error("SMS provider is not configured")]
    NotConfigured,

    /// The request never got a response (connect error, timeout, ...).
    #[error("SMS request failed: {0}")]
    Request(String),

    /// The provider answered with a non-success status.
    #[error("SMS provider rejected the message ({status}): {body}")]
    Rejected {
        /// HTTP status returned by the provider.
        status: u16,
        /// Response body, for diagnosis.
        body: String,
    },
}

/// Something that can deliver a text message to a phone number.
#[async_trait]
pub trait SmsSender: Send + Sync + std::fmt::Debug {
    /// Send `message` to `phone_number`.
    async fn send(&self, phone_number: &str, message: &str) -> Result<(), SmsError>;
}

/// Text of the OTP message.
#[must_use]
pub fn otp_message(code: &str) -> String {
    format!("Your verification code is: {code}")
}

#[derive(Debug, Serialize)]
struct SmsRequest<'a> {
    number: &'a str,
    message: &'a str,
    api_key: &'a str,
}

/// JSON-over-HTTP SMS gateway.
#[derive(Debug, Clone)]
pub struct HttpSmsGateway {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpSmsGateway {
    /// Create a gateway client with a bounded request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SmsError::Request`] if the HTTP client cannot be built.
    pub fn new(url: &str, api_key: &str, timeout: Duration) -> Result<Self, SmsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SmsError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl SmsSender for HttpSmsGateway {
    async fn send(&self, phone_number: &str, message: &str) -> Result<(), SmsError> {
        let body = SmsRequest {
            number: phone_number,
            message,
            api_key: &self.api_key,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SmsError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SmsError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(status = status.as_u16(), "SMS accepted by provider");
        Ok(())
    }
}

/// Sender used when no provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSms;

#[async_trait]
impl SmsSender for DisabledSms {
    async fn send(&self, _phone_number: &str, _message: &str) -> Result<(), SmsError> {
        Err(SmsError::NotConfigured)
    }
}

/// Recording sender for tests.
#[cfg(any(test, feature = "mock-sms"))]
#[derive(Debug, Clone, Default)]
pub struct MockSms {
    sent: std::sync::Arc<std::sync::Mutex<Vec<(String, String)>>>,
    failing: bool,
}

#[cfg(any(test, feature = "mock-sms"))]
impl MockSms {
    /// A sender that accepts and records every message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender that records every message and then fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// All `(phone_number, message)` pairs seen so far.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// The code in the most recent message to `phone_number`.
    #[must_use]
    pub fn last_code_for(&self, phone_number: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|(to, _)| to == phone_number)
            .and_then(|(_, message)| message.rsplit(' ').next().map(str::to_string))
    }
}

#[cfg(any(test, feature = "mock-sms"))]
#[async_trait]
impl SmsSender for MockSms {
    async fn send(&self, phone_number: &str, message: &str) -> Result<(), SmsError> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((phone_number.to_string(), message.to_string()));
        if self.failing {
            Err(SmsError::Rejected {
                status: 503,
                body: "provider down".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_and_extracts_code() {
        let sms = MockSms::new();
        sms.send("09123456789", &otp_message("482913")).await.unwrap();
        sms.send("09120000000", &otp_message("000001")).await.unwrap();

        assert_eq!(sms.sent().len(), 2);
        assert_eq!(sms.last_code_for("09123456789").as_deref(), Some("482913"));
        assert!(sms.last_code_for("09999999999").is_none());
    }

    #[tokio::test]
    async fn test_failing_mock_still_records() {
        let sms = MockSms::failing();
        let err = sms.send("09123456789", "hi").await.unwrap_err();
        assert!(matches!(err, SmsError::Rejected { status: 503, .. }));
        assert_eq!(sms.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_sender_reports_not_configured() {
        assert_eq!(
            DisabledSms.send("09123456789", "hi").await,
            Err(SmsError::NotConfigured)
        );
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_request_error() {
        let gateway =
            HttpSmsGateway::new("http://127.0.0.1:9/send", "key", Duration::from_millis(500))
                .unwrap();
        let err = gateway.send("09123456789", "hi").await.unwrap_err();
        assert!(matches!(err, SmsError::Request(_)));
    }
}
