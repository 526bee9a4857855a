//! Dashboard uplink over HTTP

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use tracing::{debug, info, instrument, warn};

use lifelink_core::AlertEnvelope;

use crate::error::UplinkError;

/// Default request timeout for the dashboard POST
pub const DEFAULT_UPLINK_TIMEOUT: Duration = Duration::from_secs(5);

/// `User-Agent` sent with every alert
pub const UPLINK_USER_AGENT: &str = concat!("LifeLink/", env!("CARGO_PKG_VERSION"));

/// Sink that forwards alerts to the central dashboard
#[async_trait]
pub trait Uplink: Send + Sync {
    /// Post one alert; any 2xx response is success
    async fn post(&self, envelope: &AlertEnvelope) -> Result<(), UplinkError>;

    /// Where alerts are sent, for logs
    fn endpoint(&self) -> &str;
}

/// [`Uplink`] that POSTs the wire payload with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpUplink {
    client: reqwest::Client,
    url: String,
}

impl HttpUplink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, UplinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn with_default_timeout(url: impl Into<String>) -> Result<Self, UplinkError> {
        Self::new(url, DEFAULT_UPLINK_TIMEOUT)
    }
}

#[async_trait]
impl Uplink for HttpUplink {
    #[instrument(skip(self, envelope), fields(message_id = %envelope.message_id(), url = %self.url))]
    async fn post(&self, envelope: &AlertEnvelope) -> Result<(), UplinkError> {
        let body = envelope.to_bytes()?;
        debug!(bytes = body.len(), "Posting alert to dashboard");

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, UPLINK_USER_AGENT)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Dashboard unreachable");
                UplinkError::from(e)
            })?;

        let status = response.status();
        if status.is_success() {
            info!(status = status.as_u16(), "Alert accepted by dashboard");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "Dashboard rejected alert");
        Err(UplinkError::Status {
            code: status.as_u16(),
            body,
        })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
