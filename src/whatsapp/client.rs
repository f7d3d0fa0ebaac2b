//! HTTP client for the WhatsApp bridge sidecar.
//!
//! The sidecar holds the WhatsApp Web session and exposes a small JSON API:
//! `GET /status`, `POST /send`, and `GET /events/poll` (see [`super::events`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Destination, WhatsAppError};
use crate::types::{CanonicalPayload, MediaBlob};

/// Default port the WhatsApp bridge listens on.
pub const DEFAULT_BRIDGE_PORT: u16 = 3001;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Request timeout. Media uploads can be slow, so this is generous.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Client for the WhatsApp bridge HTTP API.
#[derive(Debug, Clone)]
pub struct WhatsAppClient {
    client: reqwest::Client,
    base_url: String,
}

/// Connection status from the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppStatus {
    /// Whether the sidecar is connected to WhatsApp.
    pub connected: bool,
    /// The phone number linked, if connected.
    pub phone_number: Option<String>,
}

/// Response envelope from the bridge HTTP API.
#[derive(Deserialize)]
struct BridgeResponse<T> {
    data: Option<T>,
    error: Option<String>,
}

/// Media part of a send request.
#[derive(Debug, Serialize)]
struct OutboundMedia<'a> {
    mimetype: &'a str,
    data: &'a str,
    filename: &'a str,
}

/// Body of `POST /send`.
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    jid: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<OutboundMedia<'a>>,
}

impl<'a> SendRequest<'a> {
    fn new(jid: &'a str, payload: &'a CanonicalPayload) -> Self {
        Self {
            jid,
            text: &payload.text,
            media: payload.media.as_ref().map(|m: &'a MediaBlob| OutboundMedia {
                mimetype: &m.mime_type,
                data: &m.data,
                filename: &m.filename,
            }),
        }
    }
}

impl WhatsAppClient {
    /// Create a new client pointing at the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { client, base_url }
    }

    /// Get the current connection status from the sidecar.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError::Http`] if the sidecar is unreachable and
    /// [`WhatsAppError::NotConnected`] if it reports no session.
    pub async fn status(&self) -> Result<WhatsAppStatus, WhatsAppError> {
        let url = format!("{}/status", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let body: BridgeResponse<WhatsAppStatus> = resp.json().await?;
        match body.data {
            Some(status) => Ok(status),
            None => {
                debug!(error = ?body.error, "bridge returned no status");
                Err(WhatsAppError::NotConnected)
            }
        }
    }

    /// Send a payload (text, or caption plus media) to the given JID.
    ///
    /// # Errors
    ///
    /// Transport failures map to [`WhatsAppError::Http`]; non-2xx responses
    /// are classified by [`WhatsAppError::from_status`].
    pub async fn send_payload(
        &self,
        jid: &str,
        payload: &CanonicalPayload,
    ) -> Result<(), WhatsAppError> {
        let url = format!("{}/send", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&SendRequest::new(jid, payload))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            warn!(%status, jid, "WhatsApp send failed: {body_text}");
            return Err(WhatsAppError::from_status(status.as_u16(), body_text));
        }
        debug!(
            jid,
            has_media = payload.media.is_some(),
            "message sent via WhatsApp"
        );
        Ok(())
    }

    /// Returns the base URL of the sidecar.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Destination for WhatsAppClient {
    async fn send(
        &self,
        destination: &str,
        payload: &CanonicalPayload,
    ) -> Result<(), WhatsAppError> {
        self.send_payload(destination, payload).await
    }
}
