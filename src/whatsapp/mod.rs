//! WhatsApp destination: bridge client, session supervisor and connection state.
//!
//! ferry talks to a WhatsApp Web bridge sidecar over HTTP (default port
//! 3001). Outbound sends go through [`client::WhatsAppClient`]; connectivity
//! is long-polled by [`events::spawn_session`] and published on a
//! [`state::ConnectionTracker`].

use async_trait::async_trait;

use crate::types::CanonicalPayload;

pub mod client;
pub mod events;
pub mod state;

/// Errors from the WhatsApp adapter.
#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    /// HTTP request to the sidecar failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The sidecar is running but WhatsApp is not connected.
    #[error("not connected to WhatsApp")]
    NotConnected,

    /// Outbound message was rate-limited.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The sidecar failed temporarily (5xx, timeout).
    #[error("bridge unavailable ({status}): {body}")]
    Unavailable {
        /// HTTP status code.
        status: u16,
        /// Response body, for logs.
        body: String,
    },

    /// The sidecar refused the payload itself; resending will not help.
    #[error("payload rejected ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, for logs.
        body: String,
    },
}

impl WhatsAppError {
    /// Whether the same send may succeed if retried later.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// Classify a non-success HTTP status from the bridge.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => Self::RateLimited(body),
            409 | 503 if body.contains("not connected") => Self::NotConnected,
            408 | 425 | 500..=599 => Self::Unavailable { status, body },
            _ => Self::Rejected { status, body },
        }
    }
}

/// Something that can deliver a [`CanonicalPayload`] to a chat.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Send one payload to `destination` (a WhatsApp JID).
    ///
    /// # Errors
    ///
    /// Returns a [`WhatsAppError`]; callers use
    /// [`WhatsAppError::is_transient`] to decide whether to retry.
    async fn send(&self, destination: &str, payload: &CanonicalPayload)
        -> Result<(), WhatsAppError>;
}
