//! WhatsApp session supervisor.
//!
//! Long-polls the sidecar's `/events/poll` endpoint and turns bridge events
//! into [`ConnectionState`] transitions on the shared tracker. When the
//! session drops or the bridge becomes unreachable, the supervisor records
//! the failure and reconnects after a fixed delay. Session restore is cheap,
//! so there is no exponential backoff here.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::client::WhatsAppClient;
use super::state::{ConnectionState, ConnectionTracker};

/// An event from the bridge sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// A QR code must be scanned to link the account.
    Qr {
        /// Raw QR payload.
        code: String,
    },
    /// Credentials accepted.
    Authenticated,
    /// Session fully loaded; sends will succeed.
    Ready,
    /// WhatsApp connection lost.
    Disconnected {
        /// Human-readable reason, if available.
        reason: Option<String>,
    },
    /// Stored credentials were rejected.
    AuthFailure {
        /// Human-readable reason, if available.
        reason: Option<String>,
    },
}

/// What the poll loop should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    /// Keep polling.
    Continue,
    /// The session ended; reconnect after the fixed delay.
    Reconnect,
}

/// Long-poll timeout for the HTTP client (seconds).
const POLL_TIMEOUT_SECS: u64 = 60;

/// Pause after a non-200 poll response before polling again.
const BAD_STATUS_PAUSE_SECS: u64 = 5;

/// Apply one bridge event to the tracker.
pub fn apply_event(tracker: &ConnectionTracker, event: &BridgeEvent) -> SessionControl {
    match event {
        BridgeEvent::Qr { code } => {
            info!(qr_len = code.len(), "WhatsApp QR code issued, scan to link");
            debug!(qr = %code, "WhatsApp QR payload");
            tracker.set_state(ConnectionState::AwaitingHandshake);
            SessionControl::Continue
        }
        BridgeEvent::Authenticated => {
            tracker.set_state(ConnectionState::Authenticated);
            SessionControl::Continue
        }
        BridgeEvent::Ready => {
            tracker.set_state(ConnectionState::Ready);
            SessionControl::Continue
        }
        BridgeEvent::Disconnected { reason } => {
            warn!(reason = reason.as_deref().unwrap_or("unknown"), "WhatsApp disconnected");
            tracker.set_state(ConnectionState::Disconnected);
            SessionControl::Reconnect
        }
        BridgeEvent::AuthFailure { reason } => {
            warn!(reason = reason.as_deref().unwrap_or("unknown"), "WhatsApp authentication failed");
            tracker.set_state(ConnectionState::Error);
            SessionControl::Reconnect
        }
    }
}

/// Spawn the session supervisor.
///
/// Returns immediately. The supervisor runs until the task is aborted.
pub fn spawn_session(
    client: WhatsAppClient,
    tracker: Arc<ConnectionTracker>,
    reconnect_delay: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let poll_url = format!("{}/events/poll", client.base_url());

        loop {
            info!(url = %poll_url, "connecting to WhatsApp bridge");
            tracker.set_state(ConnectionState::AwaitingHandshake);

            match run_session(&client, &poll_url, &tracker).await {
                Ok(()) => info!("WhatsApp session ended"),
                Err(e) => {
                    warn!(error = %e, "WhatsApp bridge error");
                    tracker.set_state(ConnectionState::Error);
                }
            }

            tracker.set_state(ConnectionState::Disconnected);
            info!(
                delay_ms = u64::try_from(reconnect_delay.as_millis()).unwrap_or(u64::MAX),
                "reconnecting to WhatsApp bridge after fixed delay"
            );
            tokio::time::sleep(reconnect_delay).await;
        }
    })
}

/// One connected session: pick up an already-restored session, then poll
/// until the bridge reports a disconnect (`Ok`) or the transport fails (`Err`).
async fn run_session(
    client: &WhatsAppClient,
    poll_url: &str,
    tracker: &ConnectionTracker,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let status = client.status().await;
    match status {
        Ok(s) if s.connected => {
            info!(phone = s.phone_number.as_deref().unwrap_or("unknown"), "WhatsApp session restored");
            tracker.set_state(ConnectionState::Authenticated);
            tracker.set_state(ConnectionState::Ready);
        }
        Ok(_) => debug!("bridge up, WhatsApp not linked yet"),
        Err(super::WhatsAppError::NotConnected) => debug!("bridge up, no status yet"),
        Err(e) => return Err(e.into()),
    }

    let poller = reqwest::Client::builder()
        .timeout(Duration::from_secs(POLL_TIMEOUT_SECS))
        .build()?;

    loop {
        match poller.get(poll_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let events = match resp.json::<Vec<BridgeEvent>>().await {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(error = %e, "undecodable event batch from bridge");
                        tokio::time::sleep(Duration::from_secs(BAD_STATUS_PAUSE_SECS)).await;
                        continue;
                    }
                };
                for event in events {
                    debug!(?event, "received WhatsApp bridge event");
                    if apply_event(tracker, &event) == SessionControl::Reconnect {
                        return Ok(());
                    }
                }
            }
            Ok(resp) => {
                debug!(status = %resp.status(), "event poll returned non-200");
                tokio::time::sleep(Duration::from_secs(BAD_STATUS_PAUSE_SECS)).await;
            }
            Err(e) if e.is_timeout() => {
                // Long-poll expired with no events.
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
