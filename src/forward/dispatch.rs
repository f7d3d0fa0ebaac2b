//! Send-now-or-enqueue decision for a built payload.

use std::sync::Arc;

use tracing::{debug, warn};

use super::queue::DeliveryQueue;
use super::{spawn_flush, ForwardError};
use crate::config::SettingsHandle;
use crate::types::CanonicalPayload;
use crate::whatsapp::state::ConnectionTracker;
use crate::whatsapp::Destination;

/// What happened to a dispatched payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered directly.
    Sent,
    /// Persisted in the delivery queue for a later flush.
    Queued,
}

/// Routes payloads to the destination or the delivery queue.
pub struct Dispatcher {
    destination: Arc<dyn Destination>,
    tracker: Arc<ConnectionTracker>,
    queue: Arc<DeliveryQueue>,
    settings: SettingsHandle,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.tracker.current_state())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Wire a dispatcher.
    pub fn new(
        destination: Arc<dyn Destination>,
        tracker: Arc<ConnectionTracker>,
        queue: Arc<DeliveryQueue>,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            destination,
            tracker,
            queue,
            settings,
        }
    }

    /// Whether a destination is configured right now.
    pub fn has_destination(&self) -> bool {
        self.settings.snapshot().whatsapp.destination().is_some()
    }

    /// Deliver `payload` now if the destination is ready and nothing is
    /// queued ahead of it; otherwise queue it.
    ///
    /// A transient failure on the direct path queues the payload too.
    ///
    /// # Errors
    ///
    /// - [`ForwardError::ConfigurationMissing`] when no destination is set.
    /// - [`ForwardError::PermanentPayloadFailure`] when the destination
    ///   rejects the payload outright.
    /// - [`ForwardError::Queue`] when the payload could not be persisted.
    pub async fn dispatch(
        &self,
        payload: CanonicalPayload,
    ) -> Result<DispatchOutcome, ForwardError> {
        let settings = self.settings.snapshot();
        let destination = settings
            .whatsapp
            .destination()
            .ok_or(ForwardError::ConfigurationMissing)?;

        // Anything already queued must go first.
        if self.tracker.is_ready() && self.queue.is_empty().await {
            match self.destination.send(destination, &payload).await {
                Ok(()) => return Ok(DispatchOutcome::Sent),
                Err(e) if !e.is_transient() => {
                    return Err(ForwardError::PermanentPayloadFailure(e.to_string()));
                }
                Err(e) => {
                    warn!(error = %e, destination, "direct send failed, queueing");
                }
            }
        }

        let entry = self.queue.enqueue(destination, payload).await?;
        debug!(
            entry_id = %entry.id,
            state = %self.tracker.current_state(),
            "payload deferred to delivery queue"
        );

        if self.tracker.is_ready() {
            spawn_flush(Arc::clone(&self.queue), Arc::clone(&self.destination));
        }
        Ok(DispatchOutcome::Queued)
    }
}
