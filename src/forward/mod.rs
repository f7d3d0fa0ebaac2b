//! The forwarding pipeline: allow-list, normalize or aggregate, dispatch,
//! and the durable queue behind it.
//!
//! ```text
//! RawMessage ─► Forwarder ─┬─► Normalizer ───────────► Dispatcher ─► WhatsApp
//!                          └─► AlbumAggregator ─(debounce)─┘   │
//!                                                              └─► DeliveryQueue
//!                                  ConnectionTracker ─(Ready)─► flush ─┘
//! ```

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::SettingsHandle;
use crate::telegram::normalize::{NormalizeError, Normalizer};
use crate::types::RawMessage;
use crate::whatsapp::state::{ConnectionState, ConnectionTracker};
use crate::whatsapp::{Destination, WhatsAppError};

pub mod album;
pub mod dispatch;
pub mod queue;

use album::AlbumAggregator;
use dispatch::{DispatchOutcome, Dispatcher};
use queue::{DeliveryQueue, FlushReport, QueueEntry, QueueError};

/// Failure taxonomy for forwarding.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// Destination temporarily unreachable or rate-limited; retried.
    #[error("transient send failure: {0}")]
    TransientSendFailure(String),

    /// Destination or normalizer rejected the payload; never retried.
    #[error("payload rejected: {0}")]
    PermanentPayloadFailure(String),

    /// A queued entry failed `retries` times and was abandoned.
    #[error("entry {entry_id} abandoned after {retries} attempts")]
    RetryExhausted {
        /// Queue entry id.
        entry_id: String,
        /// Attempts made.
        retries: u32,
    },

    /// The source file could not be fetched; the message never enters the queue.
    #[error("download failed: {0}")]
    DownloadFailure(String),

    /// No destination configured.
    #[error("no WhatsApp destination configured")]
    ConfigurationMissing,

    /// The delivery queue could not persist the payload.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<WhatsAppError> for ForwardError {
    fn from(e: WhatsAppError) -> Self {
        if e.is_transient() {
            Self::TransientSendFailure(e.to_string())
        } else {
            Self::PermanentPayloadFailure(e.to_string())
        }
    }
}

impl From<NormalizeError> for ForwardError {
    fn from(e: NormalizeError) -> Self {
        match e {
            NormalizeError::Download { .. } => Self::DownloadFailure(e.to_string()),
            NormalizeError::EmptyAttachment { .. } => Self::PermanentPayloadFailure(e.to_string()),
        }
    }
}

/// Log a per-message failure at the severity its kind deserves.
pub fn log_failure(err: &ForwardError, sequence_id: i64) {
    match err {
        ForwardError::ConfigurationMissing => {
            warn!(sequence_id, "no WhatsApp destination configured, dropping message");
        }
        ForwardError::Queue(_) | ForwardError::RetryExhausted { .. } => {
            error!(sequence_id, error = %err, "message could not be forwarded");
        }
        _ => warn!(sequence_id, error = %err, "message dropped"),
    }
}

/// Start a background flush of `queue` through `destination`.
pub fn spawn_flush(
    queue: Arc<DeliveryQueue>,
    destination: Arc<dyn Destination>,
) -> tokio::task::JoinHandle<FlushReport> {
    tokio::spawn(async move {
        queue
            .flush(|entry: QueueEntry| {
                let destination = Arc::clone(&destination);
                async move {
                    destination
                        .send(&entry.destination, &entry.payload)
                        .await
                        .map_err(ForwardError::from)
                }
            })
            .await
    })
}

/// Flush the queue every time the tracker enters [`ConnectionState::Ready`].
///
/// Must be called from within a Tokio runtime; flushes are spawned on it.
pub fn flush_on_ready(
    tracker: &ConnectionTracker,
    queue: Arc<DeliveryQueue>,
    destination: Arc<dyn Destination>,
) {
    let runtime = tokio::runtime::Handle::current();
    tracker.subscribe(move |previous, next| {
        if next != ConnectionState::Ready || previous == ConnectionState::Ready {
            return;
        }
        debug!("destination ready, flushing delivery queue");
        let _enter = runtime.enter();
        spawn_flush(Arc::clone(&queue), Arc::clone(&destination));
    });
}

/// What [`Forwarder::handle`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Chat not on the allow-list.
    Filtered,
    /// Added to an album buffer.
    Buffered,
    /// No destination mapping for this message kind.
    Skipped,
    /// Sent or queued.
    Dispatched(DispatchOutcome),
    /// Lost; the reason was logged.
    Dropped,
}

/// Entry point for every inbound message.
#[derive(Debug)]
pub struct Forwarder {
    settings: SettingsHandle,
    normalizer: Arc<Normalizer>,
    dispatcher: Arc<Dispatcher>,
    albums: AlbumAggregator,
}

impl Forwarder {
    /// Wire the pipeline.
    pub fn new(
        settings: SettingsHandle,
        normalizer: Arc<Normalizer>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let albums = AlbumAggregator::new(
            Arc::clone(&normalizer),
            Arc::clone(&dispatcher),
            settings.clone(),
        );
        Self {
            settings,
            normalizer,
            dispatcher,
            albums,
        }
    }

    /// The album aggregator, for inspection.
    pub fn albums(&self) -> &AlbumAggregator {
        &self.albums
    }

    /// Forward one inbound message.
    ///
    /// Only chats listed in `telegram.allowed_channels` are forwarded; an
    /// empty list forwards nothing.
    pub async fn handle(&self, raw: RawMessage) -> HandleOutcome {
        if !self.settings.snapshot().telegram.allows(raw.chat_id) {
            debug!(chat_id = raw.chat_id, "chat not in allowed_channels, ignoring");
            return HandleOutcome::Filtered;
        }

        if raw.media_group_key.is_some() {
            self.albums.submit(raw);
            return HandleOutcome::Buffered;
        }

        let sequence_id = raw.sequence_id;
        let payload = match self.normalizer.normalize(&raw).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return HandleOutcome::Skipped,
            Err(e) => {
                log_failure(&ForwardError::from(e), sequence_id);
                return HandleOutcome::Dropped;
            }
        };

        match self.dispatcher.dispatch(payload).await {
            Ok(outcome) => HandleOutcome::Dispatched(outcome),
            Err(e) => {
                log_failure(&e, sequence_id);
                HandleOutcome::Dropped
            }
        }
    }
}
