//! Durable FIFO delivery queue with bounded retry.
//!
//! Entries are written through to a [`QueueStore`] after every mutation, so
//! a crash mid-flush loses at most the in-flight send. Flushing is strictly
//! head-of-line: a failing head blocks everything behind it until it is
//! delivered, dropped as undeliverable, or abandoned after
//! `queue.max_retries` attempts.

use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ForwardError;
use crate::config::{QueueConfig, SettingsHandle};
use crate::types::CanonicalPayload;

// ---------------------------------------------------------------------------
// Entries and storage
// ---------------------------------------------------------------------------

/// A payload waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Opaque unique id.
    pub id: String,
    /// When the entry was enqueued.
    pub created_at: DateTime<Utc>,
    /// Failed attempts so far.
    pub retries: u32,
    /// Destination chat.
    pub destination: String,
    /// What to send.
    pub payload: CanonicalPayload,
}

/// Errors reading or writing the queue store.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Filesystem access failed.
    #[error("queue store I/O at {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The store holds something that is not a JSON array of entries.
    #[error("queue store is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable backing for the queue. Only [`DeliveryQueue`] writes to it.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Read every persisted entry, head first.
    ///
    /// # Errors
    ///
    /// Returns a [`QueueError`] if the store exists but cannot be read.
    async fn load(&self) -> Result<Vec<QueueEntry>, QueueError>;

    /// Replace the persisted contents with `entries`.
    ///
    /// # Errors
    ///
    /// Returns a [`QueueError`] if the write fails.
    async fn save(&self, entries: &[QueueEntry]) -> Result<(), QueueError>;
}

/// Queue store backed by a single JSON file holding an array of entries.
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// crash mid-write leaves the previous contents intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store at `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this store writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> QueueError {
        QueueError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl QueueStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<QueueEntry>, QueueError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    async fn save(&self, entries: &[QueueEntry]) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(e))?;
        }
        let json = serde_json::to_vec(entries)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.io_err(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry and pacing parameters, read from config at the start of each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts after which an entry is abandoned.
    pub max_retries: u32,
    /// Backoff for an entry that has not failed before.
    pub base: Duration,
    /// Upper bound on any single backoff.
    pub cap: Duration,
    /// Pause after each successful send.
    pub inter_message: Duration,
}

impl From<&QueueConfig> for RetryPolicy {
    fn from(cfg: &QueueConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base: Duration::from_millis(cfg.retry_base_delay_ms),
            cap: Duration::from_millis(cfg.retry_cap_ms),
            inter_message: Duration::from_millis(cfg.inter_message_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^retries, cap)` where `retries` counts earlier failures.
    pub fn backoff(&self, retries: u32) -> Duration {
        let factor = 2u32.checked_pow(retries).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Counters from one [`DeliveryQueue::flush`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Another flush was already draining the queue; this call did nothing.
    pub already_running: bool,
    /// Entries sent and removed.
    pub delivered: usize,
    /// Entries removed after exceeding the retry ceiling.
    pub abandoned: usize,
    /// Entries removed because the destination rejected the payload.
    pub dropped: usize,
    /// Failed attempts that were retried.
    pub retried: usize,
}

/// Clears the in-progress flag when a drain finishes or its task is cancelled.
struct FlushGuard<'a>(&'a AtomicBool);

impl<'a> FlushGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Durable FIFO of undelivered payloads.
pub struct DeliveryQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    store: Arc<dyn QueueStore>,
    settings: SettingsHandle,
    flushing: AtomicBool,
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("flushing", &self.is_flushing())
            .finish_non_exhaustive()
    }
}

impl DeliveryQueue {
    /// Open the queue, loading whatever the store holds from a previous run.
    ///
    /// # Errors
    ///
    /// Returns a [`QueueError`] if the store cannot be read.
    pub async fn open(
        store: Arc<dyn QueueStore>,
        settings: SettingsHandle,
    ) -> Result<Self, QueueError> {
        let loaded = store.load().await?;
        if !loaded.is_empty() {
            info!(count = loaded.len(), "loaded pending deliveries from store");
        }
        Ok(Self {
            entries: Mutex::new(loaded.into()),
            store,
            settings,
            flushing: AtomicBool::new(false),
        })
    }

    /// Append a payload and persist it before returning.
    ///
    /// # Errors
    ///
    /// Returns a [`QueueError`] if the write fails. Nothing is queued in
    /// that case.
    pub async fn enqueue(
        &self,
        destination: &str,
        payload: CanonicalPayload,
    ) -> Result<QueueEntry, QueueError> {
        let entry = QueueEntry {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            retries: 0,
            destination: destination.to_owned(),
            payload,
        };

        let mut entries = self.entries.lock().await;
        entries.push_back(entry.clone());
        let depth = entries.len();
        if let Err(e) = self.store.save(entries.make_contiguous()).await {
            entries.pop_back();
            return Err(e);
        }
        drop(entries);

        debug!(entry_id = %entry.id, depth, "payload queued");
        Ok(entry)
    }

    /// Number of pending entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether nothing is pending.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Snapshot of pending entries, head first.
    pub async fn entries(&self) -> Vec<QueueEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }

    /// Whether a flush loop is running.
    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Drain the queue head to tail through `send`.
    ///
    /// Only one flush runs at a time; a concurrent call returns immediately
    /// with [`FlushReport::already_running`] set. Entries enqueued while a
    /// flush is running are picked up by that flush. Send failures never
    /// escape: they are retried with capped exponential backoff, dropped when
    /// permanent, or abandoned at the retry ceiling.
    pub async fn flush<F, Fut>(&self, mut send: F) -> FlushReport
    where
        F: FnMut(QueueEntry) -> Fut,
        Fut: Future<Output = Result<(), ForwardError>>,
    {
        let Some(mut guard) = FlushGuard::try_acquire(&self.flushing) else {
            debug!("flush already in progress");
            return FlushReport {
                already_running: true,
                ..FlushReport::default()
            };
        };

        let mut report = FlushReport::default();
        loop {
            self.drain(&mut send, &mut report).await;
            drop(guard);
            // An enqueue racing with the end of the drain may have been
            // turned away by the guard; take it now if nobody else has.
            if self.is_empty().await {
                break;
            }
            match FlushGuard::try_acquire(&self.flushing) {
                Some(next) => guard = next,
                None => break,
            }
        }

        if report.delivered > 0 || report.abandoned > 0 || report.dropped > 0 {
            info!(
                delivered = report.delivered,
                abandoned = report.abandoned,
                dropped = report.dropped,
                retried = report.retried,
                "delivery queue flushed"
            );
        }
        report
    }

    async fn drain<F, Fut>(&self, send: &mut F, report: &mut FlushReport)
    where
        F: FnMut(QueueEntry) -> Fut,
        Fut: Future<Output = Result<(), ForwardError>>,
    {
        loop {
            let Some(head) = self.entries.lock().await.front().cloned() else {
                return;
            };
            let policy = RetryPolicy::from(&self.settings.snapshot().queue);

            match send(head.clone()).await {
                Ok(()) => {
                    self.remove_head(&head.id).await;
                    report.delivered = report.delivered.saturating_add(1);
                    debug!(entry_id = %head.id, retries = head.retries, "queued payload delivered");
                    if self.is_empty().await {
                        return;
                    }
                    tokio::time::sleep(policy.inter_message).await;
                }
                Err(ForwardError::PermanentPayloadFailure(reason)) => {
                    error!(
                        entry_id = %head.id,
                        destination = %head.destination,
                        reason = %reason,
                        "destination rejected queued payload, dropping"
                    );
                    self.remove_head(&head.id).await;
                    report.dropped = report.dropped.saturating_add(1);
                }
                Err(e) => {
                    let retries = head.retries.saturating_add(1);
                    if retries >= policy.max_retries {
                        let exhausted = ForwardError::RetryExhausted {
                            entry_id: head.id.clone(),
                            retries,
                        };
                        error!(
                            entry_id = %head.id,
                            destination = %head.destination,
                            retries,
                            last_error = %e,
                            "{exhausted}"
                        );
                        self.remove_head(&head.id).await;
                        report.abandoned = report.abandoned.saturating_add(1);
                        continue;
                    }

                    self.set_head_retries(&head.id, retries).await;
                    report.retried = report.retried.saturating_add(1);
                    let delay = policy.backoff(head.retries);
                    warn!(
                        entry_id = %head.id,
                        retries,
                        max_retries = policy.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "queued delivery failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Remove the head if it is `id`, then persist.
    async fn remove_head(&self, id: &str) {
        let mut entries = self.entries.lock().await;
        if entries.front().map(|e| e.id.as_str()) != Some(id) {
            warn!(entry_id = id, "queue head changed during flush");
            return;
        }
        entries.pop_front();
        self.persist(&mut entries).await;
    }

    /// Record a failed attempt on the head, then persist.
    async fn set_head_retries(&self, id: &str, retries: u32) {
        let mut entries = self.entries.lock().await;
        match entries.front_mut() {
            Some(head) if head.id == id => head.retries = retries,
            _ => {
                warn!(entry_id = id, "queue head changed during flush");
                return;
            }
        }
        self.persist(&mut entries).await;
    }

    /// Persist during a flush. Failures are logged; memory stays authoritative
    /// until the next successful write.
    async fn persist(&self, entries: &mut VecDeque<QueueEntry>) {
        if let Err(e) = self.store.save(entries.make_contiguous()).await {
            error!(error = %e, "failed to persist delivery queue");
        }
    }
}
