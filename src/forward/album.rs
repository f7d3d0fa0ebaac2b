//! Media-group (album) aggregation.
//!
//! Telegram delivers an album as separate messages sharing a media group id,
//! often out of order and spread over a second or two. Each in-flight album
//! lives in an [`AlbumBuffer`] keyed by group id. Every arrival resets that
//! buffer's debounce timer; when the timer finally fires the album is sorted
//! by sequence id, downloaded in parallel, and dispatched one item at a time
//! with a small pacing gap so the destination renders it as one batch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dispatch::Dispatcher;
use super::{log_failure, ForwardError};
use crate::config::SettingsHandle;
use crate::telegram::normalize::Normalizer;
use crate::types::RawMessage;

/// One album waiting for its quiet period to end.
#[derive(Debug)]
pub struct AlbumBuffer {
    /// Media group id.
    pub group_key: String,
    /// Members in arrival order.
    pub members: Vec<RawMessage>,
    /// When the current timer fires.
    pub deadline: Instant,
    generation: u64,
    timer: AbortHandle,
}

/// Counters from flushing one album.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlbumReport {
    /// Members handed to the dispatcher successfully.
    pub dispatched: usize,
    /// Members lost to download or dispatch failures.
    pub failed: usize,
    /// Members with no destination mapping.
    pub skipped: usize,
}

struct AlbumState {
    buffers: Mutex<HashMap<String, AlbumBuffer>>,
    normalizer: Arc<Normalizer>,
    dispatcher: Arc<Dispatcher>,
    settings: SettingsHandle,
    generations: AtomicU64,
    flushed: AtomicU64,
}

/// Buffers album members and flushes each album once it goes quiet.
#[derive(Clone)]
pub struct AlbumAggregator {
    state: Arc<AlbumState>,
}

impl std::fmt::Debug for AlbumAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlbumAggregator")
            .field("pending", &self.pending_albums())
            .field("flushed", &self.albums_flushed())
            .finish()
    }
}

impl AlbumAggregator {
    /// Create an aggregator dispatching through `dispatcher`.
    pub fn new(
        normalizer: Arc<Normalizer>,
        dispatcher: Arc<Dispatcher>,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            state: Arc::new(AlbumState {
                buffers: Mutex::new(HashMap::new()),
                normalizer,
                dispatcher,
                settings,
                generations: AtomicU64::new(0),
                flushed: AtomicU64::new(0),
            }),
        }
    }

    /// Add an album member and (re)arm its debounce timer.
    ///
    /// Returns immediately; the album is sent from a background task. Must
    /// be called from within a Tokio runtime.
    pub fn submit(&self, raw: RawMessage) {
        let Some(key) = raw.media_group_key.clone() else {
            warn!(sequence_id = raw.sequence_id, "album submit without media group id, ignoring");
            return;
        };

        let debounce = Duration::from_millis(self.state.settings.snapshot().forwarding.album_debounce_ms);
        let generation = self.state.generations.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now().checked_add(debounce).unwrap_or_else(Instant::now);

        // Arm under the lock so the timer cannot look for the buffer before
        // it is in the map.
        let mut buffers = self.state.lock_buffers();
        let timer = self.arm_timer(key.clone(), generation, debounce);
        match buffers.get_mut(&key) {
            Some(buffer) => {
                buffer.timer.abort();
                buffer.members.push(raw);
                buffer.generation = generation;
                buffer.timer = timer;
                buffer.deadline = deadline;
                debug!(group = %key, members = buffer.members.len(), "album member buffered, debounce reset");
            }
            None => {
                debug!(group = %key, "new album buffer");
                buffers.insert(
                    key.clone(),
                    AlbumBuffer {
                        group_key: key,
                        members: vec![raw],
                        deadline,
                        generation,
                        timer,
                    },
                );
            }
        }
    }

    /// Albums still waiting for their debounce to expire.
    pub fn pending_albums(&self) -> usize {
        self.state.lock_buffers().len()
    }

    /// Albums flushed since start.
    pub fn albums_flushed(&self) -> u64 {
        self.state.flushed.load(Ordering::Relaxed)
    }

    fn arm_timer(&self, key: String, generation: u64, debounce: Duration) -> AbortHandle {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            state.expire(&key, generation).await;
        })
        .abort_handle()
    }
}

impl AlbumState {
    fn lock_buffers(&self) -> MutexGuard<'_, HashMap<String, AlbumBuffer>> {
        match self.buffers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Timer callback. A stale generation means a newer member re-armed the
    /// timer after this one woke up.
    async fn expire(&self, key: &str, generation: u64) {
        let buffer = {
            let mut buffers = self.lock_buffers();
            match buffers.get(key) {
                Some(b) if b.generation == generation => buffers.remove(key),
                _ => None,
            }
        };
        if let Some(buffer) = buffer {
            self.flushed.fetch_add(1, Ordering::Relaxed);
            self.flush(buffer).await;
        }
    }

    async fn flush(&self, buffer: AlbumBuffer) -> AlbumReport {
        let mut report = AlbumReport::default();
        let AlbumBuffer {
            group_key,
            mut members,
            ..
        } = buffer;

        if !self.dispatcher.has_destination() {
            warn!(
                group = %group_key,
                members = members.len(),
                "no WhatsApp destination configured, dropping album"
            );
            report.failed = members.len();
            return report;
        }

        members.sort_by_key(|m| m.sequence_id);
        let pacing = Duration::from_millis(self.settings.snapshot().forwarding.album_pacing_ms);

        // Downloads are independent; run them together and keep the order.
        let built = join_all(members.iter().map(|m| self.normalizer.normalize(m))).await;

        let mut last_start: Option<Instant> = None;
        for (member, result) in members.iter().zip(built) {
            let payload = match result {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    report.skipped = report.skipped.saturating_add(1);
                    continue;
                }
                Err(e) => {
                    log_failure(&ForwardError::from(e), member.sequence_id);
                    report.failed = report.failed.saturating_add(1);
                    continue;
                }
            };

            if let Some(prev) = last_start {
                tokio::time::sleep_until(prev.checked_add(pacing).unwrap_or(prev)).await;
            }
            last_start = Some(Instant::now());

            match self.dispatcher.dispatch(payload).await {
                Ok(_) => report.dispatched = report.dispatched.saturating_add(1),
                Err(e) => {
                    log_failure(&e, member.sequence_id);
                    report.failed = report.failed.saturating_add(1);
                }
            }
        }

        info!(
            group = %group_key,
            dispatched = report.dispatched,
            failed = report.failed,
            skipped = report.skipped,
            "album flushed"
        );
        report
    }
}
