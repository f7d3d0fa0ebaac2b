//! Telegram file downloads.
//!
//! [`TelegramFetcher`] resolves a file id with the Bot API `getFile` call and
//! downloads the contents into memory. The normalizer turns those bytes into
//! a base64 [`crate::types::MediaBlob`].

use async_trait::async_trait;
use chrono::Utc;
use teloxide::net::Download;
use teloxide::prelude::*;
use tracing::debug;

use super::normalize::{FetchError, MediaFetcher};
use crate::types::FileRef;

/// Downloads attachments through a teloxide [`Bot`].
#[derive(Debug, Clone)]
pub struct TelegramFetcher {
    bot: Bot,
}

impl TelegramFetcher {
    /// Wrap a bot handle.
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MediaFetcher for TelegramFetcher {
    async fn fetch(&self, file: &FileRef) -> Result<Vec<u8>, FetchError> {
        let meta = self
            .bot
            .get_file(file.file_id.clone())
            .await
            .map_err(|e| FetchError::Lookup(e.to_string()))?;

        let mut buf = Vec::new();
        self.bot
            .download_file(&meta.path, &mut buf)
            .await
            .map_err(|e| FetchError::Transfer(e.to_string()))?;

        debug!(file_id = %file.file_id, size = buf.len(), "downloaded file from Telegram");
        Ok(buf)
    }
}

/// Sanitize a filename before it is shown at the destination.
///
/// Replaces path separators (`/`, `\`) with underscores and strips leading
/// dots. Returns a timestamp-based fallback name if the result would be empty.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .replace(['/', '\\'], "_")
        .trim_start_matches('.')
        .to_owned();

    if sanitized.is_empty() {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        format!("file_{timestamp}")
    } else {
        sanitized
    }
}
