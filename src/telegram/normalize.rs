//! Raw source message to [`CanonicalPayload`].
//!
//! Text and captions go through [`format::apply_spans`] and
//! [`format::with_footer`]. Attachments are downloaded and base64-encoded
//! before the payload is returned, so nothing downstream ever holds a
//! reference to data that still has to be fetched.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use tracing::debug;

use super::format;
use super::media::sanitize_filename;
use crate::config::SettingsHandle;
use crate::types::{Attachment, CanonicalPayload, FileRef, MediaBlob, RawContent, RawMessage};

/// Failure to fetch a file from the source.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The Bot API call resolving the file failed.
    #[error("file lookup failed: {0}")]
    Lookup(String),

    /// The file download itself failed.
    #[error("download failed: {0}")]
    Transfer(String),
}

/// Retrieves attachment bytes from the source network.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Download the whole file behind `file`.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] if the file cannot be resolved or downloaded.
    async fn fetch(&self, file: &FileRef) -> Result<Vec<u8>, FetchError>;
}

/// Why a message could not be turned into a payload.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// The attachment could not be downloaded.
    #[error("failed to download {kind} {file_id}: {source}")]
    Download {
        /// Attachment kind.
        kind: &'static str,
        /// Source file id.
        file_id: String,
        /// Underlying fetch failure.
        #[source]
        source: FetchError,
    },

    /// The attachment has no usable file (no photo sizes, zero bytes).
    #[error("{kind} attachment has no content")]
    EmptyAttachment {
        /// Attachment kind.
        kind: &'static str,
    },
}

/// Builds canonical payloads from raw messages.
pub struct Normalizer {
    fetcher: Arc<dyn MediaFetcher>,
    settings: SettingsHandle,
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer").finish_non_exhaustive()
    }
}

impl Normalizer {
    /// Create a normalizer reading the footer from `settings` on every call.
    pub fn new(fetcher: Arc<dyn MediaFetcher>, settings: SettingsHandle) -> Self {
        Self { fetcher, settings }
    }

    /// Normalize one message.
    ///
    /// Returns `Ok(None)` for message kinds with no destination mapping and
    /// for text messages with nothing to say.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError`] when the attachment cannot be fetched or
    /// is empty. The message must then be dropped as a whole.
    pub async fn normalize(
        &self,
        raw: &RawMessage,
    ) -> Result<Option<CanonicalPayload>, NormalizeError> {
        let footer = self.settings.snapshot().forwarding.footer_text.clone();
        let body = format::apply_spans(raw.text.as_deref().unwrap_or_default(), &raw.spans);

        match &raw.content {
            RawContent::Unsupported { kind } => {
                debug!(
                    chat_id = raw.chat_id,
                    sequence_id = raw.sequence_id,
                    kind = %kind,
                    "unsupported message kind, skipping"
                );
                Ok(None)
            }
            RawContent::Text => {
                if body.trim().is_empty() {
                    debug!(sequence_id = raw.sequence_id, "empty text message, skipping");
                    return Ok(None);
                }
                Ok(Some(CanonicalPayload::text(format::with_footer(
                    &body, &footer,
                ))))
            }
            RawContent::Attachment(attachment) => {
                let media = self.download(raw.sequence_id, attachment).await?;
                Ok(Some(CanonicalPayload {
                    text: format::with_footer(&body, &footer),
                    media: Some(media),
                }))
            }
        }
    }

    async fn download(
        &self,
        sequence_id: i64,
        attachment: &Attachment,
    ) -> Result<MediaBlob, NormalizeError> {
        let kind = attachment.kind_name();
        let file = representative_file(attachment).ok_or(NormalizeError::EmptyAttachment { kind })?;

        let bytes = self
            .fetcher
            .fetch(file)
            .await
            .map_err(|source| NormalizeError::Download {
                kind,
                file_id: file.file_id.clone(),
                source,
            })?;
        if bytes.is_empty() {
            return Err(NormalizeError::EmptyAttachment { kind });
        }

        debug!(kind, sequence_id, size = bytes.len(), "attachment fetched");

        Ok(MediaBlob {
            mime_type: mime_type(attachment, file),
            data: base64::engine::general_purpose::STANDARD.encode(&bytes),
            filename: filename(attachment, file, sequence_id),
        })
    }
}

/// The single file that represents an attachment.
///
/// For photos this is the variant with the largest pixel area; ties go to
/// the larger file, then to the later entry.
pub fn representative_file(attachment: &Attachment) -> Option<&FileRef> {
    match attachment {
        Attachment::Photo { sizes } => sizes
            .iter()
            .max_by_key(|v| {
                (
                    u64::from(v.width).saturating_mul(u64::from(v.height)),
                    v.file_size.unwrap_or(0),
                )
            })
            .map(|v| &v.file),
        Attachment::Document { file }
        | Attachment::Video { file }
        | Attachment::Animation { file }
        | Attachment::Audio { file }
        | Attachment::Voice { file }
        | Attachment::Sticker { file } => Some(file),
    }
}

fn mime_type(attachment: &Attachment, file: &FileRef) -> String {
    if let Some(mime) = file.mime_type.as_deref().filter(|m| !m.is_empty()) {
        return mime.to_owned();
    }
    let fallback = match attachment {
        Attachment::Photo { .. } => "image/jpeg",
        Attachment::Sticker { .. } => "image/webp",
        Attachment::Video { .. } | Attachment::Animation { .. } => "video/mp4",
        Attachment::Audio { .. } => "audio/mpeg",
        Attachment::Voice { .. } => "audio/ogg",
        Attachment::Document { .. } => "application/octet-stream",
    };
    fallback.to_owned()
}

fn filename(attachment: &Attachment, file: &FileRef, sequence_id: i64) -> String {
    if let Some(name) = file.file_name.as_deref().filter(|n| !n.trim().is_empty()) {
        return sanitize_filename(name);
    }
    let ext = match attachment {
        Attachment::Photo { .. } => "jpg",
        Attachment::Sticker { .. } => "webp",
        Attachment::Video { .. } | Attachment::Animation { .. } => "mp4",
        Attachment::Audio { .. } => "mp3",
        Attachment::Voice { .. } => "ogg",
        Attachment::Document { .. } => "bin",
    };
    format!("{}_{sequence_id}.{ext}", attachment.kind_name())
}
