//! Core message types shared by the source adapter, the normalizer and the
//! delivery pipeline.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Inbound (source side)
// ---------------------------------------------------------------------------

/// Inline formatting kind attached to a span of source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// Bold text.
    Bold,
    /// Italic text.
    Italic,
    /// Strikethrough text.
    Strikethrough,
    /// Inline monospace.
    Code,
    /// Preformatted block.
    Pre,
    /// Hidden-until-tapped text.
    Spoiler,
    /// Hyperlink; passes through unchanged.
    Link,
    /// Anything without a destination mapping.
    #[serde(other)]
    Unknown,
}

/// A formatting span over message text.
///
/// `offset` and `length` are measured in UTF-16 code units, matching the
/// Telegram Bot API entity representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    /// Start position in UTF-16 code units.
    pub offset: usize,
    /// Span length in UTF-16 code units.
    pub length: usize,
    /// Formatting kind.
    pub kind: SpanKind,
}

impl TextSpan {
    /// Build a span.
    pub fn new(offset: usize, length: usize, kind: SpanKind) -> Self {
        Self {
            offset,
            length,
            kind,
        }
    }
}

/// A reference to a downloadable source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Source-side file identifier passed to the fetcher.
    pub file_id: String,
    /// MIME type reported by the source, if any.
    pub mime_type: Option<String>,
    /// Original filename reported by the source, if any.
    pub file_name: Option<String>,
}

impl FileRef {
    /// A file reference with no metadata beyond its id.
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            mime_type: None,
            file_name: None,
        }
    }
}

/// One resolution of a multi-resolution photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoVariant {
    /// The file holding this resolution.
    pub file: FileRef,
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
    /// File size in bytes, if known.
    pub file_size: Option<u32>,
}

/// Attachment carried by a source message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    /// Image delivered as several resolutions.
    Photo {
        /// Every available resolution, in source order.
        sizes: Vec<PhotoVariant>,
    },
    /// Generic file.
    Document {
        /// The file.
        file: FileRef,
    },
    /// Video clip.
    Video {
        /// The file.
        file: FileRef,
    },
    /// Silent looping video (GIF).
    Animation {
        /// The file.
        file: FileRef,
    },
    /// Music or audio file.
    Audio {
        /// The file.
        file: FileRef,
    },
    /// Voice note.
    Voice {
        /// The file.
        file: FileRef,
    },
    /// Sticker image.
    Sticker {
        /// The file.
        file: FileRef,
    },
}

impl Attachment {
    /// Short lowercase name used in logs and filenames.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Photo { .. } => "photo",
            Self::Document { .. } => "document",
            Self::Video { .. } => "video",
            Self::Animation { .. } => "animation",
            Self::Audio { .. } => "audio",
            Self::Voice { .. } => "voice",
            Self::Sticker { .. } => "sticker",
        }
    }
}

/// What a source message carries besides its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawContent {
    /// Text only.
    Text,
    /// One attachment; the text (if any) is its caption.
    Attachment(Attachment),
    /// A message kind with no destination mapping (poll, contact, ...).
    Unsupported {
        /// Source kind name, for logs.
        kind: String,
    },
}

/// A message as delivered by the source connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Source chat the message was posted in.
    pub chat_id: i64,
    /// Monotonic per-chat sequence number (Telegram message id).
    pub sequence_id: i64,
    /// Body text, or caption for attachments.
    pub text: Option<String>,
    /// Formatting spans over `text`.
    #[serde(default)]
    pub spans: Vec<TextSpan>,
    /// Attachment or kind marker.
    pub content: RawContent,
    /// Album identifier shared by members of the same media group.
    pub media_group_key: Option<String>,
}

impl RawMessage {
    /// A plain text message with no spans.
    pub fn text(chat_id: i64, sequence_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            sequence_id,
            text: Some(text.into()),
            spans: Vec::new(),
            content: RawContent::Text,
            media_group_key: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical (destination side)
// ---------------------------------------------------------------------------

/// Downloaded attachment ready for transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaBlob {
    /// MIME type sent to the destination.
    pub mime_type: String,
    /// File contents, base64 encoded.
    pub data: String,
    /// Filename shown at the destination.
    pub filename: String,
}

/// The normalized form of one message, independent of source and destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalPayload {
    /// Text in destination-native formatting (caption when `media` is set).
    pub text: String,
    /// Attachment, if any.
    pub media: Option<MediaBlob>,
}

impl CanonicalPayload {
    /// A text-only payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: None,
        }
    }
}
