//! teloxide [`Message`] to [`RawMessage`].

use teloxide::types::{FileMeta, Message, MessageEntity, MessageEntityKind};

use crate::types::{Attachment, FileRef, PhotoVariant, RawContent, RawMessage, SpanKind, TextSpan};

/// Convert a channel post or group message into the source-neutral form.
pub fn raw_from_message(msg: &Message) -> RawMessage {
    let (text, entities) = match msg.text() {
        Some(text) => (Some(text), msg.entities()),
        None => (msg.caption(), msg.caption_entities()),
    };

    RawMessage {
        chat_id: msg.chat.id.0,
        sequence_id: i64::from(msg.id.0),
        text: text.map(str::to_owned),
        spans: entities.map(spans_from_entities).unwrap_or_default(),
        content: content_of(msg),
        media_group_key: msg.media_group_id().map(ToString::to_string),
    }
}

/// Map Telegram entities to spans. Offsets are already UTF-16 units.
pub fn spans_from_entities(entities: &[MessageEntity]) -> Vec<TextSpan> {
    entities
        .iter()
        .map(|e| TextSpan::new(e.offset, e.length, span_kind(&e.kind)))
        .collect()
}

fn span_kind(kind: &MessageEntityKind) -> SpanKind {
    match kind {
        MessageEntityKind::Bold => SpanKind::Bold,
        MessageEntityKind::Italic => SpanKind::Italic,
        MessageEntityKind::Strikethrough => SpanKind::Strikethrough,
        MessageEntityKind::Code => SpanKind::Code,
        MessageEntityKind::Pre { .. } => SpanKind::Pre,
        MessageEntityKind::Spoiler => SpanKind::Spoiler,
        MessageEntityKind::Url | MessageEntityKind::TextLink { .. } => SpanKind::Link,
        _ => SpanKind::Unknown,
    }
}

fn file_ref(meta: &FileMeta, mime_type: Option<String>, file_name: Option<String>) -> FileRef {
    FileRef {
        file_id: meta.id.to_string(),
        mime_type,
        file_name,
    }
}

fn content_of(msg: &Message) -> RawContent {
    if let Some(sizes) = msg.photo() {
        let sizes = sizes
            .iter()
            .map(|p| PhotoVariant {
                file: file_ref(&p.file, None, None),
                width: p.width,
                height: p.height,
                file_size: Some(p.file.size),
            })
            .collect();
        return RawContent::Attachment(Attachment::Photo { sizes });
    }
    if let Some(doc) = msg.document() {
        let file = file_ref(
            &doc.file,
            doc.mime_type.as_ref().map(ToString::to_string),
            doc.file_name.clone(),
        );
        return RawContent::Attachment(Attachment::Document { file });
    }
    if let Some(video) = msg.video() {
        let file = file_ref(
            &video.file,
            video.mime_type.as_ref().map(ToString::to_string),
            video.file_name.clone(),
        );
        return RawContent::Attachment(Attachment::Video { file });
    }
    if let Some(animation) = msg.animation() {
        let file = file_ref(
            &animation.file,
            animation.mime_type.as_ref().map(ToString::to_string),
            animation.file_name.clone(),
        );
        return RawContent::Attachment(Attachment::Animation { file });
    }
    if let Some(audio) = msg.audio() {
        let file = file_ref(
            &audio.file,
            audio.mime_type.as_ref().map(ToString::to_string),
            audio.file_name.clone(),
        );
        return RawContent::Attachment(Attachment::Audio { file });
    }
    if let Some(voice) = msg.voice() {
        let file = file_ref(
            &voice.file,
            voice.mime_type.as_ref().map(ToString::to_string),
            None,
        );
        return RawContent::Attachment(Attachment::Voice { file });
    }
    if let Some(sticker) = msg.sticker() {
        let file = file_ref(&sticker.file, None, None);
        return RawContent::Attachment(Attachment::Sticker { file });
    }
    if msg.text().is_some() {
        return RawContent::Text;
    }

    let kind = if msg.poll().is_some() {
        "poll"
    } else if msg.contact().is_some() {
        "contact"
    } else if msg.location().is_some() {
        "location"
    } else if msg.video_note().is_some() {
        "video_note"
    } else {
        "other"
    };
    RawContent::Unsupported {
        kind: kind.to_owned(),
    }
}
