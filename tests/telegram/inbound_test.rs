//! Bot API updates to raw messages.

use teloxide::types::Message;

use ferry::telegram::inbound::raw_from_message;
use ferry::types::{Attachment, RawContent, SpanKind, TextSpan};

fn channel_post(extra: serde_json::Value) -> Message {
    let mut json = serde_json::json!({
        "message_id": 42,
        "date": 1_700_000_000,
        "chat": { "id": -1_001_234_567_890_i64, "type": "channel", "title": "News" },
        "sender_chat": { "id": -1_001_234_567_890_i64, "type": "channel", "title": "News" },
    });
    if let (Some(base), Some(extra)) = (json.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(json).expect("valid channel post")
}

#[test]
fn text_post_keeps_entities_as_spans() {
    let msg = channel_post(serde_json::json!({
        "text": "hello world",
        "entities": [
            { "type": "bold", "offset": 0, "length": 5 },
            { "type": "url", "offset": 6, "length": 5 },
            { "type": "hashtag", "offset": 0, "length": 1 }
        ]
    }));
    let raw = raw_from_message(&msg);

    assert_eq!(raw.chat_id, -1_001_234_567_890);
    assert_eq!(raw.sequence_id, 42);
    assert_eq!(raw.text.as_deref(), Some("hello world"));
    assert_eq!(raw.content, RawContent::Text);
    assert_eq!(
        raw.spans,
        vec![
            TextSpan::new(0, 5, SpanKind::Bold),
            TextSpan::new(6, 5, SpanKind::Link),
            TextSpan::new(0, 1, SpanKind::Unknown),
        ]
    );
    assert!(raw.media_group_key.is_none());
}

#[test]
fn photo_album_member_uses_caption_and_group_id() {
    let msg = channel_post(serde_json::json!({
        "media_group_id": "13579",
        "caption": "look",
        "caption_entities": [{ "type": "italic", "offset": 0, "length": 4 }],
        "photo": [
            { "file_id": "small", "file_unique_id": "u1", "width": 90, "height": 60, "file_size": 1_000 },
            { "file_id": "large", "file_unique_id": "u2", "width": 1280, "height": 853, "file_size": 90_000 }
        ]
    }));
    let raw = raw_from_message(&msg);

    assert_eq!(raw.media_group_key.as_deref(), Some("13579"));
    assert_eq!(raw.text.as_deref(), Some("look"));
    assert_eq!(raw.spans, vec![TextSpan::new(0, 4, SpanKind::Italic)]);
    match raw.content {
        RawContent::Attachment(Attachment::Photo { sizes }) => {
            assert_eq!(sizes.len(), 2);
            assert_eq!(sizes[1].file.file_id, "large");
            assert_eq!(sizes[1].width, 1280);
        }
        other => panic!("expected photo, got {other:?}"),
    }
}

#[test]
fn document_carries_mime_type_and_name() {
    let msg = channel_post(serde_json::json!({
        "document": {
            "file_id": "doc1",
            "file_unique_id": "ud1",
            "file_name": "report.pdf",
            "mime_type": "application/pdf",
            "file_size": 2_048
        }
    }));
    let raw = raw_from_message(&msg);

    assert!(raw.text.is_none());
    match raw.content {
        RawContent::Attachment(Attachment::Document { file }) => {
            assert_eq!(file.file_id, "doc1");
            assert_eq!(file.mime_type.as_deref(), Some("application/pdf"));
            assert_eq!(file.file_name.as_deref(), Some("report.pdf"));
        }
        other => panic!("expected document, got {other:?}"),
    }
}

#[test]
fn contact_is_unsupported() {
    let msg = channel_post(serde_json::json!({
        "contact": { "phone_number": "+15550100", "first_name": "Ada" }
    }));
    let raw = raw_from_message(&msg);
    assert_eq!(
        raw.content,
        RawContent::Unsupported {
            kind: "contact".to_owned()
        }
    );
}
