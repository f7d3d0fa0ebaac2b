//! Telegram entity spans to WhatsApp inline markers, plus footer injection.
//!
//! Telegram describes formatting as `{offset, length, kind}` spans measured
//! in UTF-16 code units. WhatsApp uses paired delimiter characters in the
//! text itself (`*bold*`, `_italic_`, `~strike~`, "```mono```").

use tracing::debug;

use crate::types::{SpanKind, TextSpan};

/// Separator between body and footer: exactly one blank line.
const FOOTER_SEPARATOR: &str = "\n\n";

/// Opening/closing marker for a span kind, or `None` when the kind has no
/// WhatsApp equivalent and the text is left as is.
pub fn delimiter(kind: SpanKind) -> Option<&'static str> {
    match kind {
        SpanKind::Bold => Some("*"),
        SpanKind::Italic => Some("_"),
        SpanKind::Strikethrough => Some("~"),
        SpanKind::Code | SpanKind::Pre => Some("```"),
        SpanKind::Spoiler => Some("||"),
        SpanKind::Link | SpanKind::Unknown => None,
    }
}

/// A marker already spliced into the buffer, in original coordinates.
struct Inserted {
    at: usize,
    len: usize,
    closing: bool,
}

/// Render `text` with `spans` translated to WhatsApp markers.
///
/// Spans are applied in descending offset order so that a splice never
/// moves text that a later (lower-offset) span still points at. Spans that
/// share an offset are applied shortest first, which nests the longer one
/// outside. Spans running past the end of the text are skipped.
pub fn apply_spans(text: &str, spans: &[TextSpan]) -> String {
    if spans.is_empty() {
        return text.to_owned();
    }

    let mut units: Vec<u16> = text.encode_utf16().collect();
    let original_len = units.len();

    let mut ordered: Vec<&TextSpan> = spans.iter().collect();
    ordered.sort_by(|a, b| b.offset.cmp(&a.offset).then(a.length.cmp(&b.length)));

    let mut inserted: Vec<Inserted> = Vec::with_capacity(ordered.len().saturating_mul(2));

    for span in ordered {
        let Some(marker) = delimiter(span.kind) else {
            continue;
        };
        let Some(end) = span.offset.checked_add(span.length) else {
            continue;
        };
        if span.length == 0 || end > original_len {
            debug!(
                offset = span.offset,
                length = span.length,
                text_len = original_len,
                "skipping out-of-range span"
            );
            continue;
        }

        let marker_units: Vec<u16> = marker.encode_utf16().collect();

        // Closing marker goes after inner closers at the same position but
        // before any opener that starts there.
        let end_shift: usize = inserted
            .iter()
            .filter(|m| m.at < end || (m.at == end && m.closing))
            .map(|m| m.len)
            .sum();
        let close_at = end.saturating_add(end_shift);
        units.splice(close_at..close_at, marker_units.iter().copied());

        // Everything inserted so far sits at or after `offset`.
        let start_shift: usize = inserted
            .iter()
            .filter(|m| m.at < span.offset)
            .map(|m| m.len)
            .sum();
        let open_at = span.offset.saturating_add(start_shift);
        units.splice(open_at..open_at, marker_units.iter().copied());

        inserted.push(Inserted {
            at: end,
            len: marker_units.len(),
            closing: true,
        });
        inserted.push(Inserted {
            at: span.offset,
            len: marker_units.len(),
            closing: false,
        });
    }

    String::from_utf16_lossy(&units)
}

/// Append `footer` after one blank line.
///
/// An empty (or whitespace-only) footer leaves `body` untouched. An empty
/// body yields the footer alone.
pub fn with_footer(body: &str, footer: &str) -> String {
    if footer.trim().is_empty() {
        return body.to_owned();
    }
    let body = body.trim_end_matches(['\n', '\r']);
    if body.trim().is_empty() {
        return footer.to_owned();
    }
    format!("{body}{FOOTER_SEPARATOR}{footer}")
}
