//! MIME body walking: leaf parts, attachment metadata and structural defects.

use mail_parser::{MessageParser, MimeHeaders, PartType};
use tracing::debug;

use crate::model::document::{AttachmentMeta, BodyPart};
use crate::parser::header::decode_charset;

/// Content types that carry report data inline even when filed as attachments
/// (ARF feedback reports, DSNs, returned headers).
const REPORT_TYPES: [&str; 3] = [
    "message/feedback-report",
    "message/delivery-status",
    "text/rfc822-headers",
];

/// Body parts, attachments and defects extracted from one message.
#[derive(Debug, Default)]
pub struct MimeContent {
    pub body_parts: Vec<BodyPart>,
    pub attachments: Vec<AttachmentMeta>,
    pub defects: Vec<String>,
}

/// Walk the MIME tree of a complete message (headers + body).
///
/// `body` is the raw body after the header block; it is used as a single
/// `text/plain` part when the MIME parser gives up.
pub fn parse_mime(message: &[u8], body: &[u8]) -> MimeContent {
    let mut content = MimeContent::default();

    let Some(msg) = MessageParser::default().parse(message) else {
        content
            .defects
            .push("MIME structure could not be parsed; body kept as plain text".to_string());
        if !body.is_empty() {
            content.body_parts.push(BodyPart {
                content_type: "text/plain".to_string(),
                charset: None,
                raw_text: String::from_utf8_lossy(body).into_owned(),
                is_attachment: false,
            });
        }
        return content;
    };

    for (idx, part) in msg.parts.iter().enumerate() {
        let (content_type, charset) = declared_type(part);

        if content_type.starts_with("multipart/") {
            check_boundary(part, idx, message, &mut content.defects);
            if matches!(part.body, PartType::Multipart(_)) {
                continue;
            }
        }

        if part.is_encoding_problem {
            content.defects.push(format!(
                "part {idx} ({content_type}): content-transfer-encoding could not be decoded"
            ));
        }

        let is_report = REPORT_TYPES.contains(&content_type.as_str());
        let is_attachment = !is_report
            && (msg.attachments.iter().any(|&id| id as usize == idx)
                || matches!(part.body, PartType::Message(_))
                || (matches!(part.body, PartType::Binary(_) | PartType::InlineBinary(_))
                    && !is_textual(&content_type)));

        if is_attachment {
            let filename = part
                .attachment_name()
                .map(String::from)
                .unwrap_or_else(|| format!("attachment_{}", content.attachments.len()));
            content.attachments.push(AttachmentMeta {
                filename,
                content_type: content_type.clone(),
                size_bytes: part.contents().len() as u64,
            });
        }

        let raw_text = if is_attachment {
            String::new()
        } else {
            match &part.body {
                PartType::Text(text) | PartType::Html(text) => text.to_string(),
                PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
                    decode_charset(charset.as_deref().unwrap_or("utf-8"), bytes)
                }
                PartType::Message(_) | PartType::Multipart(_) => String::new(),
            }
        };

        content.body_parts.push(BodyPart {
            content_type,
            charset,
            raw_text,
            is_attachment,
        });
    }

    debug!(
        parts = content.body_parts.len(),
        attachments = content.attachments.len(),
        "Walked MIME tree"
    );
    content
}

/// Declared `type/subtype` (lower-cased) and charset of a part.
///
/// Parts without a `Content-Type` get the RFC 2045 default, `text/plain`.
fn declared_type(part: &mail_parser::MessagePart<'_>) -> (String, Option<String>) {
    match part.content_type() {
        Some(ct) => {
            let main = ct.ctype().to_ascii_lowercase();
            let full = match ct.subtype() {
                Some(sub) => format!("{main}/{}", sub.to_ascii_lowercase()),
                None => main,
            };
            let charset = ct.attribute("charset").map(|c| c.trim().to_ascii_lowercase());
            (full, charset)
        }
        None => ("text/plain".to_string(), None),
    }
}

/// Record a defect for a multipart part with no boundary or no closing delimiter.
fn check_boundary(
    part: &mail_parser::MessagePart<'_>,
    idx: usize,
    message: &[u8],
    defects: &mut Vec<String>,
) {
    let boundary = part.content_type().and_then(|ct| ct.attribute("boundary"));
    match boundary {
        None => defects.push(format!(
            "part {idx}: multipart content type declares no boundary"
        )),
        Some(boundary) => {
            let closing = format!("--{boundary}--");
            if !contains(message, closing.as_bytes()) {
                defects.push(format!(
                    "part {idx}: multipart boundary '{boundary}' is never closed (truncated message)"
                ));
            }
        }
    }
}

fn is_textual(content_type: &str) -> bool {
    content_type.starts_with("text/")
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}
