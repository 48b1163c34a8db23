//! Message decoding: raw `.eml` / `.arf` bytes → [`StructuredDocument`].
//!
//! Decoding is lenient. Malformed headers, broken MIME structure and bad
//! charsets are recorded as defects inside the document instead of failing.
//! The only hard failure is a document that cannot be represented as JSON.

pub mod eml;
pub mod header;
pub mod mime;
pub mod received;

use tracing::{debug, info};

use crate::error::DecodeError;
use crate::model::document::{StructuredDocument, DEFECT_HEADER, RECEIVED_IP_HEADER};

/// Header names written only by the decoder.
const RESERVED_HEADERS: [&str; 2] = [DEFECT_HEADER, RECEIVED_IP_HEADER];

/// Prefix for message headers that used a reserved name.
const SHADOWED_PREFIX: &str = "x-original-";

/// Decode raw message bytes into a structured document.
///
/// Identical input always yields an identical document.
pub fn decode(raw: &[u8]) -> Result<StructuredDocument, DecodeError> {
    let mut doc = StructuredDocument::default();

    if raw.iter().all(u8::is_ascii_whitespace) {
        doc.push_defect("empty message");
        doc.push_header(DEFECT_HEADER, "empty message: no header block");
        return canonicalize(doc);
    }

    let message = eml::strip_envelope(raw);
    let (header_bytes, body_bytes) = eml::split_message(message);

    let block = header::parse_header_block(header_bytes);
    doc.defects.extend(block.defects);

    if block.fields.is_empty() {
        let reason = "no header fields could be parsed";
        doc.push_defect(format!("missing header block: {reason}"));
        doc.push_header(DEFECT_HEADER, reason);
    }

    for (name, value) in &block.fields {
        if name == "date" {
            match header::canonical_date(value) {
                Some(iso) => doc.push_header(name, iso),
                None => {
                    doc.push_defect(format!("unparsable Date header: {value}"));
                    doc.push_header(name, value.as_str());
                }
            }
        } else if RESERVED_HEADERS.contains(&name.as_str()) {
            doc.push_defect(format!(
                "header '{name}' collides with a derived field; kept as {SHADOWED_PREFIX}{name}"
            ));
            doc.push_header(&format!("{SHADOWED_PREFIX}{name}"), value.as_str());
        } else {
            doc.push_header(name, value.as_str());
        }
    }

    for ip in received::source_ips(&block.fields) {
        doc.push_header(RECEIVED_IP_HEADER, ip);
    }

    let content = mime::parse_mime(message, body_bytes);
    doc.body_parts = content.body_parts;
    doc.attachments = content.attachments;
    doc.defects.extend(content.defects);

    info!(
        headers = doc.headers.len(),
        body_parts = doc.body_parts.len(),
        attachments = doc.attachments.len(),
        defects = doc.defects.len(),
        "Decoded message"
    );
    canonicalize(doc)
}

/// Round-trip the document through a JSON tree.
///
/// Guarantees that what the oracle receives and what callers hold are the
/// same structure; any value that does not survive is a serialization error.
fn canonicalize(doc: StructuredDocument) -> Result<StructuredDocument, DecodeError> {
    let tree =
        serde_json::to_value(&doc).map_err(|e| DecodeError::Serialization(e.to_string()))?;
    let back: StructuredDocument =
        serde_json::from_value(tree).map_err(|e| DecodeError::Serialization(e.to_string()))?;
    debug!("Document survived JSON round trip");
    Ok(back)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_simple_message() {
        let doc = decode(b"From: sender@example.com\nTo: receiver@example.com\nSubject: Test EML\n\nThis is the body of the test email.\n").unwrap();
        assert_eq!(doc.first_header("subject"), Some("Test EML"));
        assert_eq!(doc.first_header("from"), Some("sender@example.com"));
        assert_eq!(doc.first_header("to"), Some("receiver@example.com"));
        assert_eq!(doc.body_parts.len(), 1);
        assert!(doc.body_parts[0].raw_text.contains("body of the test email"));
        assert!(doc.defects.is_empty(), "{:?}", doc.defects);
    }

    #[test]
    fn test_decode_invalid_input_records_header_defect() {
        let doc = decode(b"this is not a valid eml file").unwrap();
        assert!(doc.headers.contains_key(DEFECT_HEADER));
        assert!(!doc.defects.is_empty());
    }

    #[test]
    fn test_decode_empty_input() {
        let doc = decode(b"").unwrap();
        assert_eq!(doc.defects, vec!["empty message"]);
        assert!(doc.body_parts.is_empty());
        assert!(doc.attachments.is_empty());
    }

    #[test]
    fn test_date_is_canonicalized() {
        let doc = decode(b"Subject: x\nDate: Thu, 02 Oct 2025 10:00:00 +0000\n\nbody\n").unwrap();
        assert_eq!(doc.first_header("date"), Some("2025-10-02T10:00:00Z"));
    }

    #[test]
    fn test_unparsable_date_is_kept_with_defect() {
        let doc = decode(b"Subject: x\nDate: sometime last week\n\nbody\n").unwrap();
        assert_eq!(doc.first_header("date"), Some("sometime last week"));
        assert!(doc.defects.iter().any(|d| d.contains("unparsable Date")));
    }

    #[test]
    fn test_received_ip_is_derived() {
        let doc = decode(b"Received: from a (a.example [203.0.113.9]) by b\nSubject: x\n\nbody\n").unwrap();
        assert_eq!(doc.header_values(RECEIVED_IP_HEADER), &["203.0.113.9"]);
    }

    #[test]
    fn test_message_cannot_write_derived_headers() {
        let doc = decode(b"Received_IP: 10.0.0.1\nDefect: none\nSubject: x\n\nbody\n").unwrap();
        assert!(doc.header_values(RECEIVED_IP_HEADER).is_empty());
        assert!(doc.header_values(DEFECT_HEADER).is_empty());
        assert_eq!(doc.header_values("x-original-received_ip"), &["10.0.0.1"]);
        assert_eq!(doc.header_values("x-original-defect"), &["none"]);
        assert_eq!(doc.defects.len(), 2, "{:?}", doc.defects);
    }
}
