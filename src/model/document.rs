//! The canonical structured document produced by the decoder.
//!
//! Only the four top-level fields are statically typed. Everything the
//! oracle sees is plain strings, numbers and booleans, so the whole
//! document always survives a JSON round trip.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Header name under which an unparsable header block is reported.
pub const DEFECT_HEADER: &str = "defect";

/// Derived header listing the source IPs found while decoding.
pub const RECEIVED_IP_HEADER: &str = "received_ip";

/// Decoded representation of one raw message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredDocument {
    /// Lower-cased header name → values in encounter order.
    pub headers: BTreeMap<String, Vec<String>>,

    /// Leaf MIME parts in document order.
    pub body_parts: Vec<BodyPart>,

    /// Attachment metadata. Payload bytes are never kept.
    pub attachments: Vec<AttachmentMeta>,

    /// Anomalies found while decoding, in the order they were found.
    pub defects: Vec<String>,
}

impl StructuredDocument {
    /// All values recorded for a header (name is matched lower-cased).
    pub fn header_values(&self, name: &str) -> &[String] {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First value recorded for a header.
    pub fn first_header(&self, name: &str) -> Option<&str> {
        self.header_values(name).first().map(String::as_str)
    }

    /// Append a value, keeping earlier values for the same name.
    pub fn push_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Record a decode anomaly.
    pub fn push_defect(&mut self, defect: impl Into<String>) {
        self.defects.push(defect.into());
    }

    /// Serialize as an indented JSON string (the oracle's user message).
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// One leaf MIME part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyPart {
    /// Declared `type/subtype`, lower-cased.
    pub content_type: String,

    /// Declared charset, if any.
    pub charset: Option<String>,

    /// Text transcoded to UTF-8. Empty for attachments.
    pub raw_text: String,

    /// Whether the part was registered as an attachment.
    pub is_attachment: bool,
}

/// Metadata about an attachment. The binary payload is dropped at decode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    /// Filename of the attachment. Generated if missing from the headers.
    pub filename: String,

    /// MIME content type (e.g. `"image/jpeg"`, `"application/pdf"`).
    pub content_type: String,

    /// Decoded size in bytes.
    pub size_bytes: u64,
}
