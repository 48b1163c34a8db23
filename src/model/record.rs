//! Persisted records and the flat fields projected from a document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::verdict::Analysis;

/// Scalar fields derived from a [`StructuredDocument`](super::document::StructuredDocument).
///
/// String fields are never null; a missing header projects to `""`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatFields {
    pub from_address: String,
    pub to_address: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub source_ip: String,
}

/// The original message as received, stored before any decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: i64,
    /// Lossy UTF-8 rendering of the bytes, with NUL characters removed.
    pub raw_content: String,
    /// Exact received bytes.
    #[serde(skip)]
    pub raw_bytes: Vec<u8>,
    /// Set once a [`ParsedMessage`] has been linked.
    pub parsed_message_id: Option<i64>,
}

/// Projected fields plus the oracle outcome, linked to exactly one [`RawMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub id: i64,
    pub from_address: String,
    pub to_address: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub source_ip: String,
    /// Serialized [`Analysis`]: a verdict, or an `{"error", "details"}` payload.
    pub verdict_json: String,
    pub raw_message_id: i64,
}

impl ParsedMessage {
    /// Decode the stored verdict JSON.
    pub fn analysis(&self) -> serde_json::Result<Analysis> {
        serde_json::from_str(&self.verdict_json)
    }

    /// The flat fields this record was written from.
    pub fn fields(&self) -> FlatFields {
        FlatFields {
            from_address: self.from_address.clone(),
            to_address: self.to_address.clone(),
            subject: self.subject.clone(),
            date: self.date,
            source_ip: self.source_ip.clone(),
        }
    }
}

/// Render raw bytes as storable text: invalid UTF-8 is replaced and NULs are dropped.
pub fn raw_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace('\0', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_text_strips_nul_and_replaces_invalid() {
        let text = raw_text(b"Subject: a\0b\n\n\xff body");
        assert_eq!(text, "Subject: ab\n\n\u{FFFD} body");
    }
}
