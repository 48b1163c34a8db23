//! Flat storable fields from a [`StructuredDocument`].
//!
//! Projection never fails. Missing headers become empty strings and a
//! missing or unparsable `Date` falls back to the projection time.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::address::bare_addresses;
use crate::model::document::{StructuredDocument, RECEIVED_IP_HEADER};
use crate::model::record::FlatFields;

/// Project a document using the current wall-clock time as the date fallback.
pub fn project(doc: &StructuredDocument) -> FlatFields {
    project_at(doc, Utc::now())
}

/// Project a document with an explicit date fallback.
pub fn project_at(doc: &StructuredDocument, now: DateTime<Utc>) -> FlatFields {
    // Repeated From/Subject are joined; only the first To is kept.
    let from_address = doc
        .header_values("from")
        .iter()
        .map(|v| bare_addresses(v))
        .collect::<Vec<_>>()
        .join(", ");
    let subject = doc.header_values("subject").join(", ");
    let to_address = doc.first_header("to").map(bare_addresses).unwrap_or_default();

    let date = match doc.first_header("date").and_then(parse_iso) {
        Some(date) => date,
        None => {
            debug!("No usable Date header, using projection time");
            now
        }
    };

    let source_ip = doc
        .first_header(RECEIVED_IP_HEADER)
        .unwrap_or_default()
        .to_string();

    FlatFields {
        from_address,
        to_address,
        subject,
        date,
        source_ip,
    }
}

fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let normalized = match value.strip_suffix('Z').or_else(|| value.strip_suffix('z')) {
        Some(stripped) => format!("{stripped}+00:00"),
        None => value.to_string(),
    };
    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
