//! Persistence of raw and parsed messages.
//!
//! The coordinator only talks to [`MessageStore`]; [`sqlite::SqliteStore`]
//! is the bundled implementation.

pub mod sqlite;

use crate::error::StoreError;
use crate::model::record::{FlatFields, ParsedMessage, RawMessage};

pub use sqlite::SqliteStore;

/// Minimal create/query/delete contract used by ingestion and the CLI.
///
/// Every write is a short, self-contained unit: implementations commit or
/// roll back before returning.
pub trait MessageStore: Send + Sync {
    /// Store received bytes before any decoding; returns the new raw id.
    fn insert_raw_message(&self, text: &str, bytes: &[u8]) -> Result<i64, StoreError>;

    /// Store a parsed record and link it to `raw_message_id` in both
    /// directions atomically; returns the new parsed id.
    fn insert_parsed_message(
        &self,
        fields: &FlatFields,
        verdict_json: &str,
        raw_message_id: i64,
    ) -> Result<i64, StoreError>;

    /// Delete a parsed record together with its raw message.
    ///
    /// Returns `false` if no parsed record has that id.
    fn delete_parsed_message_cascade(&self, id: i64) -> Result<bool, StoreError>;

    /// All parsed records, oldest first.
    fn list_parsed_messages(&self) -> Result<Vec<ParsedMessage>, StoreError>;

    /// Raw messages, oldest first; with `only_linked`, only those that own a
    /// parsed record.
    fn list_raw_messages(&self, only_linked: bool) -> Result<Vec<RawMessage>, StoreError>;

    fn get_raw_message(&self, id: i64) -> Result<Option<RawMessage>, StoreError>;

    fn get_parsed_message(&self, id: i64) -> Result<Option<ParsedMessage>, StoreError>;
}
