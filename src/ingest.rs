//! Ingestion coordinator: raw bytes in, persisted records out.
//!
//! The raw message is committed before anything can fail, so the original
//! evidence survives every later error. Decoding and projection are
//! synchronous; the oracle call is the only await point and runs with no
//! storage lock held.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{IngestError, OracleError, Result, StoreError};
use crate::model::document::StructuredDocument;
use crate::model::record::{raw_text, ParsedMessage, RawMessage};
use crate::model::verdict::{Analysis, Verdict};
use crate::oracle::Classifier;
use crate::parser;
use crate::projector;
use crate::store::MessageStore;

/// File extensions accepted for ingestion (compared case-insensitively).
pub const ACCEPTED_EXTENSIONS: [&str; 2] = ["eml", "arf"];

/// Default size limit: 25 MB.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 25 * 1024 * 1024;

/// Pipeline position of one ingestion.
///
/// `Projected` and `Classified` are independent derivations of the decoded
/// document; either may happen first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Received,
    RawSaved,
    Decoded,
    Projected,
    Classified,
    Persisted,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "RECEIVED",
            Self::RawSaved => "RAW_SAVED",
            Self::Decoded => "DECODED",
            Self::Projected => "PROJECTED",
            Self::Classified => "CLASSIFIED",
            Self::Persisted => "PERSISTED",
        };
        f.write_str(name)
    }
}

/// What to do when the oracle fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Surface the failure; no parsed record is written.
    Strict,
    /// Write a parsed record whose verdict is an error payload.
    Degraded,
}

/// Result of a completed ingestion.
#[derive(Debug)]
pub struct IngestReport {
    /// Raw row as re-read from storage.
    pub raw: RawMessage,
    /// Parsed row as re-read from storage.
    pub parsed: ParsedMessage,
    /// The decoded document the oracle saw.
    pub document: StructuredDocument,
    /// The verdict, or the oracle failure recorded in degraded mode.
    pub outcome: std::result::Result<Verdict, OracleError>,
}

impl IngestReport {
    /// Whether a real verdict (not an error payload) was persisted.
    pub fn persisted(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.outcome.as_ref().ok()
    }
}

/// Reject filenames that are not `.eml` / `.arf` before any byte is read.
pub fn check_input_kind(filename: &str) -> Result<()> {
    let lower = filename.to_ascii_lowercase();
    let accepted = ACCEPTED_EXTENSIONS
        .iter()
        .any(|ext| lower.strip_suffix(ext).is_some_and(|stem| stem.ends_with('.')));
    if accepted {
        Ok(())
    } else {
        Err(IngestError::InvalidInputKind {
            filename: filename.to_string(),
        })
    }
}

/// Drives one message through store → decode → {project, classify} → store.
pub struct IngestionCoordinator<S, C> {
    store: S,
    classifier: C,
    mode: IngestMode,
    deadline: Option<Duration>,
    max_message_bytes: usize,
}

impl<S: MessageStore, C: Classifier> IngestionCoordinator<S, C> {
    /// Strict mode, no deadline, 25 MB limit.
    pub fn new(store: S, classifier: C) -> Self {
        Self {
            store,
            classifier,
            mode: IngestMode::Strict,
            deadline: None,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    pub fn with_mode(mut self, mode: IngestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bound the oracle call; an elapsed deadline counts as the oracle being unavailable.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }

    pub fn mode(&self) -> IngestMode {
        self.mode
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ingest one message.
    ///
    /// Errors after the raw row is committed carry its id; that row is never
    /// rolled back.
    pub async fn ingest(&self, filename: &str, bytes: &[u8]) -> Result<IngestReport> {
        check_input_kind(filename)?;
        if bytes.len() > self.max_message_bytes {
            return Err(IngestError::MessageTooLarge {
                size: bytes.len(),
                limit: self.max_message_bytes,
            });
        }

        let raw_message_id = self
            .store
            .insert_raw_message(&raw_text(bytes), bytes)
            .map_err(|source| IngestError::Storage {
                stage: IngestStage::RawSaved,
                raw_message_id: None,
                source,
            })?;
        info!(raw_message_id, filename, bytes = bytes.len(), "Raw message saved");

        let document = parser::decode(bytes).map_err(|source| {
            warn!(raw_message_id, error = %source, "Decoding failed");
            IngestError::Decode {
                raw_message_id,
                source,
            }
        })?;

        let fields = projector::project(&document);

        let outcome = match self.classify(&document).await {
            Ok(verdict) => Ok(verdict),
            Err(source) if self.mode == IngestMode::Strict => {
                warn!(raw_message_id, error = %source, "Classification failed, raw message kept");
                return Err(IngestError::Oracle {
                    raw_message_id,
                    source,
                });
            }
            Err(e) => {
                warn!(raw_message_id, error = %e, "Classification failed, storing error payload");
                Err(e)
            }
        };

        let analysis = match &outcome {
            Ok(verdict) => Analysis::Verdict(verdict.clone()),
            Err(e) => Analysis::failed(e),
        };
        let verdict_json = serde_json::to_string(&analysis)
            .map_err(|e| persist_failed(raw_message_id, StoreError::from(e)))?;

        let parsed_message_id = self
            .store
            .insert_parsed_message(&fields, &verdict_json, raw_message_id)
            .map_err(|source| persist_failed(raw_message_id, source))?;

        let raw = self
            .store
            .get_raw_message(raw_message_id)
            .and_then(|row| {
                row.ok_or(StoreError::NotFound {
                    table: "raw_messages",
                    id: raw_message_id,
                })
            })
            .map_err(|source| persist_failed(raw_message_id, source))?;
        let parsed = self
            .store
            .get_parsed_message(parsed_message_id)
            .and_then(|row| {
                row.ok_or(StoreError::NotFound {
                    table: "parsed_messages",
                    id: parsed_message_id,
                })
            })
            .map_err(|source| persist_failed(raw_message_id, source))?;

        info!(
            raw_message_id,
            parsed_message_id,
            verdict = outcome.as_ref().map_or("error", |v| v.verdict.as_str()),
            "Ingestion complete"
        );

        Ok(IngestReport {
            raw,
            parsed,
            document,
            outcome,
        })
    }

    async fn classify(&self, doc: &StructuredDocument) -> std::result::Result<Verdict, OracleError> {
        let Some(deadline) = self.deadline else {
            return self.classifier.classify(doc).await;
        };
        match tokio::time::timeout(deadline, self.classifier.classify(doc)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(OracleError::Unavailable(format!(
                "no reply within {}s deadline",
                deadline.as_secs_f64()
            ))),
        }
    }
}

fn persist_failed(raw_message_id: i64, source: StoreError) -> IngestError {
    warn!(raw_message_id, error = %source, "Persisting failed, raw message kept");
    IngestError::Storage {
        stage: IngestStage::Persisted,
        raw_message_id: Some(raw_message_id),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_extensions() {
        assert!(check_input_kind("message.eml").is_ok());
        assert!(check_input_kind("REPORT.ARF").is_ok());
        assert!(check_input_kind("/tmp/dir.v2/Mail.Eml").is_ok());
        assert!(check_input_kind(".eml").is_ok());
        assert!(check_input_kind("/var/spool/.ARF").is_ok());
    }

    #[test]
    fn test_rejected_extensions() {
        for name in ["report.txt", "eml", "message.eml.zip", "messageeml", ""] {
            let err = check_input_kind(name).unwrap_err();
            assert!(matches!(err, IngestError::InvalidInputKind { .. }), "{name}");
            assert_eq!(err.stage(), IngestStage::Received);
        }
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(IngestStage::RawSaved.to_string(), "RAW_SAVED");
        assert_eq!(IngestStage::Persisted.to_string(), "PERSISTED");
    }

    #[test]
    fn test_mode_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: IngestMode,
        }
        let w: Wrapper = toml::from_str("mode = \"degraded\"").unwrap();
        assert_eq!(w.mode, IngestMode::Degraded);
    }
}
