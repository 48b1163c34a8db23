//! Centralized error types for mailverdict.

use std::path::PathBuf;
use thiserror::Error;

use crate::ingest::IngestStage;

/// Failures that abort an ingestion.
///
/// Variants produced after the raw message was committed carry its id, so
/// callers always know where the evidence lives.
#[derive(Error, Debug)]
pub enum IngestError {
    /// The presented filename is not an `.eml` or `.arf` file.
    #[error("Invalid input kind '{filename}': expected a .eml or .arf file")]
    InvalidInputKind { filename: String },

    /// The message exceeds the configured size limit.
    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    /// Decoding failed after the raw message was stored.
    #[error("Decoding failed for raw message {raw_message_id}: {source}")]
    Decode {
        raw_message_id: i64,
        source: DecodeError,
    },

    /// The oracle failed in strict mode after the raw message was stored.
    #[error("Classification failed for raw message {raw_message_id}: {source}")]
    Oracle {
        raw_message_id: i64,
        source: OracleError,
    },

    /// The storage collaborator failed while entering `stage`.
    ///
    /// `raw_message_id` is set whenever the raw row was already committed.
    #[error("Storage failed at stage {stage}: {source}")]
    Storage {
        stage: IngestStage,
        raw_message_id: Option<i64>,
        source: StoreError,
    },
}

impl IngestError {
    /// Pipeline stage at which the ingestion stopped.
    pub fn stage(&self) -> IngestStage {
        match self {
            Self::InvalidInputKind { .. } | Self::MessageTooLarge { .. } => IngestStage::Received,
            Self::Decode { .. } => IngestStage::Decoded,
            Self::Oracle { .. } => IngestStage::Classified,
            Self::Storage { stage, .. } => *stage,
        }
    }

    /// Id of the raw message committed before the failure, if any.
    pub fn raw_message_id(&self) -> Option<i64> {
        match self {
            Self::Decode { raw_message_id, .. } | Self::Oracle { raw_message_id, .. } => {
                Some(*raw_message_id)
            }
            Self::Storage { raw_message_id, .. } => *raw_message_id,
            Self::InvalidInputKind { .. } | Self::MessageTooLarge { .. } => None,
        }
    }
}

/// Errors that make no structured document constructible.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The decoded document could not be represented as a JSON tree.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failures talking to the classification oracle.
#[derive(Error, Debug)]
pub enum OracleError {
    /// Transport-level failure; the caller may retry the ingestion.
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),

    /// The reply violates the verdict contract, or the request could not be
    /// built at all. Retrying does not help.
    #[error("Malformed oracle response: {0}")]
    MalformedResponse(String),
}

impl OracleError {
    /// Short label stored in degraded-mode error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "OracleUnavailable",
            Self::MalformedResponse(_) => "OracleMalformedResponse",
        }
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(e: reqwest::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// Storage collaborator errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The underlying database reported an error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The database directory could not be created.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A verdict payload could not be encoded for storage.
    #[error("Could not encode verdict payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("Storage connection lock poisoned")]
    LockPoisoned,

    /// A row expected after a commit was not found.
    #[error("Row {id} not found in '{table}'")]
    NotFound { table: &'static str, id: i64 },
}

/// Errors loading the system prompt guideline.
#[derive(Error, Debug)]
pub enum PromptError {
    /// The guideline document could not be read.
    #[error("Labeling guideline not found at '{path}': {source}")]
    GuidelineMissing {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias for `Result<T, IngestError>`.
pub type Result<T> = std::result::Result<T, IngestError>;
