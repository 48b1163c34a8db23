//! `mailverdict` — ingest EML/ARF messages, classify them, keep the evidence.
//!
//! This crate provides the decoding, projection, classification and
//! persistence pipeline behind the `mailverdict` CLI.

pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod oracle;
pub mod parser;
pub mod projector;
pub mod store;
