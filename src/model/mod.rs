//! Core data model: the structured document, oracle verdicts, stored records and addresses.

pub mod address;
pub mod document;
pub mod record;
pub mod verdict;
