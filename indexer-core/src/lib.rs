//! Indexer Core - Shared Domain Types
//!
//! Domain model for the indexer agent: deployment identifiers, subgraphs
//! and their version history, indexing rules, allocations, and
//! proof-of-indexing disputes, plus the shared error taxonomy with stable
//! IE-prefixed error codes.
//!
//! The reconciliation engine itself lives in the `indexer-agent` crate.

pub mod error;
pub mod types;

pub use error::{IndexerError, IndexerErrorCode, IndexerResult};
