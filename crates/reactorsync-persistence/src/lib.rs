//! ---
//! rs_section: "03-persistence-logging"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Storage abstractions, journal, and knowledge base."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Reactor registry, telemetry and fault storage behind [`TelemetryStore`].

use reactorsync_common::ReactorId;

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced reactor is not registered.
    #[error("unknown reactor {0}")]
    UnknownReactor(ReactorId),
    /// The referenced fault does not exist.
    #[error("unknown fault {0}")]
    UnknownFault(u64),
    /// The backend refused the operation; it may be retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A document embedding has the wrong number of components.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the knowledge base was created with.
        expected: usize,
        /// Dimension of the rejected vector.
        actual: usize,
    },
    /// Wrapper for IO errors encountered while reading/writing the journal.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Reported when a journal header fails integrity verification.
    #[error("journal header hash mismatch")]
    HashMismatch,
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

pub mod journal;
pub mod knowledge;
pub mod metrics;
pub mod store;

pub use journal::replay as replay_journal;
pub use journal::{JournalEntry, JournalReader, JournalRecord, JournalWriter, JOURNAL_VERSION};
pub use knowledge::{KnowledgeBase, KnowledgeDocument, SearchHit};
pub use metrics::PersistenceMetrics;
pub use store::{FaultFilter, InMemoryStore, StoreStats, TelemetryStore};
