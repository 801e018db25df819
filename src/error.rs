// ⚠️ Sync Errors - What can go wrong while talking to the catalog
//
// Two kinds of failure abort a reconciliation step:
// - Consistency: a filter that should identify one entity matched several
// - Remote: anything the transport layer reports, passed through untouched
//
// Partial bulk-write failures are NOT errors, they live in FlushReport.

use crate::entities::EntityKind;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A uniquely-identifying filter matched more than one remote entity
    #[error("{kind} filter `{filter}` matched {matches} entities, expected at most one")]
    Consistency {
        kind: EntityKind,
        filter: String,
        matches: usize,
    },

    /// Transport or protocol failure from the catalog (never retried here)
    #[error(transparent)]
    Remote(#[from] anyhow::Error),

    /// Observation handed to the batcher without a destination channel
    #[error("observation has no destination channel")]
    MissingDestination,

    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    /// Template placeholder or key part not found on a source record
    #[error("source record has no field `{0}`")]
    MissingField(String),

    #[error("source error: {0}")]
    Source(#[from] csv::Error),

    /// Bulk-delete worker pool could not be started
    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("journal error: {0}")]
    Journal(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Fatal errors should stop the whole run, not just skip the record
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Consistency { .. })
    }
}
