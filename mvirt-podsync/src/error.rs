//! Errors surfaced by discovery and sync.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::store::StoreError;
use crate::worker::{WorkerError, WorkerId};

/// Errors returned to callers of discovery and sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No worker could discover the target. Carries every worker's failure.
    #[error("{}", describe_failures(.causes))]
    NoViableWorker {
        causes: BTreeMap<WorkerId, WorkerError>,
    },

    /// The target cannot be discovered as configured.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Discovery succeeded but the record changed underneath us.
    #[error("persistence conflict: {0}")]
    PersistenceConflict(String),

    /// Discovery succeeded but the result could not be saved.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl SyncError {
    /// The failure used to describe a `NoViableWorker`: the one of the
    /// lowest worker id.
    pub fn representative_cause(&self) -> Option<(&WorkerId, &WorkerError)> {
        match self {
            SyncError::NoViableWorker { causes } => causes.iter().next(),
            _ => None,
        }
    }

    pub fn is_discovery_failure(&self) -> bool {
        matches!(self, SyncError::NoViableWorker { .. })
    }

    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            SyncError::PersistenceConflict(_) | SyncError::Persistence(_)
        )
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) | StoreError::Conflict(msg) => {
                SyncError::PersistenceConflict(msg)
            }
            StoreError::Internal(msg) => SyncError::Persistence(msg),
        }
    }
}

fn describe_failures(causes: &BTreeMap<WorkerId, WorkerError>) -> String {
    match causes.values().next() {
        Some(cause) => cause.to_string(),
        None => "no workers available to discover the target".to_string(),
    }
}
