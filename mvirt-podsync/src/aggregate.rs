//! Partitioning of per-worker outcomes.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::worker::{WorkerError, WorkerId};

/// Outcome of one call on one worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure(WorkerError),
}

/// Outcomes of a fan-out split into successes and failures.
///
/// Every worker that was called is a key of exactly one of the two maps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedResult<T> {
    pub succeeded: BTreeMap<WorkerId, T>,
    pub failed: BTreeMap<WorkerId, WorkerError>,
}

impl<T> Default for AggregatedResult<T> {
    fn default() -> Self {
        Self {
            succeeded: BTreeMap::new(),
            failed: BTreeMap::new(),
        }
    }
}

impl<T> AggregatedResult<T> {
    /// Partition outcomes by worker.
    ///
    /// Outcomes must carry distinct worker ids; a repeated id keeps the last
    /// outcome and is removed from the other map, so the maps stay disjoint.
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = (WorkerId, Outcome<T>)>) -> Self {
        let mut result = Self::default();
        for (id, outcome) in outcomes {
            match outcome {
                Outcome::Success(value) => {
                    result.failed.remove(&id);
                    result.succeeded.insert(id, value);
                }
                Outcome::Failure(err) => {
                    result.succeeded.remove(&id);
                    result.failed.insert(id, err);
                }
            }
        }
        result
    }

    /// Convert successful payloads, moving workers whose payload fails to
    /// convert into the failed map.
    pub fn try_map<U>(self, mut f: impl FnMut(T) -> Result<U, WorkerError>) -> AggregatedResult<U> {
        let mut failed = self.failed;
        let mut succeeded = BTreeMap::new();
        for (id, value) in self.succeeded {
            match f(value) {
                Ok(converted) => {
                    succeeded.insert(id, converted);
                }
                Err(err) => {
                    failed.insert(id, err);
                }
            }
        }
        AggregatedResult { succeeded, failed }
    }

    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty()
    }

    /// Number of workers covered by this result.
    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Whether a worker appears in either map.
    pub fn contains(&self, id: &WorkerId) -> bool {
        self.succeeded.contains_key(id) || self.failed.contains_key(id)
    }
}
