use crate::types::{BoxError, IndexMap, WorkIndex};
use derive_more::{Debug, Deref};
use thiserror::Error;

/// Error kind for fan-out/fan-in failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FanOutError {
    /// The aggregate wait was cancelled (or timed out) before every worker
    /// reported. Partial results are discarded.
    #[error("fan-out was cancelled before all workers completed")]
    AggregationCancelled,
    /// An individual worker returned an error or panicked.
    #[error("worker {index} failed: {cause}")]
    WorkerFailed {
        index: WorkIndex,
        #[source]
        cause: BoxError,
    },
    /// Two work items were submitted with the same index.
    #[error("work index {0} was submitted more than once")]
    DuplicateIndex(WorkIndex),
}

/// Cause attached to [`FanOutError::WorkerFailed`] when a worker panicked.
#[derive(Debug, Error)]
#[error("worker panicked: {0}")]
pub struct WorkerPanic(pub String);

/// Result of a single worker.
pub type Outcome<T> = Result<T, FanOutError>;

/// Outcomes of a completed fan-out, one entry per worker.
///
/// Entries are kept in **completion order**: the first worker to finish is the
/// first entry. Use [`ResultSet::into_submission_order`] to get them sorted by
/// index instead. Failed workers are kept as [`FanOutError::WorkerFailed`]
/// entries rather than aborting the whole set.
#[must_use]
#[derive(Debug, Deref)]
pub struct ResultSet<T>(IndexMap<WorkIndex, Outcome<T>>);

impl<T> ResultSet<T> {
    pub(super) fn new(entries: IndexMap<WorkIndex, Outcome<T>>) -> Self {
        Self(entries)
    }

    /// Worker indices in the order they completed.
    pub fn completion_order(&self) -> impl Iterator<Item = WorkIndex> + '_ {
        self.0.keys().copied()
    }

    /// Successful outputs, in completion order.
    pub fn successes(&self) -> impl Iterator<Item = (WorkIndex, &T)> + '_ {
        self.0
            .iter()
            .filter_map(|(&index, outcome)| outcome.as_ref().ok().map(|output| (index, output)))
    }

    /// Failed workers, in completion order.
    pub fn failures(&self) -> impl Iterator<Item = (WorkIndex, &FanOutError)> + '_ {
        self.0
            .iter()
            .filter_map(|(&index, outcome)| outcome.as_ref().err().map(|err| (index, err)))
    }

    /// All entries sorted by worker index.
    #[must_use]
    pub fn into_submission_order(self) -> Vec<(WorkIndex, Outcome<T>)> {
        let mut entries: Vec<_> = self.0.into_iter().collect();
        entries.sort_unstable_by_key(|&(index, _)| index);
        entries
    }

    /// Every output in completion order, or the first failure encountered.
    ///
    /// # Errors
    /// The first [`FanOutError::WorkerFailed`] in completion order.
    pub fn into_outputs(self) -> Result<Vec<T>, FanOutError> {
        self.0.into_values().collect()
    }
}

impl<T> IntoIterator for ResultSet<T> {
    type Item = (WorkIndex, Outcome<T>);
    type IntoIter = indexmap::map::IntoIter<WorkIndex, Outcome<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
