use crate::{
    executor::result_set::{Outcome, ResultSet},
    sync::{AtomicBool, Condvar, Mutex, MutexGuard, Ordering, lock, wait},
    types::{IndexMap, WorkIndex},
};
use derive_more::Debug;
use rustc_hash::FxBuildHasher;
use std::sync::Arc;

type Results<T> = IndexMap<WorkIndex, Outcome<T>>;

/// How long a pool worker waiting on a fan-out sleeps between attempts to run
/// queued jobs itself.
#[cfg(not(feature = "loom"))]
const HELP_INTERVAL: std::time::Duration = std::time::Duration::from_millis(1);

/// Shared aggregation point between a [`Gather`] handle and its workers.
#[derive(Debug)]
pub(super) struct GatherState<T> {
    expected: usize,
    results: Mutex<Results<T>>,
    completed: Condvar,
    abandoned: AtomicBool,
}

impl<T> GatherState<T> {
    pub(super) fn new(expected: usize) -> Self {
        Self {
            expected,
            results: Mutex::new(IndexMap::with_capacity_and_hasher(expected, FxBuildHasher)),
            completed: Condvar::new(),
            abandoned: AtomicBool::new(false),
        }
    }

    pub(super) fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    /// Record the outcome of worker `index`. The entry order of the underlying
    /// map is the completion order.
    pub(super) fn report(&self, index: WorkIndex, outcome: Outcome<T>) {
        let mut results = lock(&self.results);
        let replaced = results.insert(index, outcome);
        assert!(replaced.is_none(), "GatherState::report: [1]");
        let done = results.len() == self.expected;
        drop(results);
        if done {
            self.completed.notify_all();
        }
    }

    fn is_complete(&self, results: &Results<T>) -> bool {
        results.len() == self.expected
    }

    /// Wait until some worker may have reported, for at most `limit`.
    ///
    /// On a pool worker the lock is released and a queued job is run instead
    /// of blocking, so a fan-out joined from inside the pool still makes
    /// progress when every worker is busy joining.
    #[cfg(not(feature = "loom"))]
    fn await_report<'a>(
        &'a self,
        results: MutexGuard<'a, Results<T>>,
        limit: Option<std::time::Duration>,
    ) -> MutexGuard<'a, Results<T>> {
        use crate::{
            pool::{on_worker_thread, run_pending_job},
            sync::wait_timeout,
        };
        if on_worker_thread() {
            drop(results);
            if run_pending_job() {
                return lock(&self.results);
            }
            let limit = limit.map_or(HELP_INTERVAL, |limit| limit.min(HELP_INTERVAL));
            return wait_timeout(&self.completed, lock(&self.results), limit).0;
        }
        match limit {
            Some(limit) => wait_timeout(&self.completed, results, limit).0,
            None => wait(&self.completed, results),
        }
    }

    #[cfg(feature = "loom")]
    fn await_report<'a>(
        &'a self,
        results: MutexGuard<'a, Results<T>>,
        _limit: Option<core::time::Duration>,
    ) -> MutexGuard<'a, Results<T>> {
        wait(&self.completed, results)
    }

    fn abandon(&self) {
        if !self.abandoned.swap(true, Ordering::AcqRel) {
            tracing::debug!(expected = self.expected, "fan-out abandoned");
        }
    }
}

/// Handle to a running fan-out. Collects every worker's outcome.
///
/// Dropping a `Gather` without joining it abandons the fan-out: workers that
/// have not started yet are skipped and the results are discarded.
#[must_use = "dropping a Gather abandons its workers"]
#[derive(Debug)]
pub struct Gather<T> {
    state: Arc<GatherState<T>>,
    joined: bool,
}

impl<T> Gather<T> {
    pub(super) fn new(state: Arc<GatherState<T>>) -> Self {
        Self {
            state,
            joined: false,
        }
    }

    /// Number of workers in this fan-out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.expected
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.expected == 0
    }

    /// Whether every worker has reported.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.is_complete(&lock(&self.state.results))
    }

    /// Block until every worker has reported and return their outcomes.
    ///
    /// May be called from a job running on the same pool: while waiting, the
    /// calling worker runs queued jobs itself.
    pub fn join(mut self) -> ResultSet<T> {
        let mut results = lock(&self.state.results);
        while !self.state.is_complete(&results) {
            results = self.state.await_report(results, None);
        }
        self.joined = true;
        ResultSet::new(core::mem::take(&mut *results))
    }

    /// Like [`Gather::join`], but gives up after `timeout`.
    ///
    /// # Errors
    /// [`AggregationCancelled`](super::FanOutError::AggregationCancelled) if
    /// some worker had not reported by then. The fan-out is abandoned and
    /// partial results are discarded. A timeout too large to be represented
    /// as a deadline waits like [`Gather::join`].
    #[cfg(not(feature = "loom"))]
    pub fn join_timeout(
        mut self,
        timeout: std::time::Duration,
    ) -> Result<ResultSet<T>, super::FanOutError> {
        let Some(deadline) = std::time::Instant::now().checked_add(timeout) else {
            return Ok(self.join());
        };
        let mut results = lock(&self.state.results);
        while !self.state.is_complete(&results) {
            let now = std::time::Instant::now();
            if now >= deadline {
                return Err(super::FanOutError::AggregationCancelled);
            }
            results = self.state.await_report(results, Some(deadline - now));
        }
        self.joined = true;
        Ok(ResultSet::new(core::mem::take(&mut *results)))
    }

    /// Abandon the fan-out, discarding any results.
    pub fn cancel(self) {
        drop(self);
    }
}

impl<T> Drop for Gather<T> {
    fn drop(&mut self) {
        if !self.joined {
            self.state.abandon();
        }
    }
}
