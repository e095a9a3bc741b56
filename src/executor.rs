mod gather;
mod result_set;

pub use crate::executor::{
    gather::Gather,
    result_set::{FanOutError, Outcome, ResultSet, WorkerPanic},
};
use crate::{
    config::{Config, ConfigError},
    executor::gather::GatherState,
    pool::WorkerPool,
    task::WorkItem,
    types::{BoxError, HashSet, WorkIndex},
    utils::panic_message,
};
use core::time::Duration;
use rustc_hash::FxBuildHasher;
use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

/// Fan-out/fan-in executor.
///
/// Launches `n` independent workers on the shared [`WorkerPool`] and gathers
/// one outcome per worker once all of them have finished.
///
/// Aggregation policy:
/// - Outcomes are collected in completion order (see [`ResultSet`]).
/// - Worker failures are collected, not propagated: a worker that returns
///   `Err` or panics shows up as a [`FanOutError::WorkerFailed`] entry, and the
///   remaining workers still run.
/// - Cancelling the aggregate wait discards everything collected so far and
///   skips workers that have not started yet.
#[derive(Debug, Clone)]
pub struct FanOut {
    pool: Arc<WorkerPool>,
    default_delay: Duration,
}

impl FanOut {
    pub fn new(pool: Arc<WorkerPool>, default_delay: Duration) -> Self {
        Self {
            pool,
            default_delay,
        }
    }

    /// Build an executor on a fresh pool described by `config`.
    ///
    /// # Errors
    /// See [`Config::build_pool`].
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(config.build_pool()?, config.default_delay))
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    #[must_use]
    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    /// Start `worker_fn(0..n)` concurrently, each after the default delay.
    pub fn spawn<T, E, F>(&self, n: usize, worker_fn: F) -> Gather<T>
    where
        T: Send + 'static,
        E: Into<BoxError> + 'static,
        F: Fn(WorkIndex) -> Result<T, E> + Send + Sync + 'static,
    {
        let delay = self.default_delay;
        self.spawn_with_delays(n, move |_| delay, worker_fn)
    }

    /// Start `worker_fn(0..n)` concurrently, worker `i` after `delay(i)`.
    pub fn spawn_with_delays<T, E, D, F>(&self, n: usize, delay: D, worker_fn: F) -> Gather<T>
    where
        T: Send + 'static,
        E: Into<BoxError> + 'static,
        D: Fn(WorkIndex) -> Duration,
        F: Fn(WorkIndex) -> Result<T, E> + Send + Sync + 'static,
    {
        let worker_fn = Arc::new(worker_fn);
        let items = (0..n)
            .map(|index| {
                let worker_fn = Arc::clone(&worker_fn);
                WorkItem::new(index, delay(index), move || (*worker_fn)(index))
            })
            .collect();
        self.launch(items)
    }

    /// Start explicit work items concurrently.
    ///
    /// # Errors
    /// [`FanOutError::DuplicateIndex`] if two items share an index. Nothing is
    /// started in that case.
    pub fn spawn_items<T, E>(
        &self,
        items: impl IntoIterator<Item = WorkItem<Result<T, E>>>,
    ) -> Result<Gather<T>, FanOutError>
    where
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let items: Vec<_> = items.into_iter().collect();
        let mut seen = HashSet::with_capacity_and_hasher(items.len(), FxBuildHasher);
        for item in &items {
            if !seen.insert(item.index()) {
                return Err(FanOutError::DuplicateIndex(item.index()));
            }
        }
        Ok(self.launch(items))
    }

    /// [`FanOut::spawn`] followed by [`Gather::join`].
    pub fn run<T, E, F>(&self, n: usize, worker_fn: F) -> ResultSet<T>
    where
        T: Send + 'static,
        E: Into<BoxError> + 'static,
        F: Fn(WorkIndex) -> Result<T, E> + Send + Sync + 'static,
    {
        self.spawn(n, worker_fn).join()
    }

    /// [`FanOut::spawn_with_delays`] followed by [`Gather::join`].
    pub fn run_with_delays<T, E, D, F>(&self, n: usize, delay: D, worker_fn: F) -> ResultSet<T>
    where
        T: Send + 'static,
        E: Into<BoxError> + 'static,
        D: Fn(WorkIndex) -> Duration,
        F: Fn(WorkIndex) -> Result<T, E> + Send + Sync + 'static,
    {
        self.spawn_with_delays(n, delay, worker_fn).join()
    }

    /// [`FanOut::spawn`] followed by [`Gather::join_timeout`].
    ///
    /// # Errors
    /// [`FanOutError::AggregationCancelled`] if the workers didn't all finish
    /// within `timeout`.
    #[cfg(not(feature = "loom"))]
    pub fn run_timeout<T, E, F>(
        &self,
        n: usize,
        timeout: Duration,
        worker_fn: F,
    ) -> Result<ResultSet<T>, FanOutError>
    where
        T: Send + 'static,
        E: Into<BoxError> + 'static,
        F: Fn(WorkIndex) -> Result<T, E> + Send + Sync + 'static,
    {
        self.spawn(n, worker_fn).join_timeout(timeout)
    }

    fn launch<T, E>(&self, items: Vec<WorkItem<Result<T, E>>>) -> Gather<T>
    where
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let state = Arc::new(GatherState::new(items.len()));
        tracing::debug!(workers = items.len(), "fan-out started");
        for item in items {
            let state = Arc::clone(&state);
            self.pool.spawn(move || {
                let index = item.index();
                if state.is_abandoned() {
                    tracing::trace!(index, "skipping worker of abandoned fan-out");
                    return;
                }
                let outcome = match catch_unwind(AssertUnwindSafe(|| item.execute())) {
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(err)) => Err(FanOutError::WorkerFailed {
                        index,
                        cause: err.into(),
                    }),
                    Err(payload) => Err(FanOutError::WorkerFailed {
                        index,
                        cause: Box::new(WorkerPanic(panic_message(&*payload))),
                    }),
                };
                if let Err(err) = &outcome {
                    tracing::warn!(index, %err, "fan-out worker failed");
                } else {
                    tracing::trace!(index, "fan-out worker completed");
                }
                state.report(index, outcome);
            });
        }
        Gather::new(state)
    }
}
