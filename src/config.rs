use crate::pool::WorkerPool;
use std::{sync::Arc, time::Duration};
use thiserror::Error;

const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_DELAY: Duration = Duration::from_millis(100);

/// Runtime knobs shared by the executor, the queue and the demo harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Number of threads in the shared [`WorkerPool`].
    pub worker_pool_size: usize,
    /// Simulated delay applied to fan-out workers that don't specify one.
    pub default_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let worker_pool_size = std::thread::available_parallelism()
            .map_or(DEFAULT_POOL_SIZE, std::num::NonZeroUsize::get);
        Self {
            worker_pool_size,
            default_delay: DEFAULT_DELAY,
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_worker_pool_size(mut self, worker_pool_size: usize) -> Self {
        self.worker_pool_size = worker_pool_size;
        self
    }

    #[must_use]
    pub fn with_default_delay(mut self, default_delay: Duration) -> Self {
        self.default_delay = default_delay;
        self
    }

    /// Spawn the worker pool described by this configuration.
    ///
    /// # Errors
    /// See [`WorkerPool::new`].
    pub fn build_pool(&self) -> Result<Arc<WorkerPool>, ConfigError> {
        WorkerPool::new(self.worker_pool_size).map(Arc::new)
    }
}

/// Errors produced while turning a [`Config`] into running components.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// `worker_pool_size` was zero.
    #[error("worker pool needs at least one thread")]
    ZeroWorkers,
    /// The underlying thread pool could not be built.
    #[cfg(not(feature = "loom"))]
    #[error("failed to build worker pool")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
