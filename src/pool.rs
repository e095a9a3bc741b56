use crate::config::ConfigError;
use derive_more::Debug;

/// Bounded pool of worker threads shared by [`FanOut`](crate::executor::FanOut)
/// and [`BarrierQueue`](crate::queue::BarrierQueue).
///
/// Backed by a dedicated rayon `ThreadPool`. Under the `loom` feature every job
/// gets its own model thread instead, so that the scheduler can explore
/// interleavings.
#[derive(Debug)]
pub struct WorkerPool {
    size: usize,
    #[cfg(not(feature = "loom"))]
    #[debug(skip)]
    inner: rayon::ThreadPool,
}

impl WorkerPool {
    /// Build a pool with `size` worker threads.
    ///
    /// # Errors
    /// [`ConfigError::ZeroWorkers`] if `size` is zero, or
    /// [`ConfigError::Pool`] if the threads could not be spawned.
    pub fn new(size: usize) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        #[cfg(not(feature = "loom"))]
        let inner = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|idx| format!("ccp-worker-{idx}"))
            .build()?;
        tracing::debug!(size, "worker pool started");
        Ok(Self {
            size,
            #[cfg(not(feature = "loom"))]
            inner,
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `job` on some worker. Jobs must not unwind.
    pub(crate) fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        #[cfg(not(feature = "loom"))]
        self.inner.spawn(job);
        #[cfg(feature = "loom")]
        drop(crate::sync::thread::spawn(job));
    }
}

/// Whether the calling thread is a pool worker.
///
/// A worker that blocks on work queued behind it on its own pool never wakes
/// up, so blocking waits use this to switch to [`run_pending_job`].
#[cfg(not(feature = "loom"))]
pub(crate) fn on_worker_thread() -> bool {
    rayon::current_thread_index().is_some()
}

/// Run one job queued on the calling worker's pool. Returns `false` if there
/// was nothing to run.
#[cfg(not(feature = "loom"))]
pub(crate) fn run_pending_job() -> bool {
    matches!(rayon::yield_now(), Some(rayon::Yield::Executed))
}
