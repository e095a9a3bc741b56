use crate::types::WorkIndex;
use core::time::Duration;
use derive_more::Debug;

/// A single unit of work: an index, a simulated delay, and the closure that
/// produces its result.
///
/// Work items are consumed by [`WorkItem::execute`], which sleeps for the
/// delay and then runs the closure exactly once.
#[must_use]
#[derive(Debug)]
pub struct WorkItem<R> {
    index: WorkIndex,
    delay: Duration,
    #[debug(skip)]
    func: Box<dyn FnOnce() -> R + Send>,
}

impl<R> WorkItem<R> {
    /// Work item that runs `func` after sleeping for `delay`.
    pub fn new(
        index: WorkIndex,
        delay: Duration,
        func: impl FnOnce() -> R + Send + 'static,
    ) -> Self {
        Self {
            index,
            delay,
            func: Box::new(func),
        }
    }

    /// Work item without a simulated delay.
    pub fn immediate(index: WorkIndex, func: impl FnOnce() -> R + Send + 'static) -> Self {
        Self::new(index, Duration::ZERO, func)
    }

    #[must_use]
    pub fn index(&self) -> WorkIndex {
        self.index
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sleep for the simulated delay, then produce the result.
    pub fn execute(self) -> R {
        let Self { index, delay, func } = self;
        if !delay.is_zero() {
            tracing::trace!(index, ?delay, "work item sleeping");
            std::thread::sleep(delay);
        }
        func()
    }
}
