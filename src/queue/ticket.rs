use crate::{
    queue::{
        QueueShared,
        state::{Kind, Runnable},
    },
    slot::Slot,
    utils::panic_message,
};
use core::time::Duration;
use derive_more::Debug;
use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Instant,
};
use thiserror::Error;

/// Error kind for queued submissions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QueueError {
    /// The barrier could not start within its drain deadline: earlier work
    /// was still running. The barrier was withdrawn.
    #[error("barrier did not start within {0:?}")]
    BarrierTimeout(Duration),
    /// The submission was withdrawn before it started.
    #[error("task was withdrawn before it started")]
    Cancelled,
    /// The submission panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
}

pub(super) type TaskResult<T> = Result<T, QueueError>;

/// A submission's closure together with the slot its result goes to.
pub(super) struct QueuedTask<T, F> {
    pub(super) slot: Arc<Slot<TaskResult<T>>>,
    pub(super) func: F,
}

impl<T, F> Runnable for QueuedTask<T, F>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    fn run(self: Box<Self>) {
        let Self { slot, func } = *self;
        if !slot.start() {
            return;
        }
        let result = catch_unwind(AssertUnwindSafe(func)).map_err(|payload| {
            let err = QueueError::Panicked(panic_message(&*payload));
            tracing::warn!(%err, "queued task panicked");
            err
        });
        slot.resolve(result);
    }

    fn abort(self: Box<Self>, err: QueueError) {
        self.slot.resolve(Err(err));
    }
}

/// Handle to a submission made to a [`BarrierQueue`](super::BarrierQueue).
///
/// Dropping a ticket does not withdraw the submission.
#[must_use]
#[derive(Debug)]
pub struct Ticket<T> {
    seq: u64,
    kind: Kind,
    #[cfg_attr(feature = "loom", allow(dead_code))]
    deadline: Option<Instant>,
    slot: Arc<Slot<TaskResult<T>>>,
    #[debug(skip)]
    queue: Arc<QueueShared>,
}

impl<T> Ticket<T> {
    pub(super) fn new(
        seq: u64,
        kind: Kind,
        deadline: Option<Instant>,
        slot: Arc<Slot<TaskResult<T>>>,
        queue: Arc<QueueShared>,
    ) -> Self {
        Self {
            seq,
            kind,
            deadline,
            slot,
            queue,
        }
    }

    /// Submission sequence number, unique within the queue.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub fn is_barrier(&self) -> bool {
        self.kind == Kind::Barrier
    }

    /// Whether the submission has finished, failed, or been withdrawn.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.slot.is_finished()
    }

    /// Block until the submission has finished and return its result.
    ///
    /// For a barrier with a drain deadline, the deadline is enforced here
    /// as well: if the barrier is still waiting when it passes, it is
    /// withdrawn and [`QueueError::BarrierTimeout`] is returned.
    ///
    /// Must not be called from a task of the same queue for a submission made
    /// after that task: a pending barrier would never drain.
    ///
    /// # Errors
    /// [`QueueError::Panicked`] if the closure panicked,
    /// [`QueueError::Cancelled`] or [`QueueError::BarrierTimeout`] if it never
    /// ran.
    pub fn wait(self) -> TaskResult<T> {
        #[cfg(not(feature = "loom"))]
        if let Some(deadline) = self.deadline {
            match self.slot.take_until(deadline) {
                Ok(result) => return result.expect("Ticket::wait: [1]"),
                Err(()) => self.queue.expire(self.seq),
            }
        }
        self.slot.take().expect("Ticket::wait: [2]")
    }

    /// Withdraw the submission if it has not been dispatched yet.
    ///
    /// Returns `true` if it was withdrawn; its result is then
    /// [`QueueError::Cancelled`]. Returns `false` if it already started, in
    /// which case it runs to completion.
    pub fn cancel(self) -> bool {
        self.queue.withdraw(self.seq, QueueError::Cancelled)
    }
}
