mod state;
mod ticket;

pub use crate::queue::{
    state::Phase,
    ticket::{QueueError, Ticket},
};
use crate::{
    config::{Config, ConfigError},
    pool::WorkerPool,
    queue::{
        state::{Dispatch, Kind, QueueState},
        ticket::QueuedTask,
    },
    slot::Slot,
    sync::{Condvar, Mutex, MutexGuard, lock, wait},
};
use core::time::Duration;
use derive_more::Debug;
use std::{sync::Arc, time::Instant};

/// Concurrent work queue with barrier submissions.
///
/// Ordinary submissions run concurrently on the worker pool, in no particular
/// order relative to each other. A barrier submission:
/// - starts only after every earlier submission has finished,
/// - runs alone,
/// - holds back every later submission until it has finished.
///
/// Dispatch is strictly in submission order, so ordinary work never overtakes
/// a pending barrier. Panics are caught per submission and never block a
/// barrier: a barrier waits for completion, not success.
///
/// Clones share the same queue.
#[derive(Debug, Clone)]
pub struct BarrierQueue {
    shared: Arc<QueueShared>,
}

#[derive(Debug)]
struct QueueShared {
    label: String,
    #[debug(skip)]
    pool: Arc<WorkerPool>,
    state: Mutex<QueueState>,
    idle: Condvar,
}

impl BarrierQueue {
    pub fn new(label: impl Into<String>, pool: Arc<WorkerPool>) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                label: label.into(),
                pool,
                state: Mutex::new(QueueState::new()),
                idle: Condvar::new(),
            }),
        }
    }

    /// Build a queue on a fresh pool described by `config`.
    ///
    /// # Errors
    /// See [`Config::build_pool`].
    pub fn from_config(label: impl Into<String>, config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(label, config.build_pool()?))
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Submit ordinary work.
    pub fn submit<T, F>(&self, f: F) -> Ticket<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.enqueue(Kind::Ordinary, None, f)
    }

    /// Submit a barrier: `f` runs once everything submitted before it has
    /// finished, alone, and before anything submitted after it starts.
    pub fn submit_barrier<T, F>(&self, f: F) -> Ticket<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.enqueue(Kind::Barrier, None, f)
    }

    /// Like [`BarrierQueue::submit_barrier`], but the barrier is withdrawn with
    /// [`QueueError::BarrierTimeout`] if earlier work hasn't drained within
    /// `timeout`. Later submissions are then released as if the barrier had
    /// never been submitted.
    pub fn submit_barrier_within<T, F>(&self, timeout: Duration, f: F) -> Ticket<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.enqueue(Kind::Barrier, Some(timeout), f)
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.shared.state().phase()
    }

    /// Number of submissions currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.state().in_flight()
    }

    /// Number of submissions waiting to be dispatched.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.state().pending()
    }

    /// Block until nothing is running or pending.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state();
        while !state.is_idle() {
            state = wait(&self.shared.idle, state);
        }
    }

    /// Like [`BarrierQueue::wait_idle`], but gives up after `timeout`.
    /// Returns whether the queue became idle.
    #[cfg(not(feature = "loom"))]
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait_idle();
            return true;
        };
        let mut state = self.shared.state();
        while !state.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = crate::sync::wait_timeout(&self.shared.idle, state, deadline - now).0;
        }
        true
    }

    fn enqueue<T, F>(&self, kind: Kind, timeout: Option<Duration>, f: F) -> Ticket<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let slot = Arc::new(Slot::new());
        let task = QueuedTask {
            slot: Arc::clone(&slot),
            func: f,
        };
        let now = Instant::now();
        // A deadline past the representable range is no deadline at all.
        let deadline = timeout.and_then(|timeout| Some((now.checked_add(timeout)?, timeout)));
        let (seq, dispatch) = {
            let mut state = self.shared.state();
            let seq = state.enqueue(kind, deadline, Box::new(task));
            tracing::trace!(queue = %self.shared.label, seq, %kind, "submitted");
            (seq, self.shared.dispatch(&mut state, now))
        };
        self.shared.settle(dispatch);
        let deadline = deadline.map(|(at, _)| at);
        Ticket::new(seq, kind, deadline, slot, Arc::clone(&self.shared))
    }
}

impl QueueShared {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        lock(&self.state)
    }

    /// Run [`QueueState::dispatch`] and log any phase transition.
    fn dispatch(&self, state: &mut QueueState, now: Instant) -> Dispatch {
        let before = state.phase();
        let dispatch = state.dispatch(now);
        let after = state.phase();
        if before != after {
            tracing::debug!(queue = %self.label, from = %before, to = %after, "phase changed");
        }
        if state.is_idle() {
            self.idle.notify_all();
        }
        dispatch
    }

    /// Start released jobs and report expired barriers. Called without the
    /// lock held.
    fn settle(self: &Arc<Self>, dispatch: Dispatch) {
        let Dispatch { ready, expired } = dispatch;
        for job in expired {
            tracing::warn!(queue = %self.label, seq = job.seq, "barrier drain deadline passed");
            job.expire();
        }
        for job in ready {
            let queue = Arc::clone(self);
            tracing::trace!(queue = %self.label, seq = job.seq, kind = %job.kind, "dispatched");
            self.pool.spawn(move || {
                let kind = job.kind;
                job.run();
                queue.finish(kind);
            });
        }
    }

    fn finish(self: &Arc<Self>, kind: Kind) {
        let dispatch = {
            let mut state = self.state();
            state.complete(kind);
            self.dispatch(&mut state, Instant::now())
        };
        self.settle(dispatch);
    }

    /// Withdraw the pending job `seq`, resolving its ticket with `err`.
    fn withdraw(self: &Arc<Self>, seq: u64, err: QueueError) -> bool {
        let (job, dispatch) = {
            let mut state = self.state();
            let Some(job) = state.withdraw(seq) else {
                return false;
            };
            (job, self.dispatch(&mut state, Instant::now()))
        };
        tracing::debug!(queue = %self.label, seq, %err, "withdrawn");
        job.abort(err);
        self.settle(dispatch);
        true
    }

    /// Withdraw barrier `seq` if it is still waiting for its turn.
    #[cfg(not(feature = "loom"))]
    fn expire(self: &Arc<Self>, seq: u64) {
        let (job, dispatch) = {
            let mut state = self.state();
            let Some(job) = state.withdraw(seq) else {
                return;
            };
            (job, self.dispatch(&mut state, Instant::now()))
        };
        tracing::warn!(queue = %self.label, seq, "barrier drain deadline passed");
        job.expire();
        self.settle(dispatch);
    }
}
