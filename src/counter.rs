use crate::{
    slot::{CancelOutcome, Slot},
    sync::{Condvar, JoinHandle, Mutex, lock, spawn_named, wait},
};
use core::any::Any;
use derive_more::Debug;
use std::{
    collections::VecDeque,
    panic::{AssertUnwindSafe, catch_unwind, resume_unwind},
    sync::Arc,
};
use thiserror::Error;

/// Errors reported by [`IsolatedCounter`] and its [`Access`] handles.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CounterError {
    /// The wait for exclusive access was cancelled before access was granted.
    /// The counter was not touched.
    #[error("wait for exclusive counter access was cancelled")]
    AccessCancelled,
    /// The owner thread could not be started.
    #[error("failed to spawn counter owner thread")]
    Spawn(#[source] std::io::Error),
}

type Reply = Result<i64, Box<dyn Any + Send>>;

#[derive(Debug)]
enum Op {
    Read,
    Mutate(i64),
    Update(#[debug(skip)] Box<dyn FnOnce(i64) -> i64 + Send>),
}

#[derive(Debug)]
struct Envelope {
    op: Op,
    reply: Arc<Slot<Reply>>,
}

#[derive(Debug, Default)]
struct Inbox {
    requests: VecDeque<Envelope>,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    name: String,
    inbox: Mutex<Inbox>,
    arrived: Condvar,
}

/// A named integer owned by a single thread.
///
/// Every read and mutation is sent to the owner as a request and applied
/// strictly one at a time, in arrival order. No two mutations ever
/// interleave, so `N` concurrent `mutate(+1)` calls always add exactly `N`.
///
/// The counter is `Sync`: share it by reference (scoped threads) or behind an
/// `Arc`. Dropping it serves every request already queued, then stops the
/// owner thread.
///
/// Arithmetic saturates at `i64::MIN`/`i64::MAX`.
#[derive(Debug)]
pub struct IsolatedCounter {
    shared: Arc<Shared>,
    #[debug(skip)]
    owner: Option<JoinHandle<()>>,
}

impl IsolatedCounter {
    /// Start the owner thread for a counter holding `initial`.
    ///
    /// # Errors
    /// [`CounterError::Spawn`] if the owner thread could not be started.
    pub fn new(name: impl Into<String>, initial: i64) -> Result<Self, CounterError> {
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            inbox: Mutex::new(Inbox::default()),
            arrived: Condvar::new(),
        });
        let owner = {
            let shared = Arc::clone(&shared);
            spawn_named(format!("ccp-counter-{name}"), move || serve(&shared, initial))
                .map_err(CounterError::Spawn)?
        };
        Ok(Self {
            shared,
            owner: Some(owner),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Add `delta` and return the new value. Blocks until served.
    pub fn mutate(&self, delta: i64) -> i64 {
        self.begin_mutate(delta).wait()
    }

    /// Return the current value. Blocks until served.
    pub fn read(&self) -> i64 {
        self.begin_read().wait()
    }

    /// Replace the value with `f(value)` and return the new value.
    ///
    /// `f` runs on the owner thread with exclusive access. If it panics, the
    /// value is left unchanged and the panic resumes in the caller.
    pub fn update(&self, f: impl FnOnce(i64) -> i64 + Send + 'static) -> i64 {
        self.begin_update(f).wait()
    }

    /// Queue a mutation without waiting for it.
    pub fn begin_mutate(&self, delta: i64) -> Access {
        self.send(Op::Mutate(delta))
    }

    /// Queue a read without waiting for it.
    pub fn begin_read(&self) -> Access {
        self.send(Op::Read)
    }

    /// Queue an update without waiting for it. See [`IsolatedCounter::update`].
    pub fn begin_update(&self, f: impl FnOnce(i64) -> i64 + Send + 'static) -> Access {
        self.send(Op::Update(Box::new(f)))
    }

    fn send(&self, op: Op) -> Access {
        let reply = Arc::new(Slot::new());
        {
            let mut inbox = lock(&self.shared.inbox);
            debug_assert!(!inbox.closed, "IsolatedCounter::send: [1]");
            inbox.requests.push_back(Envelope {
                op,
                reply: Arc::clone(&reply),
            });
        }
        self.shared.arrived.notify_one();
        Access { reply }
    }
}

impl Drop for IsolatedCounter {
    fn drop(&mut self) {
        lock(&self.shared.inbox).closed = true;
        self.shared.arrived.notify_one();
        if let Some(owner) = self.owner.take() {
            if owner.join().is_err() {
                tracing::error!(counter = %self.shared.name, "counter owner thread panicked");
            }
        }
    }
}

impl Shared {
    /// Next request in arrival order, or `None` once closed and drained.
    fn next(&self) -> Option<Envelope> {
        let mut inbox = lock(&self.inbox);
        loop {
            if let Some(envelope) = inbox.requests.pop_front() {
                return Some(envelope);
            }
            if inbox.closed {
                return None;
            }
            inbox = wait(&self.arrived, inbox);
        }
    }
}

fn serve(shared: &Shared, mut value: i64) {
    let name = shared.name.as_str();
    tracing::debug!(counter = name, value, "counter owner started");
    while let Some(Envelope { op, reply }) = shared.next() {
        if !reply.start() {
            tracing::trace!(counter = name, "skipping cancelled request");
            continue;
        }
        let outcome = match op {
            Op::Read => Ok(value),
            Op::Mutate(delta) => {
                value = value.saturating_add(delta);
                tracing::trace!(counter = name, delta, value, "applied mutation");
                Ok(value)
            }
            Op::Update(f) => catch_unwind(AssertUnwindSafe(|| f(value))).map(|new| {
                tracing::trace!(counter = name, old = value, new, "applied update");
                value = new;
                new
            }),
        };
        reply.resolve(outcome);
    }
    tracing::debug!(counter = name, value, "counter owner stopped");
}

/// Pending request against an [`IsolatedCounter`].
///
/// Dropping an `Access` without waiting does not withdraw the request; it is
/// still applied. Use [`Access::cancel`] to withdraw it.
#[must_use]
#[derive(Debug)]
pub struct Access {
    reply: Arc<Slot<Reply>>,
}

impl Access {
    /// Block until the request has been served and return the resulting value.
    pub fn wait(self) -> i64 {
        match self.reply.take() {
            Some(reply) => unpack(reply),
            None => unreachable!("Access::wait: [1]"),
        }
    }

    /// Wait at most `timeout` for exclusive access.
    ///
    /// If access has not been granted when the timeout expires, the request is
    /// withdrawn and [`CounterError::AccessCancelled`] is returned. A request
    /// that was already granted always completes. A timeout too large to be
    /// represented as a deadline waits without limit.
    ///
    /// # Errors
    /// [`CounterError::AccessCancelled`] as described above.
    #[cfg(not(feature = "loom"))]
    pub fn wait_timeout(self, timeout: std::time::Duration) -> Result<i64, CounterError> {
        let Some(deadline) = std::time::Instant::now().checked_add(timeout) else {
            return Ok(self.wait());
        };
        match self.reply.take_until(deadline) {
            Ok(Some(reply)) => Ok(unpack(reply)),
            Ok(None) => Err(CounterError::AccessCancelled),
            Err(()) => self.cancel(),
        }
    }

    /// Withdraw the request.
    ///
    /// Returns `Ok(value)` if exclusive access had already been granted (the
    /// request was applied and `value` is its result), otherwise the request
    /// is dropped without touching the counter.
    ///
    /// # Errors
    /// [`CounterError::AccessCancelled`] if the request was withdrawn.
    pub fn cancel(self) -> Result<i64, CounterError> {
        match self.reply.cancel() {
            CancelOutcome::Abandoned => Err(CounterError::AccessCancelled),
            CancelOutcome::Completed(reply) => Ok(unpack(reply)),
        }
    }

    /// Whether the request has been served (or withdrawn).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.reply.is_finished()
    }
}

fn unpack(reply: Reply) -> i64 {
    reply.unwrap_or_else(|payload| resume_unwind(payload))
}
