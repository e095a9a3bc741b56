use crate::queue::ticket::QueueError;
use core::time::Duration;
use derive_more::{Debug, Display};
use std::{collections::VecDeque, time::Instant};

/// Dispatch phase of a [`BarrierQueue`](super::BarrierQueue).
///
/// ```text
///   Open ──barrier reaches head, work in flight──> Draining
///    │                                               │
///    └──barrier reaches head, nothing in flight──┐   │ last in-flight task done
///                                                v   v
///                                           BarrierRunning ──barrier done──> Open
/// ```
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Ordinary work is dispatched as soon as it is submitted.
    #[display("open")]
    Open,
    /// A barrier is at the head of the queue, waiting for in-flight work to
    /// finish. Nothing new is dispatched.
    #[display("draining")]
    Draining,
    /// The barrier is running alone.
    #[display("barrier-running")]
    BarrierRunning,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub(super) enum Kind {
    #[display("ordinary")]
    Ordinary,
    #[display("barrier")]
    Barrier,
}

/// Type-erased body of a queued submission.
pub(super) trait Runnable: Send {
    /// Execute the submission and publish its result.
    fn run(self: Box<Self>);
    /// Publish `err` without executing the submission.
    fn abort(self: Box<Self>, err: QueueError);
}

#[derive(Debug)]
pub(super) struct Job {
    pub(super) seq: u64,
    pub(super) kind: Kind,
    /// Drain deadline of a barrier, with the timeout it was derived from.
    deadline: Option<(Instant, Duration)>,
    #[debug(skip)]
    task: Box<dyn Runnable>,
}

impl Job {
    pub(super) fn run(self) {
        self.task.run();
    }

    pub(super) fn abort(self, err: QueueError) {
        self.task.abort(err);
    }

    /// Withdraw an expired barrier.
    pub(super) fn expire(self) {
        let timeout = self.deadline.map_or(Duration::ZERO, |(_, timeout)| timeout);
        self.abort(QueueError::BarrierTimeout(timeout));
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|(at, _)| now >= at)
    }
}

/// Jobs released by [`QueueState::dispatch`].
#[derive(Debug, Default)]
pub(super) struct Dispatch {
    /// Jobs to start, in submission order.
    pub(super) ready: Vec<Job>,
    /// Barriers whose drain deadline passed before they could start.
    pub(super) expired: Vec<Job>,
}

#[cfg(all(test, not(feature = "loom")))]
impl Dispatch {
    fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.expired.is_empty()
    }
}

/// Bookkeeping behind a [`BarrierQueue`](super::BarrierQueue). Always accessed
/// under the queue lock.
///
/// Invariants:
/// - `pending` is in submission order, and only its head is ever dispatched.
/// - In `BarrierRunning`, `in_flight == 1` and that job is the barrier.
/// - In `Draining`, the head of `pending` is a barrier and `in_flight > 0`.
#[derive(Debug)]
pub(super) struct QueueState {
    phase: Phase,
    in_flight: usize,
    pending: VecDeque<Job>,
    next_seq: u64,
}

impl QueueState {
    pub(super) fn new() -> Self {
        Self {
            phase: Phase::Open,
            in_flight: 0,
            pending: VecDeque::new(),
            next_seq: 0,
        }
    }

    pub(super) fn phase(&self) -> Phase {
        self.phase
    }

    pub(super) fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub(super) fn pending(&self) -> usize {
        self.pending.len()
    }

    pub(super) fn is_idle(&self) -> bool {
        self.in_flight == 0 && self.pending.is_empty()
    }

    /// Append a submission and return its sequence number. `deadline` is the
    /// drain deadline of a barrier together with the timeout it came from.
    pub(super) fn enqueue(
        &mut self,
        kind: Kind,
        deadline: Option<(Instant, Duration)>,
        task: Box<dyn Runnable>,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.checked_add(1).expect("QueueState::enqueue: [1]");
        self.pending.push_back(Job {
            seq,
            kind,
            deadline,
            task,
        });
        seq
    }

    /// Release every job that may start now.
    ///
    /// Ordinary jobs at the head are released while the queue is open. A
    /// barrier at the head is released only once nothing is in flight; until
    /// then the queue drains and everything behind the barrier waits.
    pub(super) fn dispatch(&mut self, now: Instant) -> Dispatch {
        let mut dispatch = Dispatch::default();
        if self.phase == Phase::Draining {
            // Re-derived below: the barrier may have been withdrawn.
            self.phase = Phase::Open;
        }
        while self.phase == Phase::Open {
            let Some(head) = self.pending.front() else {
                break;
            };
            let (kind, expired) = (head.kind, head.is_expired(now));
            match kind {
                Kind::Ordinary => {
                    let job = self.pop_head();
                    self.in_flight = self
                        .in_flight
                        .checked_add(1)
                        .expect("QueueState::dispatch: [1]");
                    dispatch.ready.push(job);
                }
                Kind::Barrier if expired => {
                    let job = self.pop_head();
                    dispatch.expired.push(job);
                }
                Kind::Barrier if self.in_flight == 0 => {
                    let job = self.pop_head();
                    self.in_flight = 1;
                    self.phase = Phase::BarrierRunning;
                    dispatch.ready.push(job);
                }
                Kind::Barrier => self.phase = Phase::Draining,
            }
        }
        dispatch
    }

    /// Record that a dispatched job of `kind` has finished.
    pub(super) fn complete(&mut self, kind: Kind) {
        self.in_flight = self
            .in_flight
            .checked_sub(1)
            .expect("QueueState::complete: [1]");
        if kind == Kind::Barrier {
            assert_eq!(self.phase, Phase::BarrierRunning, "QueueState::complete: [2]");
            assert_eq!(self.in_flight, 0, "QueueState::complete: [3]");
            self.phase = Phase::Open;
        }
    }

    /// Remove a job that has not been dispatched yet.
    pub(super) fn withdraw(&mut self, seq: u64) -> Option<Job> {
        let position = self.pending.iter().position(|job| job.seq == seq)?;
        self.pending.remove(position)
    }

    fn pop_head(&mut self) -> Job {
        self.pending.pop_front().expect("QueueState::pop_head: [1]")
    }
}
