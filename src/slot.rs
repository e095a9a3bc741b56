use crate::sync::{Condvar, Mutex, lock, wait};
#[cfg(not(feature = "loom"))]
use std::time::Instant;

/// One-shot completion cell shared between a waiting caller and the worker
/// that eventually produces the value.
///
/// Transitions:
///
/// ```text
///   Pending ──start──> Running ──resolve──> Done ──take──> Taken
///      │                                     ^
///      ├────────────────resolve──────────────┘
///      └──cancel──> Cancelled
/// ```
///
/// `cancel` only succeeds from `Pending`. Once a worker has called `start`, the
/// value is guaranteed to be produced, which is what makes cancellation
/// all-or-nothing.
#[derive(Debug)]
pub(crate) struct Slot<T> {
    state: Mutex<SlotState<T>>,
    changed: Condvar,
}

#[derive(Debug)]
enum SlotState<T> {
    Pending,
    Running,
    Done(T),
    Taken,
    Cancelled,
}

/// Outcome of [`Slot::cancel`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CancelOutcome<T> {
    /// The slot was still pending and will never produce a value.
    Abandoned,
    /// A worker had already been granted the slot; this is its value.
    Completed(T),
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            changed: Condvar::new(),
        }
    }

    /// Claim the slot for execution. Returns `false` if it was cancelled.
    pub(crate) fn start(&self) -> bool {
        let mut state = lock(&self.state);
        match *state {
            SlotState::Pending => {
                *state = SlotState::Running;
                true
            }
            SlotState::Cancelled => false,
            _ => unreachable!("Slot::start: [1]"),
        }
    }

    /// Store the value and wake every waiter. Valid from `Pending` or
    /// `Running`; a cancelled slot silently drops the value.
    pub(crate) fn resolve(&self, value: T) {
        let mut state = lock(&self.state);
        match *state {
            SlotState::Pending | SlotState::Running => *state = SlotState::Done(value),
            SlotState::Cancelled => return,
            SlotState::Done(_) | SlotState::Taken => unreachable!("Slot::resolve: [1]"),
        }
        drop(state);
        self.changed.notify_all();
    }

    /// Withdraw a pending slot. If the slot has already been started, block
    /// until its value is available and return it instead.
    pub(crate) fn cancel(&self) -> CancelOutcome<T> {
        let mut state = lock(&self.state);
        if matches!(*state, SlotState::Pending) {
            *state = SlotState::Cancelled;
            drop(state);
            self.changed.notify_all();
            return CancelOutcome::Abandoned;
        }
        loop {
            match core::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Done(value) => return CancelOutcome::Completed(value),
                SlotState::Cancelled => {
                    *state = SlotState::Cancelled;
                    return CancelOutcome::Abandoned;
                }
                SlotState::Taken => unreachable!("Slot::cancel: [1]"),
                running => {
                    *state = running;
                    state = wait(&self.changed, state);
                }
            }
        }
    }

    /// Block until the value is available and take it. Returns `None` if the
    /// slot was cancelled.
    pub(crate) fn take(&self) -> Option<T> {
        let mut state = lock(&self.state);
        loop {
            match core::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Done(value) => return Some(value),
                SlotState::Cancelled => {
                    *state = SlotState::Cancelled;
                    return None;
                }
                SlotState::Taken => unreachable!("Slot::take: [1]"),
                pending_or_running => {
                    *state = pending_or_running;
                    state = wait(&self.changed, state);
                }
            }
        }
    }

    /// Like [`Slot::take`], but gives up at `deadline`. `Err(())` means the
    /// deadline passed while the slot was still pending or running.
    #[cfg(not(feature = "loom"))]
    pub(crate) fn take_until(&self, deadline: Instant) -> Result<Option<T>, ()> {
        let mut state = lock(&self.state);
        loop {
            match core::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Done(value) => return Ok(Some(value)),
                SlotState::Cancelled => {
                    *state = SlotState::Cancelled;
                    return Ok(None);
                }
                SlotState::Taken => unreachable!("Slot::take_until: [1]"),
                pending_or_running => {
                    *state = pending_or_running;
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(());
                    }
                    state = crate::sync::wait_timeout(&self.changed, state, deadline - now).0;
                }
            }
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        matches!(
            *lock(&self.state),
            SlotState::Done(_) | SlotState::Taken | SlotState::Cancelled
        )
    }
}
