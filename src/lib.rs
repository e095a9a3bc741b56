//! Coordination primitives for threads sharing mutable state.
//!
//! This crate provides three small, composable building blocks:
//! - An isolated counter: a named integer owned by a single thread. Every read
//!   and mutation is a request served one at a time, so concurrent callers
//!   never lose updates.
//! - A fan-out/fan-in executor: starts `n` independent workers on a shared
//!   pool and hands back one outcome per worker once the slowest has finished.
//! - A barrier-ordered queue: ordinary submissions run concurrently, while a
//!   barrier submission waits for everything before it to drain, runs alone,
//!   and only then releases what came after it.
//!
//! Key modules:
//! - `counter`: `IsolatedCounter` and its `Access` handles.
//! - `executor`: `FanOut`, the `Gather` handle and the `ResultSet` it yields.
//! - `queue`: `BarrierQueue`, `Ticket` and the dispatch `Phase`.
//! - `wait_group`: `WaitGroup`, for waiting on ad-hoc groups of threads.
//! - `config`: the `Config` knobs and the shared `WorkerPool` they build.
//!
//! Quick start:
//! 1. Build a [`config::Config`] and call `build_pool`, or use
//!    `FanOut::from_config` / `BarrierQueue::from_config`.
//! 2. Share an [`counter::IsolatedCounter`] between workers to record state.
//! 3. Use `Gather::join`, `Ticket::wait` or `WaitGroup::wait` to fan back in.
//!
//! Blocking waits come in cancellable flavours (`cancel`, `*_timeout`). A
//! cancelled wait never leaves shared state half-updated: a request either
//! runs to completion or is never observed.
//!
//! With the `loom` feature, the crate's synchronization primitives come from
//! `loom` so the model checker can explore interleavings (`tests/loom.rs`).
//! Timed waits are unavailable in that mode.

/// Public interface to configure the worker pool and default delays.
pub mod config;
/// The isolated counter.
///
/// A single owner thread applies reads and mutations in arrival order.
/// Requests that are withdrawn before being granted are skipped, so
/// cancellation is all-or-nothing.
pub mod counter;
/// The fan-out/fan-in executor.
///
/// Starts a batch of workers on the shared pool, collects their outcomes in
/// completion order and surfaces worker failures as individual entries.
pub mod executor;
/// Shared worker pool backing the executor and the queue.
pub mod pool;
/// Concurrent queue with barrier submissions.
///
/// Contains the dispatch state machine (`Open → Draining → BarrierRunning →
/// Open`) and the ticket handles returned for each submission.
pub mod queue;
mod slot;
mod sync;
/// Work items: an index, a simulated delay and a result-producing closure.
pub mod task;
/// Common aliases (indices, boxed errors, fast-hash maps).
pub mod types;
mod utils;
/// Waiting on ad-hoc groups of threads.
///
/// Each unit of work holds a `Member` while it runs; `wait` returns once every
/// member has left.
pub mod wait_group;
