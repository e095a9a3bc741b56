use crate::sync::{Condvar, Mutex, lock, wait};
use std::sync::Arc;

/// Counts outstanding units of work and lets a caller block until all of them
/// have left.
///
/// ```
/// # use ccp::wait_group::WaitGroup;
/// let group = WaitGroup::new();
/// for _ in 0..4 {
///     let member = group.enter();
///     std::thread::spawn(move || {
///         // ... work ...
///         member.leave();
///     });
/// }
/// group.wait();
/// assert!(group.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    members: Mutex<usize>,
    drained: Condvar,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            members: Mutex::new(0),
            drained: Condvar::new(),
        }
    }
}

impl WaitGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one unit of work. It leaves the group when the returned
    /// [`Member`] is dropped.
    pub fn enter(&self) -> Member {
        let mut members = lock(&self.inner.members);
        *members = members.checked_add(1).expect("WaitGroup::enter: [1]");
        Member {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of members that have not left yet.
    #[must_use]
    pub fn len(&self) -> usize {
        *lock(&self.inner.members)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until every member has left. Returns immediately if the group is
    /// empty.
    pub fn wait(&self) {
        let mut members = lock(&self.inner.members);
        while *members != 0 {
            members = wait(&self.inner.drained, members);
        }
    }

    /// Like [`WaitGroup::wait`], but gives up after `timeout`. Returns whether
    /// the group drained.
    #[cfg(not(feature = "loom"))]
    pub fn wait_timeout(&self, timeout: std::time::Duration) -> bool {
        let Some(deadline) = std::time::Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut members = lock(&self.inner.members);
        while *members != 0 {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            members = crate::sync::wait_timeout(&self.inner.drained, members, deadline - now).0;
        }
        true
    }
}

/// Membership in a [`WaitGroup`]. Leaves the group on drop.
#[must_use = "dropping a Member leaves the group immediately"]
#[derive(Debug)]
pub struct Member {
    inner: Arc<Inner>,
}

impl Member {
    /// Leave the group. Equivalent to dropping the member.
    pub fn leave(self) {
        drop(self);
    }
}

impl Drop for Member {
    fn drop(&mut self) {
        let mut members = lock(&self.inner.members);
        *members = members.checked_sub(1).expect("Member::drop: [1]");
        let drained = *members == 0;
        drop(members);
        if drained {
            self.inner.drained.notify_all();
        }
    }
}
