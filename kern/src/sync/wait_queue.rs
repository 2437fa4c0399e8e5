//! Wait channel of the sleeping primitives.

use crate::thread::{Current, ParkHandle};
use abyss::spinlock::SpinLockGuard;
use std::collections::VecDeque;

/// A named queue of sleeping threads.
///
/// A [`WaitQueue`] lives inside the state protected by a [`SpinLock`]. The
/// spinlock is what makes "check the condition, then sleep" atomic with
/// respect to the threads that change the condition and wake sleepers.
///
/// Dropping a queue with sleepers is a fault, as nobody could wake them
/// anymore.
///
/// [`SpinLock`]: abyss::spinlock::SpinLock
pub struct WaitQueue {
    name: String,
    sleepers: VecDeque<ParkHandle>,
}

impl WaitQueue {
    /// Creates an empty wait queue named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sleepers: VecDeque::new(),
        }
    }

    /// Name of this queue.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Puts the current thread to sleep on the queue chosen by `select`.
    ///
    /// The caller is enqueued and `guard` is released as one step. When the
    /// thread is woken up, the same spinlock is acquired again and the new
    /// guard is returned. Being woken up says nothing about the condition the
    /// caller waited for; it has to be checked again under the returned guard
    /// unless the waker handed the resource over explicitly.
    ///
    /// # Example
    /// ```
    /// use kern::sync::{SpinLock, WaitQueue};
    ///
    /// struct Gate {
    ///     open: bool,
    ///     waiters: WaitQueue,
    /// }
    ///
    /// let gate = SpinLock::new(Gate { open: true, waiters: WaitQueue::new("gate") });
    /// let mut guard = gate.lock();
    /// while !guard.open {
    ///     guard = WaitQueue::sleep(guard, |g| &mut g.waiters);
    /// }
    /// guard.unlock();
    /// ```
    pub fn sleep<'a, T>(
        mut guard: SpinLockGuard<'a, T>,
        select: impl FnOnce(&mut T) -> &mut WaitQueue,
    ) -> SpinLockGuard<'a, T> {
        let lock = SpinLockGuard::spinlock(&guard);
        Current::park_with(move |handle| {
            select(&mut *guard).sleepers.push_back(handle);
            guard.unlock();
        });
        lock.lock()
    }

    /// Wakes the thread that has slept the longest, returning its thread id.
    pub fn wake_one(&mut self) -> Option<u64> {
        self.sleepers.pop_front().map(|handle| {
            let tid = handle.tid();
            log::trace!("{}: wake thread {}", self.name, tid);
            handle.unpark();
            tid
        })
    }

    /// Wakes every sleeper, returning how many were woken.
    pub fn wake_all(&mut self) -> usize {
        let cnt = self.sleepers.len();
        while self.wake_one().is_some() {}
        cnt
    }

    /// Number of sleeping threads.
    pub fn len(&self) -> usize {
        self.sleepers.len()
    }

    /// Returns true if no thread sleeps on this queue.
    pub fn is_empty(&self) -> bool {
        self.sleepers.is_empty()
    }
}

impl Drop for WaitQueue {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            assert!(
                self.sleepers.is_empty(),
                "WaitQueue `{}` is destroyed while {} thread(s) sleep on it.",
                self.name,
                self.sleepers.len()
            );
        }
    }
}
