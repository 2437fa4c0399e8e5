//! # Condition Variable.
//!
//! A **Condition Variable** allows a thread to efficiently block until a
//! certain condition is met, without consuming CPU cycles. It is always used
//! in conjunction with a [`Lock`] that guards access to the shared state the
//! condition is about.
//!
//! [`ConditionVariable::wait`] releases the lock and puts the caller to sleep
//! as one step with respect to the condition variable's own spinlock. A
//! thread that signals after changing the state under the lock therefore
//! never misses a waiter.
//!
//! Waking does not hand the lock over. The woken thread competes for the lock
//! like any other thread and must re-check its condition, which is what
//! [`ConditionVariable::wait_while`] does for a [`Mutex`]:
//!
//! ```
//! use kern::sync::{ConditionVariable, Mutex, MutexGuard};
//!
//! let mutex = Mutex::new(1);
//! let cv = ConditionVariable::new("nonzero");
//! let guard = cv.wait_while(&mutex, |v| *v == 0);
//! cv.signal(MutexGuard::lock(&guard));
//! guard.unlock();
//! ```

use super::{Lock, Mutex, MutexGuard, WaitQueue};
use abyss::spinlock::SpinLock;

/// A Condition Variable
///
/// Condition variables represent the ability to block a thread such that it
/// consumes no CPU time while waiting for an event to occur. Every call takes
/// the associated lock, which the caller must hold. Using a single condition
/// variable with several different locks is a logic error that is not
/// detected.
pub struct ConditionVariable {
    name: String,
    waiters: SpinLock<WaitQueue>,
}

impl ConditionVariable {
    /// Creates a new condition variable named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            waiters: SpinLock::new(WaitQueue::new(name.clone())),
            name,
        }
    }

    /// Name of this condition variable.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Releases `lock`, sleeps until signaled, and re-acquires `lock`.
    ///
    /// # Panics
    /// Panics if the caller does not hold `lock`.
    #[track_caller]
    pub fn wait(&self, lock: &Lock) {
        let waiters = self.waiters.lock();
        if !lock.held_by_caller() {
            waiters.unlock();
            self.not_held(lock);
        }
        lock.release();
        WaitQueue::sleep(waiters, |q| q).unlock();
        lock.acquire();
    }

    /// Blocks the current thread while `predicate` returns `true`.
    ///
    /// The mutex is locked, and the predicate is evaluated on the protected
    /// value. Whenever it returns `true`, the thread sleeps on this condition
    /// variable with the mutex released, and evaluates the predicate again
    /// after re-acquiring it. The guard is returned once the predicate
    /// returns `false`.
    ///
    /// There is **no need to check the predicate before calling**
    /// `wait_while`.
    #[track_caller]
    pub fn wait_while<'a, T>(
        &self,
        mutex: &'a Mutex<T>,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        let mut guard = mutex.lock();
        while predicate(&mut *guard) {
            self.wait(MutexGuard::lock(&guard));
        }
        guard
    }

    /// Wakes up one thread blocked on this condition variable.
    ///
    /// Calls to `signal` are not buffered in any way.
    ///
    /// # Panics
    /// Panics if the caller does not hold `lock`.
    #[track_caller]
    pub fn signal(&self, lock: &Lock) {
        if !lock.held_by_caller() {
            self.not_held(lock);
        }
        let mut waiters = self.waiters.lock();
        waiters.wake_one();
        waiters.unlock();
    }

    /// Wakes up all threads blocked on this condition variable.
    ///
    /// # Panics
    /// Panics if the caller does not hold `lock`.
    #[track_caller]
    pub fn broadcast(&self, lock: &Lock) {
        if !lock.held_by_caller() {
            self.not_held(lock);
        }
        let mut waiters = self.waiters.lock();
        waiters.wake_all();
        waiters.unlock();
    }

    #[track_caller]
    fn not_held(&self, lock: &Lock) -> ! {
        panic!(
            "ConditionVariable `{}` is used without holding lock `{}`.",
            self.name,
            lock.name()
        )
    }
}
