//! # Semaphore.
//!
//! A **semaphore** regulates concurrent access to a finite set of resources.
//! It maintains a count of available permits:
//!
//! - [`Semaphore::acquire`] (P) sleeps while no permit is available and then
//!   takes one.
//! - [`Semaphore::release`] (V) returns a permit and wakes one sleeper.
//!
//! No FIFO order is promised. A woken thread re-checks the count and goes
//! back to sleep if another thread took the permit first.
//!
//! A semaphore created with zero permits works as an event: one thread
//! releases to notify a thread sleeping in acquire.
//!
//! ```
//! use kern::sync::Semaphore;
//!
//! let sema = Semaphore::new("pool", 3);
//! {
//!     let _permit = sema.permit();
//!     assert_eq!(sema.count(), 2);
//! }
//! assert_eq!(sema.count(), 3);
//! ```

use super::{WaitQueue, assert_blockable};
use abyss::spinlock::SpinLock;

struct SemaphoreState {
    count: usize,
    waiters: WaitQueue,
}

/// Counting semaphore.
pub struct Semaphore {
    name: String,
    inner: SpinLock<SemaphoreState>,
}

impl Semaphore {
    /// Creates a new semaphore named `name` with `permits` permits.
    pub fn new(name: impl Into<String>, permits: usize) -> Self {
        let name = name.into();
        Self {
            inner: SpinLock::new(SemaphoreState {
                count: permits,
                waiters: WaitQueue::new(name.clone()),
            }),
            name,
        }
    }

    /// Name of this semaphore.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits until a permit becomes available and then takes it.
    ///
    /// # Panics
    /// Panics if interrupts are disabled.
    #[track_caller]
    pub fn acquire(&self) {
        assert_blockable("Semaphore::acquire");
        let mut state = self.inner.lock();
        while state.count == 0 {
            state = WaitQueue::sleep(state, |s| &mut s.waiters);
        }
        state.count -= 1;
        state.unlock();
    }

    /// Returns a permit back to the semaphore and wakes one sleeper.
    pub fn release(&self) {
        let mut state = self.inner.lock();
        state.count += 1;
        state.waiters.wake_one();
        state.unlock();
    }

    /// Acquires a permit that is released when the returned guard is dropped.
    #[track_caller]
    pub fn permit(&self) -> SemaphorePermit<'_> {
        self.acquire();
        SemaphorePermit { sema: self }
    }

    /// Snapshot of the number of available permits.
    pub fn count(&self) -> usize {
        let state = self.inner.lock();
        let count = state.count;
        state.unlock();
        count
    }
}

/// An RAII implementation of a "scoped semaphore". When this structure
/// is dropped (falls out of scope), the semaphore will be released.
///
/// This structure is created by the [`permit`] method on [`Semaphore`].
///
/// [`permit`]: Semaphore::permit
pub struct SemaphorePermit<'a> {
    sema: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.sema.release()
    }
}
