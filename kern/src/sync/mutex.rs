//! # Mutex.
//!
//! [`Mutex`] couples a [`Lock`] with the data it protects. The data is only
//! reachable through the [`MutexGuard`] returned by [`Mutex::lock`], so it is
//! only ever accessed by the thread holding the lock.
//!
//! The guard releases the lock when it is dropped or when [`MutexGuard::unlock`]
//! is called, which makes early returns with `?` safe while the lock is held.
//! [`MutexGuard::lock`] exposes the underlying [`Lock`] so that a
//! [`ConditionVariable`] can wait on it.
//!
//! [`ConditionVariable`]: super::ConditionVariable

use super::{Lock, WouldBlock, lockdep::LockObserver};
use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};
use std::sync::Arc;

/// A value guarded by a sleeping [`Lock`].
///
/// Contending threads sleep instead of spinning, so a [`MutexGuard`] may be
/// held across blocking calls such as file system requests.
///
/// # Examples
///
/// ```
/// use kern::sync::Mutex;
/// use kern::thread::ThreadBuilder;
/// use std::sync::Arc;
///
/// const N: usize = 10;
///
/// let counter = Arc::new(Mutex::named("counter", 0));
/// let workers = (0..N)
///     .map(|_| {
///         let counter = Arc::clone(&counter);
///         ThreadBuilder::new("work").spawn(move || {
///             let mut counter = counter.lock();
///             *counter += 1;
///             counter.unlock();
///         })
///     })
///     .collect::<Vec<_>>();
/// for w in workers {
///     w.join();
/// }
/// assert_eq!(*counter.lock(), N);
/// ```
pub struct Mutex<T> {
    lock: Lock,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// An unlocked mutex with an anonymous lock.
    pub fn new(value: T) -> Mutex<T> {
        Self::named("mutex", value)
    }

    /// An unlocked mutex whose lock is named `name`.
    pub fn named(name: impl Into<String>, value: T) -> Mutex<T> {
        Self::from_lock(Lock::new(name), value)
    }

    /// An unlocked mutex whose lock is named `name` and reports to
    /// `observer`, if any.
    pub fn observed(
        name: impl Into<String>,
        value: T,
        observer: Option<Arc<dyn LockObserver>>,
    ) -> Mutex<T> {
        Self::from_lock(Lock::build(name.into(), observer), value)
    }

    fn from_lock(lock: Lock, value: T) -> Mutex<T> {
        Mutex {
            lock,
            data: UnsafeCell::new(value),
        }
    }

    /// Sleeps until the calling thread owns the lock.
    ///
    /// # Panics
    /// Same faults as [`Lock::acquire`]: the caller already owns the lock,
    /// or interrupts are disabled.
    #[track_caller]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.lock.acquire();
        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    /// Takes the lock only if nobody owns it.
    ///
    /// # Errors
    /// [`WouldBlock`] if the lock is owned.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, WouldBlock> {
        self.lock.try_acquire().map(|_| MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        })
    }

    /// The underlying [`Lock`].
    pub fn raw(&self) -> &Lock {
        &self.lock
    }

    /// Takes the value out of the mutex.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// Ownership of a [`Mutex`] by the calling thread.
///
/// Unlike a spinlock guard, dropping it releases the lock.
pub struct MutexGuard<'a, T: 'a> {
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<'a, T> MutexGuard<'a, T> {
    /// Releases the lock.
    pub fn unlock(self) {
        drop(self)
    }

    /// The [`Lock`] this guard owns, for waiting on a condition variable.
    ///
    /// An associated function, so it never shadows a method of `T`.
    pub fn lock(this: &Self) -> &'a Lock {
        &this.mutex.lock
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.lock.release();
    }
}
