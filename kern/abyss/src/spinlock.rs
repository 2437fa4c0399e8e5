//! Busy-waiting lock of the machine layer.
//!
//! Every sleeping primitive of the kernel keeps its own bookkeeping (owner,
//! counters, wait channels) behind one of these. Holding a [`SpinLock`]
//! turns interrupts off on the holding core, so the holder is never
//! preempted and must not sleep. The guarded section should only be a few
//! loads and stores.
//!
//! Releasing is explicit: a [`SpinLockGuard`] is given back with
//! [`SpinLockGuard::unlock`]. A guard that is simply dropped is a bug in the
//! caller and panics, except while the thread is already unwinding.

use crate::interrupt::InterruptGuard;
use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    panic::Location,
    sync::atomic::{AtomicBool, Ordering},
};

/// Returned by [`SpinLock::try_lock`] when another core holds the lock.
#[derive(Debug, PartialEq, Eq)]
pub struct WouldBlock;

/// A spinning mutual exclusion lock over a `T`.
///
/// The value is reachable only through a [`SpinLockGuard`], and the guard
/// keeps interrupts disabled until it is unlocked.
///
/// # Examples
///
/// ```
/// use abyss::spinlock::SpinLock;
/// use std::sync::Arc;
///
/// let hits = Arc::new(SpinLock::new(0));
/// let workers = (0..4)
///     .map(|_| {
///         let hits = Arc::clone(&hits);
///         std::thread::spawn(move || {
///             let mut hits = hits.lock();
///             *hits += 1;
///             hits.unlock();
///         })
///     })
///     .collect::<Vec<_>>();
/// for w in workers {
///     w.join().unwrap();
/// }
/// let hits = hits.lock();
/// assert_eq!(*hits, 4);
/// hits.unlock();
/// ```
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// An unlocked spinlock holding `value`.
    #[inline]
    pub const fn new(value: T) -> SpinLock<T> {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Takes the value out of the lock.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Spins until the lock is taken by this core.
    ///
    /// Interrupts stay off until the returned guard is unlocked. Locking a
    /// spinlock that the calling core already holds never returns.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let caller = Location::caller();
        loop {
            if let Some(guard) = self.acquire(caller) {
                return guard;
            }
            // Wait with interrupts on, and only retry the swap once the
            // holder is gone.
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    /// Takes the lock if it is free.
    ///
    /// # Errors
    /// [`WouldBlock`] if the lock is held.
    #[track_caller]
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        self.acquire(Location::caller()).ok_or(WouldBlock)
    }

    /// Whether any core holds the lock right now.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    fn acquire(&self, caller: &'static Location<'static>) -> Option<SpinLockGuard<'_, T>> {
        let interrupts = InterruptGuard::new();
        if self.locked.swap(true, Ordering::Acquire) {
            return None;
        }
        Some(SpinLockGuard {
            caller,
            lock: self,
            interrupts: Some(interrupts),
            _not_send: PhantomData,
        })
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> SpinLock<T> {
        SpinLock::new(T::default())
    }
}

/// Proof that the calling core holds a [`SpinLock`].
///
/// Give it back with [`unlock`](Self::unlock). Dropping it instead panics
/// and reports where the lock was taken.
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    caller: &'static Location<'static>,
    lock: &'a SpinLock<T>,
    interrupts: Option<InterruptGuard>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

impl<'a, T: ?Sized> SpinLockGuard<'a, T> {
    /// Releases the lock and restores the interrupt state saved when it was
    /// taken.
    pub fn unlock(mut self) {
        self.release();
        core::mem::forget(self);
    }

    /// The spinlock this guard holds.
    ///
    /// An associated function, so it never shadows a method of `T`.
    pub fn spinlock(this: &Self) -> &'a SpinLock<T> {
        this.lock
    }

    fn release(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        self.interrupts.take();
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.release();
            return;
        }
        panic!(
            "`.unlock()` must be explicitly called on a spinlock guard (taken at {})",
            self.caller
        );
    }
}
