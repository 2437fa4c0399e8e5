//! # Lock.
//!
//! A [`Lock`] is a sleeping mutual exclusion primitive with single-owner
//! semantics: at most one thread holds it, and only the holder may release
//! it. Unlike [`Mutex`], a [`Lock`] carries no data; it is the building block
//! that [`Mutex`] and [`ConditionVariable`] are made of.
//!
//! Programming errors are faults, not waits:
//! - acquiring a lock the calling thread already holds,
//! - releasing a lock the calling thread does not hold,
//! - acquiring a lock while interrupts are disabled,
//! - destroying a lock that is still held.
//!
//! A lock may carry a [`LockObserver`] that watches the wait-for edges formed
//! by [`Lock::acquire`] and cleared by [`Lock::release`].
//!
//! [`Mutex`]: super::Mutex
//! [`ConditionVariable`]: super::ConditionVariable

use super::{
    WaitQueue, assert_blockable,
    lockdep::{LockId, LockObserver},
};
use crate::thread::Current;
use abyss::spinlock::{SpinLock, WouldBlock};
use std::sync::Arc;

struct LockState {
    holder: Option<u64>,
    waiters: WaitQueue,
}

/// A sleeping lock owned by at most one thread at a time.
///
/// No ordering is promised among the threads contending for the lock: a
/// thread woken by [`release`] competes with threads that arrive later.
///
/// [`release`]: Lock::release
pub struct Lock {
    id: LockId,
    name: String,
    inner: SpinLock<LockState>,
    observer: Option<Arc<dyn LockObserver>>,
}

impl Lock {
    /// Creates a new, unheld lock named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    /// Creates a new, unheld lock that reports to `observer`.
    pub fn with_observer(name: impl Into<String>, observer: Arc<dyn LockObserver>) -> Self {
        Self::build(name.into(), Some(observer))
    }

    pub(crate) fn build(name: String, observer: Option<Arc<dyn LockObserver>>) -> Self {
        Self {
            id: LockId::alloc(),
            inner: SpinLock::new(LockState {
                holder: None,
                waiters: WaitQueue::new(name.clone()),
            }),
            name,
            observer,
        }
    }

    /// Name of this lock.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity of this lock as reported to observers.
    pub fn id(&self) -> LockId {
        self.id
    }

    /// Acquires the lock, sleeping until it is available.
    ///
    /// # Panics
    /// Panics if interrupts are disabled, or if the calling thread already
    /// holds this lock.
    #[track_caller]
    pub fn acquire(&self) {
        assert_blockable("Lock::acquire");
        let me = Current::get_tid();
        let mut state = self.inner.lock();
        if state.holder == Some(me) {
            state.unlock();
            panic!("Lock `{}` is acquired twice by thread {me}.", self.name);
        }
        if state.holder.is_some() {
            if let Some(observer) = self.observer.as_ref() {
                observer.on_wait(me, self.id);
            }
            while state.holder.is_some() {
                state = WaitQueue::sleep(state, |s| &mut s.waiters);
            }
        }
        state.holder = Some(me);
        if let Some(observer) = self.observer.as_ref() {
            observer.on_acquire(me, self.id);
        }
        state.unlock();
        log::trace!("{}: acquired by thread {me}", self.name);
    }

    /// Attempts to acquire the lock without sleeping.
    ///
    /// # Errors
    /// Returns [`WouldBlock`] if some thread, including the caller, holds the
    /// lock.
    pub fn try_acquire(&self) -> Result<(), WouldBlock> {
        let me = Current::get_tid();
        let mut state = self.inner.lock();
        let result = if state.holder.is_none() {
            state.holder = Some(me);
            if let Some(observer) = self.observer.as_ref() {
                observer.on_acquire(me, self.id);
            }
            Ok(())
        } else {
            Err(WouldBlock)
        };
        state.unlock();
        result
    }

    /// Releases the lock and wakes one waiter.
    ///
    /// # Panics
    /// Panics if the calling thread does not hold the lock.
    #[track_caller]
    pub fn release(&self) {
        let me = Current::get_tid();
        let mut state = self.inner.lock();
        if state.holder != Some(me) {
            let holder = state.holder;
            state.unlock();
            panic!(
                "Lock `{}` is released by thread {me}, but it is held by {holder:?}.",
                self.name
            );
        }
        state.waiters.wake_one();
        state.holder = None;
        if let Some(observer) = self.observer.as_ref() {
            observer.on_release(me, self.id);
        }
        state.unlock();
        log::trace!("{}: released by thread {me}", self.name);
    }

    /// Returns true if the calling thread holds the lock.
    pub fn held_by_caller(&self) -> bool {
        let me = Current::get_tid();
        let state = self.inner.lock();
        let held = state.holder == Some(me);
        state.unlock();
        held
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let state = self.inner.lock();
        let holder = state.holder;
        state.unlock();
        if !std::thread::panicking() {
            assert!(
                holder.is_none(),
                "Lock `{}` is destroyed while held by thread {holder:?}.",
                self.name
            );
        }
    }
}

impl core::fmt::Debug for Lock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Lock")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}
