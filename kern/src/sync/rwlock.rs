//! Reader-writer lock with writer preference.
//!
//! Any number of readers or at most one writer hold the lock at a time. The
//! admission policy bounds how long a waiting writer can be delayed:
//!
//! - a reader waits while a writer is active **or waiting**,
//! - a writer waits while anybody is active or waiting,
//! - the last reader to leave admits one waiting writer,
//! - a leaving writer admits the whole batch of waiting readers if there is
//!   one, and one waiting writer otherwise.
//!
//! Admission is a hand-off: the releasing thread updates the counters on
//! behalf of the threads it wakes, so a woken thread owns the lock as soon as
//! it runs and no newcomer can slip in between.

use super::{WaitQueue, WouldBlock, assert_blockable};
use crate::thread::Current;
use abyss::spinlock::SpinLock;
use core::marker::PhantomData;

struct RwState {
    readers_active: usize,
    writer: Option<u64>,
    readers_waiting: usize,
    writers_waiting: usize,
    readers: WaitQueue,
    writers: WaitQueue,
}

impl RwState {
    fn admit_readers(&mut self) {
        let woken = self.readers.wake_all();
        self.readers_waiting -= woken;
        self.readers_active += woken;
    }

    fn admit_writer(&mut self) {
        if let Some(tid) = self.writers.wake_one() {
            self.writers_waiting -= 1;
            self.writer = Some(tid);
        }
    }
}

/// Snapshot of the counters of a [`RwLock`].
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct RwLockStats {
    /// Number of readers holding the lock.
    pub readers_active: usize,
    /// Whether a writer holds the lock.
    pub writer_active: bool,
    /// Number of readers sleeping until admitted.
    pub readers_waiting: usize,
    /// Number of writers sleeping until admitted.
    pub writers_waiting: usize,
}

/// A reader-writer lock.
///
/// The raw [`acquire_read`]/[`release_read`] and
/// [`acquire_write`]/[`release_write`] pairs may be used directly; [`read`]
/// and [`write`] wrap them into guards that release on drop.
///
/// [`acquire_read`]: RwLock::acquire_read
/// [`release_read`]: RwLock::release_read
/// [`acquire_write`]: RwLock::acquire_write
/// [`release_write`]: RwLock::release_write
/// [`read`]: RwLock::read
/// [`write`]: RwLock::write
pub struct RwLock {
    name: String,
    inner: SpinLock<RwState>,
}

impl RwLock {
    /// Creates a new instance of an `RwLock` which is unlocked.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            inner: SpinLock::new(RwState {
                readers_active: 0,
                writer: None,
                readers_waiting: 0,
                writers_waiting: 0,
                readers: WaitQueue::new(format!("{name}/readers")),
                writers: WaitQueue::new(format!("{name}/writers")),
            }),
            name,
        }
    }

    /// Name of this lock.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Takes the lock with shared read access, sleeping until admitted.
    ///
    /// # Panics
    /// Panics if interrupts are disabled or if the caller holds the lock for
    /// writing.
    #[track_caller]
    pub fn acquire_read(&self) {
        assert_blockable("RwLock::acquire_read");
        let me = Current::get_tid();
        let mut state = self.inner.lock();
        if state.writer == Some(me) {
            state.unlock();
            panic!("RwLock `{}`: thread {me} reads while writing.", self.name);
        }
        if state.writer.is_some() || state.writers_waiting > 0 {
            state.readers_waiting += 1;
            state = WaitQueue::sleep(state, |s| &mut s.readers);
        } else {
            state.readers_active += 1;
        }
        state.unlock();
    }

    /// Gives up shared read access.
    ///
    /// # Panics
    /// Panics if no reader holds the lock.
    #[track_caller]
    pub fn release_read(&self) {
        let mut state = self.inner.lock();
        if state.readers_active == 0 {
            state.unlock();
            panic!(
                "RwLock `{}` is released by a reader that does not hold it.",
                self.name
            );
        }
        state.readers_active -= 1;
        if state.writers_waiting > 0 {
            if state.readers_active == 0 {
                state.admit_writer();
            }
        } else {
            state.admit_readers();
        }
        state.unlock();
    }

    /// Takes the lock with exclusive write access, sleeping until admitted.
    ///
    /// # Panics
    /// Panics if interrupts are disabled or if the caller already holds the
    /// lock for writing.
    #[track_caller]
    pub fn acquire_write(&self) {
        assert_blockable("RwLock::acquire_write");
        let me = Current::get_tid();
        let mut state = self.inner.lock();
        if state.writer == Some(me) {
            state.unlock();
            panic!("RwLock `{}` is write-locked twice by thread {me}.", self.name);
        }
        if state.writer.is_some()
            || state.writers_waiting > 0
            || state.readers_active > 0
            || state.readers_waiting > 0
        {
            state.writers_waiting += 1;
            state = WaitQueue::sleep(state, |s| &mut s.writers);
        } else {
            state.writer = Some(me);
        }
        let admitted = state.writer;
        state.unlock();
        assert_eq!(admitted, Some(me), "RwLock `{}`: writer hand-off is lost.", self.name);
    }

    /// Gives up exclusive write access.
    ///
    /// # Panics
    /// Panics if the caller is not the writer.
    #[track_caller]
    pub fn release_write(&self) {
        let me = Current::get_tid();
        let mut state = self.inner.lock();
        if state.writer != Some(me) {
            let writer = state.writer;
            state.unlock();
            panic!(
                "RwLock `{}` is released by thread {me}, but the writer is {writer:?}.",
                self.name
            );
        }
        state.writer = None;
        if state.readers_waiting > 0 {
            state.admit_readers();
        } else if state.writers_waiting > 0 {
            state.admit_writer();
        }
        state.unlock();
    }

    /// Takes shared read access if it can be granted right away under the
    /// writer-preference policy.
    ///
    /// # Errors
    /// Returns [`WouldBlock`] if a writer is active or waiting.
    pub fn try_acquire_read(&self) -> Result<(), WouldBlock> {
        let mut state = self.inner.lock();
        let result = if state.writer.is_none() && state.writers_waiting == 0 {
            state.readers_active += 1;
            Ok(())
        } else {
            Err(WouldBlock)
        };
        state.unlock();
        result
    }

    /// Takes exclusive write access if nobody holds or waits for the lock.
    ///
    /// # Errors
    /// Returns [`WouldBlock`] otherwise.
    pub fn try_acquire_write(&self) -> Result<(), WouldBlock> {
        let me = Current::get_tid();
        let mut state = self.inner.lock();
        let result = if state.writer.is_none()
            && state.writers_waiting == 0
            && state.readers_active == 0
            && state.readers_waiting == 0
        {
            state.writer = Some(me);
            Ok(())
        } else {
            Err(WouldBlock)
        };
        state.unlock();
        result
    }

    /// Locks this rwlock with shared read access, blocking the current thread
    /// until it can be acquired.
    ///
    /// Returns an RAII guard which will release this thread's shared access
    /// once it is dropped.
    #[track_caller]
    pub fn read(&self) -> RwLockReadGuard<'_> {
        self.acquire_read();
        RwLockReadGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Locks this rwlock with exclusive write access, blocking the current
    /// thread until it can be acquired.
    ///
    /// Returns an RAII guard which will drop the write access of this rwlock
    /// when dropped.
    #[track_caller]
    pub fn write(&self) -> RwLockWriteGuard<'_> {
        self.acquire_write();
        RwLockWriteGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Non-blocking variant of [`RwLock::read`].
    ///
    /// # Errors
    /// Returns [`WouldBlock`] if a writer is active or waiting.
    pub fn try_read(&self) -> Result<RwLockReadGuard<'_>, WouldBlock> {
        self.try_acquire_read().map(|_| RwLockReadGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Non-blocking variant of [`RwLock::write`].
    ///
    /// # Errors
    /// Returns [`WouldBlock`] if anybody holds or waits for the lock.
    pub fn try_write(&self) -> Result<RwLockWriteGuard<'_>, WouldBlock> {
        self.try_acquire_write().map(|_| RwLockWriteGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Snapshot of the admission counters.
    pub fn stats(&self) -> RwLockStats {
        let state = self.inner.lock();
        let stats = RwLockStats {
            readers_active: state.readers_active,
            writer_active: state.writer.is_some(),
            readers_waiting: state.readers_waiting,
            writers_waiting: state.writers_waiting,
        };
        state.unlock();
        stats
    }
}

impl Drop for RwLock {
    fn drop(&mut self) {
        let stats = self.stats();
        if !std::thread::panicking() {
            assert_eq!(
                stats,
                RwLockStats::default(),
                "RwLock `{}` is destroyed while in use.",
                self.name
            );
        }
    }
}

impl core::fmt::Debug for RwLock {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("RwLock")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .finish()
    }
}

/// RAII structure used to release the shared read access of a lock when
/// dropped.
///
/// This structure is created by the [`read`] and [`try_read`] methods on
/// [`RwLock`].
///
/// [`read`]: RwLock::read
/// [`try_read`]: RwLock::try_read
pub struct RwLockReadGuard<'a> {
    lock: &'a RwLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for RwLockReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

/// RAII structure used to release the exclusive write access of a lock when
/// dropped.
///
/// This structure is created by the [`write`] and [`try_write`] methods
/// on [`RwLock`].
///
/// [`write`]: RwLock::write
/// [`try_write`]: RwLock::try_write
pub struct RwLockWriteGuard<'a> {
    lock: &'a RwLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for RwLockWriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}
