//! # Synchronization Primitives.
//!
//! The kernel must coordinate access to shared resources among multiple
//! threads of execution. [`SpinLock`] provides mutual exclusion by busy
//! waiting with interrupts disabled, which is only appropriate for a handful
//! of instructions of bookkeeping. Every other primitive of this module puts
//! the waiting thread to sleep instead.
//!
//! All sleeping primitives are built the same way: a [`SpinLock`] protects the
//! state of the primitive together with one or more [`WaitQueue`]s. A thread
//! that must wait checks the condition, enqueues itself and releases the
//! spinlock in a single critical section ([`WaitQueue::sleep`]), so that a
//! concurrent waker either sees the sleeper in the queue or has already
//! changed the condition before the sleeper looked at it.
//!
//! | Primitive             | Blocks Thread? | Fair?    | Typical Use Case                                 |
//! |-----------------------|----------------|----------|--------------------------------------------------|
//! | [`SpinLock`]          | No (busy wait) | No       | Short bookkeeping inside other primitives        |
//! | [`Semaphore`]         | Yes            | No       | Limiting access to a bounded resource            |
//! | [`Lock`]              | Yes            | No       | Exclusive ownership by a single thread           |
//! | [`Mutex`]             | Yes            | No       | Exclusive access to shared data                  |
//! | [`ConditionVariable`] | Yes            | No       | Waiting for a condition to become true           |
//! | [`RwLock`]            | Yes            | Writers  | Read-mostly data with occasional updates         |
//!
//! None of the sleeping primitives promise FIFO ordering: a thread woken from
//! a wait queue competes with threads that have not slept yet. [`RwLock`] is
//! the exception in that it bounds how long a waiting writer can be delayed
//! by readers.
//!
//! None of the sleeping primitives may be used while interrupts are disabled
//! on the calling core, i.e. while any [`SpinLock`] is held.
//!
//! The [`lockdep`] module provides observers that can be attached to a
//! [`Lock`] to record wait-for edges and diagnose deadlocks after the fact.

pub mod condition_variable;
pub mod lock;
pub mod lockdep;
pub mod mutex;
pub mod rwlock;
pub mod semaphore;
pub mod wait_queue;

pub use abyss::spinlock::{SpinLock, SpinLockGuard, WouldBlock};
pub use condition_variable::ConditionVariable;
pub use lock::Lock;
pub use mutex::{Mutex, MutexGuard};
pub use rwlock::{RwLock, RwLockReadGuard, RwLockStats, RwLockWriteGuard};
pub use semaphore::{Semaphore, SemaphorePermit};
pub use wait_queue::WaitQueue;

use abyss::interrupt::InterruptState;

#[track_caller]
pub(crate) fn assert_blockable(what: &str) {
    assert!(
        InterruptState::current() == InterruptState::On,
        "{what} must not be called while interrupts are disabled."
    );
}
