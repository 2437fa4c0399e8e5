//! Thread abstraction, an abstraction of a cpu core.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each with their
//! own stack and local state. Threads can be named, and provide some built-in
//! support for low-level synchronization.
//!
//! On the hosted build a kernel thread is a host thread. A thread may park
//! itself with [`Current::park_with`]: the closure given to it receives a
//! [`ParkHandle`] that some other thread later consumes with
//! [`ParkHandle::unpark`]. An unpark that races ahead of the matching park is
//! not lost, and a parked thread never returns before its handle is unparked.
//!
//! Fatal logic errors in a thread cause a thread panic, and the panic is
//! propagated to the thread that joins it.
use abyss::interrupt::InterruptState;
use crossbeam_utils::sync::{Parker, Unparker};
use std::{
    cell::RefCell,
    sync::atomic::{AtomicU64, Ordering},
};

static TID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

fn alloc_tid() -> u64 {
    TID_ALLOCATOR.fetch_add(1, Ordering::Relaxed)
}

/// A thread abstraction.
struct Thread {
    tid: u64,
    name: String,
    parker: Parker,
}

impl Thread {
    fn new(tid: u64, name: String) -> Self {
        Self {
            tid,
            name,
            parker: Parker::new(),
        }
    }
}

std::thread_local! {
    static CURRENT: RefCell<Option<Thread>> = const { RefCell::new(None) };
}

/// Calls `f` with the record of the calling thread.
///
/// Host threads that were not created by [`ThreadBuilder`] (such as the
/// thread of a test harness) are registered on first use.
fn with_current<R>(f: impl FnOnce(&Thread) -> R) -> R {
    CURRENT.with(|cur| {
        if cur.borrow().is_none() {
            let name = std::thread::current()
                .name()
                .unwrap_or("main")
                .to_string();
            *cur.borrow_mut() = Some(Thread::new(alloc_tid(), name));
        }
        let guard = cur.borrow();
        match guard.as_ref() {
            Some(th) => f(th),
            None => unreachable!(),
        }
    })
}

/// Waits for a spawned thread to finish.
pub struct JoinHandle {
    /// Id of the thread this handle wakes.
    pub tid: u64,
    inner: std::thread::JoinHandle<i32>,
}

impl JoinHandle {
    /// Blocks until the thread returns and yields its exit code.
    ///
    /// If the thread panicked, the panic resumes on the joining thread.
    pub fn join(self) -> i32 {
        match self.inner.join() {
            Ok(code) => code,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
}

/// The right to wake one parked thread.
pub struct ParkHandle {
    tid: u64,
    unparker: Unparker,
}

impl ParkHandle {
    /// Thread id of the parked thread.
    pub fn tid(&self) -> u64 {
        self.tid
    }

    /// Wakes the thread. A wake that arrives before the thread parks is kept.
    pub fn unpark(self) {
        self.unparker.unpark();
    }
}

/// A struct to get information of the current thread.
pub struct Current {
    _p: (),
}

impl Current {
    /// Park the current thread.
    ///
    /// `f` runs before the thread falls asleep with the [`ParkHandle`] that
    /// wakes it up. `f` is the place to publish the handle and to release the
    /// spinlock protecting the wait condition. The thread must not hold any
    /// spinlock once `f` returns.
    pub fn park_with(f: impl FnOnce(ParkHandle)) {
        let handle = with_current(|th| ParkHandle {
            tid: th.tid,
            unparker: th.parker.unparker().clone(),
        });
        f(handle);
        assert!(
            InterruptState::current() == InterruptState::On,
            "Try to park a thread while holding a lock."
        );
        with_current(|th| th.parker.park());
    }

    /// Id of the calling thread.
    pub fn get_tid() -> u64 {
        with_current(|th| th.tid)
    }

    /// Get the current thread's name.
    pub fn name() -> String {
        with_current(|th| th.name.clone())
    }

    /// Yield the core to another thread.
    pub fn yield_now() {
        std::thread::yield_now();
    }
}

/// Names and starts a kernel thread.
pub struct ThreadBuilder {
    tid: u64,
    name: String,
}

impl ThreadBuilder {
    /// A builder for a thread called `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            tid: alloc_tid(),
            name: String::from(name),
        }
    }

    /// Starts the thread running `thread_fn`.
    ///
    /// # Panics
    /// Panics if the host refuses to create a thread.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> JoinHandle {
        let Self { tid, name } = self;
        let inner = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                CURRENT.with(|cur| *cur.borrow_mut() = Some(Thread::new(tid, name)));
                thread_fn();
                0
            })
            .unwrap_or_else(|e| panic!("Failed to spawn a thread: {e}"));
        JoinHandle { tid, inner }
    }

    /// Id the thread will run with.
    pub fn get_tid(&self) -> u64 {
        self.tid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpark_before_park_is_not_lost() {
        Current::park_with(|h| {
            assert_eq!(h.tid(), Current::get_tid());
            h.unpark();
        });
    }

    #[test]
    fn spawned_threads_carry_their_tid() {
        let builder = ThreadBuilder::new("child");
        let tid = builder.get_tid();
        let handle = builder.spawn(move || {
            assert_eq!(Current::get_tid(), tid);
            assert_eq!(Current::name(), "child");
        });
        assert_eq!(handle.tid, tid);
        assert_eq!(handle.join(), 0);
        assert_ne!(Current::get_tid(), tid);
    }
}
