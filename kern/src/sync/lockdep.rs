//! Lock observers and deadlock diagnosis.
//!
//! A [`Lock`] can carry a [`LockObserver`] that is told about every
//! wait-for edge the lock forms and clears. Observers never influence the
//! acquisition order; they only watch.
//!
//! [`Hangman`] is an observer that records the events into a lock-free queue.
//! Once a test (or a person at a debugger) suspects that threads hang,
//! [`Hangman::diagnose`] replays the history into a wait-for graph and
//! reports the first cycle it finds.
//!
//! ```
//! use kern::sync::{Lock, lockdep::Hangman};
//! use std::sync::Arc;
//!
//! let hangman = Arc::new(Hangman::new());
//! let lock = Lock::with_observer("observed", hangman.clone());
//! lock.acquire();
//! lock.release();
//! assert!(hangman.diagnose().is_none());
//! ```
//!
//! [`Lock`]: super::Lock

use abyss::spinlock::SpinLock;
use crossbeam_queue::SegQueue;
use std::{
    collections::BTreeMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// Identity of a [`Lock`], unique for the lifetime of the kernel.
///
/// [`Lock`]: super::Lock
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct LockId(pub u64);

impl LockId {
    pub(crate) fn alloc() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        LockId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock#{}", self.0)
    }
}

/// Hooks invoked by a [`Lock`] at each change of its wait-for relation.
///
/// The hooks run while the internal spinlock of the lock is held, so they
/// must neither block nor touch the observed lock.
///
/// [`Lock`]: super::Lock
pub trait LockObserver: Send + Sync {
    /// `thread` is about to sleep until `lock` is released.
    fn on_wait(&self, _thread: u64, _lock: LockId) {}
    /// `thread` became the holder of `lock`.
    fn on_acquire(&self, _thread: u64, _lock: LockId) {}
    /// `thread` released `lock`.
    fn on_release(&self, _thread: u64, _lock: LockId) {}
}

/// An event recorded by [`Hangman`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LockEvent {
    /// A thread started to wait for a lock.
    Wait {
        /// The waiting thread.
        thread: u64,
        /// The awaited lock.
        lock: LockId,
    },
    /// A thread acquired a lock.
    Acquire {
        /// The new holder.
        thread: u64,
        /// The acquired lock.
        lock: LockId,
    },
    /// A thread released a lock.
    Release {
        /// The former holder.
        thread: u64,
        /// The released lock.
        lock: LockId,
    },
}

/// One edge of a wait-for cycle: `thread` waits for `lock` held by `holder`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct WaitEdge {
    /// The waiting thread.
    pub thread: u64,
    /// The lock it waits for.
    pub lock: LockId,
    /// The current holder of `lock`.
    pub holder: u64,
}

/// A cycle in the wait-for graph.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Deadlock {
    /// The edges of the cycle. The holder of the last edge is the thread of
    /// the first one.
    pub edges: Vec<WaitEdge>,
}

impl Deadlock {
    /// Threads participating in the cycle.
    pub fn threads(&self) -> Vec<u64> {
        self.edges.iter().map(|e| e.thread).collect()
    }
}

impl fmt::Display for Deadlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.edges.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "thread {} waits {} held by thread {}", e.thread, e.lock, e.holder)?;
        }
        Ok(())
    }
}

/// Deadlock detector that records lock traffic for offline diagnosis.
#[derive(Default)]
pub struct Hangman {
    pending: SegQueue<LockEvent>,
    history: SpinLock<Vec<LockEvent>>,
}

impl Hangman {
    /// Creates a detector with an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the recorded events into the history and returns a copy of it.
    pub fn events(&self) -> Vec<LockEvent> {
        let mut history = self.history.lock();
        while let Some(ev) = self.pending.pop() {
            history.push(ev);
        }
        let events = history.clone();
        history.unlock();
        events
    }

    /// Replays the recorded events and returns the first wait-for cycle.
    ///
    /// Threads are examined in ascending id order, so the same history always
    /// reports the same cycle.
    pub fn diagnose(&self) -> Option<Deadlock> {
        let deadlock = find_cycle(&self.events());
        if let Some(deadlock) = deadlock.as_ref() {
            log::warn!("Hangman: deadlock detected: {deadlock}");
        }
        deadlock
    }
}

impl LockObserver for Hangman {
    fn on_wait(&self, thread: u64, lock: LockId) {
        self.pending.push(LockEvent::Wait { thread, lock });
    }

    fn on_acquire(&self, thread: u64, lock: LockId) {
        self.pending.push(LockEvent::Acquire { thread, lock });
    }

    fn on_release(&self, thread: u64, lock: LockId) {
        self.pending.push(LockEvent::Release { thread, lock });
    }
}

fn find_cycle(events: &[LockEvent]) -> Option<Deadlock> {
    let mut holders = BTreeMap::<LockId, u64>::new();
    let mut waits = BTreeMap::<u64, LockId>::new();
    for ev in events {
        match *ev {
            LockEvent::Wait { thread, lock } => {
                waits.insert(thread, lock);
            }
            LockEvent::Acquire { thread, lock } => {
                waits.remove(&thread);
                holders.insert(lock, thread);
            }
            LockEvent::Release { thread, lock } => {
                if holders.get(&lock) == Some(&thread) {
                    holders.remove(&lock);
                }
            }
        }
    }

    for &start in waits.keys() {
        let mut edges = Vec::new();
        let mut thread = start;
        // A cycle through `start` has at most one edge per waiting thread.
        while edges.len() <= waits.len() {
            let Some(&lock) = waits.get(&thread) else { break };
            let Some(&holder) = holders.get(&lock) else { break };
            edges.push(WaitEdge { thread, lock, holder });
            if holder == start {
                return Some(Deadlock { edges });
            }
            if edges.iter().any(|e| e.thread == holder) {
                // Runs into a cycle that does not include `start`.
                break;
            }
            thread = holder;
        }
    }
    None
}
