//! Interrupt state of the executing core.
//!
//! On the hosted build every host thread plays the role of a core. A core
//! starts with interrupts enabled. Taking a [`SpinLock`] disables interrupts
//! until the guard is released, and the blocking primitives of the kernel
//! refuse to run while interrupts are off.
//!
//! [`SpinLock`]: crate::spinlock::SpinLock
use core::{cell::Cell, marker::PhantomData};

/// Interrupt bookkeeping of one core.
struct Core {
    enabled: Cell<bool>,
    /// Number of live [`InterruptGuard`]s.
    depth: Cell<usize>,
    /// State to restore when the outermost guard goes away.
    outer: Cell<bool>,
}

impl Core {
    fn enter(&self) {
        let depth = self.depth.get();
        if depth == 0 {
            self.outer.set(self.enabled.get());
        }
        self.enabled.set(false);
        self.depth.set(depth + 1);
    }

    fn leave(&self) {
        let depth = self.depth.get();
        assert!(depth > 0, "interrupt guard released more often than taken");
        self.depth.set(depth - 1);
        if depth == 1 {
            self.enabled.set(self.outer.get());
        }
    }
}

std::thread_local! {
    static CORE: Core = const {
        Core {
            enabled: Cell::new(true),
            depth: Cell::new(0),
            outer: Cell::new(true),
        }
    };
}

/// Whether the core accepts interrupts.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum InterruptState {
    /// Interrupts are enabled.
    On,
    /// Interrupts are disabled.
    Off,
}

impl InterruptState {
    /// The interrupt state of the calling core.
    pub fn current() -> Self {
        CORE.with(|core| {
            if core.enabled.get() {
                Self::On
            } else {
                Self::Off
            }
        })
    }
}

/// Keeps interrupts of the calling core disabled while alive.
///
/// Guards nest. Dropping the outermost one restores the state the core had
/// before it was created, so guards must be dropped in reverse order of
/// creation. A guard belongs to its core and is neither [`Send`] nor
/// [`Sync`].
pub struct InterruptGuard {
    _not_send: PhantomData<*const ()>,
}

impl InterruptGuard {
    /// Disables interrupts on the calling core.
    ///
    /// # Example
    /// ```rust
    /// use abyss::interrupt::{InterruptGuard, InterruptState};
    ///
    /// let guard = InterruptGuard::new();
    /// assert_eq!(InterruptState::current(), InterruptState::Off);
    /// drop(guard);
    /// assert_eq!(InterruptState::current(), InterruptState::On);
    /// ```
    pub fn new() -> Self {
        CORE.with(Core::enter);
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        CORE.with(Core::leave);
    }
}
