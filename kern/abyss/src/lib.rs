//! The abyss of the kernel.
//!
//! This crate contains the lowest layer of the kernel: the interrupt state of
//! each core, the spinlock that every other synchronization primitive is
//! built on, and the console printer.
//!
//! On the hosted build every host thread behaves as a core with its own
//! interrupt state. You are **not** required to understand every line of code
//! in this crate. Instead, see the [`kern`] crate to see which modules (or
//! functions) are available for implementing the kernel.
//!
//! [`kern`]: ../kern/index.html
#![allow(clippy::missing_safety_doc)]

#[macro_use]
pub mod kprint;
pub mod interrupt;
pub mod spinlock;

pub use spinlock::SpinLock;

