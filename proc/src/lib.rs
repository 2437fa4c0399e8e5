//! # proc: the open-file state of a process.
//!
//! A process refers to its open files through small integers, the file
//! descriptors. This crate implements the per-process
//! [`FileDescriptorTable`] that maps descriptors to reference-counted
//! [`FileHandle`]s, the file system calls that operate on it, and the
//! [`Process`] context that owns the table.
//!
//! ## Locking protocol
//!
//! Two kinds of sleeping locks protect the state:
//!
//! - the table lock serializes changes to the shape of the table (allocating,
//!   freeing and aliasing slots),
//! - the lock of each handle serializes the offset and the I/O performed at
//!   it.
//!
//! A thread may hold the table lock and then take a handle lock, never the
//! reverse. The table lock is released as soon as the handle lock is held, so
//! no I/O ever happens under the table lock.

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod file_table;
pub mod process;
pub mod syscall;

pub use file_table::{FileDescriptor, FileDescriptorTable, FileHandle, OPEN_MAX};
pub use process::{Process, ProcessBuilder};
pub use syscall::{Syscall, SyscallNumber};
