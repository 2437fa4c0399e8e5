//! # kern: kernel services of the synchronization core.
//!
//! This crate hosts everything a process needs from the kernel to keep its
//! open-file state consistent under concurrency:
//!
//! - [`thread`]: thread identity and the park/unpark mechanism on which every
//!   blocking primitive is built.
//! - [`sync`]: the blocking synchronization primitives ([`Semaphore`],
//!   [`Lock`], [`ConditionVariable`] and [`RwLock`]) together with the wait
//!   channel they sleep on and the pluggable lock observers.
//! - [`fs`]: the contract of the virtual file system consumed by the
//!   descriptor table, an in-memory file system, and the console device.
//! - [`syscall`]: the flags that travel through file system calls.
//!
//! Every host thread plays the role of a kernel thread running on its own
//! core. Holding a [`SpinLock`] disables interrupts on that core, and no
//! blocking primitive may be used while interrupts are disabled.
//!
//! [`Semaphore`]: sync::Semaphore
//! [`Lock`]: sync::Lock
//! [`ConditionVariable`]: sync::ConditionVariable
//! [`RwLock`]: sync::RwLock
//! [`SpinLock`]: sync::SpinLock

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod fs;
pub mod sync;
pub mod syscall;
pub mod teletype;
pub mod thread;

pub use abyss::{kprint, print, println};

/// Failure of a kernel service.
///
/// System calls report a failure to the user as a negated errno, see
/// [`KernelError::errno`]. Inside the kernel the variants stay distinct even
/// where two of them share an errno.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum KernelError {
    /// The path names nothing. (ENOENT)
    NoSuchEntry,
    /// The device or file failed to transfer data. (EIO)
    IOError,
    /// The descriptor is out of range or names no open file. (EBADF)
    BadFileDescriptor,
    /// The descriptor is valid but was not opened for the requested
    /// direction. Reported to the user as EBADF.
    WrongAccessMode,
    /// Kernel memory is exhausted. (ENOMEM)
    NoMemory,
    /// `O_CREAT | O_EXCL` on a path that already exists. (EEXIST)
    FileExist,
    /// The path names a directory. (EISDIR)
    IsDirectory,
    /// An argument is malformed. (EINVAL)
    InvalidArgument,
    /// Every descriptor slot of the process is in use. (EMFILE)
    TooManyOpenFile,
    /// The file has no notion of position. (ESPIPE)
    IllegalSeek,
    /// The file system has no room left. (ENOSPC)
    NoSpace,
    /// The system call number is unknown. (ENOSYS)
    NoSuchSyscall,
}

impl KernelError {
    /// Variants that own their errno. [`KernelError::WrongAccessMode`]
    /// borrows EBADF and is left out, so decoding is unambiguous.
    const DECODABLE: [KernelError; 11] = [
        KernelError::NoSuchEntry,
        KernelError::IOError,
        KernelError::BadFileDescriptor,
        KernelError::NoMemory,
        KernelError::FileExist,
        KernelError::IsDirectory,
        KernelError::InvalidArgument,
        KernelError::TooManyOpenFile,
        KernelError::NoSpace,
        KernelError::IllegalSeek,
        KernelError::NoSuchSyscall,
    ];

    /// The negated errno of this error.
    pub fn errno(self) -> isize {
        match self {
            KernelError::NoSuchEntry => -2,
            KernelError::IOError => -5,
            KernelError::BadFileDescriptor | KernelError::WrongAccessMode => -9,
            KernelError::NoMemory => -12,
            KernelError::FileExist => -17,
            KernelError::IsDirectory => -21,
            KernelError::InvalidArgument => -22,
            KernelError::TooManyOpenFile => -24,
            KernelError::NoSpace => -28,
            KernelError::IllegalSeek => -29,
            KernelError::NoSuchSyscall => -38,
        }
    }

    /// The errno as it is placed in the return register of a system call.
    pub fn into_usize(self) -> usize {
        self.errno() as usize
    }
}

/// An `isize` that is not the errno of any [`KernelError`].
#[derive(Debug, Eq, PartialEq)]
pub struct TryFromError {
    /// The rejected value.
    pub e: isize,
}

impl TryFrom<isize> for KernelError {
    type Error = TryFromError;

    fn try_from(errno: isize) -> Result<Self, Self::Error> {
        Self::DECODABLE
            .into_iter()
            .find(|e| e.errno() == errno)
            .ok_or(TryFromError { e: errno })
    }
}

#[cfg(test)]
mod tests {
    use super::KernelError;

    #[test]
    fn errno_encoding() {
        assert_eq!(KernelError::IllegalSeek.into_usize() as isize, -29);
        assert_eq!(
            KernelError::try_from(KernelError::TooManyOpenFile.into_usize() as isize),
            Ok(KernelError::TooManyOpenFile)
        );
        // Both descriptor errors share EBADF, so only one of them decodes back.
        assert_eq!(
            KernelError::try_from(KernelError::WrongAccessMode.errno()),
            Ok(KernelError::BadFileDescriptor)
        );
        assert!(KernelError::try_from(0).is_err());
    }
}
