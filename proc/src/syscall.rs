//! # File system calls.
//!
//! A system call arrives as a [`SyscallNumber`] and raw, untrusted
//! arguments. The handlers of this module validate the arguments, run the
//! request against the caller's [`FileDescriptorTable`], and report the
//! outcome as `Result<usize, KernelError>`. [`Process::dispatch`] folds that
//! result into the single value returned to the user: the non-negative
//! result on success, and the negated errno on failure (see
//! [`KernelError::into_usize`]).
//!
//! | Call  | Arguments                   | Result                  |
//! |-------|-----------------------------|-------------------------|
//! | open  | path, flags                 | new descriptor          |
//! | close | descriptor                  | 0                       |
//! | read  | descriptor, buffer          | bytes read              |
//! | write | descriptor, buffer          | bytes written           |
//! | lseek | descriptor, offset, whence  | new absolute offset     |
//! | dup2  | old descriptor, new descriptor | new descriptor       |
//!
//! ## Locking
//! Handlers that change the shape of the table (`open`, `close`, `dup2`)
//! hold the table lock for the whole request. Handlers that move data
//! (`read`, `write`, `lseek`) hold the table lock only to find the handle,
//! and hold the handle lock while the offset is used and updated. The table
//! lock is always taken before a handle lock.
//!
//! [`Process::dispatch`]: crate::Process::dispatch

use crate::file_table::{FileDescriptor, FileDescriptorTable};
use kern::{KernelError, syscall::flags::OpenFlags};
use num_enum::TryFromPrimitive;

/// Represents system call numbers of the file system calls.
///
/// The numeric values align with the syscall table of the process.
#[derive(Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive)]
#[repr(usize)]
pub enum SyscallNumber {
    /// Opens a file and returns a file descriptor.
    Open = 1,
    /// Reads data from a file descriptor.
    Read = 2,
    /// Writes data to a file descriptor.
    Write = 3,
    /// Moves the file offset of an open file.
    Lseek = 4,
    /// Closes an open file descriptor.
    Close = 5,
    /// Duplicates a file descriptor onto another.
    Dup2 = 6,
}

impl SyscallNumber {
    /// Decodes the system call number `no`.
    ///
    /// # Errors
    /// - [`KernelError::NoSuchSyscall`] if `no` is not a known number.
    pub fn from_raw(no: usize) -> Result<Self, KernelError> {
        Self::try_from_primitive(no).map_err(|_| KernelError::NoSuchSyscall)
    }
}

/// A system call request with its raw arguments.
#[derive(Debug)]
pub enum Syscall<'a> {
    /// `open(path, flags)`.
    Open {
        /// Path of the file.
        path: &'a str,
        /// Raw `O_*` flags.
        flags: i32,
    },
    /// `close(fd)`.
    Close {
        /// Descriptor to close.
        fd: i32,
    },
    /// `read(fd, buf)`.
    Read {
        /// Descriptor to read from.
        fd: i32,
        /// Destination of the read.
        buf: &'a mut [u8],
    },
    /// `write(fd, buf)`.
    Write {
        /// Descriptor to write to.
        fd: i32,
        /// Bytes to write.
        buf: &'a [u8],
    },
    /// `lseek(fd, offset, whence)`.
    Lseek {
        /// Descriptor to seek.
        fd: i32,
        /// Offset relative to `whence`.
        offset: i64,
        /// Raw `SEEK_*` value.
        whence: i32,
    },
    /// `dup2(oldfd, newfd)`.
    Dup2 {
        /// Descriptor to duplicate.
        oldfd: i32,
        /// Descriptor to bind.
        newfd: i32,
    },
}

impl Syscall<'_> {
    /// Number of this system call.
    pub fn number(&self) -> SyscallNumber {
        match self {
            Syscall::Open { .. } => SyscallNumber::Open,
            Syscall::Close { .. } => SyscallNumber::Close,
            Syscall::Read { .. } => SyscallNumber::Read,
            Syscall::Write { .. } => SyscallNumber::Write,
            Syscall::Lseek { .. } => SyscallNumber::Lseek,
            Syscall::Dup2 { .. } => SyscallNumber::Dup2,
        }
    }
}

/// Opens a file.
///
/// # Syscall API
/// ```c
/// int open(const char *pathname, int flags);
/// ```
/// - `pathname`: Path to the file to be opened.
/// - `flags`: `O_RDONLY`, `O_WRONLY` or `O_RDWR`, optionally combined with
///   `O_CREAT`, `O_EXCL`, `O_TRUNC`, `O_APPEND` and `O_NOCTTY`.
///
/// Returns the lowest free descriptor.
pub fn open(files: &FileDescriptorTable, path: &str, flags: i32) -> Result<usize, KernelError> {
    let flags = OpenFlags::parse(flags)?;
    files.open(path, flags).map(|fd| fd.0 as usize)
}

/// Closes a file descriptor.
///
/// # Syscall API
/// ```c
/// int close(int fd);
/// ```
/// - `fd`: The file descriptor to close.
///
/// Returns 0 on success.
pub fn close(files: &FileDescriptorTable, fd: i32) -> Result<usize, KernelError> {
    files.close(FileDescriptor(fd)).map(|_| 0)
}

/// Reads data from an open file.
///
/// # Syscall API
/// ```c
/// ssize_t read(int fd, void *buf, size_t count);
/// ```
/// - `fd`: The file descriptor of the file to read from.
/// - `buf`: The buffer to store the data read, of `count` bytes.
///
/// Returns the number of bytes read, which is 0 at the end of the file.
pub fn read(files: &FileDescriptorTable, fd: i32, buf: &mut [u8]) -> Result<usize, KernelError> {
    files.read(FileDescriptor(fd), buf)
}

/// Writes data to an open file.
///
/// # Syscall API
/// ```c
/// ssize_t write(int fd, const void *buf, size_t count);
/// ```
/// - `fd`: The file descriptor of the file to write to.
/// - `buf`: The `count` bytes to write.
///
/// Returns the number of bytes written.
pub fn write(files: &FileDescriptorTable, fd: i32, buf: &[u8]) -> Result<usize, KernelError> {
    files.write(FileDescriptor(fd), buf)
}

/// Repositions the file offset of an open file.
///
/// # Syscall API
/// ```c
/// off_t lseek(int fd, off_t offset, int whence);
/// ```
/// - `fd`: The file descriptor of the file.
/// - `offset`: The new offset, relative to `whence`.
/// - `whence`: `SEEK_SET` (0), `SEEK_CUR` (1) or `SEEK_END` (2).
///
/// Returns the resulting offset from the beginning of the file.
pub fn lseek(
    files: &FileDescriptorTable,
    fd: i32,
    offset: i64,
    whence: i32,
) -> Result<usize, KernelError> {
    files
        .lseek(FileDescriptor(fd), offset, whence)
        .map(|pos| pos as usize)
}

/// Duplicates a file descriptor.
///
/// # Syscall API
/// ```c
/// int dup2(int oldfd, int newfd);
/// ```
/// - `oldfd`: The open file descriptor to duplicate.
/// - `newfd`: The descriptor to bind. It is closed first if it is open.
///
/// Returns `newfd`.
pub fn dup2(files: &FileDescriptorTable, oldfd: i32, newfd: i32) -> Result<usize, KernelError> {
    files
        .dup2(FileDescriptor(oldfd), FileDescriptor(newfd))
        .map(|fd| fd.0 as usize)
}
