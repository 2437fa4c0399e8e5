//! The process context.
//!
//! A [`Process`] owns the file state of one user program. It is created by a
//! [`ProcessBuilder`], which binds the console to descriptors 0, 1 and 2, and
//! it closes every remaining descriptor when dropped.

use crate::{
    file_table::{FileDescriptorTable, OPEN_MAX},
    syscall::{self, Syscall},
};
use kern::{KernelError, fs::traits::FileSystem, sync::lockdep::LockObserver};
use std::sync::Arc;

/// A process state, which contains the file state.
pub struct Process {
    files: FileDescriptorTable,
}

impl Process {
    /// Starts configuring a process whose files live on `fs`.
    pub fn builder(fs: Arc<dyn FileSystem>) -> ProcessBuilder {
        ProcessBuilder {
            fs,
            open_max: OPEN_MAX,
            console_path: "con:".to_string(),
            observer: None,
        }
    }

    /// The descriptor table of this process.
    pub fn files(&self) -> &FileDescriptorTable {
        &self.files
    }

    /// Handles a system call request.
    pub fn syscall(&self, call: Syscall<'_>) -> Result<usize, KernelError> {
        let no = call.number();
        let result = match call {
            Syscall::Open { path, flags } => syscall::open(&self.files, path, flags),
            Syscall::Close { fd } => syscall::close(&self.files, fd),
            Syscall::Read { fd, buf } => syscall::read(&self.files, fd, buf),
            Syscall::Write { fd, buf } => syscall::write(&self.files, fd, buf),
            Syscall::Lseek { fd, offset, whence } => {
                syscall::lseek(&self.files, fd, offset, whence)
            }
            Syscall::Dup2 { oldfd, newfd } => syscall::dup2(&self.files, oldfd, newfd),
        };
        log::trace!("syscall: {no:?} -> {result:?}");
        result
    }

    /// Handles a system call request and encodes the outcome as the value
    /// returned to the user.
    ///
    /// A successful call returns its result, and a failed one returns the
    /// negated errno of the error.
    pub fn dispatch(&self, call: Syscall<'_>) -> usize {
        match self.syscall(call) {
            Ok(v) => v,
            Err(e) => e.into_usize(),
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.files.close_all();
    }
}

/// The [`ProcessBuilder`] struct provides an interface for configuring the
/// file state of a process before it is created.
pub struct ProcessBuilder {
    fs: Arc<dyn FileSystem>,
    open_max: usize,
    console_path: String,
    observer: Option<Arc<dyn LockObserver>>,
}

impl ProcessBuilder {
    /// Sets the number of descriptor slots. Defaults to [`OPEN_MAX`].
    pub fn open_max(mut self, open_max: usize) -> Self {
        self.open_max = open_max;
        self
    }

    /// Sets the device bound to descriptors 0, 1 and 2. Defaults to `con:`.
    pub fn console_path(mut self, path: impl Into<String>) -> Self {
        self.console_path = path.into();
        self
    }

    /// Attaches `observer` to the table lock and to the lock of every file
    /// handle of the process.
    pub fn lock_observer(mut self, observer: Arc<dyn LockObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Creates the process and binds the console descriptors.
    ///
    /// # Errors
    /// Returns the error of the console bootstrap, which is
    /// [`KernelError::InvalidArgument`] if `open_max` is below 3.
    pub fn build(self) -> Result<Process, KernelError> {
        let files = FileDescriptorTable::new(self.fs, self.open_max, self.observer);
        files.bootstrap(&self.console_path)?;
        log::debug!("process: console `{}` is bound to fd 0-2", self.console_path);
        Ok(Process { files })
    }
}
