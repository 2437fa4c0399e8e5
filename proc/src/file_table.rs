//! # File descriptor table.
//!
//! Each process owns a [`FileDescriptorTable`], a fixed number of slots that
//! map a [`FileDescriptor`] to an open [`FileHandle`]. A handle is the record
//! of one `open`: the underlying file object, the byte offset, the access
//! mode, and a lock serializing the users of the offset.
//!
//! A handle may be referenced from several slots after `dup2`. Each slot
//! counts as one reference; the underlying file object is closed when the
//! last reference goes away, regardless of the order in which the aliases are
//! closed.
//!
//! ```text
//!   slots                   handles
//!  +-----+
//!  |  0  | ---------------> [con: (RDONLY), ref 1]
//!  |  1  | ---------------> [con: (WRONLY), ref 1]
//!  |  2  | ---------------> [con: (WRONLY), ref 1]
//!  |  3  | ---------+
//!  |  4  |          +-----> [data.txt (RDWR), ref 2, offset 5]
//!  |  5  | ---------+
//!  | ... |
//!  +-----+
//! ```
//!
//! Descriptors are allocated lowest-first.

use kern::{
    KernelError,
    fs::{
        ShortTransfer,
        traits::{FileObject, FileSystem},
    },
    sync::{Mutex, lockdep::LockObserver},
    syscall::flags::{FileMode, OpenFlags, Whence},
};
use std::sync::Arc;

/// The default number of descriptor slots of a process.
pub const OPEN_MAX: usize = 128;

/// Permission given to files created by `open`.
const CREATE_MODE: u32 = 0o664;

/// Represents an index into a process’s file descriptor table.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct FileDescriptor(pub i32);

impl FileDescriptor {
    /// Console input.
    pub const STDIN: FileDescriptor = FileDescriptor(0);
    /// Console output.
    pub const STDOUT: FileDescriptor = FileDescriptor(1);
    /// Console error.
    pub const STDERR: FileDescriptor = FileDescriptor(2);
}

struct HandleState {
    file: Option<Box<dyn FileObject>>,
    ref_count: usize,
    offset: i64,
}

/// An open-file record shared by every slot that refers to it.
pub struct FileHandle {
    name: String,
    flags: OpenFlags,
    mode: FileMode,
    state: Mutex<HandleState>,
}

impl FileHandle {
    fn new(
        name: &str,
        flags: OpenFlags,
        mode: FileMode,
        file: Box<dyn FileObject>,
        offset: i64,
        observer: Option<Arc<dyn LockObserver>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            flags,
            mode,
            state: Mutex::observed(
                format!("file_handle_lock({name})"),
                HandleState {
                    file: Some(file),
                    ref_count: 1,
                    offset,
                },
                observer,
            ),
        }
    }

    /// Path the handle was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flags the handle was opened with.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Access mode of the handle.
    pub fn mode(&self) -> FileMode {
        self.mode
    }

    /// Number of slots referring to the handle.
    pub fn ref_count(&self) -> usize {
        self.state.lock().ref_count
    }

    /// Current byte offset.
    pub fn offset(&self) -> i64 {
        self.state.lock().offset
    }

    /// Drops one reference, closing the file object with the last one.
    ///
    /// The caller holds the table lock.
    fn release(&self) {
        let mut state = self.state.lock();
        state.ref_count -= 1;
        if state.ref_count == 0 {
            if let Some(file) = state.file.take() {
                file.close();
            }
            log::trace!("file_table: `{}` is closed", self.name);
        }
        state.unlock();
    }
}

/// The per-process table of open files.
pub struct FileDescriptorTable {
    slots: Mutex<Vec<Option<Arc<FileHandle>>>>,
    fs: Arc<dyn FileSystem>,
    observer: Option<Arc<dyn LockObserver>>,
}

impl FileDescriptorTable {
    /// Creates an empty table of `open_max` slots over `fs`.
    ///
    /// `observer`, if any, watches the table lock and the lock of every
    /// handle created through this table.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        open_max: usize,
        observer: Option<Arc<dyn LockObserver>>,
    ) -> Self {
        Self {
            slots: Mutex::observed("file_table_lock", vec![None; open_max], observer.clone()),
            fs,
            observer,
        }
    }

    /// Number of slots of the table.
    pub fn open_max(&self) -> usize {
        self.slots.lock().len()
    }

    /// Binds descriptors 0, 1 and 2 to `console` opened read-only,
    /// write-only and write-only respectively.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if the table has fewer than 3
    ///   slots. Nothing is opened in that case.
    /// - The error of the first open that fails, after closing the console
    ///   handles that were already opened. The table is left untouched.
    ///
    /// # Panics
    /// Panics if any of the three slots is occupied.
    pub fn bootstrap(&self, console: &str) -> Result<(), KernelError> {
        let modes = [OpenFlags::O_RDONLY, OpenFlags::O_WRONLY, OpenFlags::O_WRONLY];
        let mut slots = self.slots.lock();
        if slots.len() < modes.len() {
            log::warn!(
                "file_table: {} slots cannot hold the console descriptors",
                slots.len()
            );
            return Err(KernelError::InvalidArgument);
        }
        assert!(
            slots.iter().take(modes.len()).all(Option::is_none),
            "Console descriptors are already bound."
        );

        let mut handles = Vec::with_capacity(modes.len());
        for flags in modes {
            match self.open_handle(console, flags) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    log::warn!(
                        "file_table: bootstrap of `{console}` failed at fd {} ({e:?})",
                        handles.len()
                    );
                    for handle in handles {
                        handle.release();
                    }
                    return Err(e);
                }
            }
        }
        for (slot, handle) in slots.iter_mut().zip(handles) {
            *slot = Some(Arc::new(handle));
        }
        slots.unlock();
        Ok(())
    }

    fn open_handle(&self, path: &str, flags: OpenFlags) -> Result<FileHandle, KernelError> {
        let mode = flags.mode()?;
        let mut file = self.fs.open(path, flags, CREATE_MODE)?;
        let offset = if flags.contains(OpenFlags::O_APPEND) {
            match file.stat() {
                Ok(stat) => stat.size as i64,
                Err(e) => {
                    log::warn!("file_table: cannot seed the append offset of `{path}` ({e:?})");
                    file.close();
                    return Err(e);
                }
            }
        } else {
            0
        };
        Ok(FileHandle::new(
            path,
            flags,
            mode,
            file,
            offset,
            self.observer.clone(),
        ))
    }

    fn index(&self, len: usize, fd: FileDescriptor) -> Result<usize, KernelError> {
        usize::try_from(fd.0)
            .ok()
            .filter(|idx| *idx < len)
            .ok_or(KernelError::BadFileDescriptor)
    }

    /// Opens `path` into the lowest free descriptor.
    ///
    /// The file is opened with permission `0664` if `O_CREAT` creates it.
    /// With `O_APPEND`, the offset starts at the size of the opened file.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if `flags` requests write-only and
    ///   read/write access at the same time.
    /// - [`KernelError::TooManyOpenFile`] if every slot is occupied.
    /// - Any error of the file system, in which case no slot is consumed.
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<FileDescriptor, KernelError> {
        flags.mode()?;
        let mut slots = self.slots.lock();
        let idx = slots
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::TooManyOpenFile)?;
        let handle = self.open_handle(path, flags)?;
        slots[idx] = Some(Arc::new(handle));
        slots.unlock();
        log::debug!("file_table: `{path}` is opened at fd {idx}");
        Ok(FileDescriptor(idx as i32))
    }

    /// Closes `fd`.
    ///
    /// The underlying file is closed only if `fd` held the last reference to
    /// its handle.
    ///
    /// # Errors
    /// - [`KernelError::BadFileDescriptor`] if `fd` is out of range or not
    ///   open.
    pub fn close(&self, fd: FileDescriptor) -> Result<(), KernelError> {
        let mut slots = self.slots.lock();
        let idx = self.index(slots.len(), fd)?;
        let handle = slots[idx].take().ok_or(KernelError::BadFileDescriptor)?;
        handle.release();
        slots.unlock();
        log::debug!("file_table: fd {idx} is closed");
        Ok(())
    }

    /// Makes `newfd` refer to the handle of `oldfd`, closing `newfd` first if
    /// it is open.
    ///
    /// `dup2(fd, fd)` returns `fd` without any change.
    ///
    /// # Errors
    /// - [`KernelError::BadFileDescriptor`] if either descriptor is out of
    ///   range or `oldfd` is not open. `newfd` is left untouched then.
    pub fn dup2(
        &self,
        oldfd: FileDescriptor,
        newfd: FileDescriptor,
    ) -> Result<FileDescriptor, KernelError> {
        let mut slots = self.slots.lock();
        let old = self.index(slots.len(), oldfd)?;
        let new = self.index(slots.len(), newfd)?;
        if old == new {
            return Ok(newfd);
        }
        let handle = slots[old].clone().ok_or(KernelError::BadFileDescriptor)?;
        if let Some(prev) = slots[new].take() {
            prev.release();
        }
        let mut state = handle.state.lock();
        state.ref_count += 1;
        state.unlock();
        slots[new] = Some(handle);
        slots.unlock();
        log::debug!("file_table: fd {old} is duplicated to fd {new}");
        Ok(newfd)
    }

    /// Finds the handle of `fd` and locks it, releasing the table lock once
    /// the handle lock is held.
    fn with_handle<R>(
        &self,
        fd: FileDescriptor,
        f: impl FnOnce(&FileHandle, &mut HandleState) -> Result<R, KernelError>,
    ) -> Result<R, KernelError> {
        let slots = self.slots.lock();
        let idx = self.index(slots.len(), fd)?;
        let handle = slots[idx].clone().ok_or(KernelError::BadFileDescriptor)?;
        let mut state = handle.state.lock();
        slots.unlock();
        let result = f(&handle, &mut *state);
        state.unlock();
        result
    }

    /// Reads from `fd` at its offset into `buf`, advancing the offset by the
    /// number of bytes read.
    ///
    /// # Errors
    /// - [`KernelError::BadFileDescriptor`] if `fd` is not open.
    /// - [`KernelError::WrongAccessMode`] if `fd` is opened write-only.
    /// - The error of the file object. The offset still advances by the
    ///   bytes moved before the failure.
    pub fn read(&self, fd: FileDescriptor, buf: &mut [u8]) -> Result<usize, KernelError> {
        self.with_handle(fd, |handle, state| {
            if !handle.mode.readable() {
                return Err(KernelError::WrongAccessMode);
            }
            let position = state.offset as usize;
            let file = state.file.as_mut().ok_or(KernelError::BadFileDescriptor)?;
            let result = file.read_at(position, buf);
            advance(state, result)
        })
    }

    /// Writes `buf` to `fd` at its offset, advancing the offset by the
    /// number of bytes written.
    ///
    /// # Errors
    /// - [`KernelError::BadFileDescriptor`] if `fd` is not open.
    /// - [`KernelError::WrongAccessMode`] if `fd` is opened read-only.
    /// - The error of the file object. The offset still advances by the
    ///   bytes moved before the failure.
    pub fn write(&self, fd: FileDescriptor, buf: &[u8]) -> Result<usize, KernelError> {
        self.with_handle(fd, |handle, state| {
            if !handle.mode.writable() {
                return Err(KernelError::WrongAccessMode);
            }
            let position = state.offset as usize;
            let file = state.file.as_mut().ok_or(KernelError::BadFileDescriptor)?;
            let result = file.write_at(position, buf);
            advance(state, result)
        })
    }

    /// Moves the offset of `fd` to `position` relative to `whence`, and
    /// returns the new offset.
    ///
    /// # Errors
    /// - [`KernelError::BadFileDescriptor`] if `fd` is not open.
    /// - [`KernelError::InvalidArgument`] if `whence` is not one of
    ///   [`Whence`], or if the resulting offset is negative.
    /// - [`KernelError::IllegalSeek`] if the file is not seekable, or its
    ///   size is unknown for [`Whence::End`].
    pub fn lseek(
        &self,
        fd: FileDescriptor,
        position: i64,
        whence: i32,
    ) -> Result<i64, KernelError> {
        self.with_handle(fd, |_, state| {
            let whence = Whence::try_from(whence).map_err(|_| KernelError::InvalidArgument)?;
            let file = state.file.as_ref().ok_or(KernelError::BadFileDescriptor)?;
            if !file.is_seekable() {
                return Err(KernelError::IllegalSeek);
            }
            let base = match whence {
                Whence::Set => 0,
                Whence::Cur => state.offset,
                Whence::End => file.stat().map_err(|_| KernelError::IllegalSeek)?.size as i64,
            };
            let target = base
                .checked_add(position)
                .filter(|target| *target >= 0)
                .ok_or(KernelError::InvalidArgument)?;
            state.offset = target;
            Ok(target)
        })
    }

    /// The handle bound to `fd`.
    ///
    /// # Errors
    /// - [`KernelError::BadFileDescriptor`] if `fd` is not open.
    pub fn get(&self, fd: FileDescriptor) -> Result<Arc<FileHandle>, KernelError> {
        let slots = self.slots.lock();
        let idx = self.index(slots.len(), fd)?;
        let handle = slots[idx].clone().ok_or(KernelError::BadFileDescriptor);
        slots.unlock();
        handle
    }

    /// Current offset of `fd`, without moving it.
    ///
    /// # Errors
    /// - [`KernelError::BadFileDescriptor`] if `fd` is not open.
    pub fn offset_of(&self, fd: FileDescriptor) -> Result<i64, KernelError> {
        self.with_handle(fd, |_, state| Ok(state.offset))
    }

    /// Open descriptors in ascending order.
    pub fn descriptors(&self) -> Vec<FileDescriptor> {
        let slots = self.slots.lock();
        let fds = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(idx, _)| FileDescriptor(idx as i32))
            .collect();
        slots.unlock();
        fds
    }

    /// Closes every open descriptor.
    pub fn close_all(&self) {
        let mut slots = self.slots.lock();
        for handle in slots.iter_mut().filter_map(Option::take) {
            handle.release();
        }
        slots.unlock();
    }
}

fn advance(
    state: &mut HandleState,
    result: Result<usize, ShortTransfer>,
) -> Result<usize, KernelError> {
    match result {
        Ok(cnt) => {
            state.offset += cnt as i64;
            Ok(cnt)
        }
        Err(ShortTransfer { transferred, error }) => {
            state.offset += transferred as i64;
            Err(error)
        }
    }
}
