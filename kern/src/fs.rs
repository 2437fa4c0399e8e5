//! File system abstraction consumed by the per-process file table.
//!
//! The descriptor table does not know how files are stored. It opens files
//! through a [`traits::FileSystem`] and performs I/O on the returned
//! [`traits::FileObject`]s. This module also provides [`MemFs`], a flat
//! in-memory file system with the console device mounted at `con:`.

use crate::{
    KernelError,
    sync::SpinLock,
    syscall::flags::OpenFlags,
    teletype::{Console, ConsoleFile},
};
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Traits of the file system collaborators.
pub mod traits {
    use super::{ShortTransfer, Stat};
    use crate::{KernelError, syscall::flags::OpenFlags};

    /// A file system that opens files by path.
    pub trait FileSystem: Send + Sync {
        /// Opens the file at `path`.
        ///
        /// `flags` carries the access mode and the creation modifiers
        /// (`O_CREAT`, `O_EXCL`, `O_TRUNC`). `mode` is the permission of a
        /// newly created file.
        ///
        /// # Errors
        /// - [`KernelError::NoSuchEntry`] if `path` does not exist and
        ///   `O_CREAT` is not given.
        /// - [`KernelError::FileExist`] if `path` exists and both `O_CREAT`
        ///   and `O_EXCL` are given.
        fn open(
            &self,
            path: &str,
            flags: OpenFlags,
            mode: u32,
        ) -> Result<Box<dyn FileObject>, KernelError>;
    }

    /// An opened file.
    ///
    /// The object is owned by exactly one open-file handle and is closed by
    /// consuming it.
    pub trait FileObject: Send {
        /// Reads into `buf` starting at byte `position`.
        ///
        /// Returns the number of bytes read; 0 at the end of the file.
        fn read_at(&mut self, position: usize, buf: &mut [u8]) -> Result<usize, ShortTransfer>;

        /// Writes `buf` starting at byte `position`, growing the file if
        /// needed.
        fn write_at(&mut self, position: usize, buf: &[u8]) -> Result<usize, ShortTransfer>;

        /// Metadata of the file.
        fn stat(&self) -> Result<Stat, KernelError>;

        /// Whether the file has a position that `lseek` may move.
        fn is_seekable(&self) -> bool;

        /// Closes the file.
        fn close(self: Box<Self>);
    }
}

/// The type of a file.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FileKind {
    /// A regular file.
    Regular,
    /// A character device such as the console.
    CharDevice,
}

/// Metadata of a file.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Stat {
    /// Size of the file in bytes.
    pub size: usize,
    /// Type of the file.
    pub kind: FileKind,
}

/// An I/O failure that happened after `transferred` bytes were already moved.
///
/// A failure before any byte was moved is a `ShortTransfer` with
/// `transferred == 0`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ShortTransfer {
    /// Bytes moved before the failure.
    pub transferred: usize,
    /// The failure.
    pub error: KernelError,
}

impl From<KernelError> for ShortTransfer {
    fn from(error: KernelError) -> Self {
        Self {
            transferred: 0,
            error,
        }
    }
}

/// A fault that a [`MemFile`] simulates.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Fault {
    /// Reads move at most `after` bytes and then fail with
    /// [`KernelError::IOError`].
    ShortRead {
        /// Bytes moved before failing.
        after: usize,
    },
    /// Writes move at most `after` bytes and then fail with
    /// [`KernelError::NoSpace`].
    ShortWrite {
        /// Bytes moved before failing.
        after: usize,
    },
    /// `stat` fails with [`KernelError::IOError`].
    Stat,
}

/// Largest size a [`MemFile`] may grow to.
pub const MAX_FILE_SIZE: usize = 1 << 24;

/// A file of [`MemFs`].
pub struct MemFile {
    data: SpinLock<Vec<u8>>,
    mode: u32,
    fault: SpinLock<Option<Fault>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl MemFile {
    fn new(mode: u32, data: Vec<u8>) -> Self {
        Self {
            data: SpinLock::new(data),
            mode,
            fault: SpinLock::new(None),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Copy of the contents.
    pub fn contents(&self) -> Vec<u8> {
        let data = self.data.lock();
        let v = data.clone();
        data.unlock();
        v
    }

    /// Size of the contents.
    pub fn len(&self) -> usize {
        let data = self.data.lock();
        let len = data.len();
        data.unlock();
        len
    }

    /// Returns true if the file is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Permission the file was created with.
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// How many times the file has been opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// How many opened instances of the file have been closed.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Makes every following operation of the file simulate `fault`.
    pub fn inject_fault(&self, fault: Fault) {
        let mut guard = self.fault.lock();
        *guard = Some(fault);
        guard.unlock();
    }

    /// Removes an injected fault.
    pub fn clear_fault(&self) {
        let mut guard = self.fault.lock();
        *guard = None;
        guard.unlock();
    }

    fn fault(&self) -> Option<Fault> {
        let guard = self.fault.lock();
        let fault = *guard;
        guard.unlock();
        fault
    }
}

struct MemFileObject {
    file: Arc<MemFile>,
}

impl traits::FileObject for MemFileObject {
    fn read_at(&mut self, position: usize, buf: &mut [u8]) -> Result<usize, ShortTransfer> {
        let limit = match self.file.fault() {
            Some(Fault::ShortRead { after }) => Some(after),
            _ => None,
        };
        let data = self.file.data.lock();
        let start = position.min(data.len());
        let wanted = buf.len().min(data.len() - start);
        let cnt = limit.map_or(wanted, |after| wanted.min(after));
        buf[..cnt].copy_from_slice(&data[start..start + cnt]);
        data.unlock();
        match limit {
            Some(after) if wanted > after => Err(ShortTransfer {
                transferred: cnt,
                error: KernelError::IOError,
            }),
            _ => Ok(cnt),
        }
    }

    fn write_at(&mut self, position: usize, buf: &[u8]) -> Result<usize, ShortTransfer> {
        let limit = match self.file.fault() {
            Some(Fault::ShortWrite { after }) => Some(after),
            _ => None,
        };
        let cnt = limit.map_or(buf.len(), |after| buf.len().min(after));
        if cnt > 0 {
            let end = position
                .checked_add(cnt)
                .filter(|&end| end <= MAX_FILE_SIZE)
                .ok_or(ShortTransfer::from(KernelError::NoSpace))?;
            let mut data = self.file.data.lock();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[position..end].copy_from_slice(&buf[..cnt]);
            data.unlock();
        }
        if cnt < buf.len() {
            Err(ShortTransfer {
                transferred: cnt,
                error: KernelError::NoSpace,
            })
        } else {
            Ok(cnt)
        }
    }

    fn stat(&self) -> Result<Stat, KernelError> {
        if self.file.fault() == Some(Fault::Stat) {
            return Err(KernelError::IOError);
        }
        Ok(Stat {
            size: self.file.len(),
            kind: FileKind::Regular,
        })
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn close(self: Box<Self>) {
        self.file.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A flat in-memory file system.
///
/// Paths are plain names without directory structure. Device paths (names
/// ending with `:`) resolve to devices; [`MemFs::new`] mounts a [`Console`] at
/// `con:`.
pub struct MemFs {
    files: SpinLock<BTreeMap<String, Arc<MemFile>>>,
    devices: SpinLock<BTreeMap<String, Arc<Console>>>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    /// Creates an empty file system with the console mounted at `con:`.
    pub fn new() -> Self {
        let mut devices = BTreeMap::new();
        devices.insert("con:".to_string(), Arc::new(Console::new()));
        Self {
            files: SpinLock::new(BTreeMap::new()),
            devices: SpinLock::new(devices),
        }
    }

    /// Creates (or replaces) the file `path` holding `contents`.
    pub fn create(&self, path: &str, contents: &[u8]) -> Arc<MemFile> {
        let file = Arc::new(MemFile::new(0o664, contents.to_vec()));
        let mut files = self.files.lock();
        files.insert(path.to_string(), file.clone());
        files.unlock();
        file
    }

    /// The file at `path`, if any.
    pub fn file(&self, path: &str) -> Option<Arc<MemFile>> {
        let files = self.files.lock();
        let file = files.get(path).cloned();
        files.unlock();
        file
    }

    /// The device mounted at `path`, if any.
    pub fn device(&self, path: &str) -> Option<Arc<Console>> {
        let devices = self.devices.lock();
        let dev = devices.get(path).cloned();
        devices.unlock();
        dev
    }

    /// The console mounted at `con:`.
    ///
    /// # Panics
    /// Panics if the console was not mounted.
    pub fn console(&self) -> Arc<Console> {
        self.device("con:")
            .unwrap_or_else(|| panic!("MemFs: `con:` is not mounted."))
    }
}

impl traits::FileSystem for MemFs {
    fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> Result<Box<dyn traits::FileObject>, KernelError> {
        if path.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        if let Some(dev) = self.device(path) {
            return Ok(Box::new(ConsoleFile::new(dev)));
        }

        let mut files = self.files.lock();
        let file = match files.get(path).cloned() {
            Some(_) if flags.contains(OpenFlags::O_CREAT | OpenFlags::O_EXCL) => {
                Err(KernelError::FileExist)
            }
            Some(file) => {
                if flags.contains(OpenFlags::O_TRUNC) {
                    let mut data = file.data.lock();
                    data.clear();
                    data.unlock();
                }
                Ok(file)
            }
            None if flags.contains(OpenFlags::O_CREAT) => {
                let file = Arc::new(MemFile::new(mode, Vec::new()));
                files.insert(path.to_string(), file.clone());
                Ok(file)
            }
            None => Err(KernelError::NoSuchEntry),
        };
        files.unlock();

        let file = file?;
        file.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemFileObject { file }))
    }
}
