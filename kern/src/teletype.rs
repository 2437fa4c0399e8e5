//! A teletype (TTY) interface for character-based I/O.
//!
//! This module provides a trait [`Teletype`] that defines an interface for
//! reading from and writing to a teletype device. The [`Console`] implements
//! it over an in-memory input queue and an output capture, and is exposed to
//! the file system as the `con:` device through [`ConsoleFile`].

use crate::{
    KernelError,
    fs::{FileKind, ShortTransfer, Stat, traits::FileObject},
    sync::SpinLock,
};
use std::{collections::VecDeque, sync::Arc};

/// The `Teletype` trait represents a generic character-based input/output
/// device.
pub trait Teletype {
    /// Writes data to the teletype.
    ///
    /// # Returns
    /// - `Ok(usize)`: The number of bytes successfully written.
    /// - `Err(KernelError)`: If the write operation failed.
    fn write(&self, data: &[u8]) -> Result<usize, KernelError>;

    /// Reads data from the teletype.
    ///
    /// Reading while no input is pending returns 0 bytes.
    ///
    /// # Returns
    /// - `Ok(usize)`: The number of bytes successfully read.
    /// - `Err(KernelError)`: If the read operation failed.
    fn read(&self, data: &mut [u8]) -> Result<usize, KernelError>;
}

/// The console device.
#[derive(Default)]
pub struct Console {
    input: SpinLock<VecDeque<u8>>,
    output: SpinLock<Vec<u8>>,
}

impl Console {
    /// Creates a console with no pending input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `bytes` as if they were typed on the console.
    pub fn push_input(&self, bytes: &[u8]) {
        let mut input = self.input.lock();
        input.extend(bytes);
        input.unlock();
    }

    /// Copy of everything written to the console so far.
    pub fn output(&self) -> Vec<u8> {
        let output = self.output.lock();
        let v = output.clone();
        output.unlock();
        v
    }

    /// Takes everything written to the console so far.
    pub fn take_output(&self) -> Vec<u8> {
        let mut output = self.output.lock();
        let v = core::mem::take(&mut *output);
        output.unlock();
        v
    }
}

impl Teletype for Console {
    fn write(&self, data: &[u8]) -> Result<usize, KernelError> {
        let mut output = self.output.lock();
        output.extend_from_slice(data);
        output.unlock();
        Ok(data.len())
    }

    fn read(&self, data: &mut [u8]) -> Result<usize, KernelError> {
        let mut input = self.input.lock();
        let cnt = data.len().min(input.len());
        for (dst, src) in data.iter_mut().zip(input.drain(..cnt)) {
            *dst = src;
        }
        input.unlock();
        Ok(cnt)
    }
}

/// An open instance of a [`Teletype`] device.
///
/// The device has no notion of position, so it is not seekable and the
/// position given to reads and writes is ignored.
pub struct ConsoleFile {
    tty: Arc<dyn Teletype + Send + Sync>,
}

impl ConsoleFile {
    /// Opens `tty`.
    pub fn new(tty: Arc<dyn Teletype + Send + Sync>) -> Self {
        Self { tty }
    }
}

impl FileObject for ConsoleFile {
    fn read_at(&mut self, _position: usize, buf: &mut [u8]) -> Result<usize, ShortTransfer> {
        Ok(self.tty.read(buf)?)
    }

    fn write_at(&mut self, _position: usize, buf: &[u8]) -> Result<usize, ShortTransfer> {
        Ok(self.tty.write(buf)?)
    }

    fn stat(&self) -> Result<Stat, KernelError> {
        Ok(Stat {
            size: 0,
            kind: FileKind::CharDevice,
        })
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn close(self: Box<Self>) {}
}
