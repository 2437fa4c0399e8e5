//! System call infrastructure shared by the kernel services.

/// Flags for system calls.
pub mod flags {
    use crate::KernelError;
    use num_enum::TryFromPrimitive;

    bitflags::bitflags! {
        /// Flags that a user program passes to `open`.
        ///
        /// The two low bits carry the access mode ([`FileMode`]); the
        /// remaining bits are modifiers. `O_CREAT`, `O_EXCL`, `O_TRUNC` and
        /// `O_NOCTTY` are consumed by the file system when the file is opened,
        /// while `O_APPEND` positions the offset of the new handle at the end
        /// of the file.
        pub struct OpenFlags: u32 {
            /// Open for reading only.
            const O_RDONLY = 0;
            /// Open for writing only.
            const O_WRONLY = 1;
            /// Open for reading and writing.
            const O_RDWR = 2;
            /// Mask of the access mode bits.
            const O_ACCMODE = 3;
            /// Create the file if it does not exist.
            const O_CREAT = 4;
            /// Fail if the file already exists. Only meaningful with `O_CREAT`.
            const O_EXCL = 8;
            /// Truncate the file to length 0 upon open.
            const O_TRUNC = 16;
            /// Start the offset at the end of the file.
            const O_APPEND = 32;
            /// Do not become the controlling terminal.
            const O_NOCTTY = 64;
        }
    }

    impl OpenFlags {
        /// Validates the raw `flags` argument of `open`.
        ///
        /// # Errors
        /// - [`KernelError::InvalidArgument`] if `raw` is negative, carries a
        ///   bit outside of the recognized set, or requests write-only and
        ///   read/write access at the same time.
        pub fn parse(raw: i32) -> Result<Self, KernelError> {
            let flags = u32::try_from(raw)
                .ok()
                .and_then(OpenFlags::from_bits)
                .ok_or(KernelError::InvalidArgument)?;
            flags.mode().map(|_| flags)
        }

        /// The access mode requested by these flags.
        ///
        /// # Errors
        /// - [`KernelError::InvalidArgument`] when both write-only and
        ///   read/write bits are set.
        pub fn mode(self) -> Result<FileMode, KernelError> {
            FileMode::try_from((self & OpenFlags::O_ACCMODE).bits())
                .map_err(|_| KernelError::InvalidArgument)
        }
    }

    /// The [`FileMode`] enum represents the access modes available when opening
    /// a file.
    ///
    /// This enum is used by user program to specify how a file is opened,
    /// determining which operations can be performed on the file. It
    /// defines three basic modes:
    /// - [`FileMode::Read`]: The file is opened for reading only.
    /// - [`FileMode::Write`]: The file is opened for writing only.
    /// - [`FileMode::ReadWrite`]: The file is opened for both reading and
    ///   writing.
    #[derive(Debug, PartialEq, PartialOrd, Ord, Eq, Clone, Copy, TryFromPrimitive)]
    #[repr(u32)]
    pub enum FileMode {
        /// Read-only access to the file.
        Read = 0,
        /// Write-only access to the file.
        Write = 1,
        /// Both Read and Write access to the file.
        ReadWrite = 2,
    }

    impl FileMode {
        /// Returns true if a handle of this mode may be read from.
        pub fn readable(self) -> bool {
            matches!(self, FileMode::Read | FileMode::ReadWrite)
        }

        /// Returns true if a handle of this mode may be written to.
        pub fn writable(self) -> bool {
            matches!(self, FileMode::Write | FileMode::ReadWrite)
        }
    }

    /// Reference point of `lseek`.
    #[derive(Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive)]
    #[repr(i32)]
    pub enum Whence {
        /// The offset is set to the given position.
        Set = 0,
        /// The offset is set to its current value plus the given position.
        Cur = 1,
        /// The offset is set to the size of the file plus the given position.
        End = 2,
    }

}
