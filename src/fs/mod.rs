//! ## File System Module
//!
//! This imposes a file system on the already decoded sector data.  The only
//! family supported is the flat CP/M 2.2 directory, in two variants (see
//! `fs::cpm`).  The structures in this module are the currency between the
//! volume and the kernel bridge adaptor: a structured error that knows its
//! errno, and the stat shapes the adaptor translates for the kernel.

pub mod cpm;

/// Enumerates file system errors.  The `Display` trait will print the
/// equivalent long message; `errno` gives the value handed to the kernel
/// bridge.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("no such file or directory")]
    NoEntry,
    #[error("file exists")]
    Exists,
    #[error("no space left on device")]
    NoSpace,
    #[error("invalid argument")]
    InvalidArg,
    #[error("input/output error")]
    Io,
}

impl Error {
    pub fn errno(&self) -> i32 {
        match self {
            Self::NoEntry => libc::ENOENT,
            Self::Exists => libc::EEXIST,
            Self::NoSpace => libc::ENOSPC,
            Self::InvalidArg => libc::EINVAL,
            Self::Io => libc::EIO,
        }
    }
}

impl From<crate::img::Error> for Error {
    fn from(e: crate::img::Error) -> Self {
        match e {
            crate::img::Error::InvalidAddress => Self::InvalidArg,
            crate::img::Error::InvalidSectorSize => Self::InvalidArg,
            _ => Self::Io,
        }
    }
}

/// Attributes of one node as reported to the adaptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStat {
    pub directory: bool,
    pub size: u64,
    pub blksize: u32,
    /// 512-byte units, the way the kernel counts
    pub blocks: u64,
    pub nlink: u32,
}

/// Volume totals as reported to the adaptor's statfs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeStat {
    pub block_size: u32,
    pub blocks: u64,
    pub blocks_free: u64,
    pub files: u64,
    pub files_free: u64,
    pub name_max: u32,
}
