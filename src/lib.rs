//! # `hcfuse` main library
//!
//! This library mounts vintage floppy disk images (ZX Spectrum / Amstrad
//! CPC / CP/M 2.2 family) as a writable directory tree.
//!
//! ## Architecture
//!
//! Operations are built around two layers:
//! * `img::DiskImage` decodes/encodes a whole container file (CPCEMU DSK or
//!   SYDEX IMD) into a uniform random-access array of sectors; it does not
//!   try to interpret a file system
//! * `fs::cpm::CpmFs` imposes the CP/M directory on the decoded sectors and
//!   presents path-indexed file operations
//!
//! When a `CpmFs` is created it takes ownership of some `DiskImage` and
//! uses it as storage.  Changes are not permanent until the image is
//! flushed and written back, which the launcher does exactly once, at
//! unmount, if anything was modified.  The `fuse` module bridges kernel
//! callbacks into the volume behind a process-wide reader/writer lock.
//!
//! ## Disk Images
//!
//! In order to manipulate sectors, `hcfuse` must understand the way the
//! track data is packed into the container.  Supported containers are
//! * DSK (CPCEMU standard and extended)
//! * IMD
//!
//! The machine tables the volume needs (disk parameter blocks, sector
//! skews) are kept in `bios`.

pub mod img;
pub mod bios;
pub mod fs;
pub mod fuse;

use log::info;
use img::DiskImage;

pub type DYNERR = Box<dyn std::error::Error>;
pub type STDRESULT = Result<(), Box<dyn std::error::Error>>;

pub const KNOWN_FILE_EXTENSIONS: &str = "dsk,imd";

/// Given a bytestream return a disk image, or Err if the container cannot
/// be identified.  Detection order tries IMD before DSK, the signatures do
/// not overlap.
pub fn create_img_from_bytes(data: &[u8]) -> Result<Box<dyn DiskImage>, DYNERR> {
    if img::imd::detect(data) {
        info!("identified IMD image");
        return Ok(Box::new(img::imd::Imd::from_bytes(data)?));
    }
    if img::dsk::detect(data) {
        info!("identified DSK image");
        return Ok(Box::new(img::dsk::Dsk::from_bytes(data)?));
    }
    Err(Box::new(img::Error::UnknownImageType))
}

/// Convenience combining file read with `create_img_from_bytes`.
pub fn create_img_from_file(path: &str) -> Result<Box<dyn DiskImage>, DYNERR> {
    let data = std::fs::read(path)?;
    create_img_from_bytes(&data)
}

/// Format a buffer as a conventional hexdump, 16 bytes to the row.
pub fn hexdump(buf: &[u8]) -> String {
    let mut ans = String::new();
    for (row, chunk) in buf.chunks(16).enumerate() {
        ans += &format!("{:08x}  ", row * 16);
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => ans += &format!("{:02x} ", b),
                None => ans += "   ",
            }
            if i == 7 {
                ans += " ";
            }
        }
        ans += " |";
        for b in chunk {
            match b {
                0x20..=0x7e => ans.push(*b as char),
                _ => ans.push('.'),
            }
        }
        ans += "|\n";
    }
    ans
}
