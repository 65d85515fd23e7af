//! # Disk Image Module
//!
//! This is a container for the disk image codecs.  A disk image module
//! decodes a whole physical floppy from its container file and exposes a
//! uniform random-access array of sectors to the file system layer.
//!
//! Every codec implements the `DiskImage` trait.  The linear sector address
//! space is defined by a `Geometry`, which provides the bijection between
//! `(track, head, sector)` triples and linear positions.  Sector skew is not
//! applied here; the tables in `bios::skew` are applied by the file system.
//!
//! Codecs keep the container's own track structures and maintain a sparse
//! map from linear position to a `(track index, sector index)` pair, so a
//! position that was never recorded on the original media reads back as an
//! absent sector.

pub mod dsk;
pub mod imd;

use log::error;
use crate::STDRESULT;

/// Enumerates disk image errors.  The `Display` trait will print the equivalent long message.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown image type")]
    UnknownImageType,
    #[error("bad image header")]
    BadHeader,
    #[error("missing track tag")]
    BadTrackTag,
    #[error("unexpected end of image data")]
    TruncatedImage,
    #[error("invalid sector address")]
    InvalidAddress,
    #[error("invalid sector size")]
    InvalidSectorSize,
}

/// Physical layout of a floppy: cylinder count, surfaces, sectors per
/// side of a track, and the uniform sector size in bytes.  The layout
/// defines a bijection between `(track, head, sector)` triples and the
/// linear positions in `[0, total_sectors)` used by `DiskImage`.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Geometry {
    tracks: usize,
    heads: usize,
    sectors: usize,
    sector_size: usize,
}

impl Geometry {
    pub fn new(tracks: usize, heads: usize, sectors: usize, sector_size: usize) -> Result<Self, Error> {
        if tracks < 1 || tracks > 255 {
            error!("invalid track count {}", tracks);
            return Err(Error::InvalidAddress);
        }
        if heads < 1 || heads > 2 {
            error!("invalid head count {}", heads);
            return Err(Error::InvalidAddress);
        }
        if sectors < 1 {
            error!("invalid sector count {}", sectors);
            return Err(Error::InvalidAddress);
        }
        match sector_size {
            128 | 256 | 512 | 1024 | 2048 | 4096 | 8192 => {},
            _ => {
                error!("invalid sector size {}", sector_size);
                return Err(Error::InvalidSectorSize);
            }
        }
        Ok(Self { tracks, heads, sectors, sector_size })
    }
    pub fn tracks(&self) -> usize {
        self.tracks
    }
    pub fn heads(&self) -> usize {
        self.heads
    }
    /// sectors on one side of one track
    pub fn sectors(&self) -> usize {
        self.sectors
    }
    pub fn sector_size(&self) -> usize {
        self.sector_size
    }
    /// sectors on both sides of one track
    pub fn sectors_per_track(&self) -> usize {
        self.sectors * self.heads
    }
    pub fn total_sectors(&self) -> usize {
        self.tracks * self.heads * self.sectors
    }
    pub fn total_bytes(&self) -> usize {
        self.total_sectors() * self.sector_size
    }
    pub fn max_pos(&self) -> usize {
        self.total_sectors() - 1
    }
    pub fn validate(&self, track: usize, head: usize, sector: usize) -> Result<(), Error> {
        if track >= self.tracks {
            error!("invalid track number {} (max {})", track, self.tracks - 1);
            return Err(Error::InvalidAddress);
        }
        if head >= self.heads {
            error!("invalid head number {} (max {})", head, self.heads - 1);
            return Err(Error::InvalidAddress);
        }
        if sector >= self.sectors {
            error!("invalid sector number {} (max {})", sector, self.sectors - 1);
            return Err(Error::InvalidAddress);
        }
        Ok(())
    }
    /// Flatten a `(track, head, sector)` triple into a linear position.
    pub fn linearize(&self, track: usize, head: usize, sector: usize) -> Result<usize, Error> {
        self.validate(track, head, sector)?;
        Ok(track * self.sectors_per_track() + head * self.sectors + sector)
    }
    /// Recover the `(track, head, sector)` triple from a linear position.
    pub fn delinearize(&self, pos: usize) -> Result<(usize, usize, usize), Error> {
        let track = pos / self.sectors_per_track();
        let residue = pos % self.sectors_per_track();
        let head = residue / self.sectors;
        let sector = residue % self.sectors;
        self.validate(track, head, sector)?;
        Ok((track, head, sector))
    }
}

/// A sector's worth of data, owned by the image.  An empty sector means
/// the address was never recorded on the media; the file system reads it
/// as a zero-filled buffer of the geometry's sector size.
#[derive(PartialEq, Eq, Clone, Default, Debug)]
pub struct Sector {
    data: Vec<u8>,
}

impl Sector {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }
    pub fn data(&self) -> &[u8] {
        &self.data
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
}

/// The main trait for working with any kind of disk image.
/// The trait object serves as storage for the file system layer.
/// Construction parses a container file and is fatal on a corrupt image;
/// `write` is the only mutation and raises the `modified` flag.
pub trait DiskImage {
    fn geometry(&self) -> &Geometry;
    /// Get the sector at a linear position, or None if the position was
    /// never recorded.
    fn read(&self, pos: usize) -> Option<&Sector>;
    /// Store a sector at a linear position.  The sector must be empty or
    /// exactly one geometry sector in size.  Writing to a position on a
    /// track the container never carried synthesizes the track.
    fn write(&mut self, pos: usize, sector: Sector) -> Result<(), Error>;
    /// true once any write has landed
    fn modified(&self) -> bool;
    /// Serialize back to the container format.
    fn to_bytes(&self) -> Vec<u8>;
    /// Write the container back out, replacing the file.
    fn save(&self, path: &std::path::Path) -> STDRESULT {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }
}

/// Read `count` bytes at the cursor, advancing it.
pub(crate) fn take<'a>(buf: &'a [u8], ptr: &mut usize, count: usize) -> Result<&'a [u8], Error> {
    if *ptr + count > buf.len() {
        error!("unexpected end of data at {}", buf.len());
        return Err(Error::TruncatedImage);
    }
    let slice = &buf[*ptr..*ptr + count];
    *ptr += count;
    Ok(slice)
}

pub(crate) fn take_u8(buf: &[u8], ptr: &mut usize) -> Result<u8, Error> {
    Ok(take(buf, ptr, 1)?[0])
}

pub(crate) fn take_u16(buf: &[u8], ptr: &mut usize) -> Result<u16, Error> {
    let bytes = take(buf, ptr, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_rejects_bad_parameters() {
        assert!(Geometry::new(0, 1, 9, 512).is_err());
        assert!(Geometry::new(40, 3, 9, 512).is_err());
        assert!(Geometry::new(40, 1, 0, 512).is_err());
        assert!(Geometry::new(40, 1, 9, 500).is_err());
        assert!(Geometry::new(40, 1, 9, 512).is_ok());
    }

    #[test]
    fn address_bijection() {
        let geo = Geometry::new(80, 2, 16, 256).expect("bad geometry");
        for pos in 0..geo.total_sectors() {
            let (track, head, sector) = geo.delinearize(pos).expect("delinearize failed");
            assert_eq!(geo.linearize(track, head, sector).expect("linearize failed"), pos);
        }
        assert!(geo.delinearize(geo.total_sectors()).is_err());
        assert!(geo.linearize(80, 0, 0).is_err());
        assert!(geo.linearize(0, 2, 0).is_err());
        assert!(geo.linearize(0, 0, 16).is_err());
    }

    #[test]
    fn linear_order_is_track_major() {
        let geo = Geometry::new(80, 2, 9, 512).expect("bad geometry");
        assert_eq!(geo.linearize(0, 0, 0).unwrap(), 0);
        assert_eq!(geo.linearize(0, 1, 0).unwrap(), 9);
        assert_eq!(geo.linearize(1, 0, 0).unwrap(), 18);
        assert_eq!(geo.linearize(79, 1, 8).unwrap(), geo.max_pos());
    }
}
