//! ## Disk Parameter Block Module
//!
//! This contains disk parameter blocks (DPB) for the supported volume
//! layouts.  There is no standard for storing a DPB on disk; the BIOS of
//! the host machine generated it, so we keep the known layouts on hand as
//! presets.  See <https://www.seasip.info/Cpm/format22.html> for the field
//! semantics.

use log::debug;
use crate::fs::cpm::types::{DIR_ENTRY_SIZE, RECORD_SIZE};

/// The Disk Parameter Block (DPB) introduced with CP/M v2.
/// The parameters are interdependent, see the `verify` function.
#[derive(PartialEq, Eq, Clone)]
pub struct DiskParameterBlock {
    /// number of 128-byte records per track
    pub spt: u16,
    /// block shift factor, bytes in block = 128 << bsh
    pub bsh: u8,
    /// block mask, 2^bsh - 1
    pub blm: u8,
    /// extent mask, logical extents per entry minus 1
    pub exm: u8,
    /// number of blocks on the disk minus 1
    pub dsm: u16,
    /// number of directory entries minus 1
    pub drm: u16,
    /// directory allocation bitmap, first byte
    pub al0: u8,
    /// directory allocation bitmap, second byte
    pub al1: u8,
    /// checksum vector size, 0 for a fixed disk
    pub cks: u16,
    /// number of reserved boot tracks
    pub off: u16,
}

/// BASIC 3.5 inch format of the ICE Felix HC2000, no reserved tracks
pub const HC: DiskParameterBlock = DiskParameterBlock {
    spt: 32,
    bsh: 4,
    blm: 15,
    exm: 0,
    dsm: 320,
    drm: 127,
    al0: 0b11000000,
    al1: 0b00000000,
    cks: 0,
    off: 0,
};

/// CP/M 2.2 3.5 inch format, two reserved boot tracks
pub const CPM22_35: DiskParameterBlock = DiskParameterBlock {
    spt: 32,
    bsh: 4,
    blm: 15,
    exm: 0,
    dsm: 341,
    drm: 127,
    al0: 0b11000000,
    al1: 0b00000000,
    cks: 0,
    off: 2,
};

impl DiskParameterBlock {
    /// Check that the parameter dependencies are satisfied.
    pub fn verify(&self) -> bool {
        if self.bsh < 3 || self.bsh > 7 {
            debug!("BSH is invalid");
            return false;
        }
        if self.blm as usize != (1 << self.bsh) - 1 {
            debug!("BLM must be 2^BSH-1");
            return false;
        }
        if self.dsm > 0x7fff {
            debug!("block count exceeds maximum");
            return false;
        }
        if (self.drm as usize + 1) * DIR_ENTRY_SIZE > 16 * self.block_size() {
            debug!("directory exceeds 16 blocks");
            return false;
        }
        true
    }
    /// size of block in bytes
    pub fn block_size(&self) -> usize {
        RECORD_SIZE << self.bsh as usize
    }
    /// records held by one block
    pub fn records_per_block(&self) -> usize {
        self.block_size() / RECORD_SIZE
    }
    /// maximum directory entries
    pub fn dir_entries(&self) -> usize {
        self.drm as usize + 1
    }
    /// number of directory blocks, rounded up
    pub fn dir_blocks(&self) -> usize {
        let bytes = self.dir_entries() * DIR_ENTRY_SIZE;
        (bytes + self.block_size() - 1) / self.block_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_verify() {
        assert!(HC.verify());
        assert!(CPM22_35.verify());
    }

    #[test]
    fn derived_quantities() {
        assert_eq!(HC.block_size(), 2048);
        assert_eq!(HC.records_per_block(), 16);
        assert_eq!(HC.dir_entries(), 128);
        assert_eq!(HC.dir_blocks(), 2);
        assert_eq!(CPM22_35.dir_blocks(), 2);
    }
}
