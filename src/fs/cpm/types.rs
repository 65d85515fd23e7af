//! ### CP/M volume types
//!
//! On-disk constants shared by the directory structures and the volume,
//! and the variant selector.  The two variants share every constant here;
//! they differ only in the DPB preset and in how a multi-extent file
//! numbers its extents.

use std::str::FromStr;
use std::fmt;
use crate::bios::dpb;
use crate::bios::dpb::DiskParameterBlock;

/// Unit of data transfer as seen by the CP/M BDOS.
/// This was the sector size on the original 8 inch disks.
pub const RECORD_SIZE: usize = 128;
/// Allocation unit size; both supported variants use 2K blocks.
pub const BLOCK_SIZE: usize = 2048;
/// Size of the directory entry in bytes, always 32
pub const DIR_ENTRY_SIZE: usize = 32;
/// Status byte for a free entry, also the factory-fresh fill value
pub const FREE_BYTE: u8 = 0xe5;
/// Bytes in the packed file name
pub const NAME_SIZE: usize = 11;
/// Allocation unit slots in one directory entry
pub const ALLOCATION_UNITS: usize = 8;

/// Selects the directory dialect: the HC variant used by the ICE Felix
/// HC2000 (no reserved boot tracks), or plain CP/M 2.2.
#[derive(PartialEq, Eq, Clone, Copy)]
pub enum Variant {
    Hc,
    Cpm22,
}

impl FromStr for Variant {
    type Err = crate::fs::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hc" => Ok(Self::Hc),
            "cpm" => Ok(Self::Cpm22),
            _ => Err(crate::fs::Error::InvalidArg),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hc => write!(f, "hc"),
            Self::Cpm22 => write!(f, "cpm"),
        }
    }
}

impl Variant {
    pub fn dpb(&self) -> DiskParameterBlock {
        match self {
            Self::Hc => dpb::HC,
            Self::Cpm22 => dpb::CPM22_35,
        }
    }
    /// Encode an extent index as the `(ex_lo, ex_hi)` pair.  The HC
    /// dialect keeps the whole index in `ex_lo`; CP/M 2.2 splits it.
    pub fn extent_index(&self, n: usize) -> (u8, u8) {
        match self {
            Self::Hc => (n as u8, 0),
            Self::Cpm22 => ((n % 32) as u8, (n / 32) as u8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_parsing() {
        assert!(Variant::from_str("hc") == Ok(Variant::Hc));
        assert!(Variant::from_str("cpm") == Ok(Variant::Cpm22));
        assert!(Variant::from_str("fat").is_err());
    }

    #[test]
    fn extent_numbering() {
        assert_eq!(Variant::Hc.extent_index(33), (33, 0));
        assert_eq!(Variant::Cpm22.extent_index(33), (1, 1));
        assert_eq!(Variant::Cpm22.extent_index(5), (5, 0));
    }
}
