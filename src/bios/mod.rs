//! ## BIOS Module
//!
//! This contains the machine-level tables the file system layer relies on:
//! the disk parameter blocks that would normally live in a CP/M BIOS, and
//! the sector skew tables.  They are kept apart from both the image codecs
//! and the file system because either side may need them.

pub mod dpb;
pub mod skew;
