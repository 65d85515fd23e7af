//! ## CP/M file system module
//!
//! The volume wraps a disk image and interprets it as a flat CP/M 2.2
//! directory.  Two dialects are supported, selected by `types::Variant`:
//! the HC2000 layout with no reserved boot tracks, and plain CP/M 2.2 with
//! two.  Everything the volume knows about file placement lives in the
//! directory entries; the free block map is derived from them on demand.
//!
//! All block-level I/O goes through the interleave table matching the
//! geometry's sector count, so callers only ever see logical blocks.  The
//! directory is rebuilt from blocks 0 and 1 of the data area on mount and
//! flushed back on unmount; the flush also rewrites every unreferenced
//! block with the factory-fresh 0xE5 pattern, which is what erases deleted
//! file data from the image.
//!
//! Durability is deliberately coarse: operations mutate only in-memory
//! state and the backing file is rewritten exactly once, at shutdown, if
//! the image reports a modification.

pub mod types;
mod directory;

use std::path::Path;
use log::{debug, trace, error};
use types::*;
use directory::Directory;
use crate::bios::dpb::DiskParameterBlock;
use crate::bios::skew;
use crate::fs::{Error, FileStat, VolumeStat};
use crate::img::{DiskImage, Sector};
use crate::{DYNERR, STDRESULT};

/// Get the file name carried by a path whose parent is the root.
fn basename(path: &str) -> Result<&str, Error> {
    let name = match path.strip_prefix('/') {
        Some(n) => n,
        None => return Err(Error::NoEntry),
    };
    if name.is_empty() || name.contains('/') {
        return Err(Error::NoEntry);
    }
    Ok(name)
}

/// The primary interface for volume operations.  Owns the disk image and
/// the in-memory directory; every method maps onto one kernel callback.
pub struct CpmFs {
    img: Box<dyn DiskImage>,
    dpb: DiskParameterBlock,
    variant: Variant,
    interleave: &'static [u8],
    dir: Directory,
    /// block number of directory block 0, derived from the reserved tracks
    first_block: usize,
}

impl CpmFs {
    /// Create a volume using the given image as storage.  Fails when no
    /// interleave table matches the geometry's sector count.
    pub fn new(img: Box<dyn DiskImage>, variant: Variant) -> Result<Self, DYNERR> {
        let dpb = variant.dpb();
        if !dpb.verify() {
            return Err(Box::new(Error::InvalidArg));
        }
        let geometry = *img.geometry();
        let interleave = match skew::table_for(geometry.sectors()) {
            Some(table) => table,
            None => {
                error!("no sector interleave available for the current number of sectors ({})", geometry.sectors());
                return Err(Box::new(Error::InvalidArg));
            }
        };
        let first_block = dpb.off as usize * geometry.sectors_per_track() * geometry.sector_size() / BLOCK_SIZE;
        let mut ans = Self {
            img,
            dpb,
            variant,
            interleave,
            dir: Directory::from_bytes(&[]),
            first_block,
        };
        ans.load_directory()?;
        Ok(ans)
    }
    /// Apply the interleave to a linear position.
    fn ipos(&self, pos: usize) -> Result<usize, Error> {
        let geometry = self.img.geometry();
        let (track, head, sector) = geometry.delinearize(pos)?;
        Ok(geometry.linearize(track, head, self.interleave[sector] as usize)?)
    }
    /// blocks in the data area (everything past the reserved tracks)
    fn data_blocks(&self) -> usize {
        self.img.geometry().total_bytes() / BLOCK_SIZE - self.first_block
    }
    /// Read one data-area block; absent sectors read as zeros.
    pub fn read_block(&self, block: usize) -> Result<Vec<u8>, Error> {
        let sector_size = self.img.geometry().sector_size();
        let start = (self.first_block + block) * BLOCK_SIZE / sector_size;
        let mut buf: Vec<u8> = Vec::with_capacity(BLOCK_SIZE);
        for i in start..start + BLOCK_SIZE / sector_size {
            match self.img.read(self.ipos(i)?) {
                Some(sector) if !sector.is_empty() => buf.extend_from_slice(sector.data()),
                _ => buf.resize(buf.len() + sector_size, 0),
            }
        }
        Ok(buf)
    }
    /// Write one data-area block, splitting into sectors; a trailing
    /// partial sector is padded out so the image never sees a short write.
    pub fn write_block(&mut self, block: usize, data: &[u8]) -> Result<(), Error> {
        let sector_size = self.img.geometry().sector_size();
        let start = (self.first_block + block) * BLOCK_SIZE / sector_size;
        for (n, chunk) in data.chunks(sector_size).enumerate() {
            let mut payload = chunk.to_vec();
            payload.resize(sector_size, 0);
            let pos = self.ipos(start + n)?;
            self.img.write(pos, Sector::from_vec(payload))?;
        }
        Ok(())
    }
    fn load_directory(&mut self) -> Result<(), Error> {
        let mut buf: Vec<u8> = Vec::new();
        for block in 0..self.dpb.dir_blocks() {
            buf.append(&mut self.read_block(block)?);
        }
        buf.truncate(self.dpb.dir_entries() * DIR_ENTRY_SIZE);
        self.dir = Directory::from_bytes(&buf);
        debug!("loaded {} directory entries", self.dir.len());
        Ok(())
    }
    /// Index of the head entry (not a continuation) matching the name.
    fn find(&self, name: &str) -> Option<usize> {
        self.dir.entries().iter().position(|e| !e.is_free() && !e.is_extent() && e.name() == name)
    }
    /// Every allocation unit of the file, in extent order.
    fn block_chain(&self, name: &str) -> Vec<u16> {
        let mut ans: Vec<u16> = Vec::new();
        for entry in self.dir.entries() {
            if entry.is_free() || entry.name() != name {
                continue;
            }
            for au in entry.blocks {
                if au != 0 {
                    ans.push(au);
                }
            }
        }
        ans
    }
    /// File length for read/write purposes: every extent counts.
    fn total_size(&self, name: &str) -> usize {
        self.dir.entries().iter()
            .filter(|e| !e.is_free() && e.name() == name)
            .map(|e| e.size())
            .sum()
    }
    /// File length for stat purposes: extents count until the first one
    /// that is not full.
    fn file_stat(&self, name: &str) -> Result<FileStat, Error> {
        let mut entries = 0;
        let mut size: usize = 0;
        for entry in self.dir.entries() {
            if entry.is_free() {
                continue;
            }
            if entry.name() == name {
                size += entry.size();
                entries += 1;
                if !entry.is_full() {
                    break;
                }
            }
        }
        if entries == 0 {
            return Err(Error::NoEntry);
        }
        Ok(FileStat {
            directory: false,
            size: size as u64,
            blksize: self.img.geometry().sector_size() as u32,
            blocks: ((size + 511) / 512) as u64,
            nlink: 1,
        })
    }
    pub fn getattr(&self, path: &str) -> Result<FileStat, Error> {
        if path == "/" {
            let n = self.dir.entries().iter().filter(|e| !e.is_free() && !e.is_extent()).count();
            return Ok(FileStat {
                directory: true,
                size: (n * 2) as u64,
                blksize: self.img.geometry().sector_size() as u32,
                blocks: (BLOCK_SIZE * 2 / 512) as u64,
                nlink: 1,
            });
        }
        self.file_stat(basename(path)?)
    }
    pub fn open(&self, path: &str) -> Result<(), Error> {
        match self.find(basename(path)?) {
            Some(_) => Ok(()),
            None => Err(Error::NoEntry),
        }
    }
    pub fn release(&self, path: &str) -> Result<(), Error> {
        self.open(path)
    }
    /// List the root: one row per head entry, with full-file attributes.
    pub fn readdir(&self, path: &str) -> Result<Vec<(usize, String, FileStat)>, Error> {
        if path != "/" {
            return Err(Error::NoEntry);
        }
        let mut ans = Vec::new();
        for (idx, entry) in self.dir.entries().iter().enumerate() {
            if entry.is_free() || entry.is_extent() {
                continue;
            }
            let name = entry.name();
            let stat = self.file_stat(&name)?;
            ans.push((idx, name, stat));
        }
        Ok(ans)
    }
    /// Name of the head entry at a directory index, for the adaptor's
    /// inode bookkeeping.
    pub fn entry_name(&self, idx: usize) -> Option<String> {
        match self.dir.entries().get(idx) {
            Some(e) if !e.is_free() && !e.is_extent() => Some(e.name()),
            _ => None,
        }
    }
    /// Directory index of the head entry for a path.
    pub fn entry_index(&self, path: &str) -> Result<usize, Error> {
        self.find(basename(path)?).ok_or(Error::NoEntry)
    }
    pub fn read(&self, path: &str, offset: u64, size: u32) -> Result<Vec<u8>, Error> {
        let name = basename(path)?;
        if self.find(name).is_none() {
            return Err(Error::NoEntry);
        }
        let total = self.total_size(name);
        let offset = offset as usize;
        if offset >= total {
            return Ok(Vec::new());
        }
        let want = (size as usize).min(total - offset);
        let chain = self.block_chain(name);
        let mut ans: Vec<u8> = Vec::with_capacity(want);
        let mut idx = offset / BLOCK_SIZE;
        let mut block_off = offset % BLOCK_SIZE;
        while ans.len() < want && idx < chain.len() {
            let buf = self.read_block(chain[idx] as usize)?;
            let n = (want - ans.len()).min(BLOCK_SIZE - block_off);
            ans.extend_from_slice(&buf[block_off..block_off + n]);
            block_off = 0;
            idx += 1;
        }
        trace!("read {} bytes of {} at {}", ans.len(), name, offset);
        Ok(ans)
    }
    pub fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize, Error> {
        let name = basename(path)?.to_string();
        if self.find(&name).is_none() {
            return Err(Error::NoEntry);
        }
        let offset = offset as usize;
        let mut total = self.total_size(&name);
        if offset + data.len() > total {
            self.truncate(path, (offset + data.len()) as u64)?;
            total = (offset + data.len() + BLOCK_SIZE - 1) / BLOCK_SIZE * BLOCK_SIZE;
        }
        let want = data.len().min(total.saturating_sub(offset));
        let chain = self.block_chain(&name);
        let mut written: usize = 0;
        let mut idx = offset / BLOCK_SIZE;
        let mut block_off = offset % BLOCK_SIZE;
        while written < want && idx < chain.len() {
            let block = chain[idx] as usize;
            let mut buf = self.read_block(block)?;
            let n = (want - written).min(BLOCK_SIZE - block_off);
            buf[block_off..block_off + n].copy_from_slice(&data[written..written + n]);
            self.write_block(block, &buf)?;
            written += n;
            block_off = 0;
            idx += 1;
        }
        trace!("wrote {} bytes of {} at {}", written, name, offset);
        Ok(written)
    }
    pub fn truncate(&mut self, path: &str, length: u64) -> Result<(), Error> {
        let name = basename(path)?.to_string();
        let length = length as usize;
        let mut size: usize = 0;
        let mut blocks: usize = 0;
        let mut entries = 0;
        for entry in self.dir.entries() {
            if entry.is_free() || entry.name() != name {
                continue;
            }
            size += entry.size();
            blocks += entry.block_count();
            entries += 1;
            if !entry.is_full() {
                break;
            }
        }
        if entries == 0 {
            return Err(Error::NoEntry);
        }
        if length == size {
            return Ok(());
        }
        match length < size {
            true => self.shrink(&name, length, blocks),
            false => self.grow(&name, length, blocks),
        }
    }
    /// Release allocation units from the tail until the block budget is
    /// met.  An extent left with zero records is freed outright, so
    /// truncating to zero releases every entry of the file.
    fn shrink(&mut self, name: &str, length: usize, blocks: usize) -> Result<(), Error> {
        let needed = (length + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let mut n = blocks.saturating_sub(needed);
        for entry in self.dir.entries_mut().iter_mut().rev() {
            if entry.is_free() || entry.name() != name {
                continue;
            }
            let mut slot = ALLOCATION_UNITS;
            while slot > 0 && n > 0 {
                if entry.blocks[slot - 1] != 0 {
                    entry.blocks[slot - 1] = 0;
                    n -= 1;
                }
                slot -= 1;
            }
            entry.record_count = (entry.block_count() * (BLOCK_SIZE / RECORD_SIZE)) as u8;
            if entry.record_count == 0 {
                entry.clear();
            }
        }
        match n {
            0 => Ok(()),
            _ => Err(Error::NoEntry),
        }
    }
    /// Extend the file to the block budget: fill empty slots in existing
    /// extents first, then allocate fresh entries carrying the next extent
    /// indices.  Newly assigned blocks are wiped to the factory pattern.
    fn grow(&mut self, name: &str, length: usize, blocks: usize) -> Result<(), Error> {
        let total = self.data_blocks();
        let mut free = vec![true; total];
        for b in 0..total.min(2) {
            free[b] = false;
        }
        for entry in self.dir.entries() {
            if entry.is_free() {
                continue;
            }
            for au in entry.blocks {
                if (au as usize) < free.len() {
                    free[au as usize] = false;
                }
            }
        }
        let mut n = ((length + BLOCK_SIZE - 1) / BLOCK_SIZE).saturating_sub(blocks);
        let variant = self.variant;
        let mut wiped: Vec<usize> = Vec::new();
        let mut extents: usize = 0;
        // fill the empty slots of the existing extents first
        for entry in self.dir.entries_mut().iter_mut() {
            if entry.is_free() || entry.name() != name {
                continue;
            }
            extents += 1;
            if entry.is_full() {
                continue;
            }
            let mut slot = 0;
            while slot < ALLOCATION_UNITS && n > 0 {
                if entry.blocks[slot] != 0 {
                    slot += 1;
                    continue;
                }
                match free.iter().position(|f| *f) {
                    Some(block) => {
                        free[block] = false;
                        entry.blocks[slot] = block as u16;
                        wiped.push(block);
                        n -= 1;
                        slot += 1;
                    }
                    None => break,
                }
            }
            entry.record_count = (entry.block_count() * (BLOCK_SIZE / RECORD_SIZE)) as u8;
        }
        // any further blocks need fresh extents carrying the next indices
        for entry in self.dir.entries_mut().iter_mut() {
            if n == 0 {
                break;
            }
            if !entry.is_free() {
                continue;
            }
            entry.clear();
            entry.user = 0;
            entry.set_name(name);
            let (lo, hi) = variant.extent_index(extents);
            entry.ex_lo = lo;
            entry.ex_hi = hi;
            extents += 1;
            let mut slot = 0;
            while slot < ALLOCATION_UNITS && n > 0 {
                match free.iter().position(|f| *f) {
                    Some(block) => {
                        free[block] = false;
                        entry.blocks[slot] = block as u16;
                        wiped.push(block);
                        n -= 1;
                        slot += 1;
                    }
                    None => break,
                }
            }
            entry.record_count = (entry.block_count() * (BLOCK_SIZE / RECORD_SIZE)) as u8;
            if free.iter().all(|f| !f) {
                break;
            }
        }
        for block in wiped {
            self.write_block(block, &vec![FREE_BYTE; BLOCK_SIZE])?;
        }
        match n {
            0 => Ok(()),
            _ => Err(Error::NoSpace),
        }
    }
    /// Allocate a head entry for a new empty file.  No blocks are assigned
    /// until the first write.
    pub fn create(&mut self, path: &str) -> Result<(), Error> {
        let name = basename(path)?.to_string();
        if self.find(&name).is_some() {
            return Err(Error::Exists);
        }
        match self.dir.entries_mut().iter_mut().find(|e| e.is_free()) {
            Some(entry) => {
                entry.clear();
                entry.user = 0;
                entry.set_name(&name);
                Ok(())
            }
            None => Err(Error::NoSpace),
        }
    }
    /// Free every entry of the name, continuations included.  The data
    /// blocks are only wiped at flush time.
    pub fn unlink(&mut self, path: &str) -> Result<(), Error> {
        let name = basename(path)?.to_string();
        let mut found = false;
        for entry in self.dir.entries_mut() {
            if !entry.is_free() && entry.name() == name {
                entry.clear();
                found = true;
            }
        }
        match found {
            true => Ok(()),
            false => Err(Error::NoEntry),
        }
    }
    pub fn statfs(&self, path: &str) -> Result<VolumeStat, Error> {
        if path != "/" {
            return Err(Error::NoEntry);
        }
        let mut used: usize = 0;
        let mut free_entries: usize = 0;
        for entry in self.dir.entries() {
            match entry.is_free() {
                true => free_entries += 1,
                false => used += entry.block_count(),
            }
        }
        let total = self.data_blocks().saturating_sub(2);
        Ok(VolumeStat {
            block_size: BLOCK_SIZE as u32,
            blocks: total as u64,
            blocks_free: total.saturating_sub(used) as u64,
            files: self.dir.len() as u64,
            files_free: free_entries as u64,
            name_max: NAME_SIZE as u32,
        })
    }
    /// Write the directory and the free-block wipe back through the image.
    /// A no-op unless something was written since mount.  The final
    /// partial directory block, were the entry count not block-aligned,
    /// lands in the block it belongs to.
    pub fn flush(&mut self) -> Result<(), Error> {
        if !self.img.modified() {
            return Ok(());
        }
        let total = self.data_blocks();
        let mut free = vec![true; total];
        for b in 0..total.min(2) {
            free[b] = false;
        }
        for entry in self.dir.entries() {
            if entry.is_free() {
                continue;
            }
            for au in entry.blocks {
                if (au as usize) < free.len() {
                    free[au as usize] = false;
                }
            }
        }
        let pattern = vec![FREE_BYTE; BLOCK_SIZE];
        for block in 0..total {
            if free[block] {
                self.write_block(block, &pattern)?;
            }
        }
        let buf = self.dir.to_bytes();
        let whole = buf.len() / BLOCK_SIZE;
        for i in 0..whole {
            self.write_block(i, &buf[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE])?;
        }
        let remainder = buf.len() % BLOCK_SIZE;
        if remainder != 0 {
            self.write_block(whole, &buf[buf.len() - remainder..])?;
        }
        debug!("directory flushed, {} blocks wiped", free.iter().filter(|f| **f).count());
        Ok(())
    }
    pub fn modified(&self) -> bool {
        self.img.modified()
    }
    pub fn image(&self) -> &dyn DiskImage {
        self.img.as_ref()
    }
    pub fn save(&self, path: &Path) -> STDRESULT {
        self.img.save(path)
    }
    /// Human-readable report of every used entry, flags and allocation
    /// units included.
    pub fn catalog(&self) -> String {
        let mut ans = String::new();
        let mut n = 0;
        for entry in self.dir.entries() {
            if entry.is_free() {
                continue;
            }
            ans += &format!("entry: {}\n", n);
            n += 1;
            ans += &format!("\tname: \"{}\"", entry.name());
            if entry.read_only() {
                ans += " (read-only)";
            }
            if entry.hidden() {
                ans += " (hidden)";
            }
            if entry.is_extent() {
                ans += " (extent)";
            }
            ans += &format!("\n\trecord count: {}\n", entry.record_count);
            ans += "\tallocation units: ";
            for au in entry.blocks {
                ans += &format!("{:04x} ", au);
            }
            ans += "\n";
        }
        ans
    }
    /// Hexdump of the raw directory blocks.
    pub fn dump_directory(&self) -> Result<String, Error> {
        let mut ans = String::new();
        for block in 0..self.dpb.dir_blocks() {
            ans += &crate::hexdump(&self.read_block(block)?);
        }
        Ok(ans)
    }
}
