//! ## Support for CPCEMU DSK disk images
//!
//! This covers both the standard and the extended ("EDSK") variant of the
//! container used by Amstrad CPC and ZX Spectrum emulators.  The two are
//! distinguished by the 34-byte tag at the start of the file.  The standard
//! variant carries a uniform track size; the extended variant carries a
//! per-track size table and explicit per-sector data lengths.
//!
//! The physical order of sector info records within a track block is
//! arbitrary; the authoritative address of a payload is the
//! `(track_id, side_id, sector_id)` triple carried by its info record.
//! Sector ids on disk count from 1, the linear address space counts from 0.

use std::collections::HashMap;
use log::{debug, trace, error};
use crate::img;
use crate::img::{Geometry, Sector, take, take_u8, take_u16};

pub const STD_TAG: &[u8; 34] = b"MV - CPCEMU Disk-File\r\nDisk-Info\r\n";
pub const EXT_TAG: &[u8; 34] = b"EXTENDED CPC DSK File\r\nDisk-Info\r\n";
const TRACK_TAG: &[u8; 12] = b"Track-Info\r\n";
const DATA_ALIGNMENT: usize = 256;
const SECTOR_SIZE_UNIT: usize = 256;
/// drivers specify a gap even though PC-compatible controllers ignore it
const DEFAULT_GAP: u8 = 0x1b;
const DEFAULT_FILLER: u8 = 0xe5;

pub fn file_extensions() -> Vec<String> {
    vec!["dsk".to_string()]
}

/// Test the leading 34 bytes for either variant's tag.
pub fn detect(data: &[u8]) -> bool {
    data.len() >= STD_TAG.len() && (&data[0..34] == STD_TAG || &data[0..34] == EXT_TAG)
}

struct SectorInfo {
    track: u8,
    side: u8,
    id: u8,
    size: u8,
    sreg1: u8,
    sreg2: u8,
    /// explicit payload length, carried only by the extended variant
    data_length: u16,
}

struct Track {
    track: u8,
    side: u8,
    sector_size: u8,
    sector_count: u8,
    gap: u8,
    filler: u8,
    infos: Vec<SectorInfo>,
    sectors: Vec<Sector>,
}

/// A parsed DSK container.  Tracks hold the container structures; the map
/// takes a linear position to the `(track index, sector index)` pair that
/// stores the payload.
pub struct Dsk {
    geometry: Geometry,
    extended: bool,
    tracks: Vec<Track>,
    map: HashMap<usize, (usize, usize)>,
    modified: bool,
}

fn creator_bytes() -> [u8; 14] {
    let mut ans = [0u8; 14];
    let creator = concat!("hcfuse ", env!("CARGO_PKG_VERSION"));
    for (i, b) in creator.as_bytes().iter().take(ans.len()).enumerate() {
        ans[i] = *b;
    }
    ans
}

fn parse_track(buf: &[u8], ptr: &mut usize, extended: bool) -> Result<Track, img::Error> {
    let track_pos = *ptr;
    if take(buf, ptr, TRACK_TAG.len())? != TRACK_TAG {
        error!("missing track tag at {}", track_pos);
        return Err(img::Error::BadTrackTag);
    }
    take(buf, ptr, 4)?;
    let track = take_u8(buf, ptr)?;
    let side = take_u8(buf, ptr)?;
    take(buf, ptr, 2)?;
    let sector_size = take_u8(buf, ptr)?;
    let sector_count = take_u8(buf, ptr)?;
    let gap = take_u8(buf, ptr)?;
    let filler = take_u8(buf, ptr)?;
    debug!("track {} side {}: {} sectors, size code {}", track, side, sector_count, sector_size);
    let mut infos: Vec<SectorInfo> = Vec::with_capacity(sector_count as usize);
    for _i in 0..sector_count {
        let info = SectorInfo {
            track: take_u8(buf, ptr)?,
            side: take_u8(buf, ptr)?,
            id: take_u8(buf, ptr)?,
            size: take_u8(buf, ptr)?,
            sreg1: take_u8(buf, ptr)?,
            sreg2: take_u8(buf, ptr)?,
            data_length: match extended {
                true => take_u16(buf, ptr)?,
                false => {
                    take(buf, ptr, 2)?;
                    0
                }
            },
        };
        trace!("sector id {} at track {} side {}", info.id, info.track, info.side);
        infos.push(info);
    }
    // payloads start at the next alignment boundary from the track block start
    *ptr = track_pos + DATA_ALIGNMENT;
    let mut sectors: Vec<Sector> = Vec::with_capacity(infos.len());
    for info in &infos {
        let length = match extended {
            true => info.data_length as usize,
            false => info.size as usize * SECTOR_SIZE_UNIT,
        };
        sectors.push(Sector::from_vec(take(buf, ptr, length)?.to_vec()));
    }
    Ok(Track { track, side, sector_size, sector_count, gap, filler, infos, sectors })
}

impl Dsk {
    pub fn from_bytes(data: &[u8]) -> Result<Self, img::Error> {
        let mut ptr: usize = 0;
        let tag = take(data, &mut ptr, 34)?;
        let extended = match tag {
            t if t == STD_TAG => false,
            t if t == EXT_TAG => true,
            _ => {
                error!("DSK file header mismatch");
                return Err(img::Error::BadHeader);
            }
        };
        take(data, &mut ptr, 14)?; // creator
        let track_count = take_u8(data, &mut ptr)?;
        let sides = take_u8(data, &mut ptr)?;
        take_u16(data, &mut ptr)?; // uniform track size (standard), zero (extended)
        let mut tracks: Vec<Track> = Vec::new();
        if extended {
            let table = take(data, &mut ptr, track_count as usize * sides as usize)?.to_vec();
            ptr = DATA_ALIGNMENT;
            for t in 0..track_count as usize {
                for s in 0..sides as usize {
                    if table[t * sides as usize + s] == 0 {
                        trace!("track {} side {} missing", t, s);
                        continue;
                    }
                    tracks.push(parse_track(data, &mut ptr, extended)?);
                    if ptr % DATA_ALIGNMENT != 0 {
                        ptr += DATA_ALIGNMENT - ptr % DATA_ALIGNMENT;
                    }
                }
            }
        } else {
            ptr = DATA_ALIGNMENT;
            for _t in 0..track_count {
                tracks.push(parse_track(data, &mut ptr, extended)?);
            }
        }
        let mut sector_count = 0;
        let mut sector_size = 0;
        for trk in &tracks {
            sector_count = sector_count.max(trk.sector_count as usize);
            sector_size = sector_size.max(trk.sector_size as usize * SECTOR_SIZE_UNIT);
        }
        let geometry = Geometry::new(track_count as usize, sides as usize, sector_count, sector_size)?;
        let mut map: HashMap<usize, (usize, usize)> = HashMap::new();
        for (tidx, trk) in tracks.iter().enumerate() {
            for (sidx, info) in trk.infos.iter().enumerate() {
                if info.id == 0 {
                    error!("sector id 0 at track {} side {}", info.track, info.side);
                    return Err(img::Error::InvalidAddress);
                }
                let pos = geometry.linearize(info.track as usize, info.side as usize, info.id as usize - 1)?;
                map.insert(pos, (tidx, sidx));
            }
        }
        Ok(Self { geometry, extended, tracks, map, modified: false })
    }
    fn payload_length(&self, info: &SectorInfo) -> usize {
        match self.extended {
            true => info.data_length as usize,
            false => info.size as usize * SECTOR_SIZE_UNIT,
        }
    }
    /// size of an emitted track block in alignment units, for the EDSK size table
    fn track_block_units(&self, trk: &Track) -> u8 {
        let mut bytes: usize = trk.infos.iter().map(|i| self.payload_length(i)).sum();
        if bytes % DATA_ALIGNMENT != 0 {
            bytes += DATA_ALIGNMENT - bytes % DATA_ALIGNMENT;
        }
        ((DATA_ALIGNMENT + bytes) / DATA_ALIGNMENT) as u8
    }
}

impl img::DiskImage for Dsk {
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }
    fn read(&self, pos: usize) -> Option<&Sector> {
        self.map.get(&pos).map(|(t, s)| &self.tracks[*t].sectors[*s])
    }
    fn write(&mut self, pos: usize, sector: Sector) -> Result<(), img::Error> {
        if pos > self.geometry.max_pos() {
            error!("invalid sector position {} (max {})", pos, self.geometry.max_pos());
            return Err(img::Error::InvalidAddress);
        }
        if !sector.is_empty() && sector.len() != self.geometry.sector_size() {
            error!("invalid sector size {} (expected {})", sector.len(), self.geometry.sector_size());
            return Err(img::Error::InvalidSectorSize);
        }
        if let Some(&(tidx, sidx)) = self.map.get(&pos) {
            if self.extended && !sector.is_empty() {
                self.tracks[tidx].infos[sidx].data_length = sector.len() as u16;
            }
            self.tracks[tidx].sectors[sidx] = sector;
        } else {
            let (track, head, sec) = self.geometry.delinearize(pos)?;
            debug!("synthesizing track {} side {}", track, head);
            let size_code = (self.geometry.sector_size() / SECTOR_SIZE_UNIT) as u8;
            let count = self.geometry.sectors();
            let mut infos: Vec<SectorInfo> = Vec::with_capacity(count);
            for i in 0..count {
                infos.push(SectorInfo {
                    track: track as u8,
                    side: head as u8,
                    id: i as u8 + 1,
                    size: size_code,
                    sreg1: 0,
                    sreg2: 0,
                    data_length: match self.extended {
                        true => self.geometry.sector_size() as u16,
                        false => 0,
                    },
                });
            }
            let mut sectors = vec![Sector::new(); count];
            sectors[sec] = sector;
            let tidx = self.tracks.len();
            for i in 0..count {
                let p = self.geometry.linearize(track, head, i)?;
                self.map.insert(p, (tidx, i));
            }
            self.tracks.push(Track {
                track: track as u8,
                side: head as u8,
                sector_size: size_code,
                sector_count: count as u8,
                gap: DEFAULT_GAP,
                filler: DEFAULT_FILLER,
                infos,
                sectors,
            });
        }
        self.modified = true;
        Ok(())
    }
    fn modified(&self) -> bool {
        self.modified
    }
    fn to_bytes(&self) -> Vec<u8> {
        let mut ans: Vec<u8> = Vec::new();
        match self.extended {
            true => ans.extend_from_slice(EXT_TAG),
            false => ans.extend_from_slice(STD_TAG),
        }
        ans.extend_from_slice(&creator_bytes());
        ans.push(self.geometry.tracks() as u8);
        ans.push(self.geometry.heads() as u8);
        if self.extended {
            ans.extend_from_slice(&u16::to_le_bytes(0));
            // regenerate the size table from the tracks actually present
            let mut table = vec![0u8; self.geometry.tracks() * self.geometry.heads()];
            for trk in &self.tracks {
                let slot = trk.track as usize * self.geometry.heads() + trk.side as usize;
                table[slot] = self.track_block_units(trk);
            }
            ans.extend_from_slice(&table);
        } else {
            let track_size = self.geometry.sectors() * self.geometry.sector_size() + DATA_ALIGNMENT;
            ans.extend_from_slice(&u16::to_le_bytes(track_size as u16));
            ans.extend_from_slice(&[0u8; 204]);
        }
        while ans.len() % DATA_ALIGNMENT != 0 {
            ans.push(0);
        }
        for trk in &self.tracks {
            let track_pos = ans.len();
            ans.extend_from_slice(TRACK_TAG);
            ans.extend_from_slice(&[0u8; 4]);
            ans.push(trk.track);
            ans.push(trk.side);
            match self.extended {
                true => ans.extend_from_slice(&[0x00, 0x00]),
                false => ans.extend_from_slice(&[0x01, 0x00]),
            }
            ans.push(trk.sector_size);
            ans.push(trk.sector_count);
            ans.push(trk.gap);
            ans.push(trk.filler);
            for info in &trk.infos {
                ans.push(info.track);
                ans.push(info.side);
                ans.push(info.id);
                ans.push(info.size);
                ans.push(info.sreg1);
                ans.push(info.sreg2);
                ans.extend_from_slice(&u16::to_le_bytes(info.data_length));
            }
            while ans.len() < track_pos + DATA_ALIGNMENT {
                ans.push(0);
            }
            for (info, sector) in trk.infos.iter().zip(trk.sectors.iter()) {
                match sector.is_empty() {
                    // a synthesized slot that was never written carries the filler pattern
                    true => ans.extend_from_slice(&vec![trk.filler; self.payload_length(info)]),
                    false => ans.extend_from_slice(sector.data()),
                }
            }
            while ans.len() % DATA_ALIGNMENT != 0 {
                ans.push(0);
            }
        }
        ans
    }
}
