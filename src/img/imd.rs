//! ## Support for IMD disk images
//!
//! SYDEX ImageDisk files carry an ASCII header line and a free-form comment
//! terminated by 0x1A, followed by track records until end of file.  Each
//! track record declares its recording mode, cylinder, head flags, sector
//! count, sector size code, and a sector numbering map, optionally followed
//! by per-sector cylinder and head maps.  Sector data is stored with a
//! trivial compression scheme: a type byte of 0 means no data was recorded,
//! odd means a full payload follows, even means a single byte follows which
//! repeats for the whole sector.

use std::collections::HashMap;
use chrono;
use num_traits::FromPrimitive;
use num_derive::FromPrimitive;
use log::{warn, info, debug, trace, error};
use regex::Regex;
use crate::img;
use crate::img::{Geometry, Sector, take, take_u8};

pub const SECTOR_SIZE_BASE: usize = 128;
pub const CYL_MAP_FLAG: u8 = 0x80;
pub const HEAD_MAP_FLAG: u8 = 0x40;
pub const HEAD_MASK: u8 = 0x01;
const HEADER_LEN: usize = 29;
const COMMENT_TERMINATOR: u8 = 0x1a;

/// Transfer rate and recording mode carried by each track record.
#[derive(FromPrimitive, Clone, Copy)]
pub enum Mode {
    Fm500Kbps = 0,
    Fm300Kbps = 1,
    Fm250Kbps = 2,
    Mfm500Kbps = 3,
    Mfm300Kbps = 4,
    Mfm250Kbps = 5,
}

#[derive(FromPrimitive)]
pub enum SectorData {
    None = 0,
    Normal = 1,
    NormalCompressed = 2,
}

pub fn file_extensions() -> Vec<String> {
    vec!["imd".to_string()]
}

/// Test the leading bytes for the IMD signature.
pub fn detect(data: &[u8]) -> bool {
    if data.len() < 10 {
        return false;
    }
    let re = Regex::new(r"^IMD [0-9]\.[0-9]{2}: ").expect("bad signature pattern");
    match std::str::from_utf8(&data[0..10]) {
        Ok(lead) => re.is_match(lead),
        Err(_) => false,
    }
}

pub fn is_slice_uniform(slice: &[u8]) -> bool {
    if slice.len() < 1 {
        return true;
    }
    let test = slice[0];
    slice.iter().all(|b| *b == test)
}

struct Track {
    mode: u8,
    cylinder: u8,
    head: u8,
    sector_shift: u8,
    /// order is storage order, value is the physical sector id
    numbering_map: Vec<u8>,
    cylinder_map: Vec<u8>,
    head_map: Vec<u8>,
    sectors: Vec<Sector>,
}

/// A parsed IMD container.  While in memory the sector data is always
/// expanded; compression happens again when the structure is flattened.
pub struct Imd {
    geometry: Geometry,
    tracks: Vec<Track>,
    map: HashMap<usize, (usize, usize)>,
    modified: bool,
}

fn parse_track(data: &[u8], ptr: &mut usize) -> Result<Track, img::Error> {
    let mode = take_u8(data, ptr)?;
    if Mode::from_u8(mode).is_none() {
        error!("invalid mode byte: {}", mode);
        return Err(img::Error::BadHeader);
    }
    let cylinder = take_u8(data, ptr)?;
    let head = take_u8(data, ptr)?;
    let nsectors = take_u8(data, ptr)? as usize;
    let ssize = take_u8(data, ptr)?;
    if ssize > 6 {
        error!("invalid sector size code: {}", ssize);
        return Err(img::Error::InvalidSectorSize);
    }
    let sector_size = SECTOR_SIZE_BASE << ssize;
    debug!("cylinder {}, head {}: {} sectors x {} bytes", cylinder, head & HEAD_MASK, nsectors, sector_size);
    let numbering_map = take(data, ptr, nsectors)?.to_vec();
    trace!("numbering map {:?}", numbering_map);
    let cylinder_map = match head & CYL_MAP_FLAG {
        0 => Vec::new(),
        _ => {
            let m = take(data, ptr, nsectors)?.to_vec();
            debug!("found cylinder map {:?}", m);
            m
        }
    };
    let head_map = match head & HEAD_MAP_FLAG {
        0 => Vec::new(),
        _ => {
            let m = take(data, ptr, nsectors)?.to_vec();
            debug!("found head map {:?}", m);
            m
        }
    };
    let mut sectors: Vec<Sector> = Vec::with_capacity(nsectors);
    for _i in 0..nsectors {
        let code = take_u8(data, ptr)?;
        if code > 8 {
            error!("invalid sector data code: {}", code);
            return Err(img::Error::BadHeader);
        }
        sectors.push(match code {
            0 => Sector::new(),
            c if c % 2 == 1 => Sector::from_vec(take(data, ptr, sector_size)?.to_vec()),
            _ => Sector::from_vec(vec![take_u8(data, ptr)?; sector_size]),
        });
    }
    Ok(Track { mode, cylinder, head, sector_shift: ssize, numbering_map, cylinder_map, head_map, sectors })
}

impl Track {
    fn size_code(size: usize) -> u8 {
        (size / SECTOR_SIZE_BASE).trailing_zeros() as u8
    }
}

impl Imd {
    pub fn from_bytes(data: &[u8]) -> Result<Self, img::Error> {
        if !detect(data) {
            error!("IMD file header mismatch");
            return Err(img::Error::BadHeader);
        }
        let mut ptr = HEADER_LEN;
        // the human-readable comment runs to the 0x1A terminator
        loop {
            if ptr >= data.len() {
                error!("comment terminator not found");
                return Err(img::Error::TruncatedImage);
            }
            if data[ptr] == COMMENT_TERMINATOR {
                ptr += 1;
                break;
            }
            ptr += 1;
        }
        let mut tracks: Vec<Track> = Vec::new();
        while ptr < data.len() {
            tracks.push(parse_track(data, &mut ptr)?);
        }
        tracks.sort_by_key(|t| t.cylinder);
        let mut cylinders = 0;
        let mut heads = 0;
        let mut sectors = 0;
        let mut sector_size = 0;
        for trk in &tracks {
            cylinders = cylinders.max(trk.cylinder as usize);
            heads = heads.max((trk.head & HEAD_MASK) as usize);
            let nsect = trk.numbering_map.len();
            if sectors > 0 && sectors != nsect {
                warn!("multiple sector counts per track are not supported ({}, {})", sectors, nsect);
                let n0 = tracks.iter().filter(|t| t.numbering_map.len() == sectors).count();
                let n1 = tracks.iter().filter(|t| t.numbering_map.len() == nsect).count();
                if n0 < n1 {
                    sectors = nsect;
                }
                warn!("choosing the most common count: {}", sectors);
            } else {
                sectors = sectors.max(nsect);
            }
            sector_size = sector_size.max(SECTOR_SIZE_BASE << trk.sector_shift);
        }
        let geometry = Geometry::new(cylinders + 1, heads + 1, sectors, sector_size)?;
        let mut map: HashMap<usize, (usize, usize)> = HashMap::new();
        for (tidx, trk) in tracks.iter().enumerate() {
            for (sidx, id) in trk.numbering_map.iter().enumerate() {
                if *id == 0 {
                    debug!("sector id 0 on cylinder {} ignored", trk.cylinder);
                    continue;
                }
                match geometry.linearize(trk.cylinder as usize, (trk.head & HEAD_MASK) as usize, *id as usize - 1) {
                    Ok(pos) => {
                        map.insert(pos, (tidx, sidx));
                    }
                    Err(_) => debug!("sector id {} on cylinder {} out of range", id, trk.cylinder),
                }
            }
        }
        info!("IMD geometry: {} cylinders, {} heads, {} sectors x {} bytes", cylinders + 1, heads + 1, sectors, sector_size);
        Ok(Self { geometry, tracks, map, modified: false })
    }
}

impl img::DiskImage for Imd {
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
            self.tracks[tidx].sectors[sidx] = sector;
        } else {
            let (cylinder, head, sec) = self.geometry.delinearize(pos)?;
            debug!("synthesizing cylinder {} head {}", cylinder, head);
            let count = self.geometry.sectors();
            let mode = match self.tracks.first() {
                Some(first) => first.mode,
                None => Mode::Mfm250Kbps as u8,
            };
            let numbering_map: Vec<u8> = match self.tracks.first() {
                Some(first) if first.numbering_map.len() == count => first.numbering_map.clone(),
                _ => (1..=count as u8).collect(),
            };
            // place the payload in the storage slot whose id maps to this position
            let slot = match numbering_map.iter().position(|id| *id as usize == sec + 1) {
                Some(s) => s,
                None => {
                    error!("sector {} not present in numbering map", sec + 1);
                    return Err(img::Error::InvalidAddress);
                }
            };
            let mut sectors = vec![Sector::new(); count];
            sectors[slot] = sector;
            let tidx = self.tracks.len();
            for (sidx, id) in numbering_map.iter().enumerate() {
                let p = self.geometry.linearize(cylinder, head, *id as usize - 1)?;
                self.map.insert(p, (tidx, sidx));
            }
            self.tracks.push(Track {
                mode,
                cylinder: cylinder as u8,
                head: head as u8,
                sector_shift: Track::size_code(self.geometry.sector_size()),
                numbering_map,
                cylinder_map: Vec::new(),
                head_map: Vec::new(),
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
        let now = chrono::Local::now().naive_local();
        let header = format!("IMD 1.17: {}", now.format("%d/%m/%Y %H:%M:%S"));
        let comment = concat!("\r\nhcfuse ", env!("CARGO_PKG_VERSION"));
        let mut ans: Vec<u8> = Vec::new();
        ans.extend_from_slice(header.as_bytes());
        ans.extend_from_slice(comment.as_bytes());
        ans.push(COMMENT_TERMINATOR);
        for trk in &self.tracks {
            ans.push(trk.mode);
            ans.push(trk.cylinder);
            ans.push(trk.head);
            ans.push(trk.numbering_map.len() as u8);
            ans.push(trk.sector_shift);
            ans.extend_from_slice(&trk.numbering_map);
            if trk.head & CYL_MAP_FLAG != 0 {
                ans.extend_from_slice(&trk.cylinder_map);
            }
            if trk.head & HEAD_MAP_FLAG != 0 {
                ans.extend_from_slice(&trk.head_map);
            }
            for sector in &trk.sectors {
                if sector.is_empty() {
                    ans.push(SectorData::None as u8);
                } else if is_slice_uniform(sector.data()) {
                    ans.push(SectorData::NormalCompressed as u8);
                    ans.push(sector.data()[0]);
                } else {
                    ans.push(SectorData::Normal as u8);
                    ans.extend_from_slice(sector.data());
                }
            }
        }
        ans
    }
}
