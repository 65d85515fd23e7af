// tests of the CPCEMU DSK codec, standard and extended variants
use hcfuse::img::{dsk, DiskImage, Sector};

const CREATOR: [u8; 14] = *b"emulator 9.9.9";

fn sector_payload(track: u8, side: u8, id: u8, size: usize) -> Vec<u8> {
    (0..size).map(|i| (track as usize * 7 + side as usize * 31 + id as usize * 3 + i) as u8).collect()
}

/// Single sided standard image.  Sector info records (and payloads) are
/// laid down in reverse id order, so positional order is meaningless and
/// only the info records can place the payloads.
fn standard_dsk(tracks: u8, sectors: u8, size_code: u8) -> Vec<u8> {
    let sector_size = size_code as usize * 256;
    let mut ans: Vec<u8> = Vec::new();
    ans.extend_from_slice(b"MV - CPCEMU Disk-File\r\nDisk-Info\r\n");
    ans.extend_from_slice(&CREATOR);
    ans.push(tracks);
    ans.push(1);
    let track_size = sectors as usize * sector_size + 256;
    ans.extend_from_slice(&u16::to_le_bytes(track_size as u16));
    ans.extend_from_slice(&[0u8; 204]);
    for t in 0..tracks {
        let track_pos = ans.len();
        ans.extend_from_slice(b"Track-Info\r\n");
        ans.extend_from_slice(&[0u8; 4]);
        ans.push(t);
        ans.push(0);
        ans.extend_from_slice(&[0x01, 0x00]);
        ans.push(size_code);
        ans.push(sectors);
        ans.push(0x4e);
        ans.push(0xe5);
        for s in (0..sectors).rev() {
            ans.extend_from_slice(&[t, 0, s + 1, size_code, 0, 0, 0, 0]);
        }
        while ans.len() < track_pos + 256 {
            ans.push(0);
        }
        for s in (0..sectors).rev() {
            ans.extend_from_slice(&sector_payload(t, 0, s + 1, sector_size));
        }
    }
    ans
}

fn extended_dsk(tracks: u8, sides: u8, sectors: u8, size_code: u8, missing: &[(u8, u8)]) -> Vec<u8> {
    let sector_size = size_code as usize * 256;
    let mut ans: Vec<u8> = Vec::new();
    ans.extend_from_slice(b"EXTENDED CPC DSK File\r\nDisk-Info\r\n");
    ans.extend_from_slice(&CREATOR);
    ans.push(tracks);
    ans.push(sides);
    ans.extend_from_slice(&u16::to_le_bytes(0));
    let mut payload_bytes = sectors as usize * sector_size;
    if payload_bytes % 256 != 0 {
        payload_bytes += 256 - payload_bytes % 256;
    }
    let units = ((256 + payload_bytes) / 256) as u8;
    for t in 0..tracks {
        for s in 0..sides {
            ans.push(match missing.contains(&(t, s)) {
                true => 0,
                false => units,
            });
        }
    }
    while ans.len() % 256 != 0 {
        ans.push(0);
    }
    for t in 0..tracks {
        for s in 0..sides {
            if missing.contains(&(t, s)) {
                continue;
            }
            let track_pos = ans.len();
            ans.extend_from_slice(b"Track-Info\r\n");
            ans.extend_from_slice(&[0u8; 4]);
            ans.push(t);
            ans.push(s);
            ans.extend_from_slice(&[0x00, 0x00]);
            ans.push(size_code);
            ans.push(sectors);
            ans.push(0x4e);
            ans.push(0xe5);
            for id in 1..=sectors {
                ans.extend_from_slice(&[t, s, id, size_code, 0, 0]);
                ans.extend_from_slice(&u16::to_le_bytes(sector_size as u16));
            }
            while ans.len() < track_pos + 256 {
                ans.push(0);
            }
            for id in 1..=sectors {
                ans.extend_from_slice(&sector_payload(t, s, id, sector_size));
            }
            while ans.len() % 256 != 0 {
                ans.push(0);
            }
        }
    }
    ans
}

#[test]
fn detect_standard() {
    let data = standard_dsk(3, 9, 2);
    assert!(dsk::detect(&data));
    let img = hcfuse::create_img_from_bytes(&data).expect("dispatch failed");
    assert_eq!(img.geometry().tracks(), 3);
    assert_eq!(img.geometry().heads(), 1);
    assert_eq!(img.geometry().sectors(), 9);
    assert_eq!(img.geometry().sector_size(), 512);
    assert_eq!(&img.to_bytes()[0..34], b"MV - CPCEMU Disk-File\r\nDisk-Info\r\n");
}

#[test]
fn reject_foreign_header() {
    let data = vec![0u8; 1024];
    assert!(!dsk::detect(&data));
    assert!(dsk::Dsk::from_bytes(&data).is_err());
}

#[test]
fn reject_truncated_image() {
    let mut data = standard_dsk(3, 9, 2);
    data.truncate(data.len() - 100);
    assert!(dsk::Dsk::from_bytes(&data).is_err());
}

#[test]
fn reject_missing_track_tag() {
    let mut data = standard_dsk(2, 9, 2);
    data[256] = b'X';
    assert!(dsk::Dsk::from_bytes(&data).is_err());
}

#[test]
fn standard_round_trip() {
    let data = standard_dsk(4, 9, 2);
    let img = dsk::Dsk::from_bytes(&data).expect("parse failed");
    assert!(!img.modified());
    let geo = *img.geometry();
    for t in 0..4u8 {
        for id in 1..=9u8 {
            let pos = geo.linearize(t as usize, 0, id as usize - 1).unwrap();
            assert_eq!(img.read(pos).expect("sector missing").data(), sector_payload(t, 0, id, 512));
        }
    }
    let again = dsk::Dsk::from_bytes(&img.to_bytes()).expect("reparse failed");
    assert_eq!(*again.geometry(), geo);
    for pos in 0..geo.total_sectors() {
        assert_eq!(img.read(pos).map(|s| s.data()), again.read(pos).map(|s| s.data()));
    }
}

#[test]
fn extended_round_trip_with_missing_track() {
    let data = extended_dsk(5, 2, 16, 1, &[(3, 1)]);
    let img = dsk::Dsk::from_bytes(&data).expect("parse failed");
    let geo = *img.geometry();
    assert_eq!(geo.tracks(), 5);
    assert_eq!(geo.heads(), 2);
    assert_eq!(geo.sector_size(), 256);
    for t in 0..5u8 {
        for s in 0..2u8 {
            for id in 1..=16u8 {
                let pos = geo.linearize(t as usize, s as usize, id as usize - 1).unwrap();
                match (t, s) == (3, 1) {
                    true => assert!(img.read(pos).is_none()),
                    false => assert_eq!(img.read(pos).expect("sector missing").data(), sector_payload(t, s, id, 256)),
                }
            }
        }
    }
    let again = dsk::Dsk::from_bytes(&img.to_bytes()).expect("reparse failed");
    assert_eq!(*again.geometry(), geo);
    for pos in 0..geo.total_sectors() {
        assert_eq!(img.read(pos).map(|s| s.data()), again.read(pos).map(|s| s.data()));
    }
}

#[test]
fn sector_length_contract() {
    let data = standard_dsk(2, 9, 2);
    let mut img = dsk::Dsk::from_bytes(&data).expect("parse failed");
    let max = img.geometry().max_pos();
    assert!(img.write(max + 1, Sector::from_vec(vec![0; 512])).is_err());
    assert!(img.write(0, Sector::from_vec(vec![0; 511])).is_err());
    assert!(img.write(0, Sector::from_vec(vec![0; 513])).is_err());
    assert!(!img.modified());
    assert!(img.write(0, Sector::new()).is_ok());
    assert!(img.write(max, Sector::from_vec(vec![0x5a; 512])).is_ok());
    assert!(img.modified());
    assert_eq!(img.read(max).unwrap().data(), vec![0x5a; 512]);
}

#[test]
fn write_synthesizes_missing_track() {
    let data = extended_dsk(5, 2, 16, 1, &[(3, 1)]);
    let mut img = dsk::Dsk::from_bytes(&data).expect("parse failed");
    let geo = *img.geometry();
    let pos = geo.linearize(3, 1, 4).unwrap();
    assert!(img.read(pos).is_none());
    img.write(pos, Sector::from_vec(vec![0x77; 256])).expect("write failed");
    assert_eq!(img.read(pos).unwrap().data(), vec![0x77; 256]);
    assert!(img.modified());
    // the synthesized track survives serialization, untouched slots carry the filler
    let again = dsk::Dsk::from_bytes(&img.to_bytes()).expect("reparse failed");
    assert_eq!(again.read(pos).expect("sector missing").data(), vec![0x77; 256]);
    let neighbor = geo.linearize(3, 1, 5).unwrap();
    assert_eq!(again.read(neighbor).expect("sector missing").data(), vec![0xe5; 256]);
}

#[test]
fn overwrite_in_place() {
    let data = standard_dsk(2, 9, 2);
    let mut img = dsk::Dsk::from_bytes(&data).expect("parse failed");
    let geo = *img.geometry();
    let pos = geo.linearize(1, 0, 3).unwrap();
    let fresh: Vec<u8> = (0..512).map(|i| i as u8).collect();
    img.write(pos, Sector::from_vec(fresh.clone())).expect("write failed");
    let again = dsk::Dsk::from_bytes(&img.to_bytes()).expect("reparse failed");
    assert_eq!(again.read(pos).unwrap().data(), fresh);
    // neighbors are untouched
    let other = geo.linearize(1, 0, 4).unwrap();
    assert_eq!(again.read(other).unwrap().data(), sector_payload(1, 0, 5, 512));
}
