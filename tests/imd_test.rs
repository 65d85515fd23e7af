// tests of the SYDEX ImageDisk codec
use hcfuse::img::{imd, DiskImage, Sector};

fn header(comment: &str) -> Vec<u8> {
    let mut ans: Vec<u8> = Vec::new();
    ans.extend_from_slice(b"IMD 1.18: 02/03/2021 10:20:30");
    ans.extend_from_slice(comment.as_bytes());
    ans.push(0x1a);
    ans
}

#[test]
fn detect_signature() {
    assert!(imd::detect(b"IMD 1.17: 01/01/2020 00:00:00\x1a"));
    let data = header("test");
    let img = hcfuse::create_img_from_bytes(&data);
    // a header with no tracks cannot make a geometry
    assert!(img.is_err());
}

#[test]
fn dispatcher_chooses_imd() {
    let mut data = header("dispatch test");
    // one track: mode 5, cyl 0, head 0, 9 sectors of 512, all compressed 0xe5
    data.extend_from_slice(&[5, 0, 0, 9, 2]);
    data.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
    for _s in 0..9 {
        data.extend_from_slice(&[2, 0xe5]);
    }
    let img = hcfuse::create_img_from_bytes(&data).expect("dispatch failed");
    assert_eq!(img.geometry().tracks(), 1);
    assert_eq!(img.geometry().sectors(), 9);
    assert_eq!(img.geometry().sector_size(), 512);
    assert_eq!(&img.to_bytes()[0..4], b"IMD ");
}

#[test]
fn sector_record_types_round_trip() {
    let mut data = header("record types");
    let raw: Vec<u8> = (0..256).map(|i| i as u8).collect();
    // cylinders deliberately out of order to exercise the sort
    for cyl in [1u8, 0u8] {
        data.extend_from_slice(&[5, cyl, 0, 4, 1]);
        data.extend_from_slice(&[1, 2, 3, 4]);
        data.push(0); // sector 1 absent
        data.push(1); // sector 2 raw
        data.extend_from_slice(&raw);
        data.extend_from_slice(&[2, 0x55]); // sector 3 compressed
        data.extend_from_slice(&[2, 0xe5]); // sector 4 compressed
    }
    let img = imd::Imd::from_bytes(&data).expect("parse failed");
    let geo = *img.geometry();
    assert_eq!(geo.tracks(), 2);
    assert_eq!(geo.heads(), 1);
    assert_eq!(geo.sectors(), 4);
    assert_eq!(geo.sector_size(), 256);
    for cyl in 0..2 {
        assert!(img.read(geo.linearize(cyl, 0, 0).unwrap()).unwrap().is_empty());
        assert_eq!(img.read(geo.linearize(cyl, 0, 1).unwrap()).unwrap().data(), raw);
        assert_eq!(img.read(geo.linearize(cyl, 0, 2).unwrap()).unwrap().data(), vec![0x55; 256]);
        assert_eq!(img.read(geo.linearize(cyl, 0, 3).unwrap()).unwrap().data(), vec![0xe5; 256]);
    }
    let again = imd::Imd::from_bytes(&img.to_bytes()).expect("reparse failed");
    assert_eq!(*again.geometry(), geo);
    for pos in 0..geo.total_sectors() {
        assert_eq!(img.read(pos).map(|s| s.data()), again.read(pos).map(|s| s.data()));
    }
}

#[test]
fn compression_is_idempotent() {
    let mut data = header("compression");
    data.extend_from_slice(&[5, 0, 0, 2, 1]);
    data.extend_from_slice(&[1, 2]);
    data.extend_from_slice(&[2, 0x11]);
    data.extend_from_slice(&[2, 0x22]);
    let img = imd::Imd::from_bytes(&data).expect("parse failed");
    let first = img.to_bytes();
    let again = imd::Imd::from_bytes(&first).expect("reparse failed");
    let geo = *again.geometry();
    assert_eq!(again.read(geo.linearize(0, 0, 0).unwrap()).unwrap().data(), vec![0x11; 256]);
    assert_eq!(again.read(geo.linearize(0, 0, 1).unwrap()).unwrap().data(), vec![0x22; 256]);
    // single valued sectors stay two bytes apiece in the track records
    let tracks_at = |bytes: &[u8]| bytes.iter().position(|b| *b == 0x1a).unwrap() + 1;
    let body = &first[tracks_at(&first)..];
    assert_eq!(body.len(), 5 + 2 + 2 + 2);
}

#[test]
fn cylinder_and_head_maps_are_carried() {
    let mut data = header("maps");
    data.extend_from_slice(&[5, 0, 0x80 | 0x40 | 1, 2, 1]);
    data.extend_from_slice(&[1, 2]); // numbering
    data.extend_from_slice(&[0, 0]); // cylinder map
    data.extend_from_slice(&[1, 1]); // head map
    data.extend_from_slice(&[2, 0xaa]);
    data.extend_from_slice(&[2, 0xbb]);
    let img = imd::Imd::from_bytes(&data).expect("parse failed");
    let geo = *img.geometry();
    // head flags carry the maps; the head number is the low bit
    assert_eq!(geo.heads(), 2);
    assert_eq!(img.read(geo.linearize(0, 1, 0).unwrap()).unwrap().data(), vec![0xaa; 256]);
    let again = imd::Imd::from_bytes(&img.to_bytes()).expect("reparse failed");
    assert_eq!(again.read(geo.linearize(0, 1, 1).unwrap()).unwrap().data(), vec![0xbb; 256]);
}

#[test]
fn heterogeneous_sector_counts_pick_most_common() {
    let mut data = header("mixed counts");
    for cyl in 0..3u8 {
        let nsect = match cyl {
            1 => 2u8,
            _ => 4u8,
        };
        data.extend_from_slice(&[5, cyl, 0, nsect, 1]);
        for id in 1..=nsect {
            data.push(id);
        }
        for _s in 0..nsect {
            data.extend_from_slice(&[2, 0xe5]);
        }
    }
    let img = imd::Imd::from_bytes(&data).expect("parse failed");
    assert_eq!(img.geometry().sectors(), 4);
}

#[test]
fn invalid_codes_are_fatal() {
    let mut data = header("bad mode");
    data.extend_from_slice(&[6, 0, 0, 1, 1, 1, 2, 0xe5]);
    assert!(imd::Imd::from_bytes(&data).is_err());
    let mut data = header("bad size");
    data.extend_from_slice(&[5, 0, 0, 1, 7, 1, 2, 0xe5]);
    assert!(imd::Imd::from_bytes(&data).is_err());
}

#[test]
fn write_synthesizes_track() {
    let mut data = header("synthesis");
    data.extend_from_slice(&[4, 0, 0, 3, 1]);
    data.extend_from_slice(&[1, 2, 3]);
    for _s in 0..3 {
        data.extend_from_slice(&[2, 0xe5]);
    }
    data.extend_from_slice(&[4, 2, 0, 3, 1]);
    data.extend_from_slice(&[1, 2, 3]);
    for _s in 0..3 {
        data.extend_from_slice(&[2, 0xe5]);
    }
    let mut img = imd::Imd::from_bytes(&data).expect("parse failed");
    let geo = *img.geometry();
    assert_eq!(geo.tracks(), 3);
    let pos = geo.linearize(1, 0, 1).unwrap();
    assert!(img.read(pos).is_none());
    img.write(pos, Sector::from_vec(vec![0x33; 256])).expect("write failed");
    assert!(img.modified());
    let serialized = img.to_bytes();
    let again = imd::Imd::from_bytes(&serialized).expect("reparse failed");
    assert_eq!(again.read(pos).unwrap().data(), vec![0x33; 256]);
    // the synthesized track comes last, inherits mode 4, and compresses
    // its one uniform sector; untouched slots are recorded as absent
    let tail = &serialized[serialized.len() - 12..];
    assert_eq!(tail, &[4, 1, 0, 3, 1, 1, 2, 3, 0, 2, 0x33, 0]);
}

#[test]
fn sector_length_contract() {
    let mut data = header("contract");
    data.extend_from_slice(&[5, 0, 0, 2, 1]);
    data.extend_from_slice(&[1, 2]);
    data.extend_from_slice(&[2, 0xe5, 2, 0xe5]);
    let mut img = imd::Imd::from_bytes(&data).expect("parse failed");
    assert!(img.write(0, Sector::from_vec(vec![0; 128])).is_err());
    assert!(img.write(2, Sector::from_vec(vec![0; 256])).is_err());
    assert!(!img.modified());
    assert!(img.write(1, Sector::from_vec(vec![9; 256])).is_ok());
    assert_eq!(img.read(1).unwrap().data(), vec![9; 256]);
}
