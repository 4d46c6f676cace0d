// test of cross-container conversion flows through the unified model
use fluxkit::fmt::{self,nib::{Nib,DOS33_FILE_LEN,NIB_FILE_LEN}};
use fluxkit::model::SectorStatus;
use fluxkit::registry::FormatPlugin;

/// ordered DOS 3.3 dump with every sector tagged by its address
fn dos33_dump() -> Vec<u8> {
    let mut dat = vec![0u8;DOS33_FILE_LEN];
    for t in 0..35 {
        for s in 0..16 {
            let off = (t*16 + s) * 256;
            dat[off] = t as u8;
            dat[off+1] = s as u8;
            dat[off+2..off+256].fill(0xda);
        }
    }
    dat
}

#[test]
fn dos33_through_nibbles_and_back() {
    let nib = Nib;
    let img = nib.from_dos33(&dos33_dump(),254).expect("encoding failed");
    let raw = nib.to_bytes(&img).expect("serialization failed");
    assert_eq!(raw.len(),NIB_FILE_LEN);
    // reopen the nibble stream and decode it back to the ordered dump
    let img2 = nib.open_bytes(&raw,false).expect("open failed");
    let back = nib.to_dos33(&img2).expect("decoding failed");
    assert_eq!(back,dos33_dump());
}

#[test]
fn nibble_sectors_decode_clean() {
    let nib = Nib;
    let img = nib.from_dos33(&dos33_dump(),254).expect("encoding failed");
    let trk = nib.read_track(&img,17,0).expect("read failed");
    assert_eq!(trk.sectors.len(),16);
    for sec in &trk.sectors {
        assert_eq!(sec.status,SectorStatus::Ok);
        assert_eq!(sec.data[0],17);
    }
}

#[test]
fn atr_edit_survives_serialization() {
    let payload = 720 * 128;
    let mut dat = vec![0u8;16 + payload];
    dat[0..2].copy_from_slice(&0x0296u16.to_le_bytes());
    dat[2..4].copy_from_slice(&((payload/16) as u16).to_le_bytes());
    dat[4..6].copy_from_slice(&128u16.to_le_bytes());

    let reg = fmt::builtin_registry();
    let plugin = reg.find_by_name("atr").unwrap();
    let mut img = plugin.open_bytes(&dat,false).expect("open failed");
    let mut trk = plugin.read_track(&img,5,0).expect("read failed");
    trk.sectors[2].data = vec![0x5a;128];
    plugin.write_track(&mut img,&trk).expect("write failed");

    let bytes = plugin.to_bytes(&img).expect("serialization failed");
    assert_eq!(bytes[0..16],dat[0..16]);
    let img2 = plugin.open_bytes(&bytes,false).expect("reopen failed");
    let back = plugin.read_track(&img2,5,0).expect("read failed");
    assert_eq!(back.sectors[2].data,vec![0x5a;128]);
}

#[test]
fn msa_reencode_is_semantically_stable() {
    // mixed compressible and incompressible tracks
    let mut dat = vec![0x0e,0x0f, 0x00,0x09, 0x00,0x00, 0x00,0x00, 0x00,0x01];
    dat.extend_from_slice(&[0x00,0x04, 0xe5,0x00,0x12,0x00]);
    let noise: Vec<u8> = (0..9*512).map(|i| (i % 251) as u8).collect();
    dat.extend_from_slice(&((noise.len()) as u16).to_be_bytes());
    dat.extend_from_slice(&noise);

    let reg = fmt::builtin_registry();
    let plugin = reg.find_by_name("msa").unwrap();
    let mut img = plugin.open_bytes(&dat,false).expect("open failed");
    let bytes = plugin.to_bytes(&img).expect("serialization failed");
    let mut img2 = plugin.open_bytes(&bytes,false).expect("reopen failed");
    for cyl in 0..2 {
        let a = plugin.read_track(&img,cyl,0).expect("read failed");
        let b = plugin.read_track(&img2,cyl,0).expect("read failed");
        img.attach_track(a).unwrap();
        img2.attach_track(b).unwrap();
    }
    assert!(img.same_decoded_content(&img2));
    let trk = plugin.read_track(&img2,1,0).expect("read failed");
    assert_eq!(trk.sectors[8].data[..],noise[8*512..]);
}

#[test]
fn d64_error_table_rides_along() {
    // 35 tracks plus the 683-byte error table
    let mut dat = vec![0u8;175531];
    let idx: usize = 174848 + 2; // error byte of track 1, sector 2
    dat[idx] = 5; // CRC error job code
    let reg = fmt::builtin_registry();
    let plugin = reg.find_by_name("d64").unwrap();
    let img = plugin.open_bytes(&dat,false).expect("open failed");
    let trk = plugin.read_track(&img,0,0).expect("read failed");
    assert_eq!(trk.sector(2).unwrap().status,SectorStatus::CrcError);
    assert_eq!(trk.sector(3).unwrap().status,SectorStatus::Ok);
    let bytes = plugin.to_bytes(&img).expect("serialization failed");
    assert_eq!(bytes,dat);
}
