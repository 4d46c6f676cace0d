//! ## Apple 6&2 nibbles
//!
//! Group code recording as written by the Disk II: each 8-bit nibble on the
//! track comes from the 64-entry 6-to-8 table, and each byte of user data is
//! scrambled across non-contiguous nibbles.  The folding below follows the
//! scheme DOS 3.3 and ProDOS share; the 13-sector 5&3 variant is out of
//! scope.
//!
//! Besides the nibble-level primitives this module knows the canonical
//! 16-sector track layout, so a whole NIB track can be synthesized from
//! sector images and scanned back.

use log::{debug,trace};
use crate::{Error,Result};
use crate::model::{Sector,SectorId,SectorStatus};

const INVALID_NIB: u8 = 0xff;
const CHUNK62: usize = 0x56;

/// nibbles in one encoded 256-byte sector, checksum included
pub const SECTOR_NIBS: usize = 343;
/// bytes in one canonical NIB track
pub const NIB_TRACK_LEN: usize = 6656;
pub const SECTORS_PER_TRACK: usize = 16;
pub const SECTOR_LEN: usize = 256;
/// volume byte DOS 3.3 writes when none is given
pub const DEFAULT_VOLUME: u8 = 254;

pub const ADDR_PROLOG: [u8;3] = [0xd5,0xaa,0x96];
pub const DATA_PROLOG: [u8;3] = [0xd5,0xaa,0xad];
pub const EPILOG: [u8;3] = [0xde,0xaa,0xeb];

// canonical gap runs of 0xFF; 320 + 16*(14 + 6 + 349 + 27) = 6656
const GAP1: usize = 320;
const GAP2: usize = 6;
const GAP3: usize = 27;

const FWD_62: [u8;64] = [
    0x96, 0x97, 0x9a, 0x9b, 0x9d, 0x9e, 0x9f, 0xa6,
    0xa7, 0xab, 0xac, 0xad, 0xae, 0xaf, 0xb2, 0xb3,
    0xb4, 0xb5, 0xb6, 0xb7, 0xb9, 0xba, 0xbb, 0xbc,
    0xbd, 0xbe, 0xbf, 0xcb, 0xcd, 0xce, 0xcf, 0xd3,
    0xd6, 0xd7, 0xd9, 0xda, 0xdb, 0xdc, 0xdd, 0xde,
    0xdf, 0xe5, 0xe6, 0xe7, 0xe9, 0xea, 0xeb, 0xec,
    0xed, 0xee, 0xef, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6,
    0xf7, 0xf9, 0xfa, 0xfb, 0xfc, 0xfd, 0xfe, 0xff
];

const REV_62: [u8;256] = [
    0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,
    0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,
    0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,
    0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,
    0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,
    0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,
    0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,
    0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,
    0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,
    0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0x00,0x01,0xFF,0xFF,0x02,0x03,0xFF,0x04,0x05,0x06,
    0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0x07,0x08,0xFF,0xFF,0xFF,0x09,0x0A,0x0B,0x0C,0x0D,
    0xFF,0xFF,0x0E,0x0F,0x10,0x11,0x12,0x13,0xFF,0x14,0x15,0x16,0x17,0x18,0x19,0x1A,
    0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0x1B,0xFF,0x1C,0x1D,0x1E,
    0xFF,0xFF,0xFF,0x1F,0xFF,0xFF,0x20,0x21,0xFF,0x22,0x23,0x24,0x25,0x26,0x27,0x28,
    0xFF,0xFF,0xFF,0xFF,0xFF,0x29,0x2A,0x2B,0xFF,0x2C,0x2D,0x2E,0x2F,0x30,0x31,0x32,
    0xFF,0xFF,0x33,0x34,0x35,0x36,0x37,0x38,0xFF,0x39,0x3A,0x3B,0x3C,0x3D,0x3E,0x3F
];

/// encode a normal byte as two 4&4 nibbles
pub fn encode_44(val: u8) -> [u8;2] {
    [(val >> 1) | 0xaa, val | 0xaa]
}

/// decode two 4&4 nibbles as a normal byte, invalid nibble yields `Crc`
pub fn decode_44(nibs: [u8;2]) -> Result<u8> {
    if nibs[0] & 0xaa != 0xaa || nibs[1] & 0xaa != 0xaa {
        Err(Error::Crc)
    } else {
        Ok(((nibs[0] << 1) | 0x01) & nibs[1])
    }
}

/// encode a 6-bit value as a 6&2 nibble
pub fn encode_62(val: u8) -> u8 {
    FWD_62[(val & 0x3f) as usize]
}

/// decode a 6&2 nibble as a 6-bit value, invalid nibble yields `Crc`
pub fn decode_62(nib: u8) -> Result<u8> {
    let ans = REV_62[nib as usize];
    if ans == INVALID_NIB {
        Err(Error::Crc)
    } else {
        Ok(ans)
    }
}

/// Encode 256 bytes as 343 nibbles.  The 86 two-bit nibbles lead, the 256
/// six-bit nibbles follow, the running-XOR checksum closes the field.
pub fn encode_sector_62_256(dat: &[u8]) -> Result<Vec<u8>> {
    if dat.len() != SECTOR_LEN {
        return Err(Error::InvalidArg(format!("sector length {}",dat.len())));
    }
    let mut nibs: [u8;SECTOR_NIBS] = [0;SECTOR_NIBS];
    let mut top: [u8;256] = [0;256];
    let mut twos: [u8;CHUNK62] = [0;CHUNK62];
    let mut two_shift = 0;
    let mut two_pos_n = CHUNK62-1;
    for i in 0..256 {
        let val = dat[i];
        top[i] = val >> 2;
        twos[two_pos_n] |= ((val & 1) << 1 | (val & 2) >> 1) << two_shift;
        if two_pos_n==0 {
            two_pos_n = CHUNK62;
            two_shift += 2;
        }
        two_pos_n -= 1;
    }
    let mut chksum = 0;
    let mut idx = 0;
    for i in (0..CHUNK62).rev() {
        nibs[idx] = encode_62(twos[i] ^ chksum);
        chksum = twos[i];
        idx += 1;
    }
    for i in 0..256 {
        nibs[idx] = encode_62(top[i] ^ chksum);
        chksum = top[i];
        idx += 1;
    }
    nibs[idx] = encode_62(chksum);
    Ok(nibs.to_vec())
}

/// Decode 343 nibbles as 256 bytes.  The payload always comes back; the
/// flag is false when the running XOR disagrees with the checksum nibble or
/// any nibble fell outside the table.
pub fn decode_sector_62_256(nibs: &[u8]) -> Result<(Vec<u8>,bool)> {
    if nibs.len() != SECTOR_NIBS {
        return Err(Error::InvalidArg(format!("nibble count {}",nibs.len())));
    }
    let mut good = true;
    let mut read = |nib: u8| -> u8 {
        match decode_62(nib) {
            Ok(val) => val,
            Err(_) => { good = false; 0 }
        }
    };
    let mut ans: Vec<u8> = Vec::new();
    let mut twos: [u8;CHUNK62*3] = [0;CHUNK62*3];
    let mut chksum = 0;
    let mut idx = 0;
    for i in 0..CHUNK62 {
        chksum ^= read(nibs[idx]);
        twos[i] = ((chksum & 0x01) << 1) | ((chksum & 0x02) >> 1);
        twos[i + CHUNK62] = ((chksum & 0x04) >> 1) | ((chksum & 0x08) >> 3);
        twos[i + CHUNK62*2] = ((chksum & 0x10) >> 3) | ((chksum & 0x20) >> 5);
        idx += 1;
    }
    for i in 0..256 {
        chksum ^= read(nibs[idx]);
        ans.push((chksum << 2) | twos[i]);
        idx += 1;
    }
    chksum ^= read(nibs[idx]);
    if chksum != 0 {
        good = false;
    }
    Ok((ans,good))
}

fn push_addr_field(buf: &mut Vec<u8>,vol: u8,trk: u8,sec: u8) {
    buf.extend_from_slice(&ADDR_PROLOG);
    buf.extend_from_slice(&encode_44(vol));
    buf.extend_from_slice(&encode_44(trk));
    buf.extend_from_slice(&encode_44(sec));
    buf.extend_from_slice(&encode_44(vol ^ trk ^ sec));
    buf.extend_from_slice(&EPILOG);
}

/// Synthesize one canonical 6656-byte NIB track.  `sectors` are the 16
/// physical sectors in address order, 256 bytes each.
pub fn build_track(sectors: &[Vec<u8>],vol: u8,trk: u8) -> Result<Vec<u8>> {
    if sectors.len() != SECTORS_PER_TRACK {
        return Err(Error::InvalidArg(format!("{} sectors on track",sectors.len())));
    }
    let mut buf: Vec<u8> = Vec::with_capacity(NIB_TRACK_LEN);
    buf.resize(GAP1,0xff);
    for (psec,dat) in sectors.iter().enumerate() {
        push_addr_field(&mut buf,vol,trk,psec as u8);
        buf.resize(buf.len()+GAP2,0xff);
        buf.extend_from_slice(&DATA_PROLOG);
        buf.extend_from_slice(&encode_sector_62_256(dat)?);
        buf.extend_from_slice(&EPILOG);
        buf.resize(buf.len()+GAP3,0xff);
    }
    debug_assert_eq!(buf.len(),NIB_TRACK_LEN);
    Ok(buf)
}

fn matches_at(buf: &[u8],pos: usize,pat: &[u8]) -> bool {
    pat.iter().enumerate().all(|(i,b)| buf[(pos+i) % buf.len()] == *b)
}

fn wrapped(buf: &[u8],pos: usize,len: usize) -> Vec<u8> {
    (0..len).map(|i| buf[(pos+i) % buf.len()]).collect()
}

/// Scan a byte-aligned nibble track for address and data fields.  Returns
/// the decoded sectors in physical order plus the volume byte of the first
/// good address field.  Sectors whose data field never shows up within the
/// allowed gap are reported `NotFound`.
pub fn scan_track(buf: &[u8]) -> (Vec<Sector>,Option<u8>) {
    let mut sectors: Vec<Sector> = Vec::new();
    let mut volume: Option<u8> = None;
    if buf.len() < SECTOR_NIBS + 20 {
        return (sectors,volume);
    }
    let mut pos = 0;
    let mut budget = buf.len();
    while budget > 0 {
        if !matches_at(buf,pos,&ADDR_PROLOG) {
            pos = (pos+1) % buf.len();
            budget -= 1;
            continue;
        }
        let field = wrapped(buf,pos+3,8);
        pos = (pos+11) % buf.len();
        budget = budget.saturating_sub(11);
        let (vol,trk,sec,chk) = match (
            decode_44([field[0],field[1]]),
            decode_44([field[2],field[3]]),
            decode_44([field[4],field[5]]),
            decode_44([field[6],field[7]])
        ) {
            (Ok(v),Ok(t),Ok(s),Ok(c)) => (v,t,s,c),
            _ => {
                trace!("unreadable address field {}, skipping",hex::encode(&field));
                continue;
            }
        };
        if vol ^ trk ^ sec != chk {
            debug!("address checksum failed for T{} S{}",trk,sec);
            continue;
        }
        if volume.is_none() {
            volume = Some(vol);
        }
        let id = SectorId::new(trk,0,sec,1);
        // data prolog must fall within the gap after the address epilog
        let mut found = None;
        for gap in 0..40 {
            if matches_at(buf,pos+gap,&DATA_PROLOG) {
                found = Some((pos+gap+3) % buf.len());
                break;
            }
        }
        match found {
            Some(dpos) => {
                let nibs = wrapped(buf,dpos,SECTOR_NIBS);
                pos = (dpos + SECTOR_NIBS + 3) % buf.len();
                budget = budget.saturating_sub(SECTOR_NIBS + 3);
                match decode_sector_62_256(&nibs) {
                    Ok((dat,true)) => sectors.push(Sector::with_data(id,dat,SectorStatus::Ok)),
                    Ok((dat,false)) => {
                        debug!("data checksum failed for T{} S{}",trk,sec);
                        sectors.push(Sector::with_data(id,dat,SectorStatus::CrcError));
                    },
                    Err(_) => sectors.push(Sector::with_data(id,Vec::new(),SectorStatus::NotFound))
                }
            },
            None => {
                debug!("no data field for T{} S{}",trk,sec);
                sectors.push(Sector::with_data(id,Vec::new(),SectorStatus::NotFound));
            }
        }
    }
    (sectors,volume)
}
