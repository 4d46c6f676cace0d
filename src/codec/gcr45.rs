//! ## Commodore 4-and-5 GCR
//!
//! The 1541 family records each 4-bit quartet as a 5-bit code with no more
//! than two consecutive zeros and no leading pair of zeros.  Codes are not
//! byte aligned on the track; everything here goes through the bit cursor
//! and realigns on the sync pattern, ten or more consecutive one bits
//! followed by the first zero.
//!
//! Block layout on a stock 1541: header `08 chk sec trk id2 id1 0F 0F`
//! where `chk = sec ^ trk ^ id2 ^ id1`, then data `07 <256 bytes> chk 00 00`
//! with `chk` the XOR of the payload.

use log::{debug,trace};
use crate::{Error,Result};
use crate::bits::{BitReader,BitWriter};
use crate::model::{Sector,SectorId,SectorStatus};

const INVALID_NIB: u8 = 0xff;

const HEADER_BLOCK: u8 = 0x08;
const DATA_BLOCK: u8 = 0x07;
/// minimum run of one bits that counts as sync
pub const SYNC_RUN: usize = 10;

const FWD_G64: [u8;16] = [
    0b01010, 0b01011, 0b10010, 0b10011,
    0b01110, 0b01111, 0b10110, 0b10111,
    0b01001, 0b11001, 0b11010, 0b11011,
    0b01101, 0b11101, 0b11110, 0b10101
];

const REV_G64: [u8;32] = [
    0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,0xFF,
    0xFF,0x08,0x00,0x01,0xFF,0x0C,0x04,0x05,
    0xFF,0xFF,0x02,0x03,0xFF,0x0F,0x06,0x07,
    0xFF,0x09,0x0A,0x0B,0xFF,0x0D,0x0E,0xFF
];

/// encode a 4-bit quartet as its 5-bit code
pub fn encode_quartet(val: u8) -> u8 {
    FWD_G64[(val & 0x0f) as usize]
}

/// decode a 5-bit code as a 4-bit quartet, invalid code yields `Crc`
pub fn decode_quartet(code: u8) -> Result<u8> {
    let ans = REV_G64[(code & 0x1f) as usize];
    if ans == INVALID_NIB {
        Err(Error::Crc)
    } else {
        Ok(ans)
    }
}

/// append one byte as two 5-bit codes
pub fn write_byte(w: &mut BitWriter,val: u8) {
    w.put(encode_quartet(val >> 4) as usize,5);
    w.put(encode_quartet(val & 0x0f) as usize,5);
}

/// read one byte as two 5-bit codes at the current bit position
pub fn read_byte(r: &mut BitReader) -> Result<u8> {
    let hi = decode_quartet(r.get(5) as u8)?;
    let lo = decode_quartet(r.get(5) as u8)?;
    Ok((hi << 4) | lo)
}

/// Advance to the first zero bit after a run of `SYNC_RUN` or more ones.
/// The reader ends up positioned on that zero bit.  `None` if no sync shows
/// up within `limit` bits.
pub fn find_sync(r: &mut BitReader,limit: usize) -> Option<usize> {
    let mut run = 0;
    for _i in 0..limit {
        match r.next() {
            1 => run += 1,
            _ => {
                if run >= SYNC_RUN {
                    let pos = match r.pos() {
                        0 => r.bit_count()-1,
                        p => p-1
                    };
                    r.set_pos(pos);
                    return Some(pos);
                }
                run = 0;
            }
        }
    }
    None
}

fn read_block(r: &mut BitReader,len: usize) -> Result<Vec<u8>> {
    let mut ans = Vec::with_capacity(len);
    for _i in 0..len {
        ans.push(read_byte(r)?);
    }
    Ok(ans)
}

/// Decode every sector on a 4-and-5 track.  Orphan data blocks (no header
/// in front) are skipped; headers with no data block decode as `NotFound`.
/// The scan covers one revolution of the circular bitstream.
pub fn decode_track(buf: &[u8],bit_count: usize) -> Vec<Sector> {
    let mut sectors: Vec<Sector> = Vec::new();
    let mut r = BitReader::new(buf,bit_count);
    if r.bit_count() < SYNC_RUN + 80 {
        return sectors;
    }
    let bc = r.bit_count();
    let mut budget = bc as i64;
    let mut last = r.pos();
    let mut first = true;
    while budget > 0 {
        // charge the budget for whatever the previous pass consumed
        if !first {
            let consumed = (bc + r.pos() - last) % bc;
            budget -= i64::max(consumed as i64,1);
            if budget <= 0 {
                break;
            }
            last = r.pos();
        }
        first = false;
        let start = match find_sync(&mut r,budget as usize) {
            Some(pos) => pos,
            None => break
        };
        let header = match read_block(&mut r,8) {
            Ok(blk) => blk,
            Err(_) => {
                trace!("unreadable block at bit {}",start);
                continue;
            }
        };
        if header[0] != HEADER_BLOCK {
            trace!("skipping orphan block type {:#04x}",header[0]);
            continue;
        }
        let (chk,sec,trk) = (header[1],header[2],header[3]);
        if chk != sec ^ trk ^ header[4] ^ header[5] {
            debug!("header checksum failed for T{} S{}",trk,sec);
            continue;
        }
        let id = SectorId::new(trk,0,sec,1);
        // the data block must follow within the header gap
        if find_sync(&mut r,600).is_none() {
            debug!("no data block for T{} S{}",trk,sec);
            sectors.push(Sector::with_data(id,Vec::new(),SectorStatus::NotFound));
            continue;
        }
        let block = match read_block(&mut r,260) {
            Ok(blk) => blk,
            Err(_) => {
                debug!("bad code in data block for T{} S{}",trk,sec);
                sectors.push(Sector::with_data(id,Vec::new(),SectorStatus::NotFound));
                continue;
            }
        };
        if block[0] != DATA_BLOCK {
            debug!("expected data block for T{} S{}, got {:#04x}",trk,sec,block[0]);
            sectors.push(Sector::with_data(id,Vec::new(),SectorStatus::NotFound));
            continue;
        }
        let dat = block[1..257].to_vec();
        let chk = dat.iter().fold(0u8,|a,b| a ^ b);
        let status = match chk == block[257] {
            true => SectorStatus::Ok,
            false => {
                debug!("data checksum failed for T{} S{}",trk,sec);
                SectorStatus::CrcError
            }
        };
        sectors.push(Sector::with_data(id,dat,status));
    }
    sectors
}

/// Synthesize a 4-and-5 track from 256-byte sectors.  `disk_id` is the two
/// byte id every header repeats; `gap` is the tail gap in bytes after each
/// data block.
pub fn encode_track(sectors: &[Sector],disk_id: [u8;2],gap: usize) -> Result<(Vec<u8>,usize)> {
    let mut w = BitWriter::new();
    for sec in sectors {
        if sec.data.len() != 256 {
            return Err(Error::InvalidArg(format!("sector length {}",sec.data.len())));
        }
        let (trk,snum) = (sec.id.cyl_id,sec.id.sector_id);
        // header block
        for _i in 0..40 {
            w.push(1);
        }
        let chk = snum ^ trk ^ disk_id[1] ^ disk_id[0];
        for val in [HEADER_BLOCK,chk,snum,trk,disk_id[1],disk_id[0],0x0f,0x0f] {
            write_byte(&mut w,val);
        }
        for _i in 0..9 {
            w.put(0x55,8);
        }
        // data block
        for _i in 0..40 {
            w.push(1);
        }
        write_byte(&mut w,DATA_BLOCK);
        let mut chk = 0;
        for val in &sec.data {
            write_byte(&mut w,*val);
            chk ^= *val;
        }
        for val in [chk,0,0] {
            write_byte(&mut w,val);
        }
        for _i in 0..gap {
            w.put(0x55,8);
        }
    }
    Ok(w.finish())
}
