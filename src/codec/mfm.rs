//! ## MFM / FM kernel
//!
//! Bit-level decoding of IBM-style track streams into sectors, and the
//! reverse synthesis.  The stream alternates clock and data cells;
//! the decoder locks onto the sync marks whose deliberately illegal clock
//! pattern makes them unique within the encoding (`A1` with a missing
//! clock reads as raw `0x4489`), then shifts out data bytes.
//!
//! The track pass is the state machine SEARCH -> ID -> GAP -> DATA.  A bad
//! ID or data CRC never aborts the pass; the affected sector is emitted
//! with its status and the search resumes, so one damaged sector cannot
//! hide the rest of the track.

use log::{trace,debug,warn};
use crate::bits::{BitReader,BitWriter,crc16_ccitt};
use crate::model::{Sector,SectorId,SectorStatus};
use crate::{Error,Result};

/// raw cell pattern of an MFM `A1` sync byte (missing clock between bits 4 and 5)
pub const MFM_SYNC: u16 = 0x4489;
/// raw cell pattern of an MFM `C2` pre-index sync byte
pub const MFM_INDEX_SYNC: u16 = 0x5224;
/// FM `FE` under clock `C7`
pub const FM_IDAM: u16 = 0xf57e;
/// FM `F8`..`FB` under clock `C7`
pub const FM_DAM: [u16;4] = [0xf56a,0xf56b,0xf56e,0xf56f];

const IDAM_BYTE: u8 = 0xfe;
const DAM_BYTE: u8 = 0xfb;
const DELETED_DAM_BYTE: u8 = 0xf8;

/// Window to find the data mark after an ID, in data bytes.  WD177x gives
/// up after 43 MFM DD bytes; FM is half the density.
const MFM_DAM_WINDOW: usize = 43;
const FM_DAM_WINDOW: usize = 30;

#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum FluxMode {
    Fm,
    Mfm,
}

/// decode one byte from 16 cells, data bits sit at the odd cell positions
fn read_byte(r: &mut BitReader) -> u8 {
    let raw = r.get(16) as u16;
    data_bits(raw)
}

fn data_bits(raw: u16) -> u8 {
    let mut ans = 0u8;
    for i in 0..8 {
        if raw & (1 << (14 - 2*i)) != 0 {
            ans |= 1 << (7 - i);
        }
    }
    ans
}

/// Slide bit by bit until a sync pattern introduces a mark, then return the
/// decoded mark byte.  `limit` caps the number of cells consumed.
/// MFM requires a run of `A1` syncs followed by the mark byte; FM marks are
/// their own sync patterns.
fn next_mark(r: &mut BitReader,mode: FluxMode,limit: usize) -> Option<(u8,usize)> {
    let mut shift: u16 = 0;
    let mut used = 0;
    while used < limit {
        shift = (shift << 1) | r.next() as u16;
        used += 1;
        if used < 16 {
            continue;
        }
        match mode {
            FluxMode::Mfm => {
                if shift == MFM_SYNC {
                    // absorb the rest of the sync run, then take the mark
                    loop {
                        let raw = r.get(16) as u16;
                        used += 16;
                        if raw != MFM_SYNC {
                            return Some((data_bits(raw),used));
                        }
                        if used >= limit + 64 {
                            return None;
                        }
                    }
                }
            },
            FluxMode::Fm => {
                if shift == FM_IDAM || FM_DAM.contains(&shift) {
                    return Some((data_bits(shift),used));
                }
            }
        }
    }
    None
}

/// Decode every sector on a track bitstream.  `bit_count` masks padding in
/// `buf`.  Sectors with CRC damage are returned with their payload and
/// `CrcError` status; an ID with no data field within the mark window
/// yields `NotFound` with no data.
pub fn decode_track(buf: &[u8],bit_count: usize,mode: FluxMode) -> Vec<Sector> {
    let mut ans: Vec<Sector> = Vec::new();
    if bit_count < 16 {
        return ans;
    }
    let mut r = BitReader::new(buf,bit_count);
    let mut budget = bit_count as i64;
    while budget > 0 {
        let (mark,used) = match next_mark(&mut r,mode,budget as usize) {
            Some(m) => m,
            None => break
        };
        budget -= used as i64;
        if mark != IDAM_BYTE {
            // an orphan data mark, keep searching for an ID
            continue;
        }
        // ID field: C H R N CRC16
        let mut field = match mode {
            FluxMode::Mfm => vec![0xa1,0xa1,0xa1,IDAM_BYTE],
            FluxMode::Fm => vec![IDAM_BYTE]
        };
        for _i in 0..6 {
            field.push(read_byte(&mut r));
        }
        budget -= 96;
        let id = SectorId::new(field[field.len()-6],field[field.len()-5],field[field.len()-4],field[field.len()-3]);
        if crc16_ccitt(0xffff,&field) != 0 {
            debug!("ID CRC mismatch at {}",id);
            ans.push(Sector::with_data(id,Vec::new(),SectorStatus::CrcError));
            continue;
        }
        trace!("found ID {}",id);
        // bounded scan for the data mark
        let window = match mode {
            FluxMode::Mfm => MFM_DAM_WINDOW * 16,
            FluxMode::Fm => FM_DAM_WINDOW * 16
        };
        let (dam,dam_used) = match next_mark(&mut r,mode,window) {
            Some((m,u)) if m == DAM_BYTE || m == DELETED_DAM_BYTE => (m,u),
            _ => {
                debug!("no data mark within window for {}",id);
                ans.push(Sector::with_data(id,Vec::new(),SectorStatus::NotFound));
                continue;
            }
        };
        budget -= dam_used as i64;
        let size = id.size();
        let mut field = match mode {
            FluxMode::Mfm => vec![0xa1,0xa1,0xa1,dam],
            FluxMode::Fm => vec![dam]
        };
        for _i in 0..size+2 {
            field.push(read_byte(&mut r));
        }
        budget -= ((size+2) * 16) as i64;
        let data = field[field.len()-size-2..field.len()-2].to_vec();
        let status = match (crc16_ccitt(0xffff,&field),dam) {
            (0,DELETED_DAM_BYTE) => SectorStatus::DeletedDam,
            (0,_) => SectorStatus::Ok,
            _ => {
                debug!("data CRC mismatch at {}",id);
                SectorStatus::CrcError
            }
        };
        ans.push(Sector::with_data(id,data,status));
    }
    trace!("track pass found {} sectors",ans.len());
    ans
}

/// Writer that tracks the trailing data bit so MFM clock insertion can
/// span byte boundaries.
pub struct TrackBuilder {
    w: BitWriter,
    mode: FluxMode,
    last_bit: u8,
}

impl TrackBuilder {
    pub fn new(mode: FluxMode) -> Self {
        Self { w: BitWriter::new(), mode, last_bit: 0 }
    }
    /// encode one data byte with legal clocking
    pub fn byte(&mut self,val: u8) {
        for i in (0..8).rev() {
            let d = (val >> i) & 1;
            let c = match self.mode {
                FluxMode::Fm => 1,
                FluxMode::Mfm => ((self.last_bit | d) == 0) as u8
            };
            self.w.push(c);
            self.w.push(d);
            self.last_bit = d;
        }
    }
    pub fn bytes(&mut self,val: u8,count: usize) {
        for _i in 0..count {
            self.byte(val);
        }
    }
    /// raw 16-cell pattern, e.g. a sync mark with its illegal clock
    pub fn raw(&mut self,cells: u16) {
        self.w.put(cells as usize,16);
        self.last_bit = (cells & 1) as u8;
    }
    /// sync run plus mark byte: `00`x12 `A1`x3 for MFM, `00`x6 for FM
    pub fn mark(&mut self,mark: u8) {
        match self.mode {
            FluxMode::Mfm => {
                self.bytes(0x00,12);
                for _i in 0..3 {
                    self.raw(MFM_SYNC);
                }
                self.byte(mark);
            },
            FluxMode::Fm => {
                self.bytes(0x00,6);
                let clock: u8 = 0xc7;
                let mut raw: u16 = 0;
                for i in (0..8).rev() {
                    raw = (raw << 1) | ((clock >> i) & 1) as u16;
                    raw = (raw << 1) | ((mark >> i) & 1) as u16;
                }
                self.raw(raw);
            }
        }
    }
    pub fn finish(self) -> (Vec<u8>,usize) {
        self.w.finish()
    }
}

/// Synthesize a complete track from sector payloads.  `gap3` is the
/// post-data gap in bytes; sectors are laid down in the order given.
/// Sector CRCs are computed here, so the output always satisfies
/// `decode_track`.
pub fn encode_track(sectors: &[Sector],mode: FluxMode,gap3: usize) -> Result<(Vec<u8>,usize)> {
    let mut b = TrackBuilder::new(mode);
    let gap_byte = match mode {
        FluxMode::Mfm => 0x4e,
        FluxMode::Fm => 0xff
    };
    b.bytes(gap_byte,32);
    for sec in sectors {
        if sec.data.len() != sec.id.size() && !sec.data.is_empty() {
            warn!("sector {} payload length {} disagrees with size code",sec.id,sec.data.len());
            return Err(Error::InvalidArg("sector payload length".to_string()));
        }
        // ID field
        b.mark(IDAM_BYTE);
        let id_bytes = [sec.id.cyl_id,sec.id.head_id,sec.id.sector_id,sec.id.size_code];
        let mut field = match mode {
            FluxMode::Mfm => vec![0xa1,0xa1,0xa1,IDAM_BYTE],
            FluxMode::Fm => vec![IDAM_BYTE]
        };
        field.extend_from_slice(&id_bytes);
        let crc = crc16_ccitt(0xffff,&field);
        for v in id_bytes {
            b.byte(v);
        }
        b.byte((crc >> 8) as u8);
        b.byte((crc & 0xff) as u8);
        b.bytes(gap_byte,22);
        // data field
        let dam = match sec.status {
            SectorStatus::DeletedDam => DELETED_DAM_BYTE,
            _ => DAM_BYTE
        };
        b.mark(dam);
        let payload = match sec.data.is_empty() {
            true => vec![gap_byte;sec.id.size()],
            false => sec.data.clone()
        };
        let mut field = match mode {
            FluxMode::Mfm => vec![0xa1,0xa1,0xa1,dam],
            FluxMode::Fm => vec![dam]
        };
        field.extend_from_slice(&payload);
        let crc = crc16_ccitt(0xffff,&field);
        for v in &payload {
            b.byte(*v);
        }
        b.byte((crc >> 8) as u8);
        b.byte((crc & 0xff) as u8);
        b.bytes(gap_byte,gap3);
    }
    b.bytes(gap_byte,32);
    Ok(b.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_sector() -> Vec<Sector> {
        vec![Sector::with_data(SectorId::new(0,0,1,2),vec![0xe5;512],SectorStatus::Ok)]
    }

    #[test]
    fn mfm_single_sector_round_trip() {
        let (buf,bits) = encode_track(&one_sector(),FluxMode::Mfm,24).unwrap();
        let secs = decode_track(&buf,bits,FluxMode::Mfm);
        assert_eq!(secs.len(),1);
        assert_eq!(secs[0].status,SectorStatus::Ok);
        assert_eq!(secs[0].id,SectorId::new(0,0,1,2));
        assert_eq!(secs[0].data,vec![0xe5;512]);
    }

    #[test]
    fn fm_single_sector_round_trip() {
        let (buf,bits) = encode_track(&one_sector(),FluxMode::Fm,16).unwrap();
        let secs = decode_track(&buf,bits,FluxMode::Fm);
        assert_eq!(secs.len(),1);
        assert_eq!(secs[0].status,SectorStatus::Ok);
        assert_eq!(secs[0].data,vec![0xe5;512]);
    }

    #[test]
    fn deleted_mark_survives() {
        let mut secs = one_sector();
        secs[0].status = SectorStatus::DeletedDam;
        let (buf,bits) = encode_track(&secs,FluxMode::Mfm,24).unwrap();
        let out = decode_track(&buf,bits,FluxMode::Mfm);
        assert_eq!(out[0].status,SectorStatus::DeletedDam);
    }

    #[test]
    fn corrupted_data_crc_is_local() {
        let mut secs = one_sector();
        secs.push(Sector::with_data(SectorId::new(0,0,2,2),vec![0x11;512],SectorStatus::Ok));
        let (mut buf,bits) = encode_track(&secs,FluxMode::Mfm,24).unwrap();
        // flip a data cell deep inside the first sector's payload
        let target = (bits / 3) | 1; // odd cell index = data bit
        buf[target/8] ^= 1 << (7 - target%8);
        let out = decode_track(&buf,bits,FluxMode::Mfm);
        assert_eq!(out.len(),2);
        assert_eq!(out[0].status,SectorStatus::CrcError);
        assert_eq!(out[0].data.len(),512);
        assert_eq!(out[1].status,SectorStatus::Ok);
    }

    #[test]
    fn full_track_of_nine() {
        let mut secs = Vec::new();
        for r in 1..=9u8 {
            secs.push(Sector::with_data(SectorId::new(5,1,r,2),vec![r;512],SectorStatus::Ok));
        }
        let (buf,bits) = encode_track(&secs,FluxMode::Mfm,54).unwrap();
        let out = decode_track(&buf,bits,FluxMode::Mfm);
        assert_eq!(out.len(),9);
        for (i,s) in out.iter().enumerate() {
            assert_eq!(s.id.sector_id,i as u8+1);
            assert_eq!(s.id.cyl_id,5);
            assert_eq!(s.status,SectorStatus::Ok);
        }
    }
}
