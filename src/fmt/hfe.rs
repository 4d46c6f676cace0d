//! ## HxC HFE
//!
//! The HxC floppy emulator's bitstream container, v1 and v3.  Block 0 is
//! the header, a track lookup table lives at `track_list_offset * 512`, and
//! each track chunk interleaves the two sides in 256-byte halves of every
//! 512-byte block.  Bits are stored LSB first, the reverse of the codec
//! kernel's convention.
//!
//! Tracks come back as `RawFlux`: the raw cell stream plus a synthesized
//! `FluxStream`, with the MFM/FM kernel run over the cells so decoded
//! sectors ride along.  v3 streams may carry opcode bytes; they are
//! stripped, with a RAND opcode standing in for a weak cell group.

use log::{debug,trace,warn};
use num_traits::FromPrimitive;
use num_derive::FromPrimitive;
use crate::{Error,Result};
use crate::bits;
use crate::codec::mfm::{self,FluxMode};
use crate::model::{DiskImage,FluxStream,MediaKind,Track,TrackEncoding};
use crate::registry::{Capabilities,FormatPlugin,Probe};

pub const MAGIC_V1: &[u8;8] = b"HXCPICFE";
pub const MAGIC_V3: &[u8;8] = b"HXCHFEV3";
const BLOCK: usize = 512;

/// track encoding byte of the header
#[derive(FromPrimitive,Clone,Copy,Debug)]
enum HeaderEncoding {
    IsoIbmMfm = 0,
    AmigaMfm = 1,
    IsoIbmFm = 2,
    EmuFm = 3,
}

// v3 in-stream opcodes, already bit-reversed to the kernel's order
const OP_NOP: u8 = 0xf0;
const OP_SET_INDEX: u8 = 0xf1;
const OP_SET_BITRATE: u8 = 0xf2;
const OP_SKIP_BITS: u8 = 0xf3;
const OP_RAND: u8 = 0xf4;

struct HfeState {
    data: Vec<u8>,
    /// `(offset_bytes, len_bytes)` per cylinder, from the lookup table
    lut: Vec<(usize,usize)>,
    sides: usize,
    bit_rate_khz: u16,
    mode: FluxMode,
    version3: bool,
}

/// reverse the bits of one byte; HFE stores LSB first
fn flip(byte: u8) -> u8 {
    byte.reverse_bits()
}

pub struct Hfe;

impl Hfe {
    fn state<'a>(&self,img: &'a DiskImage) -> Result<&'a HfeState> {
        img.plugin_state.as_ref()
            .and_then(|s| s.downcast_ref::<HfeState>())
            .ok_or(Error::InvalidArg("image does not belong to this plugin".to_string()))
    }
    /// Pull one side's cell bytes out of the interleaved track chunk and
    /// put them in the kernel's bit order.
    fn side_stream(chunk: &[u8],side: usize,version3: bool) -> Vec<u8> {
        let mut raw: Vec<u8> = Vec::with_capacity(chunk.len()/2);
        for block in chunk.chunks(BLOCK) {
            let half = match side {
                0 => block.get(0..usize::min(256,block.len())),
                _ => block.get(256..block.len())
            };
            if let Some(half) = half {
                raw.extend(half.iter().map(|b| flip(*b)));
            }
        }
        if !version3 {
            return raw;
        }
        // strip v3 opcodes
        let mut ans: Vec<u8> = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            match raw[i] {
                OP_NOP | OP_SET_INDEX => i += 1,
                OP_SET_BITRATE | OP_SKIP_BITS => i += 2,
                OP_RAND => {
                    // weak cell group, no deterministic value exists
                    ans.push(0x00);
                    i += 1;
                },
                val => {
                    ans.push(val);
                    i += 1;
                }
            }
        }
        ans
    }
    /// Flux intervals from a cell stream: distance in cells between
    /// successive transitions.
    fn flux_from_cells(raw: &[u8],bit_count: usize,bit_rate_khz: u16) -> FluxStream {
        let mut flux = FluxStream::new(bit_rate_khz as u64 * 2000);
        flux.index_positions.push(0);
        let mut gap: u32 = 0;
        for i in 0..bit_count {
            gap += 1;
            if (raw[i/8] >> (7 - i%8)) & 1 != 0 {
                flux.samples.push(gap);
                gap = 0;
            }
        }
        flux
    }
}

impl FormatPlugin for Hfe {
    fn name(&self) -> &'static str {
        "hfe"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["hfe"]
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities { flux: true, ..Capabilities::default() }
    }
    fn probe(&self,head: &[u8],_size: u64,_ext: Option<&str>) -> Option<Probe> {
        match head.get(0..8) {
            Some(m) if m == MAGIC_V3 => Some(Probe::new(98,"HFE v3 signature".to_string())),
            Some(m) if m == MAGIC_V1 => Some(Probe::new(95,"HFE signature".to_string())),
            _ => None
        }
    }
    fn open_bytes(&self,dat: &[u8],read_only: bool) -> Result<DiskImage> {
        let version3 = match dat.get(0..8) {
            Some(m) if m == MAGIC_V3 => true,
            Some(m) if m == MAGIC_V1 => false,
            _ => return Err(Error::FormatInvalid("bad HFE signature".to_string()))
        };
        let cylinders = *dat.get(9).ok_or(Error::FormatTruncated)? as usize;
        let sides = *dat.get(10).ok_or(Error::FormatTruncated)? as usize;
        let track_encoding = *dat.get(11).ok_or(Error::FormatTruncated)?;
        let bit_rate_khz = bits::u16_le(dat,12)?;
        let lut_offset = bits::u16_le(dat,18)? as usize * BLOCK;
        if cylinders == 0 || sides == 0 || sides > 2 {
            return Err(Error::FormatInvalid(format!("{} tracks, {} sides",cylinders,sides)));
        }
        let mut lut: Vec<(usize,usize)> = Vec::with_capacity(cylinders);
        for t in 0..cylinders {
            let off = bits::u16_le(dat,lut_offset + t*4)? as usize * BLOCK;
            let len = bits::u16_le(dat,lut_offset + t*4 + 2)? as usize;
            // offsets are in 512-byte blocks, lengths in bytes
            if len > 0 && off + len > dat.len() {
                return Err(Error::FormatTruncated);
            }
            lut.push((off,len));
        }
        let mode = match HeaderEncoding::from_u8(track_encoding) {
            Some(HeaderEncoding::IsoIbmFm) | Some(HeaderEncoding::EmuFm) => FluxMode::Fm,
            Some(_) => FluxMode::Mfm,
            None => {
                warn!("unknown track encoding {:#04x}, assuming MFM",track_encoding);
                FluxMode::Mfm
            }
        };
        debug!("opening HFE{}, {} tracks x {} sides at {} kbit/s",
            if version3 {" v3"} else {""},cylinders,sides,bit_rate_khz);
        let mut img = DiskImage::alloc("hfe",cylinders,sides);
        img.media_kind = MediaKind::D35Dd;
        img.read_only = read_only;
        img.provenance = Some(match version3 {
            true => "HFE v3".to_string(),
            false => "HFE v1".to_string()
        });
        img.plugin_state = Some(Box::new(HfeState {
            data: dat.to_vec(),
            lut,
            sides,
            bit_rate_khz,
            mode,
            version3,
        }));
        Ok(img)
    }
    fn read_track(&self,img: &DiskImage,cyl: usize,head: usize) -> Result<Track> {
        let state = self.state(img)?;
        if cyl >= state.lut.len() || head >= state.sides {
            return Err(Error::Bounds);
        }
        let (off,len) = state.lut[cyl];
        let mut trk = Track::new(cyl,head,TrackEncoding::RawFlux);
        if len == 0 {
            warn!("track {} has no data in the lookup table",cyl);
            trk.flux = Some(FluxStream::new(state.bit_rate_khz as u64 * 2000));
            return Ok(trk);
        }
        let chunk = bits::slice(&state.data,off,len)?;
        let raw = Self::side_stream(chunk,head,state.version3);
        let bit_count = raw.len()*8;
        trace!("track {} side {}: {} cells",cyl,head,bit_count);
        trk.flux = Some(Self::flux_from_cells(&raw,bit_count,state.bit_rate_khz));
        trk.sectors = mfm::decode_track(&raw,bit_count,state.mode);
        trk = trk.with_bits(raw,bit_count);
        Ok(trk)
    }
    fn to_bytes(&self,_img: &DiskImage) -> Result<Vec<u8>> {
        Err(Error::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Sector,SectorId,SectorStatus};

    /// Build a small v1 file: header block, lookup table block, then one
    /// track chunk shared by every cylinder entry that has data.
    fn hfe_bytes(cylinders: u8,sides: u8,track0: Option<&[u8]>) -> Vec<u8> {
        let mut dat = vec![0u8;BLOCK*2];
        dat[0..8].copy_from_slice(MAGIC_V1);
        dat[8] = 0; // revision
        dat[9] = cylinders;
        dat[10] = sides;
        dat[11] = 0x00; // ISOIBM MFM
        dat[12..14].copy_from_slice(&250u16.to_le_bytes());
        dat[14..16].copy_from_slice(&300u16.to_le_bytes());
        dat[18..20].copy_from_slice(&1u16.to_le_bytes()); // LUT at block 1
        if let Some(chunk) = track0 {
            let blocks = chunk.len().div_ceil(BLOCK);
            dat[BLOCK..BLOCK+2].copy_from_slice(&2u16.to_le_bytes());
            dat[BLOCK+2..BLOCK+4].copy_from_slice(&((blocks*BLOCK) as u16).to_le_bytes());
            dat.resize(2*BLOCK + blocks*BLOCK,0);
            dat[2*BLOCK..2*BLOCK+chunk.len()].copy_from_slice(chunk);
        }
        dat
    }

    #[test]
    fn header_parses() {
        let img = Hfe.open_bytes(&hfe_bytes(80,2,Some(&[0;512])),false).unwrap();
        assert_eq!(img.geometry.cylinders,80);
        assert_eq!(img.geometry.heads,2);
        let trk = Hfe.read_track(&img,0,0).unwrap();
        assert_eq!(trk.encoding,TrackEncoding::RawFlux);
        // entries past the stored chunk are empty, not errors
        assert!(Hfe.read_track(&img,5,0).unwrap().sectors.is_empty());
        assert!(matches!(Hfe.read_track(&img,80,0),Err(Error::Bounds)));
    }

    #[test]
    fn truncated_lut_entry_rejected() {
        let mut dat = hfe_bytes(2,1,Some(&[0;512]));
        // second entry points past the end of the file
        dat[BLOCK+4..BLOCK+6].copy_from_slice(&0x40u16.to_le_bytes());
        dat[BLOCK+6..BLOCK+8].copy_from_slice(&512u16.to_le_bytes());
        assert!(matches!(Hfe.open_bytes(&dat,false),Err(Error::FormatTruncated)));
    }

    #[test]
    fn kernel_decodes_interleaved_cells() {
        // synthesize an MFM track for side 1 and interleave it
        let sec = Sector::with_data(SectorId::new(0,1,1,2),vec![0xe5;512],SectorStatus::Ok);
        let (cells,_bits) = mfm::encode_track(&[sec],FluxMode::Mfm,24).unwrap();
        let flipped: Vec<u8> = cells.iter().map(|b| b.reverse_bits()).collect();
        let blocks = flipped.len().div_ceil(256);
        let mut chunk = vec![0u8;blocks*BLOCK];
        for (i,b) in flipped.iter().enumerate() {
            chunk[(i/256)*BLOCK + 256 + (i%256)] = *b;
        }
        let img = Hfe.open_bytes(&hfe_bytes(1,2,Some(&chunk)),false).unwrap();
        let trk = Hfe.read_track(&img,0,1).unwrap();
        assert_eq!(trk.encoding,TrackEncoding::RawFlux);
        assert!(trk.flux.is_some());
        assert_eq!(trk.sectors.len(),1);
        assert_eq!(trk.sectors[0].status,SectorStatus::Ok);
        assert_eq!(trk.sectors[0].data,vec![0xe5;512]);
    }

    #[test]
    fn v3_opcodes_are_stripped() {
        // a RAND opcode byte followed by plain cells
        let stream = [OP_RAND,0b01010101,OP_NOP,0b00100010];
        let mut chunk = vec![0u8;BLOCK];
        for (i,b) in stream.iter().enumerate() {
            chunk[i] = flip(*b);
        }
        let cleaned = Hfe::side_stream(&chunk,0,true);
        assert_eq!(cleaned[0],0x00);
        assert_eq!(cleaned[1],0b01010101);
        assert_eq!(cleaned[2],0b00100010);
    }

    #[test]
    fn flux_intervals_sum_to_cells() {
        let raw = [0b10010001u8,0b00010000];
        let flux = Hfe::flux_from_cells(&raw,16,250);
        assert_eq!(flux.sample_clock_hz,500000);
        assert_eq!(flux.samples,vec![1,3,4,4]);
        assert_eq!(flux.ticks(),12);
    }
}
