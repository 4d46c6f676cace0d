//! ## Atari ST MSA
//!
//! Magic Shadow Archiver: a small big-endian header, then one record per
//! track and side.  A record is either the raw track (spt * 512 bytes) or
//! run-length compressed with `0xE5` as the escape: `E5 value count_be16`.
//! A literal `0xE5` therefore always travels as a run, and a track is only
//! stored compressed when that actually saves bytes, so re-encoding is
//! held to the semantic round-trip rather than byte identity.

use log::{debug,trace,warn};
use crate::{Error,Result};
use crate::bits;
use crate::model::{DiskImage,MediaKind,Sector,SectorId,SectorStatus,Track,TrackEncoding};
use crate::registry::{Capabilities,FormatPlugin,Probe};

pub const MAGIC: u16 = 0x0e0f;
pub const SECTOR_LEN: usize = 512;
/// a run must be at least this long to be worth the 4-byte escape
const MIN_RUN: usize = 4;

struct MsaState {
    /// decoded track buffers, `tracks[cyl*sides + side]`, spt*512 each
    tracks: Vec<Vec<u8>>,
    spt: usize,
    sides: usize,
    start_track: usize,
    end_track: usize,
}

/// Expand one RLE record to exactly `expected` bytes.
pub fn decode_rle(dat: &[u8],expected: usize) -> Result<Vec<u8>> {
    let mut ans: Vec<u8> = Vec::with_capacity(expected);
    let mut i = 0;
    while i < dat.len() {
        match dat[i] {
            0xe5 => {
                let val = *dat.get(i+1).ok_or(Error::FormatTruncated)?;
                let count = bits::u16_be(dat,i+2)? as usize;
                ans.resize(ans.len()+count,val);
                i += 4;
            },
            val => {
                ans.push(val);
                i += 1;
            }
        }
        if ans.len() > expected {
            return Err(Error::FormatInvalid(format!("run overflows track, {} > {}",ans.len(),expected)));
        }
    }
    if ans.len() != expected {
        return Err(Error::FormatInvalid(format!("track expands to {} of {} bytes",ans.len(),expected)));
    }
    Ok(ans)
}

/// Compress one track record.  The result may be no smaller than the
/// input; the caller compares and stores raw in that case.
pub fn encode_rle(dat: &[u8]) -> Vec<u8> {
    let mut ans: Vec<u8> = Vec::new();
    let mut i = 0;
    while i < dat.len() {
        let val = dat[i];
        let mut run = 1;
        while i + run < dat.len() && dat[i+run] == val && run < 0xffff {
            run += 1;
        }
        if run >= MIN_RUN || val == 0xe5 {
            ans.push(0xe5);
            ans.push(val);
            ans.push((run >> 8) as u8);
            ans.push((run & 0xff) as u8);
        } else {
            for _n in 0..run {
                ans.push(val);
            }
        }
        i += run;
    }
    ans
}

pub struct Msa;

impl Msa {
    fn state<'a>(&self,img: &'a DiskImage) -> Result<&'a MsaState> {
        img.plugin_state.as_ref()
            .and_then(|s| s.downcast_ref::<MsaState>())
            .ok_or(Error::InvalidArg("image does not belong to this plugin".to_string()))
    }
    fn parse_header(dat: &[u8]) -> Result<(usize,usize,usize,usize)> {
        if bits::u16_be(dat,0)? != MAGIC {
            return Err(Error::FormatInvalid("bad MSA signature".to_string()));
        }
        let spt = bits::u16_be(dat,2)? as usize;
        let sides = bits::u16_be(dat,4)? as usize + 1;
        let start = bits::u16_be(dat,6)? as usize;
        let end = bits::u16_be(dat,8)? as usize;
        if spt == 0 || spt > 36 || sides > 2 || start > end || end > 99 {
            return Err(Error::FormatInvalid(format!("implausible header: {} spt, {} sides, tracks {}..={}",spt,sides,start,end)));
        }
        Ok((spt,sides,start,end))
    }
}

impl FormatPlugin for Msa {
    fn name(&self) -> &'static str {
        "msa"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["msa"]
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities { write: true, ..Capabilities::default() }
    }
    fn probe(&self,head: &[u8],_size: u64,ext: Option<&str>) -> Option<Probe> {
        match Self::parse_header(head) {
            Ok((spt,sides,start,end)) => Some(Probe::new(90,
                format!("MSA header: {} spt, {} sides, tracks {}..={}",spt,sides,start,end))),
            Err(_) if head.len() >= 2 && head[0] == 0x0e && head[1] == 0x0f => {
                Some(Probe::new(50,"MSA magic with implausible header fields".to_string()))
            },
            _ => {
                if ext == Some("msa") {
                    trace!("extension says MSA but the header does not");
                }
                None
            }
        }
    }
    fn open_bytes(&self,dat: &[u8],read_only: bool) -> Result<DiskImage> {
        let (spt,sides,start,end) = Self::parse_header(dat)?;
        let track_len = spt * SECTOR_LEN;
        let mut tracks: Vec<Vec<u8>> = Vec::new();
        let mut pos = 10;
        for cyl in start..=end {
            for side in 0..sides {
                let rec_len = bits::u16_be(dat,pos)? as usize;
                pos += 2;
                let rec = bits::slice(dat,pos,rec_len)?;
                pos += rec_len;
                let buf = match rec_len == track_len {
                    true => rec.to_vec(),
                    false => decode_rle(rec,track_len)?
                };
                trace!("track {} side {}: {} bytes on disk",cyl,side,rec_len);
                tracks.push(buf);
            }
        }
        debug!("opening MSA, {} spt, {} sides, tracks {}..={}",spt,sides,start,end);
        let cylinders = end + 1;
        let mut img = DiskImage::alloc("msa",cylinders,sides);
        img.geometry = img.geometry.with_sectors(spt,SECTOR_LEN);
        img.media_kind = MediaKind::D35Dd;
        img.read_only = read_only;
        img.plugin_state = Some(Box::new(MsaState { tracks, spt, sides, start_track: start, end_track: end }));
        Ok(img)
    }
    fn read_track(&self,img: &DiskImage,cyl: usize,head: usize) -> Result<Track> {
        let state = self.state(img)?;
        if cyl > state.end_track || head >= state.sides {
            return Err(Error::Bounds);
        }
        let mut trk = Track::new(cyl,head,TrackEncoding::Mfm);
        if cyl < state.start_track {
            // inside the geometry but before the stored range
            debug!("track {} precedes the stored range, unformatted",cyl);
            return Ok(trk);
        }
        let buf = &state.tracks[(cyl - state.start_track) * state.sides + head];
        for s in 0..state.spt {
            let id = SectorId::new(cyl as u8,head as u8,(s+1) as u8,2);
            let dat = buf[s*SECTOR_LEN..(s+1)*SECTOR_LEN].to_vec();
            trk.sectors.push(Sector::with_data(id,dat,SectorStatus::Ok));
        }
        Ok(trk)
    }
    fn write_track(&self,img: &mut DiskImage,trk: &Track) -> Result<()> {
        if img.read_only {
            return Err(Error::ReadOnly);
        }
        let state = img.plugin_state.as_mut()
            .and_then(|s| s.downcast_mut::<MsaState>())
            .ok_or(Error::InvalidArg("image does not belong to this plugin".to_string()))?;
        if trk.cylinder < state.start_track || trk.cylinder > state.end_track || trk.head >= state.sides {
            return Err(Error::Bounds);
        }
        let spt = state.spt;
        let sides = state.sides;
        let start = state.start_track;
        let buf = &mut state.tracks[(trk.cylinder - start) * sides + trk.head];
        for sec in &trk.sectors {
            let s = sec.id.sector_id as usize;
            if s == 0 || s > spt || sec.data.len() != SECTOR_LEN {
                return Err(Error::InvalidArg(format!("bad sector {}",sec.id)));
            }
            buf[(s-1)*SECTOR_LEN..s*SECTOR_LEN].copy_from_slice(&sec.data);
        }
        if let Some(weak) = trk.downgraded_weak() {
            warn!("sector dump cannot carry fuzzy bits, downgrading to weak status");
            img.attach_track(weak)?;
        }
        Ok(())
    }
    fn to_bytes(&self,img: &DiskImage) -> Result<Vec<u8>> {
        let state = self.state(img)?;
        let mut ans: Vec<u8> = Vec::new();
        ans.extend_from_slice(&MAGIC.to_be_bytes());
        ans.extend_from_slice(&(state.spt as u16).to_be_bytes());
        ans.extend_from_slice(&((state.sides-1) as u16).to_be_bytes());
        ans.extend_from_slice(&(state.start_track as u16).to_be_bytes());
        ans.extend_from_slice(&(state.end_track as u16).to_be_bytes());
        for buf in &state.tracks {
            let packed = encode_rle(buf);
            let rec: &[u8] = match packed.len() < buf.len() {
                true => &packed,
                false => buf
            };
            ans.extend_from_slice(&(rec.len() as u16).to_be_bytes());
            ans.extend_from_slice(rec);
        }
        Ok(ans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rle_round_trip() {
        let mut dat = vec![0u8;512];
        dat[0..100].fill(0xfe);
        dat[200] = 0xe5; // the escape itself must survive
        let packed = encode_rle(&dat);
        assert!(packed.len() < dat.len());
        assert_eq!(decode_rle(&packed,512).unwrap(),dat);
    }

    #[test]
    fn incompressible_track_stays_raw() {
        let dat: Vec<u8> = (0..512u32).map(|i| (i % 251) as u8).collect();
        let packed = encode_rle(&dat);
        assert!(packed.len() >= dat.len());
    }

    #[test]
    fn bad_runs_rejected() {
        // expands past the track
        assert!(matches!(decode_rle(&[0xe5,0xaa,0x02,0x00],256),Err(Error::FormatInvalid(_))));
        // escape cut off
        assert!(matches!(decode_rle(&[0x00,0xe5,0xaa],16),Err(Error::FormatTruncated)));
    }

    /// one-track single-sided image with a compressed record
    fn tiny_msa() -> Vec<u8> {
        let mut dat = vec![0x0e,0x0f,0x00,0x09,0x00,0x00,0x00,0x00,0x00,0x00];
        let rec = [0xe5,0xfe,0x12,0x00]; // 0x1200 = 4608 = 9*512 bytes of 0xFE
        dat.extend_from_slice(&(rec.len() as u16).to_be_bytes());
        dat.extend_from_slice(&rec);
        dat
    }

    #[test]
    fn tracks_before_the_stored_range_are_unformatted() {
        // stored range starts at track 1, track 0 is still inside the geometry
        let mut dat = vec![0x0e,0x0f,0x00,0x09,0x00,0x00,0x00,0x01,0x00,0x01];
        let rec = [0xe5,0xfe,0x12,0x00];
        dat.extend_from_slice(&(rec.len() as u16).to_be_bytes());
        dat.extend_from_slice(&rec);
        let img = Msa.open_bytes(&dat,false).unwrap();
        assert_eq!(img.geometry.cylinders,2);
        let trk = Msa.read_track(&img,0,0).unwrap();
        assert!(trk.sectors.is_empty());
        assert_eq!(Msa.read_track(&img,1,0).unwrap().sectors.len(),9);
        assert!(matches!(Msa.read_track(&img,2,0),Err(Error::Bounds)));
    }

    #[test]
    fn compressed_track_expands() {
        let img = Msa.open_bytes(&tiny_msa(),false).unwrap();
        assert_eq!(img.geometry.sectors_per_track,Some(9));
        let trk = Msa.read_track(&img,0,0).unwrap();
        assert_eq!(trk.sectors.len(),9);
        assert!(trk.sectors.iter().all(|s| s.data == vec![0xfe;512]));
    }

    #[test]
    fn semantic_round_trip() {
        let img = Msa.open_bytes(&tiny_msa(),false).unwrap();
        let out = Msa.to_bytes(&img).unwrap();
        let img2 = Msa.open_bytes(&out,false).unwrap();
        assert_eq!(img.geometry,img2.geometry);
        let a = Msa.read_track(&img,0,0).unwrap();
        let b = Msa.read_track(&img2,0,0).unwrap();
        assert_eq!(a.sectors,b.sectors);
    }

    #[test]
    fn write_then_reencode() {
        let mut img = Msa.open_bytes(&tiny_msa(),false).unwrap();
        let mut trk = Msa.read_track(&img,0,0).unwrap();
        trk.sectors[4].data = vec![0x33;512];
        Msa.write_track(&mut img,&trk).unwrap();
        let out = Msa.to_bytes(&img).unwrap();
        let img2 = Msa.open_bytes(&out,false).unwrap();
        let back = Msa.read_track(&img2,0,0).unwrap();
        assert_eq!(back.sectors[4].data,vec![0x33;512]);
        assert_eq!(back.sectors[0].data,vec![0xfe;512]);
    }
}
