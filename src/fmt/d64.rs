//! ## Commodore D64
//!
//! Sector dump of a 1541 disk with the drive's zoned recording: 21 sectors
//! per track in the outer zone down to 17 in the innermost.  Two of the
//! four accepted lengths carry a trailing table of drive error codes, one
//! byte per sector, which maps onto `SectorStatus` and survives
//! round-trips verbatim.
//!
//! Track numbers are 1-based as the drive records them in the GCR headers;
//! cylinder slot `c` holds track `c+1`.

use log::{debug,trace,warn};
use crate::{Error,Result};
use crate::model::{DiskImage,MediaKind,Sector,SectorId,SectorStatus,Track,TrackEncoding};
use crate::registry::{Capabilities,FormatPlugin,Probe};

pub const SECTOR_LEN: usize = 256;

/// accepted file lengths: (bytes, tracks, has error table)
const SIZE_VARIANTS: [(usize,usize,bool);4] = [
    (174848,35,false),
    (175531,35,true),
    (196608,40,false),
    (197376,40,true),
];

/// sectors per 1-based track, zoned
pub fn sectors_per_track(track: usize) -> usize {
    match track {
        1..=17 => 21,
        18..=24 => 19,
        25..=30 => 18,
        _ => 17
    }
}

/// sectors on all tracks before the 1-based track
fn sectors_before(track: usize) -> usize {
    (1..track).map(sectors_per_track).sum()
}

/// 1541 job codes onto sector status; unlisted codes read fine
fn status_for(code: u8) -> SectorStatus {
    match code {
        2 | 3 | 4 => SectorStatus::NotFound,
        5 | 9 => SectorStatus::CrcError,
        _ => SectorStatus::Ok
    }
}

struct D64State {
    data: Vec<u8>,
    tracks: usize,
    /// one job code per sector when the file carries them
    errors: Option<Vec<u8>>,
}

pub struct D64;

impl D64 {
    fn state<'a>(&self,img: &'a DiskImage) -> Result<&'a D64State> {
        img.plugin_state.as_ref()
            .and_then(|s| s.downcast_ref::<D64State>())
            .ok_or(Error::InvalidArg("image does not belong to this plugin".to_string()))
    }
    fn variant(len: usize) -> Option<(usize,bool)> {
        SIZE_VARIANTS.iter().find(|v| v.0 == len).map(|v| (v.1,v.2))
    }
}

impl FormatPlugin for D64 {
    fn name(&self) -> &'static str {
        "d64"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["d64"]
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities { write: true, ..Capabilities::default() }
    }
    fn probe(&self,_head: &[u8],size: u64,ext: Option<&str>) -> Option<Probe> {
        let (tracks,errors) = Self::variant(size as usize)?;
        let mut conf = 65;
        let mut reason = match errors {
            true => format!("length matches a {}-track D64 with error bytes",tracks),
            false => format!("length matches a {}-track D64",tracks)
        };
        if ext == Some("d64") {
            conf += 15;
            reason.push_str(", extension agrees");
        }
        Some(Probe::new(conf,reason))
    }
    fn open_bytes(&self,dat: &[u8],read_only: bool) -> Result<DiskImage> {
        let (tracks,has_errors) = Self::variant(dat.len())
            .ok_or_else(|| Error::FormatInvalid(format!("length {} is not a D64",dat.len())))?;
        let total = sectors_before(tracks+1);
        let errors = match has_errors {
            true => Some(dat[total*SECTOR_LEN..].to_vec()),
            false => None
        };
        debug!("opening D64, {} tracks, {} sectors{}",tracks,total,
            if has_errors {", error table"} else {""});
        let mut img = DiskImage::alloc("d64",tracks,1);
        img.geometry.bytes_per_sector = Some(SECTOR_LEN);
        img.media_kind = MediaKind::D525Dd;
        img.read_only = read_only;
        img.plugin_state = Some(Box::new(D64State {
            data: dat[0..total*SECTOR_LEN].to_vec(),
            tracks,
            errors,
        }));
        Ok(img)
    }
    fn read_track(&self,img: &DiskImage,cyl: usize,head: usize) -> Result<Track> {
        let state = self.state(img)?;
        if cyl >= state.tracks || head != 0 {
            return Err(Error::Bounds);
        }
        let track = cyl + 1;
        let spt = sectors_per_track(track);
        let first = sectors_before(track);
        let mut trk = Track::new(cyl,0,TrackEncoding::GcrC64);
        for s in 0..spt {
            let off = (first + s) * SECTOR_LEN;
            let id = SectorId::new(track as u8,0,s as u8,1);
            let status = match &state.errors {
                Some(codes) => {
                    let code = codes.get(first+s).copied().unwrap_or(1);
                    let status = status_for(code);
                    if status != SectorStatus::Ok {
                        trace!("T{} S{} job code {} -> {:?}",track,s,code,status);
                    }
                    status
                },
                None => SectorStatus::Ok
            };
            trk.sectors.push(Sector::with_data(id,state.data[off..off+SECTOR_LEN].to_vec(),status));
        }
        Ok(trk)
    }
    fn write_track(&self,img: &mut DiskImage,trk: &Track) -> Result<()> {
        if img.read_only {
            return Err(Error::ReadOnly);
        }
        let state = img.plugin_state.as_mut()
            .and_then(|s| s.downcast_mut::<D64State>())
            .ok_or(Error::InvalidArg("image does not belong to this plugin".to_string()))?;
        if trk.cylinder >= state.tracks || trk.head != 0 {
            return Err(Error::Bounds);
        }
        let track = trk.cylinder + 1;
        let spt = sectors_per_track(track);
        let first = sectors_before(track);
        for sec in &trk.sectors {
            let s = sec.id.sector_id as usize;
            if s >= spt || sec.data.len() != SECTOR_LEN {
                return Err(Error::InvalidArg(format!("bad sector {}",sec.id)));
            }
            let off = (first + s) * SECTOR_LEN;
            state.data[off..off+SECTOR_LEN].copy_from_slice(&sec.data);
        }
        if let Some(weak) = trk.downgraded_weak() {
            warn!("sector dump cannot carry fuzzy bits, downgrading to weak status");
            img.attach_track(weak)?;
        }
        Ok(())
    }
    fn to_bytes(&self,img: &DiskImage) -> Result<Vec<u8>> {
        let state = self.state(img)?;
        let mut ans = state.data.clone();
        if let Some(codes) = &state.errors {
            ans.extend_from_slice(codes);
        }
        Ok(ans)
    }
}
