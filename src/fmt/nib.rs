//! ## Apple NIB
//!
//! Byte-aligned nibble tracks as the old Apple copy programs wrote them:
//! exactly 35 tracks of 6656 nibbles, no header.  All the nibble work is in
//! `codec::gcr62`; this plugin just frames it and carries the DOS 3.3
//! logical-to-physical skew so a NIB converts to and from a 140K
//! sector dump.

use log::{debug,warn};
use crate::{Error,Result};
use crate::codec::gcr62;
use crate::model::{DiskImage,MediaKind,SectorStatus,Track,TrackEncoding};
use crate::registry::{Capabilities,FormatPlugin,Probe};

pub const NIB_FILE_LEN: usize = 35 * gcr62::NIB_TRACK_LEN;
pub const DOS33_FILE_LEN: usize = 35 * 16 * 256;

/// DOS 3.3 logical sector -> physical sector (2:1 soft interleave)
pub const DOS_LSEC_TO_PSEC: [usize;16] = [0,13,11,9,7,5,3,1,14,12,10,8,6,4,2,15];

struct NibState {
    data: Vec<u8>,
    volume: u8,
}

pub struct Nib;

impl Nib {
    fn state<'a>(&self,img: &'a DiskImage) -> Result<&'a NibState> {
        img.plugin_state.as_ref()
            .and_then(|s| s.downcast_ref::<NibState>())
            .ok_or(Error::InvalidArg("image does not belong to this plugin".to_string()))
    }
    fn track_slice<'a>(data: &'a [u8],cyl: usize) -> &'a [u8] {
        &data[cyl*gcr62::NIB_TRACK_LEN..(cyl+1)*gcr62::NIB_TRACK_LEN]
    }
    /// Extract a DOS 3.3 ordered 143,360-byte sector dump.
    pub fn to_dos33(&self,img: &DiskImage) -> Result<Vec<u8>> {
        let state = self.state(img)?;
        let mut ans: Vec<u8> = Vec::with_capacity(DOS33_FILE_LEN);
        for cyl in 0..35 {
            let (sectors,_vol) = gcr62::scan_track(Self::track_slice(&state.data,cyl));
            for lsec in 0..16 {
                let psec = DOS_LSEC_TO_PSEC[lsec] as u8;
                match sectors.iter().find(|s| s.id.sector_id == psec) {
                    Some(sec) if sec.data.len() == 256 => ans.extend_from_slice(&sec.data),
                    _ => {
                        debug!("missing T{} S{} in nibble stream",cyl,psec);
                        return Err(Error::FormatInvalid(format!("track {} sector {} unreadable",cyl,psec)));
                    }
                }
            }
        }
        Ok(ans)
    }
    /// Build a NIB image from a DOS 3.3 ordered 143,360-byte sector dump.
    pub fn from_dos33(&self,dat: &[u8],volume: u8) -> Result<DiskImage> {
        if dat.len() != DOS33_FILE_LEN {
            return Err(Error::FormatInvalid(format!("expected {} bytes, got {}",DOS33_FILE_LEN,dat.len())));
        }
        let mut data: Vec<u8> = Vec::with_capacity(NIB_FILE_LEN);
        for cyl in 0..35 {
            let mut phys: Vec<Vec<u8>> = vec![Vec::new();16];
            for lsec in 0..16 {
                let off = (cyl*16 + lsec) * 256;
                phys[DOS_LSEC_TO_PSEC[lsec]] = dat[off..off+256].to_vec();
            }
            data.extend_from_slice(&gcr62::build_track(&phys,volume,cyl as u8)?);
        }
        self.open_bytes(&data,false)
    }
}

impl FormatPlugin for Nib {
    fn name(&self) -> &'static str {
        "a2 nib"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["nib"]
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities { write: true, ..Capabilities::default() }
    }
    fn probe(&self,head: &[u8],size: u64,ext: Option<&str>) -> Option<Probe> {
        if size != NIB_FILE_LEN as u64 {
            return None;
        }
        // every nibble on a track has the high bit set
        let looks_nibbly = head.iter().take(512).all(|b| b & 0x80 != 0);
        let mut conf = match looks_nibbly {
            true => 75,
            false => 45
        };
        let mut reason = "length matches a 35-track nibble image".to_string();
        if ext == Some("nib") {
            conf += 10;
            reason.push_str(", extension agrees");
        }
        Some(Probe::new(conf,reason))
    }
    fn open_bytes(&self,dat: &[u8],read_only: bool) -> Result<DiskImage> {
        if dat.len() != NIB_FILE_LEN {
            return Err(Error::FormatInvalid(format!("NIB must be exactly {} bytes, got {}",NIB_FILE_LEN,dat.len())));
        }
        // take the volume from the first readable address field
        let (_,volume) = gcr62::scan_track(Self::track_slice(dat,0));
        let mut img = DiskImage::alloc("a2 nib",35,1);
        img.geometry = img.geometry.with_sectors(16,256);
        img.media_kind = MediaKind::D525Dd;
        img.read_only = read_only;
        img.plugin_state = Some(Box::new(NibState {
            data: dat.to_vec(),
            volume: volume.unwrap_or(gcr62::DEFAULT_VOLUME),
        }));
        Ok(img)
    }
    fn read_track(&self,img: &DiskImage,cyl: usize,head: usize) -> Result<Track> {
        let state = self.state(img)?;
        if cyl >= 35 || head != 0 {
            return Err(Error::Bounds);
        }
        let raw = Self::track_slice(&state.data,cyl);
        let (sectors,_vol) = gcr62::scan_track(raw);
        let mut trk = Track::new(cyl,0,TrackEncoding::GcrApple)
            .with_bits(raw.to_vec(),raw.len()*8);
        trk.sectors = sectors;
        Ok(trk)
    }
    fn write_track(&self,img: &mut DiskImage,trk: &Track) -> Result<()> {
        if img.read_only {
            return Err(Error::ReadOnly);
        }
        if trk.cylinder >= 35 || trk.head != 0 {
            return Err(Error::Bounds);
        }
        if trk.sectors.len() != gcr62::SECTORS_PER_TRACK {
            return Err(Error::InvalidArg(format!("{} sectors on track",trk.sectors.len())));
        }
        let mut phys: Vec<Vec<u8>> = vec![Vec::new();16];
        for sec in &trk.sectors {
            let psec = sec.id.sector_id as usize;
            if psec >= 16 || sec.data.len() != 256 {
                return Err(Error::InvalidArg(format!("bad sector {}",sec.id)));
            }
            phys[psec] = sec.data.clone();
        }
        let state = img.plugin_state.as_mut()
            .and_then(|s| s.downcast_mut::<NibState>())
            .ok_or(Error::InvalidArg("image does not belong to this plugin".to_string()))?;
        let buf = gcr62::build_track(&phys,state.volume,trk.cylinder as u8)?;
        let off = trk.cylinder * gcr62::NIB_TRACK_LEN;
        state.data[off..off+gcr62::NIB_TRACK_LEN].copy_from_slice(&buf);
        if let Some(weak) = trk.downgraded_weak() {
            warn!("NIB cannot carry fuzzy bits, downgrading to weak status");
            img.attach_track(weak)?;
        }
        Ok(())
    }
    fn to_bytes(&self,img: &DiskImage) -> Result<Vec<u8>> {
        Ok(self.state(img)?.data.clone())
    }
}
