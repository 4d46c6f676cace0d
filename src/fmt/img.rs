//! ## Raw sector dumps
//!
//! PC `.img`, Atari ST `.st`, and Amiga `.adf` are the same container: the
//! decoded sectors in CHS order with no header at all.  One core handles
//! all three; a plugin instance differs only in which platform rows of the
//! geometry table it claims and which extensions it answers to.
//!
//! Identification is length-only, so confidence never leaves the 40..=69
//! band and shared lengths (720K is PC, ST, and Amiga alike) surface as an
//! ambiguous candidate list rather than a guess.

use log::{debug,trace,warn};
use crate::{Error,Result};
use crate::geometry::{self,GeomEntry,Platform};
use crate::model::{DiskImage,Sector,SectorId,SectorStatus,Track};
use crate::registry::{Capabilities,FormatPlugin,Probe};

const SIZE_MATCH: u8 = 45;
const EXT_BONUS: u8 = 10;

struct RawState {
    data: Vec<u8>,
    entry: &'static GeomEntry,
}

/// Raw dump plugin for one platform family.
pub struct RawDump {
    tag: &'static str,
    platform: Platform,
    exts: &'static [&'static str],
}

impl RawDump {
    pub fn pc() -> Self {
        Self { tag: "pc img", platform: Platform::Pc, exts: &["img","ima","dsk"] }
    }
    pub fn atari_st() -> Self {
        Self { tag: "atari st", platform: Platform::AtariSt, exts: &["st"] }
    }
    pub fn amiga() -> Self {
        Self { tag: "amiga adf", platform: Platform::Amiga, exts: &["adf"] }
    }
    fn state<'a>(&self,img: &'a DiskImage) -> Result<&'a RawState> {
        img.plugin_state.as_ref()
            .and_then(|s| s.downcast_ref::<RawState>())
            .ok_or(Error::InvalidArg("image does not belong to this plugin".to_string()))
    }
    /// byte offset of the first sector of the track
    fn track_offset(entry: &GeomEntry,cyl: usize,head: usize) -> usize {
        (cyl * entry.heads + head) * entry.sectors * entry.sector_size
    }
}

impl FormatPlugin for RawDump {
    fn name(&self) -> &'static str {
        self.tag
    }
    fn extensions(&self) -> &'static [&'static str] {
        self.exts
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities { write: true, ..Capabilities::default() }
    }
    fn probe(&self,_head: &[u8],size: u64,ext: Option<&str>) -> Option<Probe> {
        let entry = geometry::infer_for(size as usize,self.platform)?;
        let mut conf = SIZE_MATCH;
        let mut reason = format!("length matches {}",entry.desc);
        if let Some(ext) = ext {
            if self.exts.contains(&ext) {
                conf += EXT_BONUS;
                reason.push_str(", extension agrees");
            }
        }
        Some(Probe::new(conf,reason))
    }
    fn open_bytes(&self,dat: &[u8],read_only: bool) -> Result<DiskImage> {
        let entry = geometry::infer_for(dat.len(),self.platform)
            .ok_or_else(|| Error::FormatInvalid(format!("length {} is not a {} dump",dat.len(),self.tag)))?;
        debug!("opening {} as {}",self.tag,entry.desc);
        let mut img = DiskImage::alloc(self.tag,entry.cylinders,entry.heads);
        img.geometry = entry.geometry();
        img.media_kind = entry.media;
        img.read_only = read_only;
        img.plugin_state = Some(Box::new(RawState { data: dat.to_vec(), entry }));
        Ok(img)
    }
    fn read_track(&self,img: &DiskImage,cyl: usize,head: usize) -> Result<Track> {
        let state = self.state(img)?;
        let entry = state.entry;
        if cyl >= entry.cylinders || head >= entry.heads {
            return Err(Error::Bounds);
        }
        let mut trk = Track::new(cyl,head,entry.encoding);
        let base = Self::track_offset(entry,cyl,head);
        for s in 0..entry.sectors {
            let off = base + s * entry.sector_size;
            let id = SectorId::new(cyl as u8,head as u8,entry.first_sector + s as u8,
                (entry.sector_size / 128).trailing_zeros() as u8);
            let dat = state.data[off..off+entry.sector_size].to_vec();
            trk.sectors.push(Sector::with_data(id,dat,SectorStatus::Ok));
        }
        trace!("read {} sectors from T{} H{}",trk.sectors.len(),cyl,head);
        Ok(trk)
    }
    fn write_track(&self,img: &mut DiskImage,trk: &Track) -> Result<()> {
        if img.read_only {
            return Err(Error::ReadOnly);
        }
        let entry = self.state(img)?.entry;
        if trk.cylinder >= entry.cylinders || trk.head >= entry.heads {
            return Err(Error::Bounds);
        }
        let base = Self::track_offset(entry,trk.cylinder,trk.head);
        let state = img.plugin_state.as_mut()
            .and_then(|s| s.downcast_mut::<RawState>())
            .ok_or(Error::InvalidArg("image does not belong to this plugin".to_string()))?;
        for sec in &trk.sectors {
            if sec.data.len() != entry.sector_size {
                return Err(Error::InvalidArg(format!("sector length {}",sec.data.len())));
            }
            let idx = sec.id.sector_id.checked_sub(entry.first_sector)
                .filter(|i| (*i as usize) < entry.sectors)
                .ok_or(Error::Bounds)? as usize;
            let off = base + idx * entry.sector_size;
            state.data[off..off+entry.sector_size].copy_from_slice(&sec.data);
        }
        if let Some(weak) = trk.downgraded_weak() {
            warn!("sector dump cannot carry fuzzy bits, downgrading to weak status");
            img.attach_track(weak)?;
        }
        Ok(())
    }
    fn to_bytes(&self,img: &DiskImage) -> Result<Vec<u8>> {
        Ok(self.state(img)?.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_stays_in_hint_band() {
        let pc = RawDump::pc();
        let p = pc.probe(&[],737280,Some("img")).unwrap();
        assert!(p.confidence >= 40 && p.confidence <= 60);
        assert!(pc.probe(&[],737281,Some("img")).is_none());
        // Amiga claims the same length
        assert!(RawDump::amiga().probe(&[],737280,None).is_some());
    }

    #[test]
    fn sectors_come_back_in_chs_order() {
        let pc = RawDump::pc();
        // 160K: 40 cyl, 1 head, 8 x 512
        let mut dat = vec![0u8;163840];
        for s in 0..8 {
            dat[s*512..(s+1)*512].fill(s as u8 + 1);
        }
        let img = pc.open_bytes(&dat,false).unwrap();
        assert_eq!(img.geometry.cylinders,40);
        let trk = pc.read_track(&img,0,0).unwrap();
        assert_eq!(trk.sectors.len(),8);
        // PC ids start at 1
        assert_eq!(trk.sectors[0].id.sector_id,1);
        assert_eq!(trk.sectors[7].data,vec![8;512]);
        assert!(matches!(pc.read_track(&img,40,0),Err(Error::Bounds)));
    }

    #[test]
    fn write_track_round_trip() {
        let pc = RawDump::pc();
        let dat = vec![0u8;163840];
        let mut img = pc.open_bytes(&dat,false).unwrap();
        let mut trk = pc.read_track(&img,3,0).unwrap();
        trk.sectors[4].data = vec![0xa5;512];
        pc.write_track(&mut img,&trk).unwrap();
        let back = pc.read_track(&img,3,0).unwrap();
        assert_eq!(back.sectors[4].data,vec![0xa5;512]);
        let bytes = pc.to_bytes(&img).unwrap();
        assert_eq!(&bytes[(3*8+4)*512..(3*8+5)*512],&[0xa5;512][..]);
    }

    #[test]
    fn fuzzy_mask_downgrades_to_weak() {
        let pc = RawDump::pc();
        let dat = vec![0u8;163840];
        let mut img = pc.open_bytes(&dat,false).unwrap();
        let mut trk = pc.read_track(&img,0,0).unwrap();
        trk.sectors[0].fuzzy_mask = Some(vec![0xff;512]);
        pc.write_track(&mut img,&trk).unwrap();
        // the downgrade is recorded in the image, not just logged
        let cached = img.track(0,0).unwrap().expect("track not attached");
        assert_eq!(cached.sectors[0].status,SectorStatus::Weak);
        assert!(cached.sectors[0].fuzzy_mask.is_none());
        assert_eq!(cached.sectors[1].status,SectorStatus::Ok);
    }

    #[test]
    fn read_only_blocks_writes() {
        let pc = RawDump::pc();
        let dat = vec![0u8;163840];
        let mut img = pc.open_bytes(&dat,true).unwrap();
        let trk = pc.read_track(&img,0,0).unwrap();
        assert!(matches!(pc.write_track(&mut img,&trk),Err(Error::ReadOnly)));
    }
}
