//! ## Atari 8-bit ATR
//!
//! SIO2PC container: a 16-byte header in front of the raw sectors.  The
//! header stores the payload size in 16-byte paragraphs plus the sector
//! size; density falls out of those two numbers.  Double and quad density
//! images still keep the first three boot sectors at 128 bytes.

use std::fmt;
use log::{debug,warn};
use crate::{Error,Result};
use crate::bits;
use crate::model::{DiskImage,MediaKind,Sector,SectorId,SectorStatus,Track,TrackEncoding};
use crate::registry::{Capabilities,FormatPlugin,Probe};

pub const HEADER_LEN: usize = 16;
pub const MAGIC: u16 = 0x0296;

#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum Density {
    Single,
    Enhanced,
    Double,
    Quad,
}

impl fmt::Display for Density {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f,"single"),
            Self::Enhanced => write!(f,"enhanced"),
            Self::Double => write!(f,"double"),
            Self::Quad => write!(f,"quad"),
        }
    }
}

struct AtrState {
    /// sector payloads, header stripped
    data: Vec<u8>,
    sector_size: usize,
    sector_count: usize,
    density: Density,
    /// header preserved verbatim for the round trip
    header: [u8;HEADER_LEN],
}

impl AtrState {
    fn sectors_per_track(&self) -> usize {
        match self.density {
            Density::Enhanced => 26,
            _ => 18
        }
    }
    /// byte offset of a 1-based sector number; boot sectors are 128 bytes
    /// even at double density
    fn offset(&self,sec: usize) -> usize {
        match (self.sector_size,sec) {
            (128,_) => 128 * (sec-1),
            (_,1..=3) => 128 * (sec-1),
            _ => 384 + self.sector_size * (sec-4)
        }
    }
    fn len_of(&self,sec: usize) -> usize {
        match (self.sector_size,sec) {
            (128,_) | (_,1..=3) => 128,
            _ => self.sector_size
        }
    }
}

/// `(sector_size, sector_count) -> density`
fn density_of(sector_size: usize,sector_count: usize) -> Density {
    match (sector_size,sector_count) {
        (128,1040) => Density::Enhanced,
        (128,_) => Density::Single,
        (256,n) if n > 720 => Density::Quad,
        _ => Density::Double
    }
}

pub struct Atr;

impl Atr {
    fn state<'a>(&self,img: &'a DiskImage) -> Result<&'a AtrState> {
        img.plugin_state.as_ref()
            .and_then(|s| s.downcast_ref::<AtrState>())
            .ok_or(Error::InvalidArg("image does not belong to this plugin".to_string()))
    }
    fn parse_header(dat: &[u8]) -> Result<(usize,usize)> {
        if bits::u16_le(dat,0)? != MAGIC {
            return Err(Error::FormatInvalid("bad ATR signature".to_string()));
        }
        let lo = bits::u16_le(dat,2)? as usize;
        let sector_size = bits::u16_le(dat,4)? as usize;
        let hi = bits::u16_le(dat,6)? as usize;
        let payload = (lo | (hi << 16)) * 16;
        if sector_size != 128 && sector_size != 256 {
            return Err(Error::FormatInvalid(format!("sector size {}",sector_size)));
        }
        Ok((payload,sector_size))
    }
}

impl FormatPlugin for Atr {
    fn name(&self) -> &'static str {
        "atr"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["atr"]
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities { write: true, ..Capabilities::default() }
    }
    fn probe(&self,head: &[u8],size: u64,_ext: Option<&str>) -> Option<Probe> {
        let (payload,sector_size) = Self::parse_header(head).ok()?;
        match HEADER_LEN as u64 + payload as u64 <= size {
            true => Some(Probe::new(95,format!("ATR signature, {}-byte sectors",sector_size))),
            false => Some(Probe::new(70,"ATR signature but header length overruns the file".to_string()))
        }
    }
    fn open_bytes(&self,dat: &[u8],read_only: bool) -> Result<DiskImage> {
        let (payload,sector_size) = Self::parse_header(dat)?;
        if dat.len() < HEADER_LEN + payload {
            return Err(Error::FormatTruncated);
        }
        let sector_count = match sector_size {
            128 => payload / 128,
            _ => {
                if payload < 384 || (payload - 384) % 256 != 0 {
                    return Err(Error::FormatInvalid(format!("payload {} does not fit 256-byte sectors",payload)));
                }
                (payload - 384) / 256 + 3
            }
        };
        let density = density_of(sector_size,sector_count);
        let mut header = [0u8;HEADER_LEN];
        header.copy_from_slice(&dat[0..HEADER_LEN]);
        let state = AtrState {
            data: dat[HEADER_LEN..HEADER_LEN+payload].to_vec(),
            sector_size,
            sector_count,
            density,
            header,
        };
        let spt = state.sectors_per_track();
        let cylinders = usize::max(1,sector_count / spt);
        if sector_count % spt != 0 {
            warn!("{} sectors do not fill {} tracks evenly",sector_count,cylinders);
        }
        debug!("opening ATR, {} density, {} sectors of {}",density,sector_count,sector_size);
        let mut img = DiskImage::alloc("atr",cylinders,1);
        img.geometry = img.geometry.with_sectors(spt,sector_size);
        img.media_kind = MediaKind::D525Dd;
        img.read_only = read_only;
        img.provenance = Some(format!("{} density",density));
        img.plugin_state = Some(Box::new(state));
        Ok(img)
    }
    fn read_track(&self,img: &DiskImage,cyl: usize,head: usize) -> Result<Track> {
        let state = self.state(img)?;
        let spt = state.sectors_per_track();
        if head != 0 || cyl >= img.geometry.cylinders {
            return Err(Error::Bounds);
        }
        let encoding = match state.density {
            Density::Single => TrackEncoding::Fm,
            _ => TrackEncoding::Mfm
        };
        let mut trk = Track::new(cyl,0,encoding);
        for s in 0..spt {
            let sec = cyl * spt + s + 1;
            if sec > state.sector_count {
                break;
            }
            let off = state.offset(sec);
            let len = state.len_of(sec);
            let size_code = (len / 128).trailing_zeros() as u8;
            let id = SectorId::new(cyl as u8,0,(s+1) as u8,size_code);
            trk.sectors.push(Sector::with_data(id,state.data[off..off+len].to_vec(),SectorStatus::Ok));
        }
        Ok(trk)
    }
    fn write_track(&self,img: &mut DiskImage,trk: &Track) -> Result<()> {
        if img.read_only {
            return Err(Error::ReadOnly);
        }
        let cylinders = img.geometry.cylinders;
        let state = img.plugin_state.as_mut()
            .and_then(|s| s.downcast_mut::<AtrState>())
            .ok_or(Error::InvalidArg("image does not belong to this plugin".to_string()))?;
        if trk.head != 0 || trk.cylinder >= cylinders {
            return Err(Error::Bounds);
        }
        let spt = state.sectors_per_track();
        for sec in &trk.sectors {
            let n = trk.cylinder * spt + sec.id.sector_id as usize;
            if sec.id.sector_id == 0 || n > state.sector_count {
                return Err(Error::Bounds);
            }
            let len = state.len_of(n);
            if sec.data.len() != len {
                return Err(Error::InvalidArg(format!("sector {} wants {} bytes",n,len)));
            }
            let off = state.offset(n);
            state.data[off..off+len].copy_from_slice(&sec.data);
        }
        if let Some(weak) = trk.downgraded_weak() {
            warn!("sector dump cannot carry fuzzy bits, downgrading to weak status");
            img.attach_track(weak)?;
        }
        Ok(())
    }
    fn to_bytes(&self,img: &DiskImage) -> Result<Vec<u8>> {
        let state = self.state(img)?;
        let mut ans = state.header.to_vec();
        ans.extend_from_slice(&state.data);
        Ok(ans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atr_bytes(sector_size: usize,sector_count: usize) -> Vec<u8> {
        let payload = match sector_size {
            128 => 128 * sector_count,
            _ => 384 + 256 * (sector_count - 3)
        };
        let paras = payload / 16;
        let mut dat = vec![0u8;HEADER_LEN + payload];
        dat[0] = 0x96;
        dat[1] = 0x02;
        dat[2] = (paras & 0xff) as u8;
        dat[3] = ((paras >> 8) & 0xff) as u8;
        dat[4] = (sector_size & 0xff) as u8;
        dat[5] = (sector_size >> 8) as u8;
        dat[6] = (paras >> 16) as u8;
        dat
    }

    #[test]
    fn density_rules() {
        assert_eq!(density_of(128,720),Density::Single);
        assert_eq!(density_of(128,1040),Density::Enhanced);
        assert_eq!(density_of(256,720),Density::Double);
        assert_eq!(density_of(256,1440),Density::Quad);
    }

    #[test]
    fn enhanced_density_open() {
        let img = Atr.open_bytes(&atr_bytes(128,1040),false).unwrap();
        assert_eq!(img.geometry.sectors_per_track,Some(26));
        assert_eq!(img.geometry.cylinders,40);
        assert_eq!(img.provenance.as_deref(),Some("enhanced density"));
    }

    #[test]
    fn boot_sectors_stay_short() {
        let img = Atr.open_bytes(&atr_bytes(256,720),false).unwrap();
        let trk = Atr.read_track(&img,0,0).unwrap();
        assert_eq!(trk.sectors[0].data.len(),128);
        assert_eq!(trk.sectors[2].data.len(),128);
        assert_eq!(trk.sectors[3].data.len(),256);
        assert_eq!(trk.encoding,TrackEncoding::Mfm);
    }

    #[test]
    fn truncated_file_rejected() {
        let mut dat = atr_bytes(128,720);
        dat.truncate(dat.len()-200);
        assert!(matches!(Atr.open_bytes(&dat,false),Err(Error::FormatTruncated)));
        assert!(Atr.probe(&dat,dat.len() as u64,None).unwrap().confidence < 95);
    }

    #[test]
    fn header_preserved_on_round_trip() {
        let mut dat = atr_bytes(128,720);
        dat[9] = 0x5a; // flag byte the plugin does not interpret
        let img = Atr.open_bytes(&dat,false).unwrap();
        assert_eq!(Atr.to_bytes(&img).unwrap(),dat);
    }

    #[test]
    fn write_track_round_trip() {
        let mut img = Atr.open_bytes(&atr_bytes(128,720),false).unwrap();
        let mut trk = Atr.read_track(&img,5,0).unwrap();
        trk.sectors[0].data = vec![0x11;128];
        Atr.write_track(&mut img,&trk).unwrap();
        let back = Atr.read_track(&img,5,0).unwrap();
        assert_eq!(back.sectors[0].data,vec![0x11;128]);
    }
}
