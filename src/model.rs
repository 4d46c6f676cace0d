//! ## Unified disk model
//!
//! Owned value types shared by every plugin: `DiskImage` -> `Track` ->
//! `Sector` / `FluxStream`.  A `DiskImage` exclusively owns its tracks;
//! each track exclusively owns its sectors, raw bitstream, and flux stream.
//! Nothing in here is reference counted and nothing holds a back-pointer to
//! the plugin that produced it; the plugin keeps whatever it needs inside
//! the opaque `plugin_state` box.
//!
//! Track slots are addressed as `cyl * heads + head` and start out absent;
//! `FormatPlugin::read_track` decodes on demand and the caller may cache the
//! result back into the image with `attach_track`.

use std::any::Any;
use std::fmt;
use log::debug;
use crate::{Error,Result};

/// Per-track encoding scheme.  Sector-dump containers that never stored the
/// encoding still tag tracks with the scheme the original medium used.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum TrackEncoding {
    None,
    Fm,
    Mfm,
    GcrApple,
    GcrC64,
    RawFlux,
}

impl fmt::Display for TrackEncoding {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f,"none"),
            Self::Fm => write!(f,"FM"),
            Self::Mfm => write!(f,"MFM"),
            Self::GcrApple => write!(f,"GCR 6&2"),
            Self::GcrC64 => write!(f,"GCR 4-and-5"),
            Self::RawFlux => write!(f,"raw flux"),
        }
    }
}

/// Condition of a decoded sector.  `CrcError` sectors still carry their raw
/// payload; the caller chooses whether to trust it.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum SectorStatus {
    Ok,
    CrcError,
    DeletedDam,
    NotFound,
    Weak,
}

/// Broad mechanical class of the medium.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum MediaKind {
    Unknown,
    D525Dd,
    D525Hd,
    D35Dd,
    D35Hd,
    D3,
    D8,
    Cartridge,
    Tape,
    HardDisk,
}

impl fmt::Display for MediaKind {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f,"unknown"),
            Self::D525Dd => write!(f,"5.25 inch DD"),
            Self::D525Hd => write!(f,"5.25 inch HD"),
            Self::D35Dd => write!(f,"3.5 inch DD"),
            Self::D35Hd => write!(f,"3.5 inch HD"),
            Self::D3 => write!(f,"3 inch"),
            Self::D8 => write!(f,"8 inch"),
            Self::Cartridge => write!(f,"cartridge"),
            Self::Tape => write!(f,"tape"),
            Self::HardDisk => write!(f,"hard disk"),
        }
    }
}

/// Overall layout of the medium.  `sectors_per_track` and
/// `bytes_per_sector` are `None` when they vary across the disk (zoned
/// recording, mixed-size tracks).
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub struct Geometry {
    pub cylinders: usize,
    pub heads: usize,
    pub sectors_per_track: Option<usize>,
    pub bytes_per_sector: Option<usize>,
}

impl Geometry {
    pub fn new(cylinders: usize,heads: usize) -> Self {
        Self { cylinders, heads, sectors_per_track: None, bytes_per_sector: None }
    }
    pub fn with_sectors(mut self,spt: usize,bps: usize) -> Self {
        self.sectors_per_track = Some(spt);
        self.bytes_per_sector = Some(bps);
        self
    }
    pub fn track_count(&self) -> usize {
        self.cylinders * self.heads
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.sectors_per_track,self.bytes_per_sector) {
            (Some(s),Some(b)) => write!(f,"{}/{}/{}/{}",self.cylinders,self.heads,s,b),
            _ => write!(f,"{}/{}/var/var",self.cylinders,self.heads)
        }
    }
}

/// The sector id as recorded in the address field.  On protected disks this
/// may disagree with the physical position, so it is kept verbatim.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub struct SectorId {
    pub cyl_id: u8,
    pub head_id: u8,
    pub sector_id: u8,
    /// WD177x convention: size is `128 << size_code`, except GCR schemes
    /// where the format fixes the sector size
    pub size_code: u8,
}

impl SectorId {
    pub fn new(cyl_id: u8,head_id: u8,sector_id: u8,size_code: u8) -> Self {
        Self { cyl_id, head_id, sector_id, size_code }
    }
    pub fn size(&self) -> usize {
        128 << self.size_code as usize
    }
}

impl fmt::Display for SectorId {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,"C{} H{} R{} N{}",self.cyl_id,self.head_id,self.sector_id,self.size_code)
    }
}

/// One decoded sector.  `fuzzy_mask`, when present, is as long as `data`;
/// bit `i` of byte `i/8` set means that bit read differently across
/// revolutions (copy-protection weak bit).
#[derive(PartialEq,Eq,Clone,Debug)]
pub struct Sector {
    pub id: SectorId,
    pub data: Vec<u8>,
    pub status: SectorStatus,
    pub fuzzy_mask: Option<Vec<u8>>,
}

impl Sector {
    /// owned, zero-initialized payload of `size` bytes
    pub fn allocate(id: SectorId,size: usize) -> Self {
        Self { id, data: vec![0;size], status: SectorStatus::Ok, fuzzy_mask: None }
    }
    pub fn with_data(id: SectorId,data: Vec<u8>,status: SectorStatus) -> Self {
        Self { id, data, status, fuzzy_mask: None }
    }
}

/// Timing samples for one or more revolutions.  Samples are flux intervals
/// in ticks of `sample_clock_hz`; an interval too long for the container's
/// cell is carried as saturated samples that the producer has already
/// folded together, so consumers can treat the sequence as plain intervals.
#[derive(PartialEq,Eq,Clone,Debug)]
pub struct FluxStream {
    pub sample_clock_hz: u64,
    pub samples: Vec<u32>,
    pub index_positions: Vec<usize>,
}

impl FluxStream {
    pub fn new(sample_clock_hz: u64) -> Self {
        Self { sample_clock_hz, samples: Vec::new(), index_positions: Vec::new() }
    }
    /// total duration in ticks
    pub fn ticks(&self) -> u64 {
        self.samples.iter().map(|s| *s as u64).sum()
    }
}

/// One physical track on one head.  Sector-dump containers fill `sectors`
/// and leave `raw_data` empty; bitstream and flux containers carry the raw
/// side and may attach decoded sectors after a kernel pass.
#[derive(PartialEq,Eq,Clone,Debug)]
pub struct Track {
    pub cylinder: usize,
    pub head: usize,
    pub encoding: TrackEncoding,
    /// number of meaningful bits in `raw_data`
    pub raw_bits: Option<usize>,
    pub raw_data: Option<Vec<u8>>,
    pub sectors: Vec<Sector>,
    pub flux: Option<FluxStream>,
}

impl Track {
    pub fn new(cylinder: usize,head: usize,encoding: TrackEncoding) -> Self {
        Self { cylinder, head, encoding, raw_bits: None, raw_data: None, sectors: Vec::new(), flux: None }
    }
    pub fn with_bits(mut self,buf: Vec<u8>,bit_count: usize) -> Self {
        self.raw_bits = Some(bit_count);
        self.raw_data = Some(buf);
        self
    }
    /// reference to the sector whose recorded id matches, physical order
    /// need not agree with id order
    pub fn sector(&self,sector_id: u8) -> Option<&Sector> {
        self.sectors.iter().find(|s| s.id.sector_id == sector_id)
    }
    /// Copy of this track with every fuzzy mask dropped and the affected
    /// sectors downgraded to `Weak`.  `None` when no sector carries a mask.
    /// Writers targeting containers that cannot represent the mask attach
    /// this copy so the downgrade is visible in the image.
    pub fn downgraded_weak(&self) -> Option<Track> {
        if self.sectors.iter().all(|s| s.fuzzy_mask.is_none()) {
            return None;
        }
        let mut ans = self.clone();
        for sec in ans.sectors.iter_mut() {
            if sec.fuzzy_mask.take().is_some() {
                sec.status = SectorStatus::Weak;
            }
        }
        Some(ans)
    }
}

/// One decoded medium.  Owns the whole track tree; dropped as a unit.
pub struct DiskImage {
    /// name of the plugin that produced this image
    pub format_tag: &'static str,
    pub geometry: Geometry,
    pub media_kind: MediaKind,
    pub read_only: bool,
    pub label: Option<String>,
    /// free-form provenance, e.g. the creator string from the container
    pub provenance: Option<String>,
    /// slot per (cyl,head); `None` marks an unformatted or undecoded track
    tracks: Vec<Option<Track>>,
    /// owned by the producing plugin, opaque to everyone else
    pub plugin_state: Option<Box<dyn Any + Send + Sync>>,
}

impl DiskImage {
    /// Allocate the track slot array, all slots absent, geometry variable.
    pub fn alloc(format_tag: &'static str,cylinders: usize,heads: usize) -> Self {
        let mut tracks = Vec::new();
        tracks.resize_with(cylinders*heads,|| None);
        Self {
            format_tag,
            geometry: Geometry::new(cylinders,heads),
            media_kind: MediaKind::Unknown,
            read_only: false,
            label: None,
            provenance: None,
            tracks,
            plugin_state: None,
        }
    }
    fn slot(&self,cyl: usize,head: usize) -> Result<usize> {
        if cyl >= self.geometry.cylinders || head >= self.geometry.heads {
            debug!("cyl {} head {} outside geometry {}",cyl,head,self.geometry);
            return Err(Error::Bounds);
        }
        Ok(cyl * self.geometry.heads + head)
    }
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
    pub fn track(&self,cyl: usize,head: usize) -> Result<Option<&Track>> {
        Ok(self.tracks[self.slot(cyl,head)?].as_ref())
    }
    /// Cache a decoded track into its slot, replacing any previous decode.
    pub fn attach_track(&mut self,trk: Track) -> Result<()> {
        let slot = self.slot(trk.cylinder,trk.head)?;
        self.tracks[slot] = Some(trk);
        Ok(())
    }
    pub fn detach_track(&mut self,cyl: usize,head: usize) -> Result<Option<Track>> {
        let slot = self.slot(cyl,head)?;
        Ok(self.tracks[slot].take())
    }
    /// Reference to the attached sector whose recorded id matches.
    /// The track must have been decoded and attached first.
    pub fn sector_by_chs(&self,cyl: usize,head: usize,sec: u8) -> Result<&Sector> {
        match self.track(cyl,head)? {
            Some(trk) => trk.sector(sec).ok_or(Error::NotFound),
            None => Err(Error::NotFound)
        }
    }
    /// Structural equality: same geometry and the same sector set with
    /// identical ids, statuses, and payloads.  Raw bitstreams, flux, and
    /// plugin state are deliberately excluded (semantic round-trip law).
    pub fn same_decoded_content(&self,other: &DiskImage) -> bool {
        if self.geometry != other.geometry {
            return false;
        }
        for (a,b) in self.tracks.iter().zip(other.tracks.iter()) {
            let (asec,bsec) = match (a,b) {
                (Some(x),Some(y)) => (&x.sectors,&y.sectors),
                (None,None) => continue,
                _ => return false
            };
            if asec != bsec {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for DiskImage {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,"{} image, {} ({})",self.format_tag,self.geometry,self.media_kind)
    }
}
