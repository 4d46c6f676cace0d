//! ## Geometry inference
//!
//! Raw sector dumps carry no header, so the only clue is the file length.
//! The table below maps known lengths onto full geometries; first match
//! wins and plugins that accept several platforms at one length order
//! their own lookups accordingly.

use log::debug;
use crate::{Error,Result};
use crate::model::{Geometry,MediaKind,TrackEncoding};

/// Machine family a geometry entry belongs to.  Used by the raw-dump
/// plugins to claim only their own platforms at a shared length.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum Platform {
    Pc,
    Apple2,
    AtariSt,
    Amiga,
    C64,
    Ibm8Inch,
}

#[derive(Clone,Copy,Debug)]
pub struct GeomEntry {
    pub size: usize,
    pub cylinders: usize,
    pub heads: usize,
    pub sectors: usize,
    pub sector_size: usize,
    /// lowest sector id recorded in the address fields
    pub first_sector: u8,
    pub encoding: TrackEncoding,
    pub platform: Platform,
    pub media: MediaKind,
    pub desc: &'static str,
}

/// Known raw-dump lengths, first match wins.  Lengths shared by several
/// platforms appear once per platform, most common first.
pub const SIZE_TABLE: [GeomEntry;18] = [
    GeomEntry { size: 143360, cylinders: 35, heads: 1, sectors: 16, sector_size: 256, first_sector: 0,
        encoding: TrackEncoding::GcrApple, platform: Platform::Apple2, media: MediaKind::D525Dd, desc: "Apple 5.25 inch 140K" },
    GeomEntry { size: 163840, cylinders: 40, heads: 1, sectors: 8, sector_size: 512, first_sector: 1,
        encoding: TrackEncoding::Mfm, platform: Platform::Pc, media: MediaKind::D525Dd, desc: "PC 160K SS/DD" },
    GeomEntry { size: 184320, cylinders: 40, heads: 1, sectors: 9, sector_size: 512, first_sector: 1,
        encoding: TrackEncoding::Mfm, platform: Platform::Pc, media: MediaKind::D525Dd, desc: "PC 180K SS/DD" },
    GeomEntry { size: 327680, cylinders: 40, heads: 2, sectors: 8, sector_size: 512, first_sector: 1,
        encoding: TrackEncoding::Mfm, platform: Platform::Pc, media: MediaKind::D525Dd, desc: "PC 320K DS/DD" },
    GeomEntry { size: 368640, cylinders: 40, heads: 2, sectors: 9, sector_size: 512, first_sector: 1,
        encoding: TrackEncoding::Mfm, platform: Platform::Pc, media: MediaKind::D525Dd, desc: "PC 360K DS/DD" },
    GeomEntry { size: 368640, cylinders: 80, heads: 1, sectors: 9, sector_size: 512, first_sector: 1,
        encoding: TrackEncoding::Mfm, platform: Platform::AtariSt, media: MediaKind::D35Dd, desc: "Atari ST 360K SS" },
    GeomEntry { size: 737280, cylinders: 80, heads: 2, sectors: 9, sector_size: 512, first_sector: 1,
        encoding: TrackEncoding::Mfm, platform: Platform::Pc, media: MediaKind::D35Dd, desc: "PC 720K DS/DD" },
    GeomEntry { size: 737280, cylinders: 80, heads: 2, sectors: 9, sector_size: 512, first_sector: 1,
        encoding: TrackEncoding::Mfm, platform: Platform::AtariSt, media: MediaKind::D35Dd, desc: "Atari ST 720K DS" },
    GeomEntry { size: 737280, cylinders: 80, heads: 2, sectors: 9, sector_size: 512, first_sector: 0,
        encoding: TrackEncoding::Mfm, platform: Platform::Amiga, media: MediaKind::D35Dd, desc: "Amiga 720K (PC layout)" },
    GeomEntry { size: 1228800, cylinders: 80, heads: 2, sectors: 15, sector_size: 512, first_sector: 1,
        encoding: TrackEncoding::Mfm, platform: Platform::Pc, media: MediaKind::D525Hd, desc: "PC 1.2M DS/HD" },
    GeomEntry { size: 1474560, cylinders: 80, heads: 2, sectors: 18, sector_size: 512, first_sector: 1,
        encoding: TrackEncoding::Mfm, platform: Platform::Pc, media: MediaKind::D35Hd, desc: "PC 1.44M DS/HD" },
    GeomEntry { size: 2949120, cylinders: 80, heads: 2, sectors: 36, sector_size: 512, first_sector: 1,
        encoding: TrackEncoding::Mfm, platform: Platform::Pc, media: MediaKind::D35Hd, desc: "PC 2.88M DS/ED" },
    GeomEntry { size: 901120, cylinders: 80, heads: 2, sectors: 11, sector_size: 512, first_sector: 0,
        encoding: TrackEncoding::Mfm, platform: Platform::Amiga, media: MediaKind::D35Dd, desc: "Amiga DD 880K" },
    GeomEntry { size: 1802240, cylinders: 80, heads: 2, sectors: 22, sector_size: 512, first_sector: 0,
        encoding: TrackEncoding::Mfm, platform: Platform::Amiga, media: MediaKind::D35Hd, desc: "Amiga HD 1.76M" },
    GeomEntry { size: 819200, cylinders: 80, heads: 2, sectors: 10, sector_size: 512, first_sector: 1,
        encoding: TrackEncoding::Mfm, platform: Platform::AtariSt, media: MediaKind::D35Dd, desc: "Atari ST 800K DS" },
    GeomEntry { size: 256256, cylinders: 77, heads: 1, sectors: 26, sector_size: 128, first_sector: 1,
        encoding: TrackEncoding::Fm, platform: Platform::Ibm8Inch, media: MediaKind::D8, desc: "IBM 8 inch SSSD 250K" },
    GeomEntry { size: 512512, cylinders: 77, heads: 1, sectors: 26, sector_size: 256, first_sector: 1,
        encoding: TrackEncoding::Mfm, platform: Platform::Ibm8Inch, media: MediaKind::D8, desc: "IBM 8 inch SSDD 500K" },
    GeomEntry { size: 1025024, cylinders: 77, heads: 2, sectors: 26, sector_size: 256, first_sector: 1,
        encoding: TrackEncoding::Mfm, platform: Platform::Ibm8Inch, media: MediaKind::D8, desc: "IBM 8 inch DSDD 1M" },
];

impl GeomEntry {
    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.cylinders,self.heads).with_sectors(self.sectors,self.sector_size)
    }
}

/// First table entry matching the length, `FormatInvalid` when unknown.
pub fn infer(len: usize) -> Result<&'static GeomEntry> {
    match SIZE_TABLE.iter().find(|e| e.size == len) {
        Some(entry) => Ok(entry),
        None => {
            debug!("no geometry matches length {}",len);
            Err(Error::FormatInvalid(format!("unrecognized image length {}",len)))
        }
    }
}

/// First entry matching both length and platform.
pub fn infer_for(len: usize,platform: Platform) -> Option<&'static GeomEntry> {
    SIZE_TABLE.iter().find(|e| e.size == len && e.platform == platform)
}

/// Every platform that claims this length, table order.
pub fn platforms_for(len: usize) -> Vec<Platform> {
    SIZE_TABLE.iter().filter(|e| e.size == len).map(|e| e.platform).collect()
}
