//! # `fluxkit` main library
//!
//! This library recognizes, decodes, re-encodes, and cross-converts vintage
//! storage-media containers: sector dumps, nibble/bitstream track images, and
//! flux-level captures.  Manipulations can be done at a level as low as raw
//! flux intervals, or as high as decoded sector payloads.
//!
//! ## Architecture
//!
//! Everything is built around three pieces:
//! * `registry::FormatPlugin` is the codec contract; one implementation per
//!   container format, registered with a `registry::Registry`
//! * `model::DiskImage` is the format-independent in-memory representation,
//!   `DiskImage` -> `Track` -> `Sector`/`FluxStream`
//! * `codec` holds the pure encode/decode kernels (MFM/FM, Apple 6&2 GCR,
//!   Commodore 4-and-5 GCR) that plugins call to turn track bits into sectors
//!
//! A plugin's `open` parses metadata and geometry only; tracks are decoded on
//! demand through `read_track`.  The `detect` module ranks candidate plugins
//! for an unknown file using magic bytes, size classes, and extension hints,
//! with an optional deep probe pass over the whole file.
//!
//! ## Shipped plugins
//!
//! The reference plugin set in `fmt` covers raw PC/ST/Amiga sector dumps,
//! Apple NIB, Commodore D64, Atari ATR, Atari ST MSA, and HxC HFE.  Other
//! containers plug in through the same trait; the signature table in
//! `registry` already knows their magic bytes.

pub mod bits;
pub mod model;
pub mod codec;
pub mod geometry;
pub mod registry;
pub mod detect;
pub mod fmt;

use std::path::Path;
use log::{info,warn};

/// The single error taxonomy used across the library.  Every plugin
/// operation and kernel routine returns this type; per-sector CRC failures
/// are *not* errors (they ride along in `model::SectorStatus`).
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error("could not open file")]
    FileOpen(#[source] std::io::Error),
    #[error("could not read file")]
    FileRead(#[source] std::io::Error),
    #[error("could not write file")]
    FileWrite(#[source] std::io::Error),
    #[error("could not seek in file")]
    FileSeek(#[source] std::io::Error),
    #[error("file failed a structural check: {0}")]
    FormatInvalid(String),
    #[error("file ended before structure was complete")]
    FormatTruncated,
    #[error("checksum mismatch")]
    Crc,
    #[error("track or sector address out of the image's geometry")]
    Bounds,
    #[error("operation not supported by this plugin")]
    Unsupported,
    #[error("image was opened read-only")]
    ReadOnly,
    #[error("allocation refused")]
    OutOfMemory,
    #[error("auto-detection produced no confident winner")]
    Ambiguous,
    #[error("a plugin with this name is already registered")]
    DuplicateName,
    #[error("requested item not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T,Error>;

/// How many head bytes the fast detection pass is given.
pub const PROBE_HEAD_LEN: usize = 64 * 1024;

/// Extract the lower-cased extension of a path, if any.
fn path_extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

/// Open a disk image file, auto-detecting its format against `reg`.
/// On a confident detection the image is opened with the winning plugin.
/// If no candidate is confident the ranked list is logged and
/// `Error::Ambiguous` is returned; use `detect::run` directly to get the
/// list programmatically.
pub fn open_image(reg: &registry::Registry,path: &Path,read_only: bool) -> Result<model::DiskImage> {
    let data = std::fs::read(path).map_err(Error::FileRead)?;
    let head_len = usize::min(data.len(),PROBE_HEAD_LEN);
    let ext = path_extension(path);
    let verdict = detect::run(reg,&data[0..head_len],data.len() as u64,ext.as_deref(),Some(&data));
    match verdict {
        detect::Verdict::Confident(c) => {
            info!("detected {} ({})",c.plugin.name(),c.reason);
            c.plugin.open_bytes(&data,read_only)
        },
        detect::Verdict::Ambiguous(list) => {
            for c in &list {
                warn!("candidate {} confidence {} ({})",c.plugin.name(),c.confidence,c.reason);
            }
            Err(Error::Ambiguous)
        },
        detect::Verdict::Unknown => {
            warn!("no plugin recognized {}",path.display());
            Err(Error::FormatInvalid("unrecognized container".to_string()))
        }
    }
}

/// Open a disk image from an in-memory byte stream, auto-detecting its
/// format.  `maybe_ext` is an optional lower-case extension hint.
pub fn open_image_bytes(reg: &registry::Registry,data: &[u8],maybe_ext: Option<&str>,read_only: bool) -> Result<model::DiskImage> {
    let head_len = usize::min(data.len(),PROBE_HEAD_LEN);
    match detect::run(reg,&data[0..head_len],data.len() as u64,maybe_ext,Some(data)) {
        detect::Verdict::Confident(c) => {
            info!("detected {} ({})",c.plugin.name(),c.reason);
            c.plugin.open_bytes(data,read_only)
        },
        detect::Verdict::Ambiguous(_) => Err(Error::Ambiguous),
        detect::Verdict::Unknown => Err(Error::FormatInvalid("unrecognized container".to_string()))
    }
}

/// Run detection on a file without opening it, returning the verdict.
/// Useful when the caller wants the ranked candidate list rather than
/// an opened image.
pub fn detect_file<'a>(reg: &'a registry::Registry,path: &Path) -> Result<detect::Verdict<'a>> {
    let data = std::fs::read(path).map_err(Error::FileRead)?;
    let head_len = usize::min(data.len(),PROBE_HEAD_LEN);
    let ext = path_extension(path);
    Ok(detect::run(reg,&data[0..head_len],data.len() as u64,ext.as_deref(),Some(&data)))
}

/// Serialize an image back to its container format and save it.
/// The plugin that produced the image is looked up by its format tag.
pub fn save_image(reg: &registry::Registry,img: &model::DiskImage,path: &Path) -> Result<()> {
    let plugin = reg.find_by_name(img.format_tag).ok_or(Error::NotFound)?;
    let bytes = plugin.to_bytes(img)?;
    std::fs::write(path,bytes).map_err(Error::FileWrite)
}
