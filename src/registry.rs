//! ## Format plugin registry
//!
//! A `Registry` is an ordered, write-once collection of `FormatPlugin`
//! trait objects.  It is populated during startup and immutable afterwards;
//! every lookup is read-only so a shared reference can cross threads.
//!
//! Besides the registered plugins the detector knows a table of container
//! signatures, including formats with no shipped plugin.  A signature hit
//! on an unshipped format still shows up in the candidate explanation so
//! users learn what their file is even when we cannot open it.

use log::{debug,trace};
use crate::{Error,Result};
use crate::model::{DiskImage,Track};

/// What a plugin can do beyond opening.  `flux` must be set by any plugin
/// that produces `RAW_FLUX` tracks; callers use it to decide whether to run
/// the codec kernel.  `concurrent_reads` cleared means the dispatch layer
/// serializes `read_track` calls on one image.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub struct Capabilities {
    pub write: bool,
    pub flux: bool,
    pub concurrent_reads: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self { write: false, flux: false, concurrent_reads: true }
    }
}

/// A positive probe: how sure the plugin is, 0..=100, and a short
/// human-readable reason.  Scale: 95 and up means unique magic, 70..=94 a
/// strong structural match, 40..=69 a size or extension hint only.
pub struct Probe {
    pub confidence: u8,
    pub reason: String,
}

impl Probe {
    pub fn new(confidence: u8,reason: impl Into<String>) -> Self {
        Self { confidence, reason: reason.into() }
    }
}

/// The contract every container format implements.  Plugins are stateless
/// values; per-image state lives in the image's `plugin_state` box, so one
/// plugin instance serves any number of open images concurrently.
pub trait FormatPlugin: Send + Sync {
    /// unique registry key, also used as the image's format tag
    fn name(&self) -> &'static str;
    /// lower-case extensions this format is found under, not unique per plugin
    fn extensions(&self) -> &'static [&'static str];
    fn capabilities(&self) -> Capabilities;
    /// Pure pattern match over the head bytes (at most `PROBE_HEAD_LEN`),
    /// the full file length, and an optional lower-case extension hint.
    /// `None` means not this format.
    fn probe(&self,head: &[u8],size: u64,ext: Option<&str>) -> Option<Probe>;
    /// Second detection pass over the whole file, only invoked when the
    /// fast pass was inconclusive.  Default keeps the fast answer.
    fn deep_probe(&self,_whole: &[u8],fast: Probe) -> Probe {
        fast
    }
    /// Parse metadata and geometry; tracks are decoded lazily through
    /// `read_track`.  The returned image owns everything it needs.
    fn open_bytes(&self,dat: &[u8],read_only: bool) -> Result<DiskImage>;
    /// Decode one track.  Must be callable concurrently for distinct
    /// `(cyl,head)` on the same image unless `concurrent_reads` is cleared.
    fn read_track(&self,img: &DiskImage,cyl: usize,head: usize) -> Result<Track>;
    /// Re-encode a track into the image.  `ReadOnly` when the image was
    /// opened read-only, `Unsupported` when the plugin cannot write.
    fn write_track(&self,_img: &mut DiskImage,_trk: &Track) -> Result<()> {
        Err(Error::Unsupported)
    }
    /// Serialize the whole image back to container bytes.
    fn to_bytes(&self,img: &DiskImage) -> Result<Vec<u8>>;
}

/// One ranked detection result.
pub struct Candidate<'a> {
    pub plugin: &'a dyn FormatPlugin,
    pub confidence: u8,
    pub reason: String,
    /// registration order, the final tie-break
    pub order: usize,
}

/// Ordered plugin collection.  `register` is only called during startup;
/// afterwards the registry is immutable and safely shared across threads.
#[derive(Default)]
pub struct Registry {
    plugins: Vec<Box<dyn FormatPlugin>>,
}

impl Registry {
    pub fn new() -> Self {
        Self { plugins: Vec::new() }
    }
    /// Add a plugin, preserving order.  `DuplicateName` if the name is taken.
    pub fn register(&mut self,plugin: Box<dyn FormatPlugin>) -> Result<()> {
        if self.plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(Error::DuplicateName);
        }
        trace!("registered plugin {}",plugin.name());
        self.plugins.push(plugin);
        Ok(())
    }
    pub fn len(&self) -> usize {
        self.plugins.len()
    }
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &dyn FormatPlugin> {
        self.plugins.iter().map(|p| p.as_ref())
    }
    pub fn find_by_name(&self,name: &str) -> Option<&dyn FormatPlugin> {
        self.plugins.iter().find(|p| p.name() == name).map(|p| p.as_ref())
    }
    /// All plugins claiming the extension, case-insensitive, registration
    /// order.  Extensions are not unique: `dsk` maps to several formats.
    pub fn find_by_extension(&self,ext: &str) -> Vec<&dyn FormatPlugin> {
        let ext = ext.to_lowercase();
        self.plugins.iter()
            .filter(|p| p.extensions().contains(&ext.as_str()))
            .map(|p| p.as_ref())
            .collect()
    }
    /// Ask every plugin's `probe` and rank the positives: confidence
    /// descending, then registration order ascending.  Pure: nothing is
    /// opened and no state is kept.
    pub fn detect(&self,head: &[u8],size: u64,ext: Option<&str>) -> Vec<Candidate<'_>> {
        let mut ans: Vec<Candidate> = Vec::new();
        for (order,plugin) in self.plugins.iter().enumerate() {
            if let Some(probe) = plugin.probe(head,size,ext) {
                debug!("{} claims the file at confidence {} ({})",plugin.name(),probe.confidence,probe.reason);
                ans.push(Candidate {
                    plugin: plugin.as_ref(),
                    confidence: probe.confidence,
                    reason: probe.reason,
                    order,
                });
            }
        }
        // stable sort keeps registration order among equal confidences
        ans.sort_by(|a,b| b.confidence.cmp(&a.confidence));
        ans
    }
}

/// One known container signature.  `flux` marks flux-level formats, used
/// by the detection tie-break.
pub struct Signature {
    pub offset: usize,
    pub magic: &'static [u8],
    pub format: &'static str,
    pub confidence: u8,
    pub flux: bool,
}

/// Container signatures the detector knows, shipped plugin or not.
pub const SIGNATURES: [Signature;16] = [
    Signature { offset: 0, magic: b"HXCHFEV3", format: "HFE v3", confidence: 98, flux: false },
    Signature { offset: 0, magic: b"HXCPICFE", format: "HFE", confidence: 95, flux: false },
    Signature { offset: 0, magic: b"SCP", format: "SuperCard Pro", confidence: 95, flux: true },
    Signature { offset: 0, magic: b"IMD", format: "ImageDisk", confidence: 95, flux: false },
    Signature { offset: 0, magic: b"GCR-1541", format: "G64", confidence: 95, flux: false },
    Signature { offset: 0, magic: b"GCR-1571", format: "G71", confidence: 95, flux: false },
    Signature { offset: 0, magic: b"RSY\x00", format: "Pasti STX", confidence: 95, flux: false },
    Signature { offset: 0, magic: b"MV - CPCEMU", format: "CPC DSK", confidence: 95, flux: false },
    Signature { offset: 0, magic: b"EXTENDED", format: "CPC EDSK", confidence: 95, flux: false },
    Signature { offset: 0, magic: b"\x96\x02", format: "Atari ATR", confidence: 95, flux: false },
    Signature { offset: 0, magic: b"\x0e\x0f", format: "Atari ST MSA", confidence: 90, flux: false },
    Signature { offset: 0, magic: b"8BPS", format: "Photoshop (not a disk image)", confidence: 95, flux: false },
    Signature { offset: 0, magic: b"ZXTape!\x1a", format: "TZX", confidence: 95, flux: false },
    Signature { offset: 0, magic: b"PK\x03\x04", format: "ZIP container", confidence: 85, flux: false },
    Signature { offset: 0, magic: b"TC", format: "Transcopy", confidence: 70, flux: false },
    // ISO 9660 volume descriptor at sector 16 of a 2048-byte sectored image
    Signature { offset: 16*2048+1, magic: b"CD001", format: "ISO 9660", confidence: 90, flux: false },
];

/// First signature matching the head bytes, table order (most specific
/// first).
pub fn match_signature(head: &[u8]) -> Option<&'static Signature> {
    SIGNATURES.iter().find(|s| {
        match head.get(s.offset..s.offset+s.magic.len()) {
            Some(window) => window == s.magic,
            None => false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Geometry;

    struct Fake {
        name: &'static str,
        conf: u8,
    }
    impl FormatPlugin for Fake {
        fn name(&self) -> &'static str { self.name }
        fn extensions(&self) -> &'static [&'static str] { &["dsk","img"] }
        fn capabilities(&self) -> Capabilities { Capabilities::default() }
        fn probe(&self,_head: &[u8],_size: u64,_ext: Option<&str>) -> Option<Probe> {
            match self.conf {
                0 => None,
                c => Some(Probe::new(c,"test"))
            }
        }
        fn open_bytes(&self,_dat: &[u8],_read_only: bool) -> Result<DiskImage> {
            let mut img = DiskImage::alloc(self.name,1,1);
            img.geometry = Geometry::new(1,1);
            Ok(img)
        }
        fn read_track(&self,_img: &DiskImage,_cyl: usize,_head: usize) -> Result<Track> {
            Err(Error::Unsupported)
        }
        fn to_bytes(&self,_img: &DiskImage) -> Result<Vec<u8>> {
            Err(Error::Unsupported)
        }
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut reg = Registry::new();
        reg.register(Box::new(Fake { name: "a", conf: 50 })).unwrap();
        assert!(matches!(reg.register(Box::new(Fake { name: "a", conf: 60 })),Err(Error::DuplicateName)));
        assert_eq!(reg.len(),1);
    }

    #[test]
    fn extension_lookup_is_case_insensitive() {
        let mut reg = Registry::new();
        reg.register(Box::new(Fake { name: "a", conf: 50 })).unwrap();
        reg.register(Box::new(Fake { name: "b", conf: 50 })).unwrap();
        assert_eq!(reg.find_by_extension("DSK").len(),2);
        assert!(reg.find_by_extension("woz").is_empty());
        assert_eq!(reg.find_by_name("b").unwrap().name(),"b");
    }

    #[test]
    fn detect_ranks_by_confidence_then_order() {
        let mut reg = Registry::new();
        reg.register(Box::new(Fake { name: "low", conf: 40 })).unwrap();
        reg.register(Box::new(Fake { name: "tie1", conf: 80 })).unwrap();
        reg.register(Box::new(Fake { name: "silent", conf: 0 })).unwrap();
        reg.register(Box::new(Fake { name: "tie2", conf: 80 })).unwrap();
        let list = reg.detect(&[],0,None);
        let names: Vec<&str> = list.iter().map(|c| c.plugin.name()).collect();
        assert_eq!(names,vec!["tie1","tie2","low"]);
        assert_eq!(list[0].order,1);
    }

    #[test]
    fn signature_table_hits() {
        assert_eq!(match_signature(b"HXCPICFE....").unwrap().format,"HFE");
        assert_eq!(match_signature(b"HXCHFEV3....").unwrap().confidence,98);
        assert_eq!(match_signature(b"\x96\x02\x80\x16").unwrap().format,"Atari ATR");
        assert!(match_signature(b"nothing here").is_none());
    }
}
