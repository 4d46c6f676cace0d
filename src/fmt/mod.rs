//! ## Shipped container plugins
//!
//! The reference plugin set.  Each submodule is one self-contained
//! `FormatPlugin` implementation; other containers plug in through the same
//! trait without touching the core.
//!
//! Registration order matters only as the last detection tie-break; magic
//! bearing formats go first so raw dumps never shadow them.

pub mod img;
pub mod nib;
pub mod d64;
pub mod atr;
pub mod msa;
pub mod hfe;

use crate::Result;
use crate::registry::Registry;

/// Register the reference plugin set.  Call once at startup.
pub fn register_builtin(reg: &mut Registry) -> Result<()> {
    reg.register(Box::new(hfe::Hfe))?;
    reg.register(Box::new(msa::Msa))?;
    reg.register(Box::new(atr::Atr))?;
    reg.register(Box::new(d64::D64))?;
    reg.register(Box::new(nib::Nib))?;
    reg.register(Box::new(img::RawDump::pc()))?;
    reg.register(Box::new(img::RawDump::atari_st()))?;
    reg.register(Box::new(img::RawDump::amiga()))?;
    Ok(())
}

/// A registry preloaded with the shipped plugins.
pub fn builtin_registry() -> Registry {
    let mut reg = Registry::new();
    register_builtin(&mut reg).expect("builtin plugin names are unique");
    reg
}
