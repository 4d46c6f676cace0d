//! ## Codec kernels
//!
//! Pure, stateless encode/decode routines that turn raw track bits into
//! sector images and back.  Nothing in here touches files or plugin state;
//! the inputs are byte slices and bit cursors, the outputs are owned
//! `model` values.
//!
//! * `mfm` — IBM FM and MFM: address-mark search, CRC-16 verification,
//!   track synthesis with proper sync marks and gaps
//! * `gcr62` — Apple 6&2 (and 4&4) nibbles, whole-NIB-track scan and build
//! * `gcr45` — Commodore 4-and-5 GCR groups and sync realignment

pub mod mfm;
pub mod gcr62;
pub mod gcr45;

/// Build a weak-bit mask from repeated reads of the same sector payload.
/// Returns `None` when every read agrees (no fuzzy bits).  All reads must
/// be the same length as the first; shorter reads are ignored.
pub fn fuzzy_mask(reads: &[&[u8]]) -> Option<Vec<u8>> {
    let first = match reads.first() {
        Some(f) => f,
        None => return None
    };
    let mut mask = vec![0u8;first.len()];
    let mut any = false;
    for read in &reads[1..] {
        if read.len() != first.len() {
            continue;
        }
        for i in 0..first.len() {
            let diff = first[i] ^ read[i];
            if diff != 0 {
                mask[i] |= diff;
                any = true;
            }
        }
    }
    match any {
        true => Some(mask),
        false => None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_mask_marks_disagreements() {
        let r1 = [0xe5,0x00,0xff];
        let r2 = [0xe5,0x08,0xff];
        let r3 = [0xe5,0x00,0x7f];
        let mask = fuzzy_mask(&[&r1,&r2,&r3]).unwrap();
        assert_eq!(mask,vec![0x00,0x08,0x80]);
        assert!(fuzzy_mask(&[&r1,&r1]).is_none());
    }
}
