//! ## Auto-detection pipeline
//!
//! Two passes over the registry.  The fast pass ranks every plugin's
//! `probe` answer from the head bytes, file size, and extension hint.  The
//! deep pass runs only when the fast pass was inconclusive (top candidate
//! below 90 with a close runner-up) and lets the tied plugins read the
//! whole file.
//!
//! The pipeline never guesses: a winner needs confidence 70 or better,
//! otherwise the caller gets the full ranked list and decides.

use log::{debug,info,warn};
use crate::registry::{Registry,Candidate,match_signature};

/// deep pass runs when the leader is below this
const CONFIDENT: u8 = 90;
/// deep pass runs when the runner-up is within this many points
const CLOSE_RACE: u8 = 10;
/// minimum confidence for an automatic open
const WINNER: u8 = 70;

/// Outcome of the pipeline.
pub enum Verdict<'a> {
    /// a single candidate at confidence 70 or better
    Confident(Candidate<'a>),
    /// ranked list, no automatic winner
    Ambiguous(Vec<Candidate<'a>>),
    /// nothing claimed the file
    Unknown,
}

fn needs_deep_pass(list: &[Candidate]) -> bool {
    match list {
        [first,second,..] => first.confidence < CONFIDENT
            && first.confidence - second.confidence <= CLOSE_RACE,
        _ => false
    }
}

/// Run detection.  `head` is at most `PROBE_HEAD_LEN` bytes from the start
/// of the file, `whole` the entire file when available for the deep pass.
pub fn run<'a>(reg: &'a Registry,head: &[u8],size: u64,ext: Option<&str>,whole: Option<&[u8]>) -> Verdict<'a> {
    let mut list = reg.detect(head,size,ext);

    // known magic with no shipped plugin still deserves a name
    let sig = match_signature(head);
    if let Some(sig) = sig {
        if !list.iter().any(|c| c.plugin.name() == sig.format) {
            info!("file signature reads as {} (confidence {})",sig.format,sig.confidence);
        }
    }
    if list.is_empty() {
        debug!("no plugin claims the file, head starts {}",
            hex::encode(&head[0..usize::min(8,head.len())]));
        return Verdict::Unknown;
    }

    if needs_deep_pass(&list) {
        if let Some(whole) = whole {
            debug!("close race at confidence {}, running deep pass",list[0].confidence);
            let threshold = list[0].confidence.saturating_sub(CLOSE_RACE);
            for cand in list.iter_mut().filter(|c| c.confidence >= threshold) {
                let fast = crate::registry::Probe::new(cand.confidence,cand.reason.clone());
                let refined = cand.plugin.deep_probe(whole,fast);
                if refined.confidence != cand.confidence {
                    debug!("{} refined {} -> {}",cand.plugin.name(),cand.confidence,refined.confidence);
                }
                cand.confidence = refined.confidence;
                cand.reason = refined.reason;
            }
            list.sort_by(|a,b| b.confidence.cmp(&a.confidence).then(a.order.cmp(&b.order)));
        }
    }

    // tie-break among equal leaders: a flux-capable plugin wins for
    // flux-like files, then registration order
    let flux_like = sig.map(|s| s.flux).unwrap_or(false);
    let top_conf = list[0].confidence;
    let mut winner = 0;
    if flux_like {
        if let Some(i) = list.iter().position(|c| c.confidence == top_conf && c.plugin.capabilities().flux) {
            winner = i;
        }
    }

    if top_conf >= WINNER {
        return Verdict::Confident(list.swap_remove(winner));
    }
    warn!("no confident winner, best is {} at {}",list[0].plugin.name(),top_conf);
    Verdict::Ambiguous(list)
}
