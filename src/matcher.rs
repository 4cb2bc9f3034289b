//! Ranks library grooves against an analyzed rhythm.
//!
//! Both rhythms are folded into one bar of sixteen slots and compared two
//! ways: cosine similarity of the peak-normalised slot counts, and a fuzzy
//! positional overlap that forgives a hit landing one slot off.

use rayon::prelude::*;
use serde::Serialize;

use crate::analyzer::RhythmPattern;
use crate::library::{Groove, GrooveStore};

pub const SLOTS: usize = 16;

const COSINE_WEIGHT: f64 = 0.6;
const POSITION_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrooveMatch {
    pub category_index: usize,
    pub groove_index: usize,
    pub groove_name: String,
    pub category_name: String,
    /// 0..=100, higher is better.
    pub match_score: f64,
    /// Grooves carry no tempo of their own, so this is always 0 for now.
    pub bpm_difference: f64,
}

/// Slot of a beat time within a bar of `bar_length` beats.
pub fn slot_of(time_in_beats: f64, bar_length: f64) -> usize {
    let phase = time_in_beats % bar_length / bar_length;
    ((phase * SLOTS as f64).floor() as i64).clamp(0, SLOTS as i64 - 1) as usize
}

/// Hit counts per slot, accumulated across every bar.
pub fn histogram(times: impl IntoIterator<Item = f64>, bar_length: f64) -> [u32; SLOTS] {
    let mut hits = [0_u32; SLOTS];
    for t in times {
        hits[slot_of(t, bar_length)] += 1;
    }
    hits
}

fn cosine_similarity(a: &[u32; SLOTS], b: &[u32; SLOTS]) -> f64 {
    let peak_a = f64::from(a.iter().copied().max().unwrap_or(0).max(1));
    let peak_b = f64::from(b.iter().copied().max().unwrap_or(0).max(1));

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for i in 0..SLOTS {
        let x = f64::from(a[i]) / peak_a;
        let y = f64::from(b[i]) / peak_b;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a < 1e-4 || norm_b < 1e-4 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

fn hit_near(hits: &[u32; SLOTS], slot: usize) -> bool {
    hits[slot] > 0
        || (slot > 0 && hits[slot - 1] > 0)
        || (slot + 1 < SLOTS && hits[slot + 1] > 0)
}

/// Fraction of occupied slots whose hit has a partner within one slot in the
/// other rhythm. Neighbours do not wrap across the barline.
///
/// A slot occupied in both rhythms still counts once.
fn position_score(audio: &[u32; SLOTS], groove: &[u32; SLOTS]) -> f64 {
    let mut matched = 0_u32;
    let mut occupied = 0_u32;
    for i in 0..SLOTS {
        let audio_hit = audio[i] > 0;
        let groove_hit = groove[i] > 0;
        if !audio_hit && !groove_hit {
            continue;
        }
        occupied += 1;
        if (audio_hit && hit_near(groove, i)) || (groove_hit && hit_near(audio, i)) {
            matched += 1;
        }
    }
    if occupied == 0 {
        0.0
    } else {
        f64::from(matched) / f64::from(occupied)
    }
}

/// Score one parsed groove against a pattern, 0..=100.
pub fn similarity(pattern: &RhythmPattern, groove: &Groove) -> f64 {
    if pattern.onset_times_beats.is_empty() || groove.note_on_count() == 0 {
        return 0.0;
    }

    let bar_length = f64::from(pattern.beats_per_bar.max(1));
    let audio = histogram(pattern.onset_times_beats.iter().copied(), bar_length);
    let groove_hits = histogram(
        groove
            .events
            .iter()
            .filter(|e| e.message.on)
            .map(|e| e.time_in_beats),
        bar_length,
    );

    let cosine = cosine_similarity(&audio, &groove_hits);
    let position = position_score(&audio, &groove_hits);

    (COSINE_WEIGHT * cosine + POSITION_WEIGHT * position) * 100.0
}

/// Score every groove in the library, best first.
///
/// Grooves are parsed on demand; ones that fail to load are left out. Ties
/// keep library order. `max_results` caps the list.
pub fn find_matches(
    store: &GrooveStore,
    pattern: &RhythmPattern,
    max_results: Option<usize>,
) -> Vec<GrooveMatch> {
    let mut matches: Vec<GrooveMatch> = store
        .indices()
        .par_iter()
        .filter_map(|&(c, g)| {
            let groove = match store.load(c, g) {
                Ok(groove) => groove,
                Err(e) => {
                    log::debug!("Skipping groove {}/{} in matching: {}", c, g, e);
                    return None;
                }
            };
            Some(GrooveMatch {
                category_index: c,
                groove_index: g,
                groove_name: groove.name.clone(),
                category_name: groove.category.clone(),
                match_score: similarity(pattern, &groove),
                bpm_difference: 0.0,
            })
        })
        .collect();

    // Stable, so equal scores stay in (category, groove) order.
    matches.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));
    if let Some(max) = max_results {
        matches.truncate(max);
    }

    log::debug!("Scored {} grooves", matches.len());
    matches
}
