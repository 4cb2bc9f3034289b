//! The composition timeline: grooves laid end to end, each clipped to a bar count.
//!
//! Items are always packed: the first starts at beat 0 and each later item
//! starts where the previous one ends.

pub mod export;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::library::Groove;

/// How much of a groove to place on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BarCount {
    /// The groove's full length.
    #[default]
    All,
    Bars(u32),
}

impl BarCount {
    /// Zero bars means the whole groove.
    pub fn from_bars(bars: u32) -> Self {
        if bars == 0 { Self::All } else { Self::Bars(bars) }
    }
}

impl FromStr for BarCount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<u32>()
            .map(Self::from_bars)
            .map_err(|_| format!("invalid bar count '{}': expected a number or 'all'", s))
    }
}

impl fmt::Display for BarCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Bars(n) => write!(f, "{}", n),
        }
    }
}

/// One groove placed on the timeline.
#[derive(Debug, Clone)]
pub struct ComposerItem {
    pub category_index: usize,
    pub groove_index: usize,
    /// The parsed groove this item plays.
    pub groove: Arc<Groove>,
    /// Sum of the lengths of all earlier items.
    pub start_beat: f64,
    /// Never longer than the groove itself.
    pub length_in_beats: f64,
}

impl ComposerItem {
    pub fn end_beat(&self) -> f64 {
        self.start_beat + self.length_in_beats
    }
}

#[derive(Debug, Clone, Default)]
pub struct Composition {
    items: Vec<ComposerItem>,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[ComposerItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_length_in_beats(&self) -> f64 {
        self.items.iter().map(|i| i.length_in_beats).sum()
    }

    /// Add a parsed groove at the end of the timeline. Returns the new item's
    /// index, or None (leaving the timeline alone) for an unparsed groove.
    pub fn append(
        &mut self,
        category_index: usize,
        groove_index: usize,
        groove: Arc<Groove>,
        bars: BarCount,
    ) -> Option<usize> {
        debug_assert!(groove.is_parsed, "appending unparsed groove '{}'", groove.name);
        if !groove.is_parsed {
            return None;
        }

        let length_in_beats = match bars {
            BarCount::All => groove.length_in_beats,
            BarCount::Bars(n) => (f64::from(n) * groove.beats_per_bar()).min(groove.length_in_beats),
        };
        let start_beat = self.total_length_in_beats();

        log::debug!(
            "Composition: appended '{}' ({} bars, {} beats) at beat {}",
            groove.name,
            bars,
            length_in_beats,
            start_beat
        );

        self.items.push(ComposerItem {
            category_index,
            groove_index,
            groove,
            start_beat,
            length_in_beats,
        });
        Some(self.items.len() - 1)
    }

    /// Remove an item and pull every later item back by its length.
    pub fn remove(&mut self, index: usize) -> Option<ComposerItem> {
        debug_assert!(index < self.items.len(), "composer index {} out of range", index);
        if index >= self.items.len() {
            return None;
        }

        let removed = self.items.remove(index);
        for item in &mut self.items[index..] {
            item.start_beat -= removed.length_in_beats;
        }
        log::debug!("Composition: removed item {} ('{}')", index, removed.groove.name);
        Some(removed)
    }

    /// Move an item to a new position and re-pack the whole timeline.
    pub fn move_item(&mut self, from: usize, to: usize) -> bool {
        let len = self.items.len();
        debug_assert!(from < len && to < len, "composer move {} -> {} out of range", from, to);
        if from >= len || to >= len {
            return false;
        }
        if from == to {
            return true;
        }

        let item = self.items.remove(from);
        self.items.insert(to, item);
        self.repack();
        log::debug!("Composition: moved item {} -> {}", from, to);
        true
    }

    pub fn clear(&mut self) {
        self.items.clear();
        log::debug!("Composition: cleared");
    }

    fn repack(&mut self) {
        let mut start = 0.0;
        for item in &mut self.items {
            item.start_beat = start;
            start += item.length_in_beats;
        }
    }
}
