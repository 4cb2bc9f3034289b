use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{LibraryError, smf};

/// A single note message, stripped down to what the synthesis side consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NoteEvent {
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    pub on: bool,
}

impl NoteEvent {
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self { channel, note, velocity, on: true }
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self { channel, note, velocity, on: false }
    }
}

/// A note event placed on the groove's own timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrooveEvent {
    /// Quarter-note beats from the start of the groove.
    pub time_in_beats: f64,
    pub message: NoteEvent,
}

/// One rhythm file from the library.
///
/// Created as an unparsed stub by a directory scan; `parsed()` produces the
/// filled-in replacement. A parsed groove is never mutated again.
#[derive(Debug, Clone)]
pub struct Groove {
    /// Display name (file stem).
    pub name: String,
    /// Name of the category directory the file was found in.
    pub category: String,
    pub path: PathBuf,
    /// Sorted ascending by `time_in_beats`; ties keep file order.
    pub events: Vec<GrooveEvent>,
    /// Whole bars, at least one.
    pub length_in_beats: f64,
    pub numerator: u8,
    pub denominator: u8,
    pub is_parsed: bool,
}

impl Groove {
    pub fn stub(name: &str, category: &str, path: &Path) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            path: path.to_path_buf(),
            events: Vec::new(),
            length_in_beats: 4.0,
            numerator: 4,
            denominator: 4,
            is_parsed: false,
        }
    }

    /// Beats in one bar of this groove's meter.
    pub fn beats_per_bar(&self) -> f64 {
        f64::from(self.numerator.max(1))
    }

    /// Read and parse the backing file. Already-parsed grooves come back as-is.
    pub fn parsed(&self) -> Result<Groove, LibraryError> {
        if self.is_parsed {
            return Ok(self.clone());
        }
        if !self.path.is_file() {
            return Err(LibraryError::NotFound(self.path.clone()));
        }
        let bytes = std::fs::read(&self.path)?;
        self.with_midi_bytes(&bytes)
    }

    /// Parse `bytes` as this groove's MIDI data.
    pub fn with_midi_bytes(&self, bytes: &[u8]) -> Result<Groove, LibraryError> {
        let midi = smf::parse(bytes).map_err(|e| LibraryError::Malformed {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        let mut events = midi.events;
        let length_in_beats = length_in_beats(&events, midi.numerator);
        // Events inside the barline tolerance sit on the barline.
        for event in events.iter_mut().rev() {
            if event.time_in_beats <= length_in_beats {
                break;
            }
            event.time_in_beats = length_in_beats;
        }

        log::debug!(
            "Parsed groove '{}' ({} events, {} beats, {}/{})",
            self.name,
            events.len(),
            length_in_beats,
            midi.numerator,
            midi.denominator
        );

        Ok(Groove {
            name: self.name.clone(),
            category: self.category.clone(),
            path: self.path.clone(),
            events,
            length_in_beats,
            numerator: midi.numerator,
            denominator: midi.denominator,
            is_parsed: true,
        })
    }

    /// Number of note-on events (the hits used for matching).
    pub fn note_on_count(&self) -> usize {
        self.events.iter().filter(|e| e.message.on).count()
    }
}

/// Latest event time rounded up to whole bars, never less than one bar.
pub fn length_in_beats(events: &[GrooveEvent], numerator: u8) -> f64 {
    let beats_per_bar = f64::from(numerator.max(1));
    let max_time = events
        .iter()
        .map(|e| e.time_in_beats)
        .fold(0.0_f64, f64::max);

    // Tick rounding can leave a note-off a hair past the barline.
    let bars = (max_time / beats_per_bar - 1e-6).ceil().max(1.0);
    bars * beats_per_bar
}

/// A directory of grooves.
#[derive(Debug, Clone, Default)]
pub struct GrooveCategory {
    pub name: String,
    pub grooves: Vec<Arc<Groove>>,
}
