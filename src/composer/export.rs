//! Writing grooves and compositions out as standalone MIDI files.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use midly::num::{u4, u7, u15, u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use thiserror::Error;
use walkdir::WalkDir;

use super::Composition;
use crate::library::{Groove, NoteEvent};

/// Resolution of exported compositions.
pub const TICKS_PER_QUARTER: u16 = 480;
/// Exported files carry a fixed 120 BPM; the host applies its own tempo.
const EXPORT_US_PER_QUARTER: u32 = 500_000;
const TRACK_NAME: &[u8] = b"Bandmate Composition";
/// Characters that are not safe in exported file names.
const UNSAFE_CHARS: &[char] = &[' ', '/', '\\', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Composition is empty")]
    EmptyComposition,
    #[error("Source file not found: {0}")]
    NotFound(PathBuf),
    #[error("Export wrote an empty file: {0}")]
    EmptyFile(PathBuf),
    #[error("Library error: {0}")]
    Library(#[from] crate::library::LibraryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A note event at an absolute export tick.
#[derive(Debug, Clone, Copy)]
struct TimedNote {
    tick: u32,
    note: NoteEvent,
}

fn to_tick(beats: f64) -> u32 {
    (beats * f64::from(TICKS_PER_QUARTER)).round().max(0.0) as u32
}

/// Every item's clipped events on the composition timeline, with each
/// note-on paired to a note-off. Hits still sounding at the end of an item
/// are closed at the item boundary.
fn composition_notes(composition: &Composition) -> Vec<TimedNote> {
    let mut notes = Vec::new();

    for item in composition.items() {
        let mut open: Vec<NoteEvent> = Vec::new();
        for event in item.groove.events.iter().filter(|e| e.time_in_beats < item.length_in_beats) {
            let msg = event.message;
            if msg.on {
                open.push(msg);
            } else if let Some(i) = open
                .iter()
                .position(|o| o.channel == msg.channel && o.note == msg.note)
            {
                open.remove(i);
            } else {
                // A note-off with no note-on inside the clip.
                continue;
            }
            notes.push(TimedNote {
                tick: to_tick(item.start_beat + event.time_in_beats),
                note: msg,
            });
        }

        let end = to_tick(item.end_beat());
        for o in open {
            notes.push(TimedNote {
                tick: end,
                note: NoteEvent::note_off(o.channel, o.note, 0),
            });
        }
    }

    // Stable; at equal ticks note-offs go first so a re-hit isn't cut short.
    notes.sort_by_key(|n| (n.tick, n.note.on));
    notes
}

fn meta(delta: u32, message: MetaMessage<'_>) -> TrackEvent<'_> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Meta(message),
    }
}

/// Encode a composition as a single-track Standard MIDI File.
pub fn composition_to_midi(composition: &Composition) -> Result<Vec<u8>, ExportError> {
    let first = composition.items().first().ok_or(ExportError::EmptyComposition)?;
    let numerator = first.groove.numerator.max(1);
    let denominator_pow = first.groove.denominator.max(1).trailing_zeros() as u8;

    let mut track: Vec<TrackEvent<'_>> = vec![
        meta(0, MetaMessage::TrackName(TRACK_NAME)),
        meta(0, MetaMessage::Tempo(u24::new(EXPORT_US_PER_QUARTER))),
        meta(0, MetaMessage::TimeSignature(numerator, denominator_pow, 24, 8)),
    ];

    let mut last_tick = 0_u32;
    for timed in composition_notes(composition) {
        let key = u7::new(timed.note.note.min(127));
        let vel = u7::new(timed.note.velocity.min(127));
        let message = if timed.note.on {
            MidiMessage::NoteOn { key, vel }
        } else {
            MidiMessage::NoteOff { key, vel }
        };
        track.push(TrackEvent {
            delta: u28::new(timed.tick - last_tick),
            kind: TrackEventKind::Midi {
                channel: u4::new(timed.note.channel.min(15)),
                message,
            },
        });
        last_tick = timed.tick;
    }

    let end = to_tick(composition.total_length_in_beats()).max(last_tick);
    track.push(meta(end - last_tick, MetaMessage::EndOfTrack));

    let smf = Smf {
        header: Header::new(Format::SingleTrack, Timing::Metrical(u15::new(TICKS_PER_QUARTER))),
        tracks: vec![track],
    };
    let mut bytes = Vec::new();
    smf.write_std(&mut bytes)?;
    Ok(bytes)
}

/// Write a composition into `dir` as `composition_<unix millis>.mid`.
pub fn export_composition(composition: &Composition, dir: &Path) -> Result<PathBuf, ExportError> {
    let bytes = composition_to_midi(composition)?;
    std::fs::create_dir_all(dir)?;

    let path = dir.join(format!(
        "composition_{}.mid",
        chrono::Utc::now().timestamp_millis()
    ));
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    std::fs::write(&path, &bytes)?;

    if std::fs::metadata(&path)?.len() == 0 {
        return Err(ExportError::EmptyFile(path));
    }
    log::info!("Exported composition to {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

/// File name for an exported groove, with path and shell metacharacters replaced.
pub fn sanitized_file_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect();
    format!("{}.mid", safe)
}

/// Copy a groove's source file into `dir`.
///
/// Falls back to the original path when the copy fails, since the original
/// is still readable in place.
pub fn export_groove(groove: &Groove, dir: &Path) -> Result<PathBuf, ExportError> {
    if !groove.path.is_file() {
        return Err(ExportError::NotFound(groove.path.clone()));
    }

    let dest = dir.join(sanitized_file_name(&groove.name));
    let copied = std::fs::create_dir_all(dir).and_then(|_| std::fs::copy(&groove.path, &dest));
    match copied {
        Ok(_) => {
            log::info!("Exported groove '{}' to {}", groove.name, dest.display());
            Ok(dest)
        }
        Err(e) => {
            log::warn!(
                "Failed to copy groove '{}' to {}: {}. Using original file.",
                groove.name,
                dest.display(),
                e
            );
            Ok(groove.path.clone())
        }
    }
}

/// Delete exported `.mid` files in `dir` last modified more than `max_age` ago.
/// Returns how many were removed.
pub fn cleanup_old_exports(dir: &Path, max_age: Duration) -> Result<usize, ExportError> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let cutoff = SystemTime::now().checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0;
    let files = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("mid"))
        });

    for entry in files {
        let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
        match modified {
            Some(time) if time < cutoff => {}
            _ => continue,
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                log::debug!("Removed old export {}", entry.path().display());
                removed += 1;
            }
            Err(e) => log::warn!("Failed to remove {}: {}", entry.path().display(), e),
        }
    }

    if removed > 0 {
        log::info!("Cleaned up {} old exports in {}", removed, dir.display());
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::BarCount;
    use crate::composer::tests::groove;
    use crate::test_support::{TempDir, write_groove};

    fn composition() -> Composition {
        let mut comp = Composition::new();
        comp.append(0, 0, groove("a", 4, 2), BarCount::All);
        comp.append(0, 1, groove("b", 4, 2), BarCount::Bars(1));
        comp.append(0, 2, groove("c", 4, 1), BarCount::All);
        comp
    }

    fn clipped_event_count(comp: &Composition) -> usize {
        comp.items()
            .iter()
            .map(|i| {
                i.groove
                    .events
                    .iter()
                    .filter(|e| e.time_in_beats < i.length_in_beats)
                    .count()
            })
            .sum()
    }

    #[test]
    fn test_round_trip() {
        let comp = composition();
        let bytes = composition_to_midi(&comp).unwrap();
        let parsed = Groove::stub("export", "Export", Path::new("export.mid"))
            .with_midi_bytes(&bytes)
            .unwrap();

        assert_eq!(parsed.events.len(), clipped_event_count(&comp));
        assert!((parsed.length_in_beats - comp.total_length_in_beats()).abs() <= 1.0 / 480.0);
        assert_eq!(parsed.numerator, 4);
        assert_eq!(parsed.denominator, 4);
    }

    #[test]
    fn test_header_meta_and_end_of_track() {
        let comp = composition();
        let bytes = composition_to_midi(&comp).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.header.format, Format::SingleTrack);
        assert_eq!(smf.header.timing, Timing::Metrical(u15::new(480)));
        assert_eq!(smf.tracks.len(), 1);

        let track = &smf.tracks[0];
        assert!(matches!(track[0].kind, TrackEventKind::Meta(MetaMessage::TrackName(_))));
        assert!(matches!(track[1].kind, TrackEventKind::Meta(MetaMessage::Tempo(t)) if t.as_int() == 500_000));
        assert!(matches!(track[2].kind, TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, _, _))));

        let last = track.last().unwrap();
        assert!(matches!(last.kind, TrackEventKind::Meta(MetaMessage::EndOfTrack)));
        let total_ticks: u32 = track.iter().map(|e| e.delta.as_int()).sum();
        assert_eq!(total_ticks, 16 * 480);
    }

    #[test]
    fn test_hanging_note_closed_at_item_end() {
        let mut comp = Composition::new();
        // One bar of a groove whose second-bar hits are clipped away; the
        // last in-clip hit at beat 3.5 would have its off at 4.0.
        let mut long = (*groove("long", 4, 2)).clone();
        for e in &mut long.events {
            e.time_in_beats += 0.5;
        }
        comp.append(0, 0, std::sync::Arc::new(long), BarCount::Bars(1));

        let notes = composition_notes(&comp);
        let ons = notes.iter().filter(|n| n.note.on).count();
        let offs = notes.len() - ons;
        assert_eq!(ons, offs);
        assert_eq!(notes.last().unwrap().tick, 4 * 480);
    }

    #[test]
    fn test_empty_composition_rejected() {
        assert!(matches!(
            composition_to_midi(&Composition::new()),
            Err(ExportError::EmptyComposition)
        ));
    }

    #[test]
    fn test_export_composition_file() {
        let dir = TempDir::new("export_comp");
        let out = dir.path().join("exports");
        let path = export_composition(&composition(), &out).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("composition_") && name.ends_with(".mid"));
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_sanitized_file_name() {
        assert_eq!(sanitized_file_name("Rock: Fill/2?"), "Rock__Fill_2_.mid");
    }

    #[test]
    fn test_export_groove_copies() {
        let dir = TempDir::new("export_groove");
        let src = dir.path().join("lib/Funky Beat.mid");
        write_groove(&src, &[(0, 36, true), (240, 36, false)]);
        let groove = Groove::stub("Funky Beat", "Funk", &src);

        let out = export_groove(&groove, &dir.path().join("out")).unwrap();
        assert_eq!(out, dir.path().join("out/Funky_Beat.mid"));
        assert_eq!(std::fs::read(&out).unwrap(), std::fs::read(&src).unwrap());
    }

    #[test]
    fn test_export_groove_missing_source() {
        let dir = TempDir::new("export_missing");
        let groove = Groove::stub("gone", "Funk", &dir.path().join("gone.mid"));
        assert!(matches!(
            export_groove(&groove, dir.path()),
            Err(ExportError::NotFound(_))
        ));
    }

    #[test]
    fn test_cleanup_old_exports() {
        let dir = TempDir::new("export_cleanup");
        std::fs::write(dir.path().join("old.mid"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        // Nothing is older than an hour yet.
        assert_eq!(cleanup_old_exports(dir.path(), Duration::from_secs(3600)).unwrap(), 0);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cleanup_old_exports(dir.path(), Duration::from_millis(1)).unwrap(), 1);
        assert!(!dir.path().join("old.mid").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(cleanup_old_exports(&dir.path().join("missing"), Duration::ZERO).unwrap(), 0);
    }
}
