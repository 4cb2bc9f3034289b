//! Standard MIDI File reading: ticks → seconds → beats.
//!
//! Absolute seconds come from a tempo map built over every track (the way a
//! sequencer would play the file). The seconds-to-beats step then uses the
//! *running* tempo: the most recent tempo meta-event seen while walking the
//! tracks in file order, starting from 120 BPM.

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

use super::groove::{GrooveEvent, NoteEvent};

pub const DEFAULT_TEMPO_BPM: f64 = 120.0;
const DEFAULT_US_PER_QUARTER: f64 = 500_000.0;

/// Note events and meter pulled out of one MIDI file.
#[derive(Debug, Clone)]
pub struct ParsedMidi {
    pub events: Vec<GrooveEvent>,
    pub numerator: u8,
    pub denominator: u8,
}

/// Piecewise-constant tempo map over absolute ticks.
struct TempoMap {
    ticks_per_quarter: f64,
    /// (start tick, seconds at start tick, microseconds per quarter)
    segments: Vec<(u64, f64, f64)>,
}

impl TempoMap {
    fn new(ticks_per_quarter: f64, mut changes: Vec<(u64, f64)>) -> Self {
        changes.sort_by_key(|(tick, _)| *tick);

        let mut segments = vec![(0_u64, 0.0_f64, DEFAULT_US_PER_QUARTER)];
        for (tick, us_per_quarter) in changes {
            let (start, secs, current) = *segments.last().unwrap_or(&(0, 0.0, DEFAULT_US_PER_QUARTER));
            let elapsed = (tick - start) as f64 / ticks_per_quarter * current / 1_000_000.0;
            if tick == start {
                segments.pop();
            }
            segments.push((tick, secs + elapsed, us_per_quarter));
        }

        Self {
            ticks_per_quarter,
            segments,
        }
    }

    fn seconds_at(&self, tick: u64) -> f64 {
        let idx = self
            .segments
            .partition_point(|(start, _, _)| *start <= tick)
            .saturating_sub(1);
        let (start, secs, us_per_quarter) = self.segments[idx];
        secs + (tick - start) as f64 / self.ticks_per_quarter * us_per_quarter / 1_000_000.0
    }
}

/// Parse a Standard MIDI File into beat-stamped note events.
pub fn parse(bytes: &[u8]) -> Result<ParsedMidi, midly::Error> {
    let smf = Smf::parse(bytes)?;

    let seconds_at: Box<dyn Fn(u64) -> f64> = match smf.header.timing {
        Timing::Metrical(tpq) => {
            let ticks_per_quarter = f64::from(tpq.as_int().max(1));
            let mut changes = Vec::new();
            for track in &smf.tracks {
                let mut tick: u64 = 0;
                for event in track {
                    tick += u64::from(event.delta.as_int());
                    if let TrackEventKind::Meta(MetaMessage::Tempo(t)) = event.kind {
                        changes.push((tick, f64::from(t.as_int())));
                    }
                }
            }
            let map = TempoMap::new(ticks_per_quarter, changes);
            Box::new(move |tick: u64| map.seconds_at(tick))
        }
        Timing::Timecode(fps, subframes) => {
            let ticks_per_second = f64::from(fps.as_f32()) * f64::from(subframes.max(1));
            Box::new(move |tick: u64| tick as f64 / ticks_per_second)
        }
    };

    let mut running_bpm = DEFAULT_TEMPO_BPM;
    let mut numerator: u8 = 4;
    let mut denominator: u8 = 4;
    let mut events = Vec::new();

    for track in &smf.tracks {
        // Delta times restart with every track.
        let mut tick: u64 = 0;
        for event in track {
            tick += u64::from(event.delta.as_int());
            match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(t)) => {
                    let us_per_quarter = f64::from(t.as_int());
                    if us_per_quarter > 0.0 {
                        running_bpm = 60_000_000.0 / us_per_quarter;
                    }
                }
                TrackEventKind::Meta(MetaMessage::TimeSignature(num, denom_pow, _, _)) => {
                    if num > 0 {
                        numerator = num;
                        denominator = 1_u8.checked_shl(u32::from(denom_pow)).unwrap_or(4);
                    }
                }
                TrackEventKind::Midi { channel, message } => {
                    let note = match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            NoteEvent::note_on(channel.as_int(), key.as_int(), vel.as_int())
                        }
                        // Velocity-zero note-on is a note-off.
                        MidiMessage::NoteOn { key, vel } | MidiMessage::NoteOff { key, vel } => {
                            NoteEvent::note_off(channel.as_int(), key.as_int(), vel.as_int())
                        }
                        _ => continue,
                    };
                    events.push(GrooveEvent {
                        time_in_beats: seconds_at(tick) * (running_bpm / 60.0),
                        message: note,
                    });
                }
                _ => {}
            }
        }
    }

    // Stable: simultaneous events keep their file order.
    events.sort_by(|a, b| a.time_in_beats.total_cmp(&b.time_in_beats));

    Ok(ParsedMidi {
        events,
        numerator,
        denominator,
    })
}
