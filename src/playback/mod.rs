//! Block-by-block event scheduling for a single groove or a composition.
//!
//! Each block covers the half-open window `(previous position, position]` in
//! the playing material's local beats. The first block after a start or a
//! position reset also includes beat 0. When looping, a position past the end
//! wraps and the window becomes `(previous, end] ∪ [0, position]`; a position
//! landing exactly on the end stays there until the next block. A window
//! never spans more than its own block: a cursor left past the end by an
//! edit or a host seek is folded back into the loop first.

pub mod clock;

use std::sync::Arc;

use crate::composer::Composition;
use crate::library::{Groove, NoteEvent};
pub use clock::{Clock, ClockSource, TransportInfo};

/// Host positions this far from where the cursor expects count as a seek.
const HOST_SEEK_TOLERANCE: f64 = 1e-3;

/// What is currently playing. Groove and composition playback are exclusive.
#[derive(Debug, Clone, Default)]
pub enum Playing {
    #[default]
    Stopped,
    Groove(Arc<Groove>),
    Composition(Composition),
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    /// Host position that maps to local beat 0.
    origin: f64,
    /// Local position at the end of the previous block.
    position: f64,
    source: ClockSource,
}

/// The events of one block fall in this window of local beats.
#[derive(Debug, Clone, Copy)]
struct Window {
    start: f64,
    end: f64,
    include_start: bool,
    wrapped: bool,
}

impl Window {
    fn contains(&self, t: f64) -> bool {
        let after_start = if self.include_start { t >= self.start } else { t > self.start };
        if self.wrapped {
            after_start || t <= self.end
        } else {
            after_start && t <= self.end
        }
    }
}

#[derive(Debug)]
pub struct Scheduler {
    clock: Clock,
    looping: bool,
    playing: Playing,
    /// None until the first block after a start or reset.
    cursor: Option<Cursor>,
    /// Material the block path finished with, left for the control side to free.
    retired: Playing,
}

/// Whole loops of `length` to drop so `value` lands in `(0, length]`.
fn loop_shift(value: f64, length: f64) -> f64 {
    if value > length {
        ((value / length).ceil() - 1.0) * length
    } else {
        0.0
    }
}

impl Scheduler {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            clock: Clock {
                sample_rate,
                ..Clock::default()
            },
            looping: true,
            playing: Playing::Stopped,
            cursor: None,
            retired: Playing::Stopped,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.clock.sample_rate = sample_rate;
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Run the internal clock at `bpm`, ignoring the host.
    pub fn set_preview_bpm(&mut self, bpm: f64) {
        if bpm > 0.0 {
            self.clock.internal_bpm = bpm;
        }
        self.clock.preview = true;
    }

    /// Follow the host transport whenever it is playing.
    pub fn use_host_timing(&mut self) {
        self.clock.preview = false;
    }

    pub fn effective_bpm(&self, transport: &TransportInfo) -> f64 {
        self.clock.effective_bpm(transport)
    }

    /// Rewind to local beat 0; the next block re-captures the origin.
    pub fn reset_position(&mut self) {
        self.cursor = None;
    }

    /// Local position reached by the last block, if playing has begun.
    pub fn position(&self) -> Option<f64> {
        match self.playing {
            Playing::Stopped => None,
            _ => self.cursor.map(|c| c.position),
        }
    }

    pub fn playing(&self) -> &Playing {
        &self.playing
    }

    pub fn is_playing_groove(&self) -> bool {
        matches!(self.playing, Playing::Groove(_))
    }

    pub fn is_playing_composition(&self) -> bool {
        matches!(self.playing, Playing::Composition(_))
    }

    /// Start playing a parsed groove from its beginning, replacing anything playing.
    ///
    /// An unparsed groove stops playback instead and returns false.
    pub fn start_groove(&mut self, groove: Arc<Groove>) -> bool {
        if !groove.is_parsed {
            log::warn!("Groove '{}' is not loaded, stopping playback", groove.name);
            self.stop();
            return false;
        }
        log::debug!("Playing groove '{}'", groove.name);
        self.playing = Playing::Groove(groove);
        self.cursor = None;
        true
    }

    /// Start playing a composition from its beginning, replacing anything playing.
    pub fn start_composition(&mut self, composition: &Composition) -> bool {
        debug_assert!(!composition.is_empty(), "starting an empty composition");
        if composition.is_empty() {
            return false;
        }
        log::debug!(
            "Playing composition ({} items, {} beats)",
            composition.len(),
            composition.total_length_in_beats()
        );
        self.playing = Playing::Composition(composition.clone());
        self.cursor = None;
        true
    }

    /// Swap in an edited composition without moving the play position.
    ///
    /// When looping, a position past the new end is folded back into the
    /// loop. An empty composition stops playback.
    pub fn update_composition(&mut self, composition: &Composition) {
        if !self.is_playing_composition() {
            return;
        }
        if composition.is_empty() {
            self.stop();
            return;
        }
        let length = composition.total_length_in_beats();
        let looping = self.looping;
        if let Some(cursor) = self.cursor.as_mut().filter(|_| looping) {
            let shift = loop_shift(cursor.position, length);
            cursor.position -= shift;
            cursor.origin += shift;
        }
        self.playing = Playing::Composition(composition.clone());
    }

    pub fn stop_groove(&mut self) {
        if self.is_playing_groove() {
            self.stop();
        }
    }

    pub fn stop_composition(&mut self) {
        if self.is_playing_composition() {
            self.stop();
        }
    }

    pub fn stop(&mut self) {
        if !matches!(self.playing, Playing::Stopped) {
            log::debug!("Playback stopped");
        }
        self.playing = Playing::Stopped;
        self.cursor = None;
    }

    /// Stop from the block path. The finished material is parked rather than
    /// dropped; `take_retired` hands it to the control side.
    fn finish(&mut self) {
        self.retired = std::mem::take(&mut self.playing);
        self.cursor = None;
    }

    /// Whatever the block path last stopped playing, if not yet collected.
    pub fn take_retired(&mut self) -> Playing {
        std::mem::take(&mut self.retired)
    }

    /// Advance one audio block and append the events that fall inside it to `out`.
    ///
    /// Events come out in source order. Reserve capacity in `out` up front
    /// to keep this call allocation-free.
    pub fn process_block(&mut self, transport: &TransportInfo, out: &mut Vec<NoteEvent>) {
        let length = match &self.playing {
            Playing::Stopped => return,
            Playing::Groove(groove) => groove.length_in_beats,
            Playing::Composition(comp) => comp.total_length_in_beats(),
        };
        if length <= 0.0 {
            self.finish();
            return;
        }

        let Some(mut window) = self.advance(transport, length) else {
            return;
        };

        if window.start > length {
            if !self.looping {
                self.finish();
                return;
            }
            let shift = loop_shift(window.start, length);
            window.start -= shift;
            window.end -= shift;
            if let Some(cursor) = self.cursor.as_mut() {
                cursor.origin += shift;
            }
        }

        if window.end >= length && !self.looping {
            window.end = length;
            self.emit(&window, out);
            log::debug!("Reached end at beat {}, stopping", length);
            self.finish();
            return;
        }
        if window.end > length {
            let shift = loop_shift(window.end, length);
            window.end -= shift;
            window.wrapped = true;
            if let Some(cursor) = self.cursor.as_mut() {
                cursor.origin += shift;
            }
        }

        self.emit(&window, out);
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.position = window.end;
        }
    }

    /// Move the cursor forward by one block and return the unwrapped window.
    fn advance(&mut self, transport: &TransportInfo, length: f64) -> Option<Window> {
        let source = self.clock.source(transport);
        let beats = self.clock.block_beats(transport);
        let host_start = transport.host_position_beats;

        let (cursor, include_start) = match self.cursor {
            None => {
                let origin = if source == ClockSource::Host { host_start } else { 0.0 };
                (Cursor { origin, position: 0.0, source }, true)
            }
            Some(mut c) => {
                if c.source != source {
                    // Keep the local position continuous across a clock switch.
                    c.origin = host_start - c.position;
                    c.source = source;
                }
                (c, false)
            }
        };

        let end = match source {
            ClockSource::Internal => cursor.position + beats,
            ClockSource::Host => {
                let local_start = host_start - cursor.origin;
                if local_start < cursor.position - HOST_SEEK_TOLERANCE {
                    // The host jumped backwards: carry on from where we were.
                    self.cursor = Some(Cursor { origin: host_start - cursor.position, ..cursor });
                    return Some(Window {
                        start: cursor.position,
                        end: cursor.position + beats,
                        include_start,
                        wrapped: false,
                    });
                }
                if local_start > cursor.position + HOST_SEEK_TOLERANCE && local_start.is_finite() {
                    // The host jumped ahead: pick up at its new position.
                    log::debug!("Host seek from beat {} to {}", cursor.position, local_start);
                    self.cursor = Some(Cursor { position: local_start, ..cursor });
                    return Some(Window {
                        start: local_start,
                        end: local_start + beats,
                        include_start: true,
                        wrapped: false,
                    });
                }
                local_start + beats
            }
        };

        if !(end.is_finite() && length.is_finite()) {
            return None;
        }
        self.cursor = Some(cursor);
        Some(Window {
            start: cursor.position,
            end,
            include_start,
            wrapped: false,
        })
    }

    fn emit(&self, window: &Window, out: &mut Vec<NoteEvent>) {
        match &self.playing {
            Playing::Stopped => {}
            Playing::Groove(groove) => {
                out.extend(
                    groove
                        .events
                        .iter()
                        .filter(|e| window.contains(e.time_in_beats))
                        .map(|e| e.message),
                );
            }
            Playing::Composition(comp) => {
                for item in comp.items() {
                    out.extend(
                        item.groove
                            .events
                            .iter()
                            .filter(|e| e.time_in_beats < item.length_in_beats)
                            .filter(|e| window.contains(item.start_beat + e.time_in_beats))
                            .map(|e| e.message),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::BarCount;
    use crate::composer::tests::groove;
    use crate::library::GrooveEvent;
    use crate::library::smf::tests::midi_bytes;
    use std::path::Path;

    const SR: f64 = 48_000.0;

    /// Samples in `beats` at 120 BPM.
    fn samples(beats: f64) -> usize {
        (beats * 0.5 * SR) as usize
    }

    /// Groove whose note numbers encode their beat position, for readable assertions.
    fn marked_groove(beats: &[f64], length: f64) -> Arc<Groove> {
        let mut g = Groove::stub("marked", "Test", Path::new("marked.mid"));
        for &b in beats {
            g.events.push(GrooveEvent {
                time_in_beats: b,
                message: NoteEvent::note_on(9, (b * 4.0) as u8, 100),
            });
        }
        g.length_in_beats = length;
        g.is_parsed = true;
        Arc::new(g)
    }

    fn preview_scheduler() -> Scheduler {
        let mut s = Scheduler::new(SR);
        s.set_preview_bpm(120.0);
        s
    }

    fn run(s: &mut Scheduler, transport: TransportInfo) -> Vec<NoteEvent> {
        let mut out = Vec::with_capacity(64);
        s.process_block(&transport, &mut out);
        out
    }

    fn notes(events: &[NoteEvent]) -> Vec<u8> {
        events.iter().map(|e| e.note).collect()
    }

    #[test]
    fn test_looping_emits_each_event_once_per_loop() {
        let g = groove("two_bars", 4, 2);
        let mut s = preview_scheduler();
        s.start_groove(g.clone());

        // 0.375 beats does not divide 8; 64 blocks make exactly three loops.
        let mut total = Vec::new();
        for _ in 0..64 {
            total.extend(run(&mut s, TransportInfo::stopped(samples(0.375))));
        }
        assert_eq!(total.len(), 3 * g.events.len());
        assert!((s.position().unwrap() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_three_beat_blocks_wrap_scenario() {
        let beats: Vec<f64> = (0..16).map(|i| f64::from(i) * 0.5).collect();
        let g = marked_groove(&beats, 8.0);
        let mut s = preview_scheduler();
        s.start_groove(g);

        let block = TransportInfo::stopped(samples(3.0));
        let first = run(&mut s, block);
        let second = run(&mut s, block);
        let third = run(&mut s, block);

        let encode = |bs: &[f64]| bs.iter().map(|b| (b * 4.0) as u8).collect::<Vec<u8>>();
        // [0, 3]
        assert_eq!(notes(&first), encode(&[0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0]));
        // (3, 6]
        assert_eq!(notes(&second), encode(&[3.5, 4.0, 4.5, 5.0, 5.5, 6.0]));
        // (6, 8] then wrapped [0, 1], in source order
        assert_eq!(notes(&third), encode(&[0.0, 0.5, 1.0, 6.5, 7.0, 7.5]));
        assert!((s.position().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_looping_stops_at_end() {
        let g = marked_groove(&[0.0, 2.0, 3.5], 4.0);
        let mut s = preview_scheduler();
        s.set_looping(false);
        s.start_groove(g);

        assert_eq!(notes(&run(&mut s, TransportInfo::stopped(samples(3.0)))), vec![0, 8]);
        assert_eq!(notes(&run(&mut s, TransportInfo::stopped(samples(3.0)))), vec![14]);
        assert!(!s.is_playing_groove());
        assert!(run(&mut s, TransportInfo::stopped(samples(3.0))).is_empty());
    }

    #[test]
    fn test_barline_note_off_fires_every_loop() {
        // At this tempo the last note-off parses a hair past beat 8.
        let bytes = midi_bytes(
            480,
            Some(300_132),
            None,
            &[(0, 36, true), (1920, 36, false), (1920, 38, true), (3840, 38, false)],
        );
        let g = Groove::stub("odd", "Test", Path::new("odd.mid")).with_midi_bytes(&bytes).unwrap();
        assert_eq!(g.length_in_beats, 8.0);
        let mut s = preview_scheduler();
        s.start_groove(Arc::new(g));

        let mut total = Vec::new();
        for _ in 0..64 {
            total.extend(run(&mut s, TransportInfo::stopped(samples(0.375))));
        }
        assert_eq!(total.len(), 12);
        assert_eq!(total.iter().filter(|e| e.on).count(), 6);
    }

    #[test]
    fn test_finished_material_is_retired() {
        let g = groove("g", 4, 1);
        let mut s = preview_scheduler();
        s.set_looping(false);
        s.start_groove(Arc::clone(&g));

        run(&mut s, TransportInfo::stopped(samples(3.0)));
        run(&mut s, TransportInfo::stopped(samples(3.0)));
        assert!(!s.is_playing_groove());
        // The block path parks the groove instead of dropping it.
        assert_eq!(Arc::strong_count(&g), 2);
        assert!(matches!(s.take_retired(), Playing::Groove(_)));
        assert_eq!(Arc::strong_count(&g), 1);
        assert!(matches!(s.take_retired(), Playing::Stopped));
    }

    #[test]
    fn test_unparsed_groove_stops() {
        let mut s = preview_scheduler();
        s.start_groove(marked_groove(&[0.0], 4.0));
        let stub = Arc::new(Groove::stub("stub", "Test", Path::new("stub.mid")));
        assert!(!s.start_groove(stub));
        assert!(matches!(s.playing(), Playing::Stopped));
        assert!(run(&mut s, TransportInfo::stopped(512)).is_empty());
    }

    #[test]
    fn test_composition_clips_items() {
        let mut comp = Composition::new();
        // 8-beat groove clipped to one bar, then a one-bar groove.
        comp.append(0, 0, groove("a", 4, 2), BarCount::Bars(1));
        comp.append(0, 1, groove("b", 4, 1), BarCount::All);

        let mut s = preview_scheduler();
        s.set_looping(false);
        assert!(s.start_composition(&comp));

        let mut total = Vec::new();
        while s.is_playing_composition() {
            total.extend(run(&mut s, TransportInfo::stopped(samples(0.75))));
        }
        // Four hits (on + off) from each item; the clipped bar never plays.
        assert_eq!(total.len(), 16);
    }

    #[test]
    fn test_composition_looping_event_count() {
        let mut comp = Composition::new();
        comp.append(0, 0, groove("a", 4, 2), BarCount::Bars(1));
        comp.append(0, 1, groove("b", 3, 1), BarCount::All);
        let per_loop: usize = comp
            .items()
            .iter()
            .map(|i| i.groove.events.iter().filter(|e| e.time_in_beats < i.length_in_beats).count())
            .sum();

        let mut s = preview_scheduler();
        s.start_composition(&comp);
        // 7-beat loop, 0.625-beat blocks: 56 blocks is five loops.
        let mut total = 0;
        for _ in 0..56 {
            total += run(&mut s, TransportInfo::stopped(samples(0.625))).len();
        }
        assert_eq!(total, 5 * per_loop);
    }

    #[test]
    fn test_modes_are_exclusive() {
        let mut comp = Composition::new();
        comp.append(0, 0, groove("a", 4, 1), BarCount::All);
        let mut s = preview_scheduler();

        s.start_groove(groove("g", 4, 1));
        s.start_composition(&comp);
        assert!(s.is_playing_composition() && !s.is_playing_groove());

        s.start_groove(groove("g", 4, 1));
        assert!(s.is_playing_groove() && !s.is_playing_composition());
        s.stop_composition();
        assert!(s.is_playing_groove());
    }

    #[test]
    fn test_update_composition_to_empty_stops() {
        let mut comp = Composition::new();
        comp.append(0, 0, groove("a", 4, 1), BarCount::All);
        let mut s = preview_scheduler();
        s.start_composition(&comp);
        comp.clear();
        s.update_composition(&comp);
        assert!(!s.is_playing_composition());
    }

    #[test]
    fn test_shrinking_composition_folds_position() {
        let mut comp = Composition::new();
        comp.append(0, 0, groove("a", 4, 1), BarCount::All);
        comp.append(0, 1, groove("b", 4, 2), BarCount::All);
        let mut s = preview_scheduler();
        s.start_composition(&comp);

        let block = TransportInfo::stopped(samples(0.25));
        for _ in 0..40 {
            run(&mut s, block);
        }
        assert!((s.position().unwrap() - 10.0).abs() < 1e-9);

        comp.remove(1);
        s.update_composition(&comp);
        assert!((s.position().unwrap() - 2.0).abs() < 1e-9);

        // (2, 2.25] holds nothing.
        assert!(run(&mut s, block).is_empty());
        assert!((s.position().unwrap() - 2.25).abs() < 1e-9);
        // Off at 2.5, on at 3, off at 3.5.
        let rest: usize = (0..7).map(|_| run(&mut s, block).len()).sum();
        assert_eq!(rest, 3);
    }

    #[test]
    fn test_host_seek_ahead_plays_one_block() {
        let g = marked_groove(&[0.0, 1.0, 2.0, 3.0], 4.0);
        let mut s = Scheduler::new(SR);
        s.use_host_timing();
        s.start_groove(g);

        let block = samples(1.0);
        assert_eq!(notes(&run(&mut s, TransportInfo::playing(120.0, 0.0, block))), vec![0, 4]);
        // Seek to host beat 10.5, local 2.5 in the third loop.
        assert_eq!(notes(&run(&mut s, TransportInfo::playing(120.0, 10.5, block))), vec![12]);
        assert!((s.position().unwrap() - 3.5).abs() < 1e-9);
        // Contiguous again from there.
        assert_eq!(notes(&run(&mut s, TransportInfo::playing(120.0, 11.5, block))), vec![0]);
        assert!((s.position().unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_host_clock_follows_position() {
        let g = marked_groove(&[0.0, 1.0, 2.0, 3.0], 4.0);
        let mut s = Scheduler::new(SR);
        s.use_host_timing();
        s.start_groove(g);

        // Host at 100 BPM starting from beat 16; origin is captured there.
        let block = samples(1.0) * 6 / 5; // one beat at 100 BPM
        let first = run(&mut s, TransportInfo::playing(100.0, 16.0, block));
        assert_eq!(notes(&first), vec![0, 4]);
        let second = run(&mut s, TransportInfo::playing(100.0, 17.0, block));
        assert_eq!(notes(&second), vec![8]);
        let third = run(&mut s, TransportInfo::playing(100.0, 18.0, block));
        assert_eq!(notes(&third), vec![12]);
        // Beat 20 is local 4.0, the loop end; nothing sits in (3, 4].
        let fourth = run(&mut s, TransportInfo::playing(100.0, 19.0, block));
        assert!(fourth.is_empty());
        assert!((s.position().unwrap() - 4.0).abs() < 1e-9);
        // The next block wraps to local 1.0.
        let fifth = run(&mut s, TransportInfo::playing(100.0, 20.0, block));
        assert_eq!(notes(&fifth), vec![0, 4]);
        assert!((s.position().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_host_stop_falls_back_to_internal() {
        let g = marked_groove(&[0.0, 1.0, 2.0, 3.0], 4.0);
        let mut s = Scheduler::new(SR);
        s.use_host_timing();
        s.start_groove(g);

        let block = samples(1.0);
        assert_eq!(notes(&run(&mut s, TransportInfo::playing(120.0, 0.0, block))), vec![0, 4]);
        // Host stops; the internal clock carries on from local beat 1.
        assert_eq!(notes(&run(&mut s, TransportInfo::stopped(block))), vec![8]);
        // Host resumes somewhere else entirely; position stays continuous.
        assert_eq!(notes(&run(&mut s, TransportInfo::playing(120.0, 40.0, block))), vec![12]);
    }

    #[test]
    fn test_preview_overrides_host() {
        let g = marked_groove(&[0.0, 1.0, 2.0, 3.0], 4.0);
        let mut s = preview_scheduler();
        s.set_preview_bpm(60.0);
        s.start_groove(g);
        let t = TransportInfo::playing(180.0, 33.0, samples(1.0));
        assert_eq!(s.effective_bpm(&t), 60.0);
        // One beat at 120 BPM is half a beat at 60.
        assert_eq!(notes(&run(&mut s, t)), vec![0]);
        assert!((s.position().unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reset_position_rewinds() {
        let g = marked_groove(&[0.0, 1.0, 2.0, 3.0], 4.0);
        let mut s = preview_scheduler();
        s.start_groove(g);
        run(&mut s, TransportInfo::stopped(samples(2.5)));
        s.reset_position();
        assert_eq!(notes(&run(&mut s, TransportInfo::stopped(samples(1.0)))), vec![0, 4]);
    }
}
