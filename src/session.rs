//! The engine as the outside world drives it.
//!
//! The store, the composition and the scheduler each sit behind their own
//! lock, taken only for the duration of one call. Groove loading and file
//! exports happen before a lock is taken. When two locks are needed the
//! composition is always locked before the scheduler.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::analyzer::decode::AudioClip;
use crate::analyzer::tempo::{AutocorrelationEstimator, TempoEstimator};
use crate::analyzer::{AnalysisOutcome, AnalysisSource, AnalysisWorker};
use crate::composer::export::{self, ExportError};
use crate::composer::{BarCount, Composition};
use crate::config::AppConfig;
use crate::library::{GrooveStore, LibraryError, NoteEvent};
use crate::playback::{Scheduler, TransportInfo};

/// Settings a session is created with.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub sample_rate: f64,
    pub preview_bpm: f64,
    pub max_matches: Option<usize>,
    pub export_dir: PathBuf,
    pub export_max_age: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            preview_bpm: config.preview_bpm,
            max_matches: Some(config.max_matches).filter(|&n| n > 0),
            export_dir: config.resolve_export_dir(),
            export_max_age: Duration::from_secs(config.export_max_age_minutes * 60),
        }
    }
}

pub struct Session {
    store: Arc<GrooveStore>,
    composition: Mutex<Composition>,
    scheduler: Mutex<Scheduler>,
    worker: AnalysisWorker,
    export_dir: PathBuf,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Session {
    pub fn new(store: Arc<GrooveStore>, options: SessionOptions) -> Self {
        Self::with_estimator(store, options, Arc::new(AutocorrelationEstimator))
    }

    pub fn with_estimator(
        store: Arc<GrooveStore>,
        options: SessionOptions,
        estimator: Arc<dyn TempoEstimator>,
    ) -> Self {
        let mut scheduler = Scheduler::new(options.sample_rate);
        scheduler.set_preview_bpm(options.preview_bpm);

        if let Err(e) = export::cleanup_old_exports(&options.export_dir, options.export_max_age) {
            log::warn!("Export cleanup failed in {}: {}", options.export_dir.display(), e);
        }

        Self {
            worker: AnalysisWorker::new(Arc::clone(&store), estimator, options.max_matches),
            store,
            composition: Mutex::new(Composition::new()),
            scheduler: Mutex::new(scheduler),
            export_dir: options.export_dir,
        }
    }

    /// Scheduler lock for control calls. Frees whatever the block path
    /// finished playing since the last control call.
    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        let mut scheduler = lock(&self.scheduler);
        scheduler.take_retired();
        scheduler
    }

    pub fn store(&self) -> &Arc<GrooveStore> {
        &self.store
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    // --- playback ---

    /// Load a groove and start playing it. A groove that cannot be loaded
    /// stops groove playback and returns false.
    pub fn play_groove(&self, category: usize, groove: usize) -> bool {
        match self.store.load(category, groove) {
            Ok(g) => self.scheduler().start_groove(g),
            Err(e) => {
                log::warn!("Cannot play groove {}/{}: {}", category, groove, e);
                self.scheduler().stop_groove();
                false
            }
        }
    }

    pub fn stop_groove(&self) {
        self.scheduler().stop_groove();
    }

    /// Start the composition from its beginning. False when it is empty.
    pub fn play_composition(&self) -> bool {
        let composition = lock(&self.composition);
        if composition.is_empty() {
            log::warn!("Composition is empty, nothing to play");
            return false;
        }
        self.scheduler().start_composition(&composition)
    }

    pub fn stop_composition(&self) {
        self.scheduler().stop_composition();
    }

    pub fn stop(&self) {
        self.scheduler().stop();
    }

    pub fn is_playing_groove(&self) -> bool {
        self.scheduler().is_playing_groove()
    }

    pub fn is_playing_composition(&self) -> bool {
        self.scheduler().is_playing_composition()
    }

    pub fn set_looping(&self, looping: bool) {
        self.scheduler().set_looping(looping);
    }

    pub fn set_sample_rate(&self, sample_rate: f64) {
        self.scheduler().set_sample_rate(sample_rate);
    }

    pub fn set_preview_bpm(&self, bpm: f64) {
        self.scheduler().set_preview_bpm(bpm);
    }

    pub fn use_host_timing(&self) {
        self.scheduler().use_host_timing();
    }

    pub fn reset_position(&self) {
        self.scheduler().reset_position();
    }

    pub fn effective_bpm(&self, transport: &TransportInfo) -> f64 {
        self.scheduler().effective_bpm(transport)
    }

    pub fn position(&self) -> Option<f64> {
        self.scheduler().position()
    }

    /// Block callback: append this block's events to `out`.
    pub fn process_block(&self, transport: &TransportInfo, out: &mut Vec<NoteEvent>) {
        lock(&self.scheduler).process_block(transport, out);
    }

    // --- composition ---

    /// Load a groove and add it to the end of the composition.
    pub fn append(&self, category: usize, groove: usize, bars: BarCount) -> Result<usize, LibraryError> {
        let g = self.store.load(category, groove)?;
        let mut composition = lock(&self.composition);
        let name = g.name.clone();
        let index = composition
            .append(category, groove, g, bars)
            .ok_or(LibraryError::NotLoaded(name))?;
        self.scheduler().update_composition(&composition);
        Ok(index)
    }

    pub fn remove(&self, index: usize) -> bool {
        let mut composition = lock(&self.composition);
        let removed = composition.remove(index).is_some();
        self.scheduler().update_composition(&composition);
        removed
    }

    pub fn move_item(&self, from: usize, to: usize) -> bool {
        let mut composition = lock(&self.composition);
        let moved = composition.move_item(from, to);
        self.scheduler().update_composition(&composition);
        moved
    }

    /// Empty the composition and stop playing it.
    pub fn clear(&self) {
        let mut composition = lock(&self.composition);
        composition.clear();
        self.scheduler().stop_composition();
    }

    /// Snapshot of the current composition.
    pub fn composition(&self) -> Composition {
        lock(&self.composition).clone()
    }

    pub fn total_length_in_beats(&self) -> f64 {
        lock(&self.composition).total_length_in_beats()
    }

    // --- exports ---

    pub fn export_groove(&self, category: usize, groove: usize) -> Result<PathBuf, ExportError> {
        let g = self
            .store
            .groove(category, groove)
            .ok_or(LibraryError::InvalidIndex { category, groove })?;
        export::export_groove(&g, &self.export_dir)
    }

    pub fn export_composition(&self) -> Result<PathBuf, ExportError> {
        let snapshot = self.composition();
        export::export_composition(&snapshot, &self.export_dir)
    }

    pub fn cleanup_exports(&self, max_age: Duration) -> Result<usize, ExportError> {
        export::cleanup_old_exports(&self.export_dir, max_age)
    }

    // --- analysis ---

    /// Analyze an audio file in the background, superseding any analysis in flight.
    pub fn analyze_file(&self, path: &Path) -> u64 {
        self.worker.submit(AnalysisSource::File(path.to_path_buf()))
    }

    pub fn analyze_clip(&self, clip: AudioClip) -> u64 {
        self.worker.submit(AnalysisSource::Clip(clip))
    }

    pub fn cancel_analysis(&self) {
        self.worker.cancel();
    }

    /// The latest analysis result, if it has arrived.
    pub fn poll_analysis(&self) -> Option<AnalysisOutcome> {
        self.worker.try_recv()
    }

    pub fn wait_analysis(&self, timeout: Duration) -> Option<AnalysisOutcome> {
        self.worker.recv_timeout(timeout)
    }
}
