//! Background analysis: decode, analyze and match off the caller's thread.
//!
//! Jobs run on the rayon pool. Every submission bumps a generation counter;
//! a job checks it between stages and bails out once superseded, and the
//! receiving side drops any outcome that is not from the latest generation.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::decode::{self, AudioClip};
use super::tempo::TempoEstimator;
use super::{AnalysisReport, AnalyzeError, analyze_clip};
use crate::library::GrooveStore;
use crate::matcher::{self, GrooveMatch};

/// What to analyze.
#[derive(Debug, Clone)]
pub enum AnalysisSource {
    /// An audio file, decoded on the worker.
    File(PathBuf),
    /// Samples the caller already has.
    Clip(AudioClip),
}

/// A finished job: the report plus the ranked library matches.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub generation: u64,
    pub result: Result<(AnalysisReport, Vec<GrooveMatch>), AnalyzeError>,
}

pub struct AnalysisWorker {
    store: Arc<GrooveStore>,
    estimator: Arc<dyn TempoEstimator>,
    max_matches: Option<usize>,
    generation: Arc<AtomicU64>,
    tx: Sender<AnalysisOutcome>,
    rx: Receiver<AnalysisOutcome>,
}

impl AnalysisWorker {
    pub fn new(
        store: Arc<GrooveStore>,
        estimator: Arc<dyn TempoEstimator>,
        max_matches: Option<usize>,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            store,
            estimator,
            max_matches,
            generation: Arc::new(AtomicU64::new(0)),
            tx,
            rx,
        }
    }

    /// Generation of the most recent submission (or cancellation).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Queue a job, superseding any job still in flight. Returns its generation.
    pub fn submit(&self, source: AnalysisSource) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.generation);
        let store = Arc::clone(&self.store);
        let estimator = Arc::clone(&self.estimator);
        let max_matches = self.max_matches;
        let tx = self.tx.clone();

        rayon::spawn(move || {
            let is_current = || current.load(Ordering::SeqCst) == generation;
            let result = run_job(source, &store, estimator.as_ref(), max_matches, &is_current);

            if !is_current() {
                log::debug!("Discarding stale analysis (generation {})", generation);
                return;
            }
            // The receiver lives as long as the worker; a send error means it is gone.
            let _ = tx.send(AnalysisOutcome { generation, result });
        });

        generation
    }

    /// Invalidate whatever is in flight.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Latest-generation outcome if one is ready.
    pub fn try_recv(&self) -> Option<AnalysisOutcome> {
        while let Ok(outcome) = self.rx.try_recv() {
            if self.is_current(&outcome) {
                return Some(outcome);
            }
        }
        None
    }

    /// Wait up to `timeout` for a latest-generation outcome.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<AnalysisOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.rx.recv_deadline(deadline) {
                Ok(outcome) if self.is_current(&outcome) => return Some(outcome),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn is_current(&self, outcome: &AnalysisOutcome) -> bool {
        let current = self.generation();
        if outcome.generation != current {
            log::debug!(
                "Dropping analysis result from generation {} (now {})",
                outcome.generation,
                current
            );
            return false;
        }
        true
    }
}

fn run_job(
    source: AnalysisSource,
    store: &GrooveStore,
    estimator: &dyn TempoEstimator,
    max_matches: Option<usize>,
    is_current: &dyn Fn() -> bool,
) -> Result<(AnalysisReport, Vec<GrooveMatch>), AnalyzeError> {
    let clip = match source {
        AnalysisSource::File(path) => decode::load_audio(&path)?,
        AnalysisSource::Clip(clip) => clip,
    };
    if !is_current() {
        return Err(AnalyzeError::Cancelled);
    }

    let report = analyze_clip(&clip, estimator)?;
    if !is_current() {
        return Err(AnalyzeError::Cancelled);
    }

    let matches = matcher::find_matches(store, &report.pattern, max_matches);
    if !is_current() {
        return Err(AnalyzeError::Cancelled);
    }

    Ok((report, matches))
}
