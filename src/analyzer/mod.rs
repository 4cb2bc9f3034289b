pub mod decode;
pub mod filename;
pub mod onsets;
pub mod tempo;
pub mod worker;

use serde::Serialize;
use thiserror::Error;

use decode::AudioClip;
use tempo::{MAX_BPM, MIN_BPM, TempoEstimator};

pub use worker::{AnalysisOutcome, AnalysisSource, AnalysisWorker};

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Decode error: {0}")]
    Decode(#[from] decode::DecodeError),
    #[error("No tempo detected in {0}")]
    NoTempo(String),
    #[error("No onsets detected in {0}")]
    NoOnsets(String),
    #[error("Analysis cancelled")]
    Cancelled,
}

/// The rhythmic fingerprint of one audio clip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RhythmPattern {
    pub bpm: f64,
    /// 0..=1. Exactly 1.0 when the tempo came from the file name.
    pub confidence: f64,
    /// Estimator candidates, strongest first. Empty for file-name tempos.
    pub alternative_bpms: Vec<f64>,
    pub onset_times_beats: Vec<f64>,
    pub beats_per_bar: u32,
    pub length_in_beats: f64,
}

impl Default for RhythmPattern {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            confidence: 0.0,
            alternative_bpms: Vec::new(),
            onset_times_beats: Vec::new(),
            beats_per_bar: 4,
            length_in_beats: 0.0,
        }
    }
}

/// Where the tempo of a pattern came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BpmSource {
    Filename,
    Estimated,
}

/// Analysis result plus the clip metadata it was computed from.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub file_name: String,
    pub duration_secs: f64,
    pub sample_rate: f64,
    pub bpm_source: BpmSource,
    pub pattern: RhythmPattern,
}

/// Estimate tempo and onset rhythm for a mono clip.
///
/// A tempo in the file name wins outright; otherwise `estimator` is asked.
/// Fails when no tempo can be found or the clip has no onsets.
pub fn analyze(
    samples: &[f32],
    sample_rate: f64,
    file_name: &str,
    estimator: &dyn TempoEstimator,
) -> Result<AnalysisReport, AnalyzeError> {
    let (bpm, confidence, alternative_bpms, bpm_source) = match filename::bpm_from_filename(file_name) {
        Some(bpm) => {
            log::debug!("BPM from file name '{}': {}", file_name, bpm);
            (bpm, 1.0, Vec::new(), BpmSource::Filename)
        }
        None => {
            let estimate = estimator.estimate(samples, sample_rate, MIN_BPM, MAX_BPM);
            if estimate.bpm <= 0.0 {
                return Err(AnalyzeError::NoTempo(file_name.to_string()));
            }
            log::debug!("BPM estimated for '{}': {:.1}", file_name, estimate.bpm);
            let confidence = tempo::confidence(&estimate);
            (estimate.bpm, confidence, estimate.candidates, BpmSource::Estimated)
        }
    };

    let onset_secs = onsets::detect_onsets(samples, sample_rate);
    if onset_secs.is_empty() {
        return Err(AnalyzeError::NoOnsets(file_name.to_string()));
    }

    let beats_per_second = bpm / 60.0;
    let duration_secs = if sample_rate > 0.0 {
        samples.len() as f64 / sample_rate
    } else {
        0.0
    };

    let pattern = RhythmPattern {
        bpm,
        confidence,
        alternative_bpms,
        onset_times_beats: onset_secs.iter().map(|t| t * beats_per_second).collect(),
        beats_per_bar: 4,
        length_in_beats: duration_secs * beats_per_second,
    };

    log::info!(
        "Analyzed '{}': {:.1} BPM, {} onsets, {:.1} beats",
        file_name,
        pattern.bpm,
        pattern.onset_times_beats.len(),
        pattern.length_in_beats
    );

    Ok(AnalysisReport {
        file_name: file_name.to_string(),
        duration_secs,
        sample_rate,
        bpm_source,
        pattern,
    })
}

/// Analyze a decoded clip.
pub fn analyze_clip(clip: &AudioClip, estimator: &dyn TempoEstimator) -> Result<AnalysisReport, AnalyzeError> {
    analyze(&clip.samples, clip.sample_rate, &clip.file_name, estimator)
}
