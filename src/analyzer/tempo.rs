use super::onsets::{HOP_SIZE, energy_envelope, rising_edges};

/// Tempo search range handed to the estimator, in BPM.
pub const MIN_BPM: f64 = 55.0;
pub const MAX_BPM: f64 = 190.0;
/// How many ranked candidates an estimate keeps.
pub const MAX_CANDIDATES: usize = 3;

/// Result of a tempo estimate. `bpm` is 0 when nothing periodic was found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TempoEstimate {
    pub bpm: f64,
    /// Ranked, strongest first. Includes `bpm` itself when non-empty.
    pub candidates: Vec<f64>,
}

/// Narrow-band tempo estimator used when the file name carries no tempo.
pub trait TempoEstimator: Send + Sync {
    fn estimate(&self, samples: &[f32], sample_rate: f64, min_bpm: f64, max_bpm: f64) -> TempoEstimate;
}

/// Autocorrelation of the rising-energy envelope.
///
/// Each lag in the search range is scored by its autocorrelation plus half of
/// each neighbour's, which keeps a beat period that falls between two frames
/// from splitting its weight. Local maxima within half of the best score
/// become candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutocorrelationEstimator;

impl TempoEstimator for AutocorrelationEstimator {
    fn estimate(&self, samples: &[f32], sample_rate: f64, min_bpm: f64, max_bpm: f64) -> TempoEstimate {
        if sample_rate <= 0.0 || min_bpm <= 0.0 || max_bpm <= min_bpm {
            return TempoEstimate::default();
        }

        let flux = rising_edges(&energy_envelope(samples));
        let frame_rate = sample_rate / HOP_SIZE as f64;
        let min_lag = ((60.0 * frame_rate / max_bpm).floor() as usize).max(1);
        let max_lag = (60.0 * frame_rate / min_bpm).ceil() as usize;
        if flux.len() <= max_lag + 1 {
            return TempoEstimate::default();
        }

        let acf: Vec<f64> = (0..=max_lag + 1)
            .map(|lag| {
                flux.iter()
                    .zip(&flux[lag..])
                    .map(|(a, b)| f64::from(*a) * f64::from(*b))
                    .sum()
            })
            .collect();

        let score = |lag: usize| acf[lag] + 0.5 * (acf[lag - 1] + acf[lag + 1]);
        let scores: Vec<(usize, f64)> = (min_lag.max(1)..=max_lag).map(|lag| (lag, score(lag))).collect();

        let best = scores.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max);
        if best <= f64::EPSILON {
            return TempoEstimate::default();
        }

        let mut peaks: Vec<(usize, f64)> = scores
            .iter()
            .enumerate()
            .filter(|(i, (_, s))| {
                let left = if *i > 0 { scores[i - 1].1 } else { f64::MIN };
                let right = scores.get(i + 1).map_or(f64::MIN, |p| p.1);
                *s >= best * 0.5 && *s > left && *s >= right
            })
            .map(|(_, p)| *p)
            .collect();
        peaks.sort_by(|a, b| b.1.total_cmp(&a.1));

        let candidates: Vec<f64> = peaks
            .iter()
            .take(MAX_CANDIDATES)
            .map(|&(lag, _)| 60.0 * frame_rate / lag as f64)
            .filter(|bpm| (min_bpm..=max_bpm).contains(bpm))
            .collect();

        log::debug!("Tempo candidates: {:?}", candidates);

        TempoEstimate {
            bpm: candidates.first().copied().unwrap_or(0.0),
            candidates,
        }
    }
}

/// Confidence for an estimator result: a lone candidate is trusted more than
/// several close ones.
pub fn confidence(estimate: &TempoEstimate) -> f64 {
    if estimate.candidates.len() >= 2 && estimate.candidates[1] > 0.0 {
        0.8
    } else {
        0.9
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::impulses;

    const SR: f64 = 44_100.0;

    fn click_track(bpm: f64, secs: f64) -> Vec<f32> {
        let period = 60.0 / bpm;
        let times: Vec<f64> = (0..)
            .map(|i| 0.05 + period * i as f64)
            .take_while(|t| *t < secs - 0.1)
            .collect();
        impulses(SR, secs, &times)
    }

    #[test]
    fn test_estimates_click_track() {
        let est = AutocorrelationEstimator.estimate(&click_track(120.0, 8.0), SR, MIN_BPM, MAX_BPM);
        assert!((est.bpm - 120.0).abs() < 3.0, "got {}", est.bpm);
        assert!(!est.candidates.is_empty() && est.candidates.len() <= MAX_CANDIDATES);
        assert_eq!(est.candidates[0], est.bpm);
    }

    #[test]
    fn test_candidates_within_range() {
        let est = AutocorrelationEstimator.estimate(&click_track(100.0, 10.0), SR, MIN_BPM, MAX_BPM);
        assert!(est.candidates.iter().all(|b| (MIN_BPM..=MAX_BPM).contains(b)));
    }

    #[test]
    fn test_silence_has_no_tempo() {
        let est = AutocorrelationEstimator.estimate(&vec![0.0; 44_100 * 4], SR, MIN_BPM, MAX_BPM);
        assert_eq!(est.bpm, 0.0);
        assert!(est.candidates.is_empty());
    }

    #[test]
    fn test_short_clip_has_no_tempo() {
        let est = AutocorrelationEstimator.estimate(&click_track(120.0, 0.5), SR, MIN_BPM, MAX_BPM);
        assert_eq!(est.bpm, 0.0);
    }

    #[test]
    fn test_confidence() {
        let single = TempoEstimate { bpm: 120.0, candidates: vec![120.0] };
        let multi = TempoEstimate { bpm: 120.0, candidates: vec![120.0, 60.0] };
        assert_eq!(confidence(&single), 0.9);
        assert_eq!(confidence(&multi), 0.8);
    }
}
