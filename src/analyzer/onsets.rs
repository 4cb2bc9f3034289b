//! Energy-based onset detection for single-source percussive material.

/// RMS analysis window, in samples.
pub const WINDOW_SIZE: usize = 1024;
/// Stride between analysis windows, in samples.
pub const HOP_SIZE: usize = 512;
/// Onsets closer than this to the previous accepted onset are dropped.
pub const MIN_ONSET_GAP_SECS: f64 = 0.08;

/// Short-time RMS energy, one frame per hop. A trailing partial window is skipped.
pub fn energy_envelope(samples: &[f32]) -> Vec<f32> {
    if samples.len() <= WINDOW_SIZE {
        return Vec::new();
    }
    (0..samples.len() - WINDOW_SIZE)
        .step_by(HOP_SIZE)
        .map(|start| {
            let window = &samples[start..start + WINDOW_SIZE];
            let energy: f32 = window.iter().map(|s| s * s).sum();
            (energy / WINDOW_SIZE as f32).sqrt()
        })
        .collect()
}

/// Rising edges of the envelope: `max(0, e[i] - e[i-1])` for i >= 1.
pub fn rising_edges(envelope: &[f32]) -> Vec<f32> {
    envelope
        .windows(2)
        .map(|w| (w[1] - w[0]).max(0.0))
        .collect()
}

/// Onset times in seconds, ascending.
///
/// Fewer than three envelope frames is not enough material and yields no onsets.
pub fn detect_onsets(samples: &[f32], sample_rate: f64) -> Vec<f64> {
    let envelope = energy_envelope(samples);
    if envelope.len() < 3 || sample_rate <= 0.0 {
        return Vec::new();
    }

    let diff = rising_edges(&envelope);
    let max = diff.iter().copied().fold(0.0_f32, f32::max);
    let mean = diff.iter().sum::<f32>() / diff.len() as f32;
    let threshold = (mean * 1.5).max(max * 0.1);

    log::debug!(
        "Onset envelope: {} frames, max rise {:.5}, mean {:.5}, threshold {:.5}",
        envelope.len(),
        max,
        mean,
        threshold
    );

    let mut onsets: Vec<f64> = Vec::new();
    for i in 1..diff.len().saturating_sub(1) {
        let d = diff[i];
        if d > threshold && d >= diff[i - 1] && d >= diff[i + 1] {
            // diff[i] is the rise into envelope frame i + 1
            let secs = ((i + 1) * HOP_SIZE) as f64 / sample_rate;
            if onsets.last().is_none_or(|&prev| secs - prev > MIN_ONSET_GAP_SECS) {
                onsets.push(secs);
            }
        }
    }

    log::debug!("Detected {} onsets", onsets.len());
    onsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::impulses;

    const SR: f64 = 44_100.0;

    #[test]
    fn test_spaced_impulses_each_detected() {
        let times: Vec<f64> = (0..8).map(|i| 0.1 + 0.25 * i as f64).collect();
        let samples = impulses(SR, 2.5, &times);
        let onsets = detect_onsets(&samples, SR);
        assert_eq!(onsets.len(), 8);
        for (found, expected) in onsets.iter().zip(&times) {
            // Frame quantisation puts the onset at most one window early.
            assert!((found - expected).abs() < WINDOW_SIZE as f64 / SR + 1e-9);
        }
    }

    #[test]
    fn test_close_impulses_collapse() {
        let times: Vec<f64> = (0..8).map(|i| 0.1 + 0.05 * i as f64).collect();
        let samples = impulses(SR, 1.0, &times);
        let onsets = detect_onsets(&samples, SR);
        assert!(!onsets.is_empty());
        assert!(onsets.len() < 8);
        assert!(onsets.windows(2).all(|w| w[1] - w[0] > MIN_ONSET_GAP_SECS));
    }

    #[test]
    fn test_too_short_yields_nothing() {
        // 2048 samples → two envelope frames
        let samples = impulses(SR, 2048.0 / SR, &[0.01]);
        assert!(energy_envelope(&samples).len() < 3);
        assert!(detect_onsets(&samples, SR).is_empty());
        assert!(detect_onsets(&[], SR).is_empty());
    }

    #[test]
    fn test_silence_yields_nothing() {
        assert!(detect_onsets(&vec![0.0; 44_100], SR).is_empty());
    }

    #[test]
    fn test_rising_edges_clip_negative() {
        assert_eq!(rising_edges(&[0.0, 1.0, 0.5, 0.75]), vec![1.0, 0.0, 0.25]);
    }
}
