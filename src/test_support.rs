use std::path::{Path, PathBuf};

use crate::library::smf::tests::midi_bytes;

/// Scratch directory under the system temp dir, removed on drop.
pub(crate) struct TempDir(PathBuf);

impl TempDir {
    pub(crate) fn new(label: &str) -> Self {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        let path = std::env::temp_dir().join(format!(
            "bandmate_test_{}_{}_{}",
            label,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.0).ok();
    }
}

/// Write a 480-tpq, default-tempo groove file of (tick, note, on) events.
pub(crate) fn write_groove(path: &Path, notes: &[(u32, u8, bool)]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, midi_bytes(480, None, None, notes)).unwrap();
}

/// Mono impulse train: one full-scale sample at each of `times_secs`.
pub(crate) fn impulses(sample_rate: f64, duration_secs: f64, times_secs: &[f64]) -> Vec<f32> {
    let mut samples = vec![0.0_f32; (sample_rate * duration_secs) as usize];
    for &t in times_secs {
        let idx = (t * sample_rate) as usize;
        if idx < samples.len() {
            samples[idx] = 1.0;
        }
    }
    samples
}
