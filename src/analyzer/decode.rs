use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),
    #[error("File has no samples: {0}")]
    Empty(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded clip: the first channel only, normalised to [-1, 1).
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub file_name: String,
    pub samples: Vec<f32>,
    pub sample_rate: f64,
}

impl AudioClip {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.samples.len() as f64 / self.sample_rate
        } else {
            0.0
        }
    }
}

/// Load an audio file for analysis. Only WAV is supported.
pub fn load_audio(path: &Path) -> Result<AudioClip, DecodeError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if !crate::AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        return Err(DecodeError::UnsupportedFormat(ext));
    }

    let file_name = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();

    let reader = hound::WavReader::open(path)?;
    let clip = decode_wav(reader, file_name)?;

    log::debug!(
        "Loaded {} ({:.2}s, {} Hz)",
        clip.file_name,
        clip.duration_secs(),
        clip.sample_rate
    );
    Ok(clip)
}

fn decode_wav<R: std::io::Read>(
    reader: hound::WavReader<R>,
    file_name: String,
) -> Result<AudioClip, DecodeError> {
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    // Interleaved frames; keep the first channel.
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .step_by(channels)
            .collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .step_by(channels)
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    if samples.is_empty() {
        return Err(DecodeError::Empty(file_name));
    }

    Ok(AudioClip {
        file_name,
        samples,
        sample_rate: f64::from(spec.sample_rate),
    })
}
