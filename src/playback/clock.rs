/// What the host reports at the start of one audio block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportInfo {
    /// Host tempo; 0 or less when unknown.
    pub host_bpm: f64,
    /// Host musical position at the start of the block, in quarter notes.
    pub host_position_beats: f64,
    pub host_playing: bool,
    pub num_samples: usize,
}

impl TransportInfo {
    /// A block with no running host transport.
    pub fn stopped(num_samples: usize) -> Self {
        Self {
            host_bpm: 0.0,
            host_position_beats: 0.0,
            host_playing: false,
            num_samples,
        }
    }

    /// A block from a running host transport.
    pub fn playing(host_bpm: f64, host_position_beats: f64, num_samples: usize) -> Self {
        Self {
            host_bpm,
            host_position_beats,
            host_playing: true,
            num_samples,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    /// Free-running, advanced by block duration at the effective tempo.
    Internal,
    /// Slaved to the host's reported position.
    Host,
}

/// Chooses the time source for each block and converts block sizes to beats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clock {
    pub sample_rate: f64,
    /// Tempo of the internal clock.
    pub internal_bpm: f64,
    /// Preview forces the internal clock at `internal_bpm`.
    pub preview: bool,
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            sample_rate: 44_100.0,
            internal_bpm: 120.0,
            preview: true,
        }
    }
}

impl Clock {
    pub fn source(&self, transport: &TransportInfo) -> ClockSource {
        if self.preview || !transport.host_playing {
            ClockSource::Internal
        } else {
            ClockSource::Host
        }
    }

    /// Preview tempo while previewing, otherwise the host's tempo when it has one.
    pub fn effective_bpm(&self, transport: &TransportInfo) -> f64 {
        if !self.preview && transport.host_bpm > 0.0 {
            transport.host_bpm
        } else {
            self.internal_bpm
        }
    }

    /// Length of the block in beats at the effective tempo.
    pub fn block_beats(&self, transport: &TransportInfo) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        transport.num_samples as f64 * self.effective_bpm(transport) / (60.0 * self.sample_rate)
    }
}
