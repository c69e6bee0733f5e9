use std::time::Duration;

use tape_shared::config::{floor_at, MIN_PLAYBACK_SPEED};

/// Chunk sizes are whole multiples of this many samples.
pub const KBIN_SAMPLES: i64 = 128;
/// Lower bound on the ramp chunk size, in kbins.
pub const MIN_RAMP_CHUNK_KBINS: i64 = 4;

/// Sample-domain constants derived from the sample rate and chunk length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub sample_rate: u32,
    /// Output length of one ramp chunk, in samples
    pub ramp_chunk_samples: i64,
    /// Source length of one steady-state chunk, in samples
    pub chunk_samples: i64,
}

impl Timing {
    pub fn new(sample_rate: u32, chunk_length: f64) -> Self {
        let ramp_chunk_samples = Self::ramp_chunk_samples_for(sample_rate, chunk_length);
        Self {
            sample_rate,
            ramp_chunk_samples,
            chunk_samples: ramp_chunk_samples * 2,
        }
    }

    /// Round `chunk_length` seconds to a whole number of kbins (at least four).
    pub fn ramp_chunk_samples_for(sample_rate: u32, chunk_length: f64) -> i64 {
        let target_samples = (sample_rate as f64 * chunk_length).floor();
        let target_kbins = (target_samples / KBIN_SAMPLES as f64).round() as i64;
        target_kbins.max(MIN_RAMP_CHUNK_KBINS) * KBIN_SAMPLES
    }

    #[inline]
    pub fn rate(&self) -> f64 {
        self.sample_rate as f64
    }

    /// Period of the scheduler tick: one ramp chunk of output time.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.ramp_chunk_samples as f64 / self.rate())
    }

    /// Snap a clock value to the nearest whole-sample boundary.
    pub fn clamp_clock(&self, seconds: f64) -> f64 {
        (seconds * self.rate()).round() / self.rate()
    }

    /// Snap a speed so one ramp chunk covers a whole number of source samples.
    pub fn clamp_speed(&self, speed: f64) -> f64 {
        let safe = floor_at(speed, MIN_PLAYBACK_SPEED);
        let source_samples = (self.ramp_chunk_samples as f64 * safe).round();
        source_samples / self.ramp_chunk_samples as f64
    }

    /// Ramp duration in seconds between two speeds.
    pub fn ramp_duration(start_speed: f64, end_speed: f64) -> f64 {
        (start_speed - end_speed).abs().sqrt()
    }

    pub fn samples_to_seconds(&self, samples: u64) -> f64 {
        samples as f64 / self.rate()
    }
}
