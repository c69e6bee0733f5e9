use serde::{Deserialize, Serialize};

use crate::error::TapeError;

pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_CHUNK_LENGTH: f64 = 0.02;
pub const DEFAULT_LOOKAHEAD: f64 = 5.0;
pub const DEFAULT_LATENCY: f64 = 0.1;
pub const DEFAULT_PLAYBACK_SPEED: f64 = 1.0;
pub const DEFAULT_SCRUB_SPEED: f64 = 8.0;
pub const DEFAULT_CACHE_RADIUS: usize = 2;

pub const MIN_LOOKAHEAD_SECONDS: f64 = 1.0;
pub const MIN_LATENCY_SECONDS: f64 = 0.1;
pub const MIN_PLAYBACK_SPEED: f64 = 0.1;

/// Returns `value` when it is a number at or above `min`, otherwise `min`.
///
/// NaN falls back to `min`.
#[inline]
pub fn floor_at(value: f64, min: f64) -> f64 {
    if value >= min { value } else { min }
}

/// Engine construction parameters.
///
/// `sample_rate`, `chunk_length` and `cache_radius` are fixed for the life of
/// an engine; the rest can be changed later through the engine's setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapeConfig {
    /// Output sample rate (Hz); decoded sources are converted to it
    pub sample_rate: u32,
    /// Target ramp chunk length in seconds, rounded to whole 128-sample bins
    pub chunk_length: f64,
    /// How far ahead (seconds) the pending queue is kept filled
    pub lookahead: f64,
    /// How close to now (seconds) a chunk must be before it is scheduled
    pub latency: f64,
    /// Speed used by `play` / `reverse`
    pub playback_speed: f64,
    /// Speed used by the scrub verbs
    pub scrub_speed: f64,
    /// Decoded segments kept on either side of the current one
    pub cache_radius: usize,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_length: DEFAULT_CHUNK_LENGTH,
            lookahead: DEFAULT_LOOKAHEAD,
            latency: DEFAULT_LATENCY,
            playback_speed: DEFAULT_PLAYBACK_SPEED,
            scrub_speed: DEFAULT_SCRUB_SPEED,
            cache_radius: DEFAULT_CACHE_RADIUS,
        }
    }
}

impl TapeConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, TapeError> {
        let config: TapeConfig =
            serde_json::from_str(json).map_err(|e| TapeError::Config(e.to_string()))?;
        config.sanitized()
    }

    /// Read and parse a JSON configuration file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, TapeError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Apply the parameter floors and reject values the engine cannot run with.
    pub fn sanitized(&self) -> Result<Self, TapeError> {
        if self.sample_rate == 0 {
            return Err(TapeError::Config("sample_rate must be positive".into()));
        }
        if !self.chunk_length.is_finite() || self.chunk_length < 0.0 {
            return Err(TapeError::Config(format!(
                "chunk_length must be a non-negative number, got {}",
                self.chunk_length
            )));
        }
        Ok(Self {
            sample_rate: self.sample_rate,
            chunk_length: self.chunk_length,
            lookahead: floor_at(self.lookahead, MIN_LOOKAHEAD_SECONDS),
            latency: floor_at(self.latency, MIN_LATENCY_SECONDS),
            playback_speed: floor_at(self.playback_speed, MIN_PLAYBACK_SPEED),
            scrub_speed: floor_at(self.scrub_speed, MIN_PLAYBACK_SPEED),
            cache_radius: self.cache_radius,
        })
    }
}

/// Options for a single `load` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Decode only the first two sources up front and assume every later
    /// source is as long as the second one.
    pub uniform_segments: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = TapeConfig::from_json("{}").unwrap();
        assert_eq!(config, TapeConfig::default());
    }

    #[test]
    fn test_floors_applied() {
        let config = TapeConfig::from_json(
            r#"{ "lookahead": 0.2, "latency": 0.01, "playback_speed": 0.0, "scrub_speed": -3 }"#,
        )
        .unwrap();
        assert_eq!(config.lookahead, MIN_LOOKAHEAD_SECONDS);
        assert_eq!(config.latency, MIN_LATENCY_SECONDS);
        assert_eq!(config.playback_speed, MIN_PLAYBACK_SPEED);
        assert_eq!(config.scrub_speed, MIN_PLAYBACK_SPEED);
    }

    #[test]
    fn test_rejects_zero_sample_rate() {
        let err = TapeConfig::from_json(r#"{ "sample_rate": 0 }"#).unwrap_err();
        assert!(matches!(err, TapeError::Config(_)));
    }

    #[test]
    fn test_floor_at_nan() {
        assert_eq!(floor_at(f64::NAN, 1.0), 1.0);
        assert_eq!(floor_at(2.5, 1.0), 2.5);
    }
}
