use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use parking_lot::RwLock;

/// Fetches raw encoded bytes for a locator (a path, a key, a URL...).
pub trait ByteSource: Send + Sync {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, anyhow::Error>;
}

/// Decodes encoded bytes into per-channel samples.
pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio, anyhow::Error>;
}

/// Decoded stereo audio at the rate it was encoded with.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: [Vec<f32>; 2],
}

impl DecodedAudio {
    /// Frames per channel.
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads locators as filesystem paths.
#[derive(Debug, Clone, Default)]
pub struct FileSource;

impl FileSource {
    pub fn new() -> Self {
        Self
    }
}

impl ByteSource for FileSource {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, anyhow::Error> {
        let path = Path::new(locator);
        std::fs::read(path).map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))
    }
}

/// Serves bytes registered in memory under a locator key.
#[derive(Default)]
pub struct MemorySource {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, locator: impl Into<String>, bytes: Vec<u8>) {
        self.blobs.write().insert(locator.into(), bytes);
    }
}

impl ByteSource for MemorySource {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, anyhow::Error> {
        self.blobs
            .read()
            .get(locator)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no source registered for `{}`", locator))
    }
}

/// WAV decoder backed by `hound`.
///
/// Mono files are copied to both channels; anything beyond two channels keeps
/// only the first pair. Integer PCM is scaled to [-1, 1).
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl Decoder for WavDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio, anyhow::Error> {
        let reader = hound::WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        let channels = spec.channels as usize;
        if channels == 0 {
            return Err(anyhow::anyhow!("WAV stream declares zero channels"));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let max_val = 2.0_f32.powi(spec.bits_per_sample as i32 - 1);
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|x| x as f32 / max_val))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        let frames = interleaved.len() / channels;
        let mut left = Vec::with_capacity(frames);
        let mut right = Vec::with_capacity(frames);
        for frame in interleaved.chunks_exact(channels) {
            left.push(frame[0]);
            right.push(if channels > 1 { frame[1] } else { frame[0] });
        }

        Ok(DecodedAudio {
            sample_rate: spec.sample_rate,
            channels: [left, right],
        })
    }
}
