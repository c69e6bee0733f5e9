use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tape_shared::{LoadOptions, TapeError};

use crate::cache::{CacheSegment, SampleCache};
use crate::resampler::TapeResampler;
use crate::source::{ByteSource, Decoder};

/// Counts fetch and decode steps; every source contributes two.
struct ProgressTracker<'a> {
    total: usize,
    done: AtomicUsize,
    callback: Option<&'a (dyn Fn(f64) + Sync)>,
}

impl<'a> ProgressTracker<'a> {
    fn new(sources: usize, callback: Option<&'a (dyn Fn(f64) + Sync)>) -> Self {
        Self {
            total: sources * 2,
            done: AtomicUsize::new(0),
            callback,
        }
    }

    fn step(&self) {
        let done = self.done.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(callback) = self.callback {
            callback(done as f64 / self.total as f64);
        }
    }
}

/// Result of assembling sources into a timeline.
pub struct LoadReport {
    pub segments: Vec<CacheSegment>,
    /// Sources that were skipped, in locator order
    pub failed: Vec<TapeError>,
}

impl LoadReport {
    pub fn total_samples(&self) -> u64 {
        self.segments.last().map(|s| s.end).unwrap_or(0)
    }
}

/// Fetches and decodes an ordered list of sources into cache segments laid
/// end to end.
pub struct SourceLoader {
    source: Arc<dyn ByteSource>,
    decoder: Arc<dyn Decoder>,
    sample_rate: u32,
    radius: usize,
}

impl SourceLoader {
    pub fn new(source: Arc<dyn ByteSource>, decoder: Arc<dyn Decoder>, sample_rate: u32, radius: usize) -> Self {
        Self { source, decoder, sample_rate, radius }
    }

    /// Build a cache from `locators`, played back to back in order.
    pub fn load_cache(
        &self,
        locators: &[String],
        options: LoadOptions,
        progress: Option<&(dyn Fn(f64) + Sync)>,
    ) -> (SampleCache, Vec<TapeError>) {
        let report = self.load(locators, options, progress);
        let cache = SampleCache::new(report.segments, self.decoder.clone(), self.sample_rate, self.radius);
        (cache, report.failed)
    }

    /// Fetch all sources in parallel, then decode them in order to learn their
    /// lengths. Only the segments near the start keep their decoded data.
    ///
    /// A source that fails to fetch or decode is logged and skipped; the rest
    /// still load.
    pub fn load(&self, locators: &[String], options: LoadOptions, progress: Option<&(dyn Fn(f64) + Sync)>) -> LoadReport {
        let tracker = ProgressTracker::new(locators.len(), progress);

        let fetched: Vec<Result<Vec<u8>, TapeError>> = locators
            .par_iter()
            .map(|locator| {
                let result = self.source.fetch(locator).map_err(|e| TapeError::Fetch {
                    locator: locator.clone(),
                    reason: format!("{:#}", e),
                });
                tracker.step();
                result
            })
            .collect();

        let mut segments = Vec::with_capacity(locators.len());
        let mut failed = Vec::new();
        let mut position = 0u64;
        let mut assumed_len = None;

        for (locator, fetched) in locators.iter().zip(fetched) {
            let bytes = match fetched {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::error!("[Loader] {}", e);
                    failed.push(e);
                    // Skip the decode step too so progress still reaches 1.0
                    tracker.step();
                    continue;
                }
            };

            let index = segments.len();
            let decode_now = !options.uniform_segments || index < 2;
            let (len, data) = if decode_now {
                match self.decode(&bytes) {
                    Ok(channels) => {
                        let len = channels[0].len() as u64;
                        if index == 1 {
                            assumed_len = Some(len);
                        }
                        // The window starts at segment 0
                        let data = (index <= self.radius).then(|| Arc::new(channels));
                        (len, data)
                    }
                    Err(e) => {
                        let e = TapeError::Decode {
                            locator: locator.clone(),
                            reason: format!("{:#}", e),
                        };
                        log::error!("[Loader] {}", e);
                        failed.push(e);
                        tracker.step();
                        continue;
                    }
                }
            } else {
                (assumed_len.unwrap_or(0), None)
            };

            if len == 0 {
                log::warn!("[Loader] Skipping empty source {}", locator);
                tracker.step();
                continue;
            }

            segments.push(CacheSegment::new(position, position + len, Arc::from(bytes), data));
            log::debug!("[Loader] {} -> samples {}..{}", locator, position, position + len);
            position += len;
            tracker.step();
        }

        log::info!(
            "[Loader] Loaded {} of {} sources, {:.2}s",
            segments.len(),
            locators.len(),
            position as f64 / self.sample_rate as f64
        );
        LoadReport { segments, failed }
    }

    fn decode(&self, bytes: &[u8]) -> Result<[Vec<f32>; 2], anyhow::Error> {
        let decoded = self.decoder.decode(bytes)?;
        let [left, right] = decoded.channels;
        let mut channels = TapeResampler::convert_rate(&[left, right], decoded.sample_rate, self.sample_rate)?;
        let right = channels.pop().unwrap_or_default();
        let left = channels.pop().unwrap_or_default();
        Ok([left, right])
    }
}
