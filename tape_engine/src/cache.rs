use std::sync::Arc;

use parking_lot::Mutex;

use crate::resampler::TapeResampler;
use crate::source::Decoder;

/// Decoded stereo payload of one segment.
pub type SegmentData = Arc<[Vec<f32>; 2]>;

/// One loaded source, positioned on the absolute sample timeline.
///
/// Segments partition `[0, total)` contiguously. The encoded bytes are kept so
/// an evicted payload can be decoded again later.
pub struct CacheSegment {
    pub start: u64,
    pub end: u64,
    encoded: Arc<[u8]>,
    data: Option<SegmentData>,
}

impl CacheSegment {
    pub fn new(start: u64, end: u64, encoded: Arc<[u8]>, data: Option<SegmentData>) -> Self {
        debug_assert!(start <= end);
        Self { start, end, encoded, data }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn is_resident(&self) -> bool {
        self.data.is_some()
    }
}

struct CacheInner {
    segments: Vec<CacheSegment>,
    /// Segment the resident window is centred on
    current: Option<usize>,
}

impl CacheInner {
    /// Index of the segment containing `sample`; the end of the timeline maps
    /// to the last segment.
    fn index_of(&self, sample: u64) -> usize {
        let idx = self.segments.partition_point(|s| s.end <= sample);
        idx.min(self.segments.len().saturating_sub(1))
    }
}

/// Windowed store of decoded audio indexed by absolute sample position.
///
/// Only segments within `radius` of the most recently requested one keep
/// their decoded payload. All decode and evict work happens under one lock,
/// so a caller arriving mid-refresh waits for it instead of decoding again.
pub struct SampleCache {
    inner: Mutex<CacheInner>,
    decoder: Arc<dyn Decoder>,
    sample_rate: u32,
    radius: usize,
    total_samples: u64,
}

impl SampleCache {
    pub fn new(segments: Vec<CacheSegment>, decoder: Arc<dyn Decoder>, sample_rate: u32, radius: usize) -> Self {
        let total_samples = segments.last().map(|s| s.end).unwrap_or(0);
        debug_assert!(
            segments.windows(2).all(|w| w[0].end == w[1].start),
            "cache segments must be contiguous"
        );
        Self {
            inner: Mutex::new(CacheInner { segments, current: None }),
            decoder,
            sample_rate,
            radius,
            total_samples,
        }
    }

    pub fn empty(decoder: Arc<dyn Decoder>, sample_rate: u32, radius: usize) -> Self {
        Self::new(Vec::new(), decoder, sample_rate, radius)
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn segment_count(&self) -> usize {
        self.inner.lock().segments.len()
    }

    /// Indices of segments currently holding decoded data.
    pub fn resident_segments(&self) -> Vec<usize> {
        self.inner
            .lock()
            .segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_resident())
            .map(|(i, _)| i)
            .collect()
    }

    /// Samples `[start, end)` of `channel`, in forward order.
    pub fn get(&self, channel: usize, start: u64, end: u64) -> Result<Vec<f32>, anyhow::Error> {
        self.read(channel, start, end, false)
    }

    /// Samples `[start, end)` of `channel`, time-reversed.
    ///
    /// Takes the same bound ordering as `get`.
    pub fn get_reverse(&self, channel: usize, start: u64, end: u64) -> Result<Vec<f32>, anyhow::Error> {
        let mut samples = self.read(channel, start, end, true)?;
        samples.reverse();
        Ok(samples)
    }

    fn read(&self, channel: usize, start: u64, end: u64, reverse: bool) -> Result<Vec<f32>, anyhow::Error> {
        assert!(start <= end, "sample range must be ordered: {}..{}", start, end);
        assert!(
            end <= self.total_samples,
            "sample cache exhausted: requested {}..{} of {} samples",
            start,
            end,
            self.total_samples
        );
        assert!(channel < 2, "channel {} out of range", channel);

        let mut output = Vec::with_capacity((end - start) as usize);
        if start == end {
            return Ok(output);
        }

        let mut inner = self.inner.lock();
        let first = inner.index_of(start);
        let last = inner.index_of(end - 1);

        // Centre the window on the segment playback is heading into
        let focus = if reverse { first } else { last };
        if inner.current != Some(focus) || !inner.segments[focus].is_resident() {
            self.refresh(&mut inner, focus)?;
        }

        let mut pos = start;
        for idx in first..=last {
            if !inner.segments[idx].is_resident() {
                log::warn!("[Cache] Sample buffer underrun at segment {}", idx);
                let data = self.decode_segment(&inner.segments[idx])?;
                inner.segments[idx].data = Some(data);
            }
            let segment = &inner.segments[idx];
            let Some(data) = segment.data.as_ref() else {
                unreachable!("segment {} decoded above", idx);
            };
            let seg_end = end.min(segment.end);
            let from = (pos - segment.start) as usize;
            let to = (seg_end - segment.start) as usize;
            output.extend_from_slice(&data[channel][from..to]);
            pos = seg_end;
        }

        debug_assert_eq!(output.len() as u64, end - start);
        Ok(output)
    }

    /// Decode every segment within `radius` of `center` and evict the rest.
    fn refresh(&self, inner: &mut CacheInner, center: usize) -> Result<(), anyhow::Error> {
        inner.current = Some(center);
        let min_index = center.saturating_sub(self.radius);
        let max_index = center + self.radius;

        for idx in 0..inner.segments.len() {
            if idx >= min_index && idx <= max_index {
                if inner.segments[idx].is_resident() {
                    continue;
                }
                match self.decode_segment(&inner.segments[idx]) {
                    Ok(data) => inner.segments[idx].data = Some(data),
                    Err(e) if idx == center => return Err(e),
                    Err(e) => log::error!("[Cache] Prefetch of segment {} failed: {:#}", idx, e),
                }
            } else if inner.segments[idx].data.take().is_some() {
                log::debug!("[Cache] Evicted segment {}", idx);
            }
        }
        Ok(())
    }

    fn decode_segment(&self, segment: &CacheSegment) -> Result<SegmentData, anyhow::Error> {
        let decoded = self.decoder.decode(&segment.encoded)?;
        let source_rate = decoded.sample_rate;
        let [left, right] = decoded.channels;
        let mut channels = TapeResampler::convert_rate(&[left, right], source_rate, self.sample_rate)?;

        let expected = segment.len() as usize;
        if channels[0].len() != expected {
            log::warn!(
                "[Cache] Segment at {} decoded to {} samples, table says {}; fitting",
                segment.start,
                channels[0].len(),
                expected
            );
            for channel in channels.iter_mut() {
                channel.resize(expected, 0.0);
            }
        }

        let right = channels.pop().unwrap_or_default();
        let left = channels.pop().unwrap_or_default();
        Ok(Arc::new([left, right]))
    }
}
