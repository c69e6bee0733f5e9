use std::sync::Arc;

use tape_shared::Direction;

use crate::cache::SampleCache;

/// Stereo sample data of one chunk, already in playback order.
pub type ChunkBuffer = Arc<[Vec<f32>; 2]>;

/// A renderable segment of audio with fixed speed, direction and gain.
///
/// For reverse chunks `source_start > source_end` and the buffer holds the
/// samples time-reversed.
#[derive(Debug)]
pub struct Chunk {
    pub source_start: u64,
    pub source_end: u64,
    pub source_len: u64,
    pub direction: Direction,
    pub speed: f64,
    pub gain: f32,
    pub buffer: ChunkBuffer,
}

impl Chunk {
    /// Commit the chunk to a start time on the output clock.
    pub fn schedule(self, start_time: f64, sample_rate: f64) -> ScheduledChunk {
        let duration = (self.source_len as f64 / sample_rate) / self.speed;
        ScheduledChunk {
            start_time,
            duration,
            next_start: start_time + duration,
            chunk: self,
        }
    }

    pub fn summary(&self) -> ChunkSummary {
        ChunkSummary {
            source_start: self.source_start,
            source_end: self.source_end,
            direction: self.direction,
            speed: self.speed,
            gain: self.gain,
            start_time: None,
        }
    }
}

/// A chunk committed to the output substrate.
#[derive(Debug)]
pub struct ScheduledChunk {
    pub chunk: Chunk,
    pub start_time: f64,
    /// Output seconds the chunk lasts at its speed
    pub duration: f64,
    pub next_start: f64,
}

impl ScheduledChunk {
    /// Source position (seconds) this chunk is playing at output time `now`,
    /// clamped to the chunk's own window.
    pub fn position_at(&self, now: f64, sample_rate: f64) -> f64 {
        let elapsed = (now - self.start_time).clamp(0.0, self.duration);
        let start_seconds = self.chunk.source_start as f64 / sample_rate;
        start_seconds + elapsed * self.chunk.speed * self.chunk.direction.signum()
    }

    pub fn summary(&self) -> ChunkSummary {
        ChunkSummary {
            start_time: Some(self.start_time),
            ..self.chunk.summary()
        }
    }
}

/// Plain-data view of a queued chunk, for progress readers and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkSummary {
    pub source_start: u64,
    pub source_end: u64,
    pub direction: Direction,
    pub speed: f64,
    pub gain: f32,
    pub start_time: Option<f64>,
}

/// Turns sample ranges into chunks backed by the sample cache.
#[derive(Clone)]
pub struct ChunkFactory {
    cache: Arc<SampleCache>,
}

impl ChunkFactory {
    pub fn new(cache: Arc<SampleCache>) -> Self {
        Self { cache }
    }

    pub fn total_samples(&self) -> u64 {
        self.cache.total_samples()
    }

    /// Build a chunk playing `start -> end` at `speed`.
    ///
    /// Returns `None` when the clamped range is empty or the samples could not
    /// be decoded; callers stop producing chunks for the round.
    pub fn create(&self, start: i64, end: i64, speed: f64, gain: f32) -> Option<Chunk> {
        let start = self.clamp_sample(start);
        let end = self.clamp_sample(end);
        let source_len = start.abs_diff(end);
        if source_len == 0 {
            return None;
        }

        let direction = if start < end { Direction::Forward } else { Direction::Reverse };
        let (lower, upper) = (start.min(end), start.max(end));

        let buffer = match self.fetch(lower, upper, direction) {
            Ok(buffer) => buffer,
            Err(e) => {
                log::error!("[Chunk] Failed to create chunk {}..{}: {:#}", start, end, e);
                return None;
            }
        };

        Some(Chunk {
            source_start: start,
            source_end: end,
            source_len,
            direction,
            speed,
            gain,
            buffer,
        })
    }

    fn fetch(&self, lower: u64, upper: u64, direction: Direction) -> Result<ChunkBuffer, anyhow::Error> {
        let read = |channel| match direction {
            Direction::Forward => self.cache.get(channel, lower, upper),
            Direction::Reverse => self.cache.get_reverse(channel, lower, upper),
        };
        Ok(Arc::new([read(0)?, read(1)?]))
    }

    /// Clamp to `[0, total]`.
    fn clamp_sample(&self, sample: i64) -> u64 {
        let total = self.cache.total_samples();
        if sample <= 0 {
            0
        } else {
            (sample as u64).min(total)
        }
    }
}
