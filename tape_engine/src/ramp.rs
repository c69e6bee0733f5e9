use std::collections::VecDeque;

use tape_shared::Direction;

use crate::chunk::{Chunk, ChunkFactory};
use crate::timing::Timing;

/// One planned chunk of a speed ramp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampStep {
    pub speed: f64,
    /// Source samples the chunk consumes, so its output length is one ramp chunk
    pub source_len: i64,
    pub gain: f32,
}

/// Where a transition starts from: the tail of what is already playing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampOrigin {
    pub speed: f64,
    pub direction: Direction,
    pub sample: u64,
}

/// Plans speed ramps and turns them into chunks.
pub struct RampSynthesizer<'a> {
    timing: &'a Timing,
    factory: &'a ChunkFactory,
    min_speed: f64,
}

impl<'a> RampSynthesizer<'a> {
    pub fn new(timing: &'a Timing, factory: &'a ChunkFactory) -> Self {
        Self {
            timing,
            factory,
            min_speed: timing.clamp_speed(0.0),
        }
    }

    pub fn min_speed(&self) -> f64 {
        self.min_speed
    }

    /// Gain that fades the signal in over the first unit of speed.
    pub fn gain_for(&self, speed: f64) -> f32 {
        (speed - self.min_speed).clamp(0.0, 1.0) as f32
    }

    /// Speed increment per ramp chunk; a ramp lasts `sqrt(|end - start|)`
    /// seconds of output.
    fn speed_step(&self, start: f64, end: f64) -> f64 {
        let delta = end - start;
        let duration = Timing::ramp_duration(start, end);
        let steps = (duration * self.timing.rate() / self.timing.ramp_chunk_samples as f64).floor();
        if steps < 1.0 { delta } else { delta / steps }
    }

    /// Plan the chunks of a ramp from `start` to `end`, both endpoints included.
    pub fn steps(&self, start: f64, end: f64) -> Vec<RampStep> {
        let start = self.timing.clamp_speed(start);
        let end = self.timing.clamp_speed(end);
        let step = self.speed_step(start, end);
        let rc = self.timing.ramp_chunk_samples as f64;

        let mut steps = Vec::new();
        let mut next = start;
        loop {
            let speed = self.timing.clamp_speed(next);
            steps.push(RampStep {
                speed,
                source_len: (rc * speed).round() as i64,
                gain: self.gain_for(speed),
            });
            if speed == end {
                break;
            }
            if (end - next).abs() < step.abs() {
                next = end;
            } else {
                next += step;
            }
        }
        steps
    }

    /// Append a ramp's chunks to `queue`, starting at `start_sample`.
    ///
    /// Stops early at a source boundary. Returns the sample where the last
    /// appended chunk ends, or `start_sample` when nothing was appended.
    pub fn push_ramp(
        &self,
        queue: &mut VecDeque<Chunk>,
        start_speed: f64,
        end_speed: f64,
        start_sample: u64,
        direction: Direction,
        ignore_gain: bool,
    ) -> u64 {
        let mut next_start = start_sample as i64;
        let mut last_end = start_sample;
        for step in self.steps(start_speed, end_speed) {
            let start = next_start;
            next_start += step.source_len * direction.sign();
            let Some(mut chunk) = self.factory.create(start, next_start, step.speed, 1.0) else {
                break;
            };
            if !ignore_gain {
                chunk.gain = step.gain;
            }
            last_end = chunk.source_end;
            queue.push_back(chunk);
        }
        last_end
    }

    /// Chunks that take playback from `origin` to `end_speed` in `direction`.
    ///
    /// A direction change first ramps down to the minimum speed, then ramps
    /// back up the other way from where the down-ramp ended.
    pub fn transition(&self, origin: RampOrigin, direction: Direction, end_speed: f64) -> VecDeque<Chunk> {
        let mut queue = VecDeque::new();
        if direction == origin.direction {
            // Already audible on both ends: keep unity gain through the ramp
            let ignore_gain = origin.speed != self.min_speed && end_speed != self.min_speed;
            self.push_ramp(&mut queue, origin.speed, end_speed, origin.sample, direction, ignore_gain);
        } else {
            let pivot = self.push_ramp(
                &mut queue,
                origin.speed,
                self.min_speed,
                origin.sample,
                origin.direction,
                false,
            );
            self.push_ramp(&mut queue, self.min_speed, end_speed, pivot, direction, false);
        }
        queue
    }
}
