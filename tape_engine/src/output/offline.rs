use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{GainLane, GainLanes, OutputSubstrate};
use crate::chunk::ChunkBuffer;

/// A buffer handed to the offline output.
#[derive(Debug, Clone)]
pub struct StartedBuffer {
    pub buffer: ChunkBuffer,
    pub rate: f64,
    pub start_time: f64,
}

impl StartedBuffer {
    pub fn frames(&self) -> usize {
        self.buffer[0].len()
    }

    /// Output seconds the buffer plays for.
    pub fn duration(&self, sample_rate: u32) -> f64 {
        self.frames() as f64 / sample_rate as f64 / self.rate
    }
}

/// Output substrate with a manually driven clock.
///
/// Nothing is rendered; started buffers and gain automation are recorded so
/// the schedule can be inspected. The clock only moves through `advance` and
/// `set_time`, which makes scheduler behavior deterministic.
pub struct OfflineOutput {
    sample_rate: u32,
    clock: Mutex<f64>,
    running: AtomicBool,
    started: Mutex<Vec<StartedBuffer>>,
    lanes: Mutex<GainLanes>,
}

impl OfflineOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            clock: Mutex::new(0.0),
            running: AtomicBool::new(false),
            started: Mutex::new(Vec::new()),
            lanes: Mutex::new(GainLanes::new()),
        }
    }

    pub fn advance(&self, seconds: f64) {
        *self.clock.lock() += seconds;
    }

    pub fn set_time(&self, seconds: f64) {
        *self.clock.lock() = seconds;
    }

    pub fn started(&self) -> Vec<StartedBuffer> {
        self.started.lock().clone()
    }

    pub fn started_count(&self) -> usize {
        self.started.lock().len()
    }

    pub fn gain_at(&self, lane: GainLane, time: f64) -> f32 {
        self.lanes.lock().lane(lane).value_at(time)
    }

    pub fn gain_breakpoints(&self, lane: GainLane) -> Vec<(f64, f32)> {
        self.lanes.lock().lane(lane).breakpoints().to_vec()
    }
}

impl OutputSubstrate for OfflineOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        *self.clock.lock()
    }

    fn start_buffer(&self, buffer: ChunkBuffer, rate: f64, start_time: f64) {
        self.started.lock().push(StartedBuffer { buffer, rate, start_time });
    }

    fn ramp_gain(&self, lane: GainLane, value: f32, end_time: f64) {
        self.lanes.lock().lane_mut(lane).ramp_to(value, end_time);
    }

    fn cancel_gain(&self, lane: GainLane, from_time: f64) {
        self.lanes.lock().lane_mut(lane).cancel_from(from_time);
    }

    fn gain_value(&self, lane: GainLane) -> f32 {
        let now = self.current_time();
        self.gain_at(lane, now)
    }

    fn resume(&self) -> Result<(), anyhow::Error> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn suspend(&self) -> Result<(), anyhow::Error> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
