//! Audio output substrates.
//!
//! The scheduler talks to a clock plus a place to start buffers and automate
//! gain. `DeviceOutput` plays through the sound card, `OfflineOutput` keeps a
//! manually advanced clock and records what was scheduled.

pub mod automation;
pub mod device;
pub mod offline;

pub use automation::AutomationLane;
pub use device::DeviceOutput;
pub use offline::{OfflineOutput, StartedBuffer};

use crate::chunk::ChunkBuffer;

/// Gain stages on the output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GainLane {
    /// Per-chunk gain, ramped as chunks with different gains are scheduled
    Chunks,
    /// Master volume applied after the chunk gain
    Master,
}

impl GainLane {
    pub fn initial_value(self) -> f32 {
        match self {
            GainLane::Chunks => 0.0,
            GainLane::Master => 1.0,
        }
    }
}

/// Clock, buffer playback and gain automation the scheduler renders into.
pub trait OutputSubstrate: Send + Sync {
    /// Output sample rate (Hz).
    fn sample_rate(&self) -> u32;

    /// Monotonic output clock in seconds.
    fn current_time(&self) -> f64;

    /// Play `buffer` starting at `start_time`, with `rate` source samples
    /// consumed per engine-rate output sample.
    fn start_buffer(&self, buffer: ChunkBuffer, rate: f64, start_time: f64);

    /// Ramp `lane` linearly from its previous automation point to `value`,
    /// arriving at `end_time`.
    fn ramp_gain(&self, lane: GainLane, value: f32, end_time: f64);

    /// Remove automation on `lane` at or after `from_time`.
    fn cancel_gain(&self, lane: GainLane, from_time: f64);

    /// Current value of `lane` at the output clock.
    fn gain_value(&self, lane: GainLane) -> f32;

    fn resume(&self) -> Result<(), anyhow::Error>;

    fn suspend(&self) -> Result<(), anyhow::Error>;

    fn is_running(&self) -> bool;
}

/// Control-side copies of the gain lanes.
#[derive(Debug, Clone)]
pub(crate) struct GainLanes {
    pub chunks: AutomationLane,
    pub master: AutomationLane,
}

impl GainLanes {
    pub fn new() -> Self {
        Self {
            chunks: AutomationLane::new(GainLane::Chunks.initial_value()),
            master: AutomationLane::new(GainLane::Master.initial_value()),
        }
    }

    pub fn lane(&self, lane: GainLane) -> &AutomationLane {
        match lane {
            GainLane::Chunks => &self.chunks,
            GainLane::Master => &self.master,
        }
    }

    pub fn lane_mut(&mut self, lane: GainLane) -> &mut AutomationLane {
        match lane {
            GainLane::Chunks => &mut self.chunks,
            GainLane::Master => &mut self.master,
        }
    }

    /// Add a ramp, dropping breakpoints already in the past at `now`.
    pub fn ramp(&mut self, lane: GainLane, value: f32, end_time: f64, now: f64) {
        let lane = self.lane_mut(lane);
        lane.prune_before(now);
        lane.ramp_to(value, end_time);
    }

    /// Cancel from `from_time`, dropping breakpoints already in the past at `now`.
    pub fn cancel(&mut self, lane: GainLane, from_time: f64, now: f64) {
        let lane = self.lane_mut(lane);
        lane.prune_before(now);
        lane.cancel_from(from_time);
    }
}
