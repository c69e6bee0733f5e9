pub mod config;
pub mod error;
pub mod transport;

pub use config::{LoadOptions, TapeConfig};
pub use error::TapeError;
pub use transport::{Direction, TransportCommand, TransportTarget};

/// Engine state shared between the transport state machine and progress readers.
///
/// Only the transport state machine mutates `playing`, `scrubbing` and
/// `direction`; `resume_sample` also advances as scheduled chunks retire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineState {
    /// Absolute sample position to resume from when stopped
    pub resume_sample: u64,
    pub playing: bool,
    pub scrubbing: bool,
    pub direction: Direction,
    /// A transition is in flight
    pub busy: bool,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            resume_sample: 0,
            playing: false,
            scrubbing: false,
            direction: Direction::Forward,
            busy: false,
        }
    }
}

impl EngineState {
    /// The transport target this state currently represents.
    pub fn target(&self) -> TransportTarget {
        TransportTarget {
            playing: self.playing,
            scrubbing: self.scrubbing,
            direction: self.direction,
        }
    }
}

/// Number of output channels the engine renders.
pub const CHANNEL_COUNT: usize = 2;
