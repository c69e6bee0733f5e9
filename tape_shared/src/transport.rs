use serde::{Deserialize, Serialize};

/// Playback direction along the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    /// +1 for forward, -1 for reverse.
    #[inline]
    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
        }
    }

    #[inline]
    pub fn signum(self) -> f64 {
        self.sign() as f64
    }
}

/// The state a transport command asks the engine to move to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportTarget {
    pub playing: bool,
    pub scrubbing: bool,
    pub direction: Direction,
}

impl TransportTarget {
    pub const PLAY: Self = Self { playing: true, scrubbing: false, direction: Direction::Forward };
    pub const STOP: Self = Self { playing: false, scrubbing: false, direction: Direction::Forward };
    pub const REVERSE: Self = Self { playing: true, scrubbing: false, direction: Direction::Reverse };
    pub const SCRUB_FORWARD: Self = Self { playing: true, scrubbing: true, direction: Direction::Forward };
    pub const SCRUB_BACK: Self = Self { playing: true, scrubbing: true, direction: Direction::Reverse };
}

/// Transport verbs understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportCommand {
    Play,
    Stop,
    Reverse,
    ScrubForward,
    ScrubBack,
}

impl TransportCommand {
    pub fn target(self) -> TransportTarget {
        match self {
            TransportCommand::Play => TransportTarget::PLAY,
            TransportCommand::Stop => TransportTarget::STOP,
            TransportCommand::Reverse => TransportTarget::REVERSE,
            TransportCommand::ScrubForward => TransportTarget::SCRUB_FORWARD,
            TransportCommand::ScrubBack => TransportTarget::SCRUB_BACK,
        }
    }
}
