use std::sync::Arc;

use parking_lot::Mutex;
use tape_shared::{Direction, EngineState, TransportTarget};

use crate::ramp::RampSynthesizer;
use crate::scheduler::{Speeds, Timeline};

/// What happened to a transport request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The pending queue was replaced with a ramp to the target
    Applied,
    /// Already in the target state, or it would run off a source boundary
    Rejected,
    /// A newer request arrived while this one waited for the engine
    Superseded,
}

impl TransitionOutcome {
    pub fn is_applied(self) -> bool {
        self == TransitionOutcome::Applied
    }
}

/// Speed a transition ramps to.
pub fn end_speed(target: TransportTarget, speeds: &Speeds) -> f64 {
    if !target.playing {
        speeds.min
    } else if target.scrubbing {
        speeds.scrub
    } else {
        speeds.base
    }
}

/// Whether `target` is a real change that can be carried out from `state`.
pub fn is_valid_transition(state: &EngineState, target: TransportTarget, total_samples: u64, force: bool) -> bool {
    // Stopped is stopped, whichever way the tape last moved
    let unchanged = state.playing == target.playing
        && state.scrubbing == target.scrubbing
        && (state.direction == target.direction || !target.playing);
    if unchanged && !force {
        return false;
    }
    if target.playing {
        match target.direction {
            Direction::Reverse if state.resume_sample == 0 => return false,
            Direction::Forward if state.resume_sample >= total_samples => return false,
            _ => {}
        }
    }
    true
}

/// Serializes transport transitions and rebuilds the pending queue for each.
///
/// One transition is in flight at a time. Requests arriving meanwhile wait;
/// when it completes only the newest waiter runs, the others are superseded.
pub struct TransportMachine {
    timeline: Arc<Timeline>,
    /// Non-scrub target to return to when a scrub is released
    pre_scrub: Mutex<Option<TransportTarget>>,
}

impl TransportMachine {
    pub fn new(timeline: Arc<Timeline>) -> Self {
        Self {
            timeline,
            pre_scrub: Mutex::new(None),
        }
    }

    pub fn play(&self) -> TransitionOutcome {
        self.apply(TransportTarget::PLAY, false)
    }

    pub fn stop(&self) -> TransitionOutcome {
        self.apply(TransportTarget::STOP, false)
    }

    pub fn reverse(&self) -> TransitionOutcome {
        self.apply(TransportTarget::REVERSE, false)
    }

    pub fn scrub_forward(&self, active: bool) -> TransitionOutcome {
        self.scrub(Direction::Forward, active)
    }

    pub fn scrub_back(&self, active: bool) -> TransitionOutcome {
        self.scrub(Direction::Reverse, active)
    }

    /// Start or release a scrub. Releasing returns to whatever the transport
    /// was doing when the scrub began.
    fn scrub(&self, direction: Direction, active: bool) -> TransitionOutcome {
        let state = self.timeline.state();
        let target = TransportTarget { playing: true, scrubbing: true, direction };

        if active {
            let outcome = self.apply(target, false);
            if outcome.is_applied() && !state.scrubbing {
                *self.pre_scrub.lock() = Some(state.target());
            }
            return outcome;
        }

        if !(state.scrubbing && state.direction == direction) {
            return TransitionOutcome::Rejected;
        }
        let resume = self.pre_scrub.lock().take().unwrap_or(TransportTarget::STOP);
        match self.apply(resume, false) {
            // Resuming would run off the edge; come to rest instead
            TransitionOutcome::Rejected if resume != TransportTarget::STOP => {
                self.apply(TransportTarget::STOP, false)
            }
            outcome => outcome,
        }
    }

    /// Move to `target`, replacing the pending queue with a ramp from the
    /// tail of what is scheduled. `force` runs the ramp even when the target
    /// equals the current state, which picks up a changed speed.
    pub fn apply(&self, target: TransportTarget, force: bool) -> TransitionOutcome {
        let timeline = &self.timeline;

        let mut core = timeline.core.lock();
        core.latest_ticket += 1;
        let ticket = core.latest_ticket;
        while core.state.busy {
            timeline.idle.wait(&mut core);
        }
        if ticket != core.latest_ticket {
            log::debug!("[Transport] {:?} superseded", target);
            return TransitionOutcome::Superseded;
        }
        if !is_valid_transition(&core.state, target, timeline.total_samples(), force) {
            log::debug!("[Transport] {:?} rejected from {:?}", target, core.state);
            return TransitionOutcome::Rejected;
        }

        core.state.busy = true;
        core.pending.clear();
        core.epoch += 1;
        let origin = core.ramp_origin();
        let end = end_speed(target, &core.speeds);
        timeline.publish(&core);
        drop(core);

        let factory = timeline.factory();
        let pending = RampSynthesizer::new(timeline.timing(), &factory).transition(origin, target.direction, end);
        log::debug!(
            "[Transport] {:?}: {} ramp chunks from sample {} at speed {:.4}",
            target,
            pending.len(),
            origin.sample,
            origin.speed
        );

        let mut core = timeline.core.lock();
        core.pending = pending;
        core.state.playing = target.playing;
        core.state.scrubbing = target.scrubbing;
        core.state.direction = target.direction;
        core.state.busy = false;
        timeline.publish(&core);
        drop(core);
        timeline.idle.notify_all();

        TransitionOutcome::Applied
    }
}
