use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::{Condvar, Mutex};
use tape_shared::config::{floor_at, MIN_LATENCY_SECONDS, MIN_LOOKAHEAD_SECONDS};
use tape_shared::{Direction, EngineState, TapeConfig};

use crate::cache::SampleCache;
use crate::chunk::{Chunk, ChunkFactory, ChunkSummary, ScheduledChunk};
use crate::output::{GainLane, OutputSubstrate};
use crate::ramp::RampOrigin;
use crate::timing::Timing;
use crate::transport::end_speed;

/// Speeds in use, all snapped to whole-sample ramp chunks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Speeds {
    pub base: f64,
    pub scrub: f64,
    pub min: f64,
}

/// How far ahead of the output clock chunks are prepared and committed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Horizon {
    pub lookahead: f64,
    pub latency: f64,
}

impl Horizon {
    pub fn new(lookahead: f64, latency: f64) -> Self {
        Self {
            lookahead: floor_at(lookahead, MIN_LOOKAHEAD_SECONDS),
            latency: floor_at(latency, MIN_LATENCY_SECONDS),
        }
    }

    /// Seconds of source kept in the pending queue beyond the scheduled tail.
    pub fn pending_seconds(&self) -> f64 {
        self.lookahead - self.latency
    }

    /// Delay before the first chunk and length of UI-driven gain ramps.
    pub fn ui_latency(&self) -> f64 {
        self.latency / 5.0
    }
}

/// Everything guarded by the engine lock.
pub(crate) struct EngineCore {
    pub state: EngineState,
    pub pending: VecDeque<Chunk>,
    pub scheduled: VecDeque<ScheduledChunk>,
    pub speeds: Speeds,
    pub horizon: Horizon,
    /// Bumped whenever the pending queue is replaced wholesale
    pub epoch: u64,
    /// Most recent transport ticket handed out
    pub latest_ticket: u64,
}

impl EngineCore {
    /// Where a transition starts: the last scheduled chunk, or rest at the
    /// resume position when nothing is scheduled.
    pub fn ramp_origin(&self) -> RampOrigin {
        match self.scheduled.back() {
            Some(last) => RampOrigin {
                speed: last.chunk.speed,
                direction: last.chunk.direction,
                sample: last.chunk.source_end,
            },
            None => RampOrigin {
                speed: self.speeds.min,
                direction: self.state.direction,
                sample: self.state.resume_sample,
            },
        }
    }

    /// Source position in seconds at output time `now`.
    pub fn playhead(&self, now: f64, sample_rate: f64) -> f64 {
        let current = self
            .scheduled
            .iter()
            .find(|c| c.next_start > now)
            .or_else(|| self.scheduled.back());
        match current {
            Some(chunk) => chunk.position_at(now, sample_rate),
            None => self.state.resume_sample as f64 / sample_rate,
        }
    }

    /// Continue past the pending tail, or past the scheduled tail in the
    /// current direction and speed once a short ramp has been drained.
    fn refill_plan(&self, timing: &Timing) -> Option<RefillPlan> {
        let last_scheduled = self.scheduled.back()?;
        let (direction, speed, next_start) = match self.pending.back() {
            Some(last) => (last.direction, last.speed, last.source_end),
            None => (
                self.state.direction,
                end_speed(self.state.target(), &self.speeds),
                last_scheduled.chunk.source_end,
            ),
        };
        let target = last_scheduled.chunk.source_end as f64
            + direction.signum() * self.horizon.pending_seconds() * timing.rate();
        Some(RefillPlan {
            epoch: self.epoch,
            direction,
            speed,
            next_start: next_start as i64,
            target,
            step: timing.chunk_samples,
        })
    }
}

/// Steady-state chunks to append after the pending tail, computed under the
/// lock and produced outside it.
#[derive(Debug, Clone, Copy)]
struct RefillPlan {
    epoch: u64,
    direction: Direction,
    speed: f64,
    next_start: i64,
    target: f64,
    step: i64,
}

impl RefillPlan {
    fn produce(&self, factory: &ChunkFactory) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut next = self.next_start;
        let short_of_target = |sample: i64| match self.direction {
            Direction::Forward => (sample as f64) < self.target,
            Direction::Reverse => (sample as f64) > self.target,
        };
        while short_of_target(next) {
            let start = next;
            next += self.step * self.direction.sign();
            let Some(chunk) = factory.create(start, next, self.speed, 1.0) else {
                break;
            };
            chunks.push(chunk);
        }
        chunks
    }
}

/// The shared half of the scheduler: queues, state and the tick body.
pub struct Timeline {
    pub(crate) core: Mutex<EngineCore>,
    /// Signalled when a transition clears `busy`
    pub(crate) idle: Condvar,
    snapshot: ArcSwap<EngineState>,
    cache: ArcSwap<SampleCache>,
    output: Arc<dyn OutputSubstrate>,
    timing: Timing,
    // Serializes ticks so refills never interleave
    tick_gate: Mutex<()>,
}

impl Timeline {
    pub fn new(config: &TapeConfig, output: Arc<dyn OutputSubstrate>, cache: SampleCache) -> Self {
        let timing = Timing::new(config.sample_rate, config.chunk_length);
        let speeds = Speeds {
            base: timing.clamp_speed(config.playback_speed),
            scrub: timing.clamp_speed(config.scrub_speed),
            min: timing.clamp_speed(0.0),
        };
        let core = EngineCore {
            state: EngineState::default(),
            pending: VecDeque::new(),
            scheduled: VecDeque::new(),
            speeds,
            horizon: Horizon::new(config.lookahead, config.latency),
            epoch: 0,
            latest_ticket: 0,
        };
        Self {
            core: Mutex::new(core),
            idle: Condvar::new(),
            snapshot: ArcSwap::from_pointee(EngineState::default()),
            cache: ArcSwap::from_pointee(cache),
            output,
            timing,
            tick_gate: Mutex::new(()),
        }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn output(&self) -> &Arc<dyn OutputSubstrate> {
        &self.output
    }

    pub fn factory(&self) -> ChunkFactory {
        ChunkFactory::new(self.cache.load_full())
    }

    pub fn total_samples(&self) -> u64 {
        self.cache.load().total_samples()
    }

    /// Lock-free copy of the engine state as of the last publish.
    pub fn state(&self) -> EngineState {
        **self.snapshot.load()
    }

    pub(crate) fn publish(&self, core: &EngineCore) {
        self.snapshot.store(Arc::new(core.state));
    }

    pub fn playhead(&self) -> f64 {
        let now = self.output.current_time();
        self.core.lock().playhead(now, self.timing.rate())
    }

    pub fn speeds(&self) -> Speeds {
        self.core.lock().speeds
    }

    pub fn horizon(&self) -> Horizon {
        self.core.lock().horizon
    }

    pub fn pending_summary(&self) -> Vec<ChunkSummary> {
        self.core.lock().pending.iter().map(Chunk::summary).collect()
    }

    pub fn scheduled_summary(&self) -> Vec<ChunkSummary> {
        self.core.lock().scheduled.iter().map(ScheduledChunk::summary).collect()
    }

    /// Swap in a freshly loaded cache and rewind to the start.
    ///
    /// Returns false, leaving everything untouched, while playing or in the
    /// middle of a transition.
    pub(crate) fn replace_cache(&self, cache: SampleCache) -> bool {
        let mut core = self.core.lock();
        if core.state.playing || core.state.busy {
            return false;
        }
        self.cache.store(Arc::new(cache));
        core.pending.clear();
        core.scheduled.clear();
        core.epoch += 1;
        core.state.resume_sample = 0;
        self.publish(&core);
        true
    }

    /// Run one scheduling round against the output clock.
    pub fn tick(&self) {
        let now = self.output.current_time();
        self.tick_at(now);
    }

    /// Run one scheduling round as if the output clock read `now`.
    pub fn tick_at(&self, now: f64) {
        let _gate = self.tick_gate.lock();

        let plan = {
            let mut core = self.core.lock();
            if core.state.busy {
                return;
            }
            self.retire_elapsed(&mut core, now);
            self.schedule_pending(&mut core, now);
            self.publish(&core);
            if !core.state.playing {
                return;
            }
            match core.refill_plan(&self.timing) {
                Some(plan) => plan,
                None => return,
            }
        };

        let chunks = plan.produce(&self.factory());
        if chunks.is_empty() {
            return;
        }

        self.append_refill(plan.epoch, chunks);
    }

    /// Append refill chunks unless the pending queue was replaced since the
    /// plan was made.
    fn append_refill(&self, epoch: u64, chunks: Vec<Chunk>) -> bool {
        let mut core = self.core.lock();
        if core.epoch != epoch || core.state.busy {
            log::debug!("[Scheduler] Discarding {} refill chunks from a superseded queue", chunks.len());
            return false;
        }
        core.pending.extend(chunks);
        true
    }

    fn retire_elapsed(&self, core: &mut EngineCore, now: f64) {
        while let Some(head) = core.scheduled.front() {
            if head.next_start >= now {
                break;
            }
            core.state.resume_sample = head.chunk.source_end;
            core.scheduled.pop_front();
        }
    }

    fn schedule_pending(&self, core: &mut EngineCore, now: f64) {
        if core.pending.is_empty() {
            return;
        }
        let horizon = core.horizon;
        let fill_until = now + horizon.latency;
        let (mut last_gain, mut next_start) = match core.scheduled.back() {
            Some(last) => (last.chunk.gain, last.next_start),
            None => (GainLane::Chunks.initial_value(), now + horizon.ui_latency()),
        };

        while next_start < fill_until {
            let Some(chunk) = core.pending.pop_front() else {
                break;
            };
            let start_time = self.timing.clamp_clock(next_start);
            self.output.start_buffer(chunk.buffer.clone(), chunk.speed, start_time);
            let scheduled = chunk.schedule(start_time, self.timing.rate());

            let gain = scheduled.chunk.gain;
            if gain != last_gain {
                self.output.ramp_gain(GainLane::Chunks, gain, scheduled.next_start);
            }
            last_gain = gain;
            next_start = scheduled.next_start;
            core.scheduled.push_back(scheduled);
        }
    }
}

/// Handle to the repeating tick thread.
struct Ticker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Drives a `Timeline` from a repeating timer once activated.
pub struct Scheduler {
    timeline: Arc<Timeline>,
    ticker: Mutex<Option<Ticker>>,
}

impl Scheduler {
    pub fn new(timeline: Arc<Timeline>) -> Self {
        Self {
            timeline,
            ticker: Mutex::new(None),
        }
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    pub fn is_active(&self) -> bool {
        self.ticker.lock().is_some()
    }

    /// Tick once immediately, then every ramp chunk of output time.
    pub fn activate(&self) -> Result<(), anyhow::Error> {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let timeline = self.timeline.clone();
        let interval = self.timeline.timing().tick_interval();
        let handle = std::thread::Builder::new()
            .name("tape-scheduler".into())
            .spawn(move || {
                let ticks = tick(interval);
                timeline.tick();
                loop {
                    select! {
                        recv(ticks) -> _ => timeline.tick(),
                        recv(stop_rx) -> _ => break,
                    }
                }
            })?;

        log::info!("[Scheduler] Activated, tick every {:?}", interval);
        *ticker = Some(Ticker { stop_tx, handle });
        Ok(())
    }

    pub fn deactivate(&self) {
        let Some(ticker) = self.ticker.lock().take() else {
            return;
        };
        let _ = ticker.stop_tx.send(());
        if ticker.handle.join().is_err() {
            log::error!("[Scheduler] Tick thread panicked");
        }
        log::info!("[Scheduler] Deactivated");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.deactivate();
    }
}
