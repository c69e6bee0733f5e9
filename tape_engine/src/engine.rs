use std::sync::Arc;

use tape_shared::{EngineState, LoadOptions, TapeConfig, TapeError, TransportCommand};

use crate::cache::SampleCache;
use crate::chunk::ChunkSummary;
use crate::loader::SourceLoader;
use crate::output::{DeviceOutput, GainLane, OutputSubstrate};
use crate::scheduler::{Horizon, Scheduler, Speeds, Timeline};
use crate::source::{ByteSource, Decoder, FileSource, WavDecoder};
use crate::transport::{TransitionOutcome, TransportMachine};

/// What a `load` call produced.
#[derive(Debug)]
pub struct LoadSummary {
    pub total_samples: u64,
    pub total_seconds: f64,
    pub sources_loaded: usize,
    /// Sources skipped because they could not be fetched or decoded
    pub failed: Vec<TapeError>,
}

/// Tape-style playback engine over an ordered list of audio sources.
///
/// Transport verbs block until their ramp is built; everything else is
/// cheap. All methods take `&self` so the engine can be shared in an `Arc`.
pub struct TapeEngine {
    config: TapeConfig,
    pub(crate) timeline: Arc<Timeline>,
    scheduler: Scheduler,
    transport: TransportMachine,
    loader: SourceLoader,
}

impl TapeEngine {
    pub fn new(
        config: TapeConfig,
        output: Arc<dyn OutputSubstrate>,
        source: Arc<dyn ByteSource>,
        decoder: Arc<dyn Decoder>,
    ) -> Result<Self, TapeError> {
        let config = config.sanitized()?;
        let cache = SampleCache::empty(decoder.clone(), config.sample_rate, config.cache_radius);
        let timeline = Arc::new(Timeline::new(&config, output, cache));
        let loader = SourceLoader::new(source, decoder, config.sample_rate, config.cache_radius);

        log::info!(
            "[Engine] {} Hz, ramp chunk {} samples, lookahead {}s, latency {}s",
            config.sample_rate,
            timeline.timing().ramp_chunk_samples,
            config.lookahead,
            config.latency
        );

        Ok(Self {
            scheduler: Scheduler::new(timeline.clone()),
            transport: TransportMachine::new(timeline.clone()),
            timeline,
            loader,
            config,
        })
    }

    /// Engine on the default sound card, reading WAV files from disk.
    pub fn with_device(config: TapeConfig) -> Result<Self, TapeError> {
        let output = DeviceOutput::open(config.sample_rate).map_err(|e| TapeError::Output(format!("{:#}", e)))?;
        Self::new(config, Arc::new(output), Arc::new(FileSource::new()), Arc::new(WavDecoder))
    }

    pub fn config(&self) -> &TapeConfig {
        &self.config
    }

    pub fn output(&self) -> &Arc<dyn OutputSubstrate> {
        self.timeline.output()
    }

    // --- Loading ---

    /// Replace the timeline with `locators`, played back to back.
    ///
    /// Refused while playing. Sources that fail are skipped and reported in
    /// the summary; the playhead returns to the start.
    pub fn load(
        &self,
        locators: &[String],
        options: LoadOptions,
        progress: Option<&(dyn Fn(f64) + Sync)>,
    ) -> Result<LoadSummary, TapeError> {
        if self.timeline.state().playing {
            return Err(TapeError::LoadWhilePlaying);
        }

        let (cache, failed) = self.loader.load_cache(locators, options, progress);
        let total_samples = cache.total_samples();
        let sources_loaded = cache.segment_count();
        if !self.timeline.replace_cache(cache) {
            return Err(TapeError::LoadWhilePlaying);
        }

        Ok(LoadSummary {
            total_samples,
            total_seconds: self.timeline.timing().samples_to_seconds(total_samples),
            sources_loaded,
            failed,
        })
    }

    // --- Lifecycle ---

    /// Resume the output and start the scheduler.
    pub fn activate(&self) -> Result<(), TapeError> {
        self.output().resume().map_err(|e| TapeError::Output(format!("{:#}", e)))?;
        self.scheduler.activate().map_err(|e| TapeError::Output(format!("{:#}", e)))
    }

    /// Stop the scheduler and suspend the output. Queues are kept.
    pub fn deactivate(&self) -> Result<(), TapeError> {
        self.scheduler.deactivate();
        self.output().suspend().map_err(|e| TapeError::Output(format!("{:#}", e)))
    }

    pub fn is_active(&self) -> bool {
        self.scheduler.is_active() && self.output().is_running()
    }

    /// Run one scheduling round now, as the scheduler thread would.
    pub fn tick(&self) {
        self.timeline.tick();
    }

    // --- Transport ---

    pub fn play(&self) -> TransitionOutcome {
        self.transport.play()
    }

    pub fn stop(&self) -> TransitionOutcome {
        self.transport.stop()
    }

    pub fn reverse(&self) -> TransitionOutcome {
        self.transport.reverse()
    }

    pub fn scrub_forward(&self, active: bool) -> TransitionOutcome {
        self.transport.scrub_forward(active)
    }

    pub fn scrub_back(&self, active: bool) -> TransitionOutcome {
        self.transport.scrub_back(active)
    }

    /// Apply a transport verb; scrub verbs start a scrub.
    pub fn send(&self, command: TransportCommand) -> TransitionOutcome {
        match command {
            TransportCommand::Play => self.play(),
            TransportCommand::Stop => self.stop(),
            TransportCommand::Reverse => self.reverse(),
            TransportCommand::ScrubForward => self.scrub_forward(true),
            TransportCommand::ScrubBack => self.scrub_back(true),
        }
    }

    // --- Parameters ---

    /// Set the play/reverse speed. Takes effect immediately when playing
    /// without scrubbing.
    pub fn set_playback_speed(&self, speed: f64) {
        let state = {
            let mut core = self.timeline.core.lock();
            core.speeds.base = self.timeline.timing().clamp_speed(speed);
            core.state
        };
        if !state.busy && state.playing && !state.scrubbing {
            self.transport.apply(state.target(), true);
        }
    }

    /// Set the scrub speed. Takes effect immediately while scrubbing.
    pub fn set_scrub_speed(&self, speed: f64) {
        let state = {
            let mut core = self.timeline.core.lock();
            core.speeds.scrub = self.timeline.timing().clamp_speed(speed);
            core.state
        };
        if !state.busy && state.scrubbing {
            self.transport.apply(state.target(), true);
        }
    }

    pub fn set_lookahead(&self, seconds: f64) {
        let mut core = self.timeline.core.lock();
        core.horizon = Horizon::new(seconds, core.horizon.latency);
    }

    pub fn set_latency(&self, seconds: f64) {
        let mut core = self.timeline.core.lock();
        core.horizon = Horizon::new(core.horizon.lookahead, seconds);
    }

    /// Ramp the master gain to `volume` over the UI latency.
    pub fn set_volume(&self, volume: f32) {
        let output = self.output();
        let now = output.current_time();
        let ui_latency = self.timeline.horizon().ui_latency();
        output.cancel_gain(GainLane::Master, now);
        output.ramp_gain(GainLane::Master, volume.max(0.0), now + ui_latency);
    }

    // --- Readers ---

    pub fn playback_speed(&self) -> f64 {
        self.speeds().base
    }

    pub fn scrub_speed(&self) -> f64 {
        self.speeds().scrub
    }

    pub fn speeds(&self) -> Speeds {
        self.timeline.speeds()
    }

    pub fn lookahead(&self) -> f64 {
        self.timeline.horizon().lookahead
    }

    pub fn latency(&self) -> f64 {
        self.timeline.horizon().latency
    }

    pub fn volume(&self) -> f32 {
        self.output().gain_value(GainLane::Master)
    }

    /// Source position in seconds.
    pub fn playhead(&self) -> f64 {
        self.timeline.playhead()
    }

    pub fn total_samples(&self) -> u64 {
        self.timeline.total_samples()
    }

    pub fn total_seconds(&self) -> f64 {
        self.timeline.timing().samples_to_seconds(self.total_samples())
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn state(&self) -> EngineState {
        self.timeline.state()
    }

    pub fn pending_chunks(&self) -> Vec<ChunkSummary> {
        self.timeline.pending_summary()
    }

    pub fn scheduled_chunks(&self) -> Vec<ChunkSummary> {
        self.timeline.scheduled_summary()
    }
}

impl Drop for TapeEngine {
    fn drop(&mut self) {
        self.scheduler.deactivate();
    }
}
