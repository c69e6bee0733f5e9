use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use tape_shared::{EngineState, LoadOptions, TapeError, TransportCommand};

use crate::engine::{LoadSummary, TapeEngine};
use crate::transport::TransitionOutcome;

pub enum EngineCommand {
    Transport(TransportCommand),
    // Scrub press / release
    ScrubForward(bool),
    ScrubBack(bool),
    SetPlaybackSpeed(f64),
    SetScrubSpeed(f64),
    SetLookahead(f64),
    SetLatency(f64),
    SetVolume(f32),
    Load {
        locators: Vec<String>,
        options: LoadOptions,
        response_tx: Sender<Result<LoadSummary, TapeError>>,
    },
    GetState(Sender<EngineState>),
    GetPlayhead(Sender<f64>),
    Shutdown,
}

impl EngineCommand {
    fn is_transport(&self) -> bool {
        matches!(
            self,
            EngineCommand::Transport(_) | EngineCommand::ScrubForward(_) | EngineCommand::ScrubBack(_)
        )
    }
}

/// Drop all but the last transport command in a backlog. Other commands keep
/// their order.
pub fn coalesce(batch: Vec<EngineCommand>) -> Vec<EngineCommand> {
    let last_transport = batch.iter().rposition(EngineCommand::is_transport);
    batch
        .into_iter()
        .enumerate()
        .filter(|(i, cmd)| !cmd.is_transport() || Some(*i) == last_transport)
        .map(|(_, cmd)| cmd)
        .collect()
}

/// Applies commands from a channel to an engine on a dedicated thread.
///
/// Transport verbs block while a ramp is built, so commands that pile up in
/// the meantime are coalesced before the next one runs.
pub struct CommandLoop;

impl CommandLoop {
    pub fn spawn(engine: Arc<TapeEngine>, rx: Receiver<EngineCommand>) -> Result<JoinHandle<()>, anyhow::Error> {
        let handle = std::thread::Builder::new()
            .name("tape-commands".into())
            .spawn(move || {
                while let Ok(first) = rx.recv() {
                    let mut batch = vec![first];
                    batch.extend(rx.try_iter());
                    for cmd in coalesce(batch) {
                        if !Self::handle(&engine, cmd) {
                            log::debug!("[Commands] Shutting down");
                            return;
                        }
                    }
                }
            })?;
        Ok(handle)
    }

    /// Returns false on shutdown.
    fn handle(engine: &TapeEngine, cmd: EngineCommand) -> bool {
        let outcome = match cmd {
            EngineCommand::Transport(verb) => Some(engine.send(verb)),
            EngineCommand::ScrubForward(active) => Some(engine.scrub_forward(active)),
            EngineCommand::ScrubBack(active) => Some(engine.scrub_back(active)),
            EngineCommand::SetPlaybackSpeed(speed) => {
                engine.set_playback_speed(speed);
                None
            }
            EngineCommand::SetScrubSpeed(speed) => {
                engine.set_scrub_speed(speed);
                None
            }
            EngineCommand::SetLookahead(seconds) => {
                engine.set_lookahead(seconds);
                None
            }
            EngineCommand::SetLatency(seconds) => {
                engine.set_latency(seconds);
                None
            }
            EngineCommand::SetVolume(volume) => {
                engine.set_volume(volume);
                None
            }
            EngineCommand::Load { locators, options, response_tx } => {
                let _ = response_tx.send(engine.load(&locators, options, None));
                None
            }
            EngineCommand::GetState(response_tx) => {
                let _ = response_tx.send(engine.state());
                None
            }
            EngineCommand::GetPlayhead(response_tx) => {
                let _ = response_tx.send(engine.playhead());
                None
            }
            EngineCommand::Shutdown => return false,
        };
        if let Some(outcome) = outcome {
            if outcome != TransitionOutcome::Applied {
                log::debug!("[Commands] Transport command {:?}", outcome);
            }
        }
        true
    }
}
