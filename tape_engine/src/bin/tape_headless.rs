use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded};
use tape_engine::{CommandLoop, EngineCommand, LoadOptions, TapeConfig, TapeEngine, TransportCommand};

/// Plays the WAV files given on the command line back to back, scrubs, reverses
/// and stops. Pass `--config <file.json>` to override engine settings.
fn main() -> Result<(), anyhow::Error> {
    // RUST_LOG=debug for per-transition output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut args = std::env::args().skip(1);
    let mut config = TapeConfig::default();
    let mut locators = Vec::new();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let path = args.next().ok_or_else(|| anyhow::anyhow!("--config needs a path"))?;
            config = TapeConfig::from_file(path)?;
        } else {
            locators.push(arg);
        }
    }
    if locators.is_empty() {
        anyhow::bail!("usage: tape_headless [--config file.json] <file.wav>...");
    }

    let engine = Arc::new(TapeEngine::with_device(config)?);
    let progress: &(dyn Fn(f64) + Sync) = &|fraction: f64| log::info!("[Headless] Loading {:.0}%", fraction * 100.0);
    let summary = engine.load(&locators, LoadOptions::default(), Some(progress))?;
    for failure in &summary.failed {
        log::warn!("[Headless] Skipped: {}", failure);
    }
    log::info!(
        "[Headless] {} sources, {:.2}s of tape",
        summary.sources_loaded,
        summary.total_seconds
    );

    engine.activate()?;
    let (tx, rx) = unbounded();
    let commands = CommandLoop::spawn(engine.clone(), rx)?;

    let report = |label: &str| {
        let (state_tx, state_rx) = bounded(1);
        if tx.send(EngineCommand::GetPlayhead(state_tx)).is_ok() {
            if let Ok(playhead) = state_rx.recv() {
                log::info!("[Headless] {} at {:.3}s", label, playhead);
            }
        }
    };

    tx.send(EngineCommand::Transport(TransportCommand::Play))?;
    thread::sleep(Duration::from_secs(4));
    report("Playing");

    tx.send(EngineCommand::ScrubForward(true))?;
    thread::sleep(Duration::from_secs(2));
    tx.send(EngineCommand::ScrubForward(false))?;
    thread::sleep(Duration::from_secs(2));
    report("After scrub");

    tx.send(EngineCommand::Transport(TransportCommand::Reverse))?;
    thread::sleep(Duration::from_secs(3));
    report("Reversing");

    tx.send(EngineCommand::SetVolume(0.5))?;
    tx.send(EngineCommand::Transport(TransportCommand::Stop))?;
    thread::sleep(Duration::from_secs(2));
    report("Stopped");

    tx.send(EngineCommand::Shutdown)?;
    if commands.join().is_err() {
        log::error!("[Headless] Command thread panicked");
    }
    engine.deactivate()?;
    log::info!("[Headless] Done.");
    Ok(())
}
