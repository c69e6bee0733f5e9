#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use proptest::prelude::*;
    use tape_shared::{Direction, LoadOptions, TapeConfig, TapeError, TransportCommand, TransportTarget};

    use crate::chunk::ChunkSummary;
    use crate::engine::TapeEngine;
    use crate::output::{GainLane, OfflineOutput};
    use crate::source::{MemorySource, WavDecoder};
    use crate::test_support::{offset_signal, wav_bytes};
    use crate::transport::TransitionOutcome;

    const RATE: u32 = 48_000;

    /// An engine on an offline clock, loaded with `seconds` of audio split
    /// into `segments` sources.
    fn tape(seconds: f64, segments: usize) -> (Arc<OfflineOutput>, TapeEngine) {
        let frames = (seconds * RATE as f64) as usize;
        let per_segment = frames / segments;
        let source = MemorySource::new();
        let mut locators = Vec::new();
        for i in 0..segments {
            let name = format!("reel-{}.wav", i);
            let bytes = wav_bytes(&offset_signal(i * per_segment, per_segment), 1, RATE);
            source.insert(name.clone(), bytes);
            locators.push(name);
        }

        let output = Arc::new(OfflineOutput::new(RATE));
        let engine = TapeEngine::new(
            TapeConfig::default(),
            output.clone(),
            Arc::new(source),
            Arc::new(WavDecoder),
        )
        .expect("engine");
        let summary = engine.load(&locators, LoadOptions::default(), None).expect("load");
        assert_eq!(summary.total_samples, (per_segment * segments) as u64);
        (output, engine)
    }

    fn tick_seconds(engine: &TapeEngine) -> f64 {
        engine.timeline.timing().tick_interval().as_secs_f64()
    }

    /// Tick and advance the clock like the scheduler thread would, returning
    /// the playhead read after every tick.
    fn run_for(engine: &TapeEngine, output: &OfflineOutput, seconds: f64) -> Vec<f64> {
        let step = tick_seconds(engine);
        let ticks = (seconds / step).ceil() as usize;
        let mut playheads = Vec::with_capacity(ticks);
        for _ in 0..ticks {
            engine.tick();
            playheads.push(engine.playhead());
            output.advance(step);
        }
        playheads
    }

    fn queued(engine: &TapeEngine) -> Vec<ChunkSummary> {
        let mut all = engine.scheduled_chunks();
        all.extend(engine.pending_chunks());
        all
    }

    fn assert_contiguous(chunks: &[ChunkSummary]) {
        for (i, pair) in chunks.windows(2).enumerate() {
            assert_eq!(pair[0].source_end, pair[1].source_start, "gap after chunk {}", i);
        }
    }

    #[test]
    fn test_play_from_rest() {
        let (output, engine) = tape(10.0, 1);
        assert_eq!(engine.play(), TransitionOutcome::Applied);

        let state = engine.state();
        assert!(state.playing && !state.scrubbing && !state.busy);
        assert_eq!(state.direction, Direction::Forward);

        let pending = engine.pending_chunks();
        assert_eq!(pending[0].source_start, 0);
        assert_eq!(pending[0].gain, 0.0);
        assert_eq!(pending[0].speed, engine.speeds().min);
        assert_eq!(pending.last().unwrap().speed, 1.0);
        assert_contiguous(&pending);

        engine.tick();
        let first = engine.scheduled_chunks()[0];
        assert!((first.start_time.unwrap() - 0.02).abs() < 1.0 / RATE as f64);
        // The chunk gain follows the ramp once scheduled
        assert_eq!(output.gain_at(GainLane::Chunks, 0.0), 0.0);

        output.advance(tick_seconds(&engine));
        let playheads = run_for(&engine, &output, 3.0);
        for pair in playheads.windows(2) {
            assert!(pair[1] > pair[0], "playhead stalled at {}", pair[0]);
        }
        // Past the ramp the tape runs at unity speed
        let last = *playheads.last().unwrap();
        assert!(last > 1.5 && last < 3.0, "playhead {}", last);
        assert_contiguous(&queued(&engine));
    }

    #[test]
    fn test_reverse_while_playing() {
        let (output, engine) = tape(10.0, 1);
        engine.play();
        run_for(&engine, &output, 3.0);

        let tail = *engine.scheduled_chunks().last().unwrap();
        assert_eq!(engine.reverse(), TransitionOutcome::Applied);
        assert_eq!(engine.state().direction, Direction::Reverse);

        let pending = engine.pending_chunks();
        assert_eq!(pending[0].source_start, tail.source_end);
        assert_contiguous(&pending);

        let pivot = pending
            .iter()
            .position(|c| c.direction == Direction::Reverse)
            .expect("reverse half");
        let (down, up) = pending.split_at(pivot);
        assert!(!down.is_empty());
        assert_eq!(down.last().unwrap().speed, engine.speeds().min);
        assert_eq!(up[0].speed, engine.speeds().min);
        for pair in down.windows(2) {
            assert!(pair[1].gain <= pair[0].gain);
        }
        for pair in up.windows(2) {
            assert!(pair[1].gain >= pair[0].gain);
        }
        assert_eq!(up.last().unwrap().speed, 1.0);

        // Head back toward the start
        let playheads = run_for(&engine, &output, 4.0);
        let peak = playheads.iter().cloned().fold(f64::MIN, f64::max);
        assert!(*playheads.last().unwrap() < peak);
        assert_contiguous(&queued(&engine));
    }

    #[test]
    fn test_repeated_commands_are_rejected() {
        let (output, engine) = tape(5.0, 1);
        assert_eq!(engine.stop(), TransitionOutcome::Rejected);
        assert_eq!(engine.play(), TransitionOutcome::Applied);
        assert_eq!(engine.play(), TransitionOutcome::Rejected);
        run_for(&engine, &output, 0.5);
        assert_eq!(engine.stop(), TransitionOutcome::Applied);
        assert_eq!(engine.stop(), TransitionOutcome::Rejected);
    }

    #[test]
    fn test_nothing_to_reverse_into_at_start() {
        let (_output, engine) = tape(5.0, 1);
        assert_eq!(engine.reverse(), TransitionOutcome::Rejected);
        assert_eq!(engine.scrub_back(true), TransitionOutcome::Rejected);
        assert!(!engine.state().playing);
        assert!(engine.pending_chunks().is_empty());
    }

    #[test]
    fn test_play_past_end_then_rejected() {
        let (output, engine) = tape(0.5, 1);
        engine.play();
        run_for(&engine, &output, 2.0);
        assert_eq!(engine.state().resume_sample, engine.total_samples());
        assert!((engine.playhead() - 0.5).abs() < 1e-9);

        assert_eq!(engine.stop(), TransitionOutcome::Applied);
        run_for(&engine, &output, 0.5);
        assert_eq!(engine.play(), TransitionOutcome::Rejected);
        assert_eq!(engine.reverse(), TransitionOutcome::Applied);
    }

    #[test]
    fn test_stop_ramps_down_to_silence() {
        let (output, engine) = tape(10.0, 1);
        engine.play();
        run_for(&engine, &output, 2.0);
        assert_eq!(engine.stop(), TransitionOutcome::Applied);

        let pending = engine.pending_chunks();
        assert_eq!(pending.last().unwrap().speed, engine.speeds().min);
        assert_eq!(pending.last().unwrap().gain, 0.0);

        run_for(&engine, &output, 3.0);
        assert!(engine.pending_chunks().is_empty());
        let at_rest = engine.playhead();
        run_for(&engine, &output, 1.0);
        assert_eq!(engine.playhead(), at_rest);
    }

    #[test]
    fn test_scrub_release_restores_previous_transport() {
        let (output, engine) = tape(20.0, 4);
        engine.play();
        run_for(&engine, &output, 1.5);

        assert_eq!(engine.scrub_forward(true), TransitionOutcome::Applied);
        assert_eq!(engine.state().target(), TransportTarget::SCRUB_FORWARD);
        assert_eq!(engine.pending_chunks().last().unwrap().speed, 8.0);
        run_for(&engine, &output, 0.5);

        // Releasing the other scrub does nothing
        assert_eq!(engine.scrub_back(false), TransitionOutcome::Rejected);

        assert_eq!(engine.scrub_forward(false), TransitionOutcome::Applied);
        assert_eq!(engine.state().target(), TransportTarget::PLAY);
        assert_eq!(engine.pending_chunks().last().unwrap().speed, 1.0);
        assert_contiguous(&queued(&engine));
    }

    #[test]
    fn test_scrub_from_stop_returns_to_stop() {
        let (output, engine) = tape(10.0, 2);
        engine.play();
        run_for(&engine, &output, 1.0);
        engine.stop();
        run_for(&engine, &output, 2.0);

        assert_eq!(engine.scrub_back(true), TransitionOutcome::Applied);
        run_for(&engine, &output, 0.2);
        assert_eq!(engine.scrub_back(false), TransitionOutcome::Applied);
        assert!(!engine.state().playing);
        assert!(!engine.state().scrubbing);
    }

    #[test]
    fn test_speed_change_applies_while_playing() {
        let (output, engine) = tape(10.0, 1);
        engine.set_playback_speed(2.0);
        assert!(engine.pending_chunks().is_empty());

        engine.play();
        assert_eq!(engine.pending_chunks().last().unwrap().speed, 2.0);
        run_for(&engine, &output, 1.0);

        engine.set_playback_speed(0.5);
        assert_eq!(engine.playback_speed(), 0.5);
        assert_eq!(engine.pending_chunks().last().unwrap().speed, 0.5);
        assert!(engine.state().playing);
        assert_contiguous(&queued(&engine));

        // Re-applying the same speed builds a ramp short enough to drain in
        // one tick; playback must carry on from refill
        run_for(&engine, &output, 1.0);
        engine.set_playback_speed(0.5);
        let before = engine.playhead();
        let playheads = run_for(&engine, &output, 3.0);
        let after = *playheads.last().unwrap();
        assert!(engine.state().playing);
        assert!(after > before + 1.0, "stalled at {} (was {})", after, before);
        assert!(!engine.scheduled_chunks().is_empty());
        assert_contiguous(&queued(&engine));
    }

    #[test]
    fn test_scrub_speed_change_while_scrubbing() {
        let (output, engine) = tape(20.0, 2);
        engine.scrub_forward(true);
        run_for(&engine, &output, 0.5);
        engine.set_scrub_speed(4.0);
        assert_eq!(engine.scrub_speed(), 4.0);
        assert_eq!(engine.pending_chunks().last().unwrap().speed, 4.0);
    }

    #[test]
    fn test_parameter_floors() {
        let (_output, engine) = tape(1.0, 1);
        engine.set_lookahead(0.0);
        engine.set_latency(0.0);
        engine.set_playback_speed(-1.0);
        assert_eq!(engine.lookahead(), 1.0);
        assert_eq!(engine.latency(), 0.1);
        assert_eq!(engine.playback_speed(), engine.speeds().min);
    }

    #[test]
    fn test_volume_ramps_over_ui_latency() {
        let (output, engine) = tape(1.0, 1);
        assert_eq!(engine.volume(), 1.0);
        engine.set_volume(0.5);
        output.advance(0.01);
        let midway = engine.volume();
        assert!(midway < 1.0 && midway > 0.5);
        output.advance(0.02);
        assert_eq!(engine.volume(), 0.5);
    }

    #[test]
    fn test_sources_play_back_to_back() {
        let source = MemorySource::new();
        source.insert("one.wav", wav_bytes(&offset_signal(0, 48_000), 1, RATE));
        // Stereo: 48 000 interleaved values are 24 000 frames
        source.insert("two.wav", wav_bytes(&offset_signal(0, 48_000), 2, RATE));
        let output = Arc::new(OfflineOutput::new(RATE));
        let engine =
            TapeEngine::new(TapeConfig::default(), output, Arc::new(source), Arc::new(WavDecoder)).unwrap();

        let progress = parking_lot::Mutex::new(Vec::new());
        let callback: &(dyn Fn(f64) + Sync) = &|fraction: f64| progress.lock().push(fraction);
        let summary = engine
            .load(&["one.wav".to_string(), "two.wav".to_string()], LoadOptions::default(), Some(callback))
            .unwrap();

        assert_eq!(summary.total_samples, 72_000);
        assert_eq!(summary.sources_loaded, 2);
        assert_eq!(engine.total_seconds(), 1.5);
        assert_eq!(progress.lock().len(), 4);
    }

    #[test]
    fn test_load_refused_while_playing() {
        let (output, engine) = tape(5.0, 1);
        engine.play();
        run_for(&engine, &output, 0.2);
        let err = engine
            .load(&["reel-0.wav".to_string()], LoadOptions::default(), None)
            .unwrap_err();
        assert!(matches!(err, TapeError::LoadWhilePlaying));
    }

    #[test]
    fn test_load_rewinds() {
        let (output, engine) = tape(5.0, 1);
        engine.play();
        run_for(&engine, &output, 1.0);
        engine.stop();
        run_for(&engine, &output, 2.0);
        assert!(engine.playhead() > 0.0);

        engine
            .load(&["reel-0.wav".to_string()], LoadOptions::default(), None)
            .unwrap();
        assert_eq!(engine.playhead(), 0.0);
        assert!(engine.scheduled_chunks().is_empty());
        assert_eq!(engine.total_seconds(), 5.0);
    }

    fn wait_for_ticket(engine: &TapeEngine, ticket: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.timeline.core.lock().latest_ticket < ticket {
            assert!(Instant::now() < deadline, "ticket {} never issued", ticket);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_waiting_commands_coalesce_to_latest() {
        let (_output, engine) = tape(5.0, 1);
        let engine = Arc::new(engine);

        // Hold the engine as if a transition were in flight
        engine.timeline.core.lock().state.busy = true;

        let first = {
            let engine = engine.clone();
            thread::spawn(move || engine.play())
        };
        wait_for_ticket(&engine, 1);
        let second = {
            let engine = engine.clone();
            thread::spawn(move || engine.send(TransportCommand::ScrubForward))
        };
        wait_for_ticket(&engine, 2);

        engine.timeline.core.lock().state.busy = false;
        engine.timeline.idle.notify_all();

        assert_eq!(first.join().unwrap(), TransitionOutcome::Superseded);
        assert_eq!(second.join().unwrap(), TransitionOutcome::Applied);
        assert_eq!(engine.state().target(), TransportTarget::SCRUB_FORWARD);
    }

    #[test]
    fn test_concurrent_commands_leave_consistent_state() {
        let (output, engine) = tape(10.0, 2);
        let engine = Arc::new(engine);
        engine.play();
        run_for(&engine, &output, 1.0);

        let handles: Vec<_> = [TransportCommand::Reverse, TransportCommand::ScrubForward, TransportCommand::Play]
            .into_iter()
            .map(|cmd| {
                let engine = engine.clone();
                thread::spawn(move || engine.send(cmd))
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(outcomes.iter().any(|o| o.is_applied()));
        assert!(!engine.state().busy);
        assert_contiguous(&queued(&engine));
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Play,
        Stop,
        Reverse,
        ScrubForward(bool),
        ScrubBack(bool),
        Run(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Play),
            Just(Op::Stop),
            Just(Op::Reverse),
            any::<bool>().prop_map(Op::ScrubForward),
            any::<bool>().prop_map(Op::ScrubBack),
            (1u8..60).prop_map(Op::Run),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_queues_stay_contiguous(ops in proptest::collection::vec(op(), 1..16)) {
            let (output, engine) = tape(4.0, 3);
            let step = tick_seconds(&engine);
            let total_seconds = engine.total_seconds();

            for op in ops {
                match op {
                    Op::Play => { engine.play(); }
                    Op::Stop => { engine.stop(); }
                    Op::Reverse => { engine.reverse(); }
                    Op::ScrubForward(active) => { engine.scrub_forward(active); }
                    Op::ScrubBack(active) => { engine.scrub_back(active); }
                    Op::Run(ticks) => {
                        for _ in 0..ticks {
                            engine.tick();
                            output.advance(step);
                        }
                    }
                }

                let all = queued(&engine);
                for pair in all.windows(2) {
                    prop_assert_eq!(pair[0].source_end, pair[1].source_start);
                }
                let scheduled = engine.scheduled_chunks();
                for pair in scheduled.windows(2) {
                    prop_assert!(pair[1].start_time >= pair[0].start_time);
                }
                let playhead = engine.playhead();
                prop_assert!(playhead >= 0.0 && playhead <= total_seconds + 1e-9);
                prop_assert!(!engine.state().busy);
            }
        }
    }
}
