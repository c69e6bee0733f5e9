use crossbeam_channel::Sender;
use tape_shared::CHANNEL_COUNT;

use crate::output::{AutomationLane, GainLane};

/// Voices the callback will hold at once; extra starts are dropped.
pub const MAX_VOICES: usize = 512;
/// Breakpoints per gain lane; further ramps are ignored until pruning frees room.
pub const MAX_BREAKPOINTS: usize = 1024;

/// A rendered chunk waiting for, or in the middle of, playback.
pub struct Voice {
    /// Interleaved stereo frames at the device rate
    pub samples: Vec<f32>,
    pub start_frame: u64,
}

impl Voice {
    pub fn frames(&self) -> u64 {
        (self.samples.len() / CHANNEL_COUNT) as u64
    }

    pub fn end_frame(&self) -> u64 {
        self.start_frame + self.frames()
    }
}

/// Messages from the control side to the audio callback.
pub enum OutputEvent {
    Start(Voice),
    Ramp { lane: GainLane, value: f32, end_time: f64 },
    Cancel { lane: GainLane, from_time: f64 },
}

/// Audio-thread side of the device output: sums the active voices and applies
/// the chunk and master gain lanes.
pub struct VoiceMixer {
    voices: Vec<Voice>,
    chunk_gain: AutomationLane,
    master_gain: AutomationLane,
    sample_rate: f64,
    // Real-time safety: finished voices are freed on another thread
    drop_tx: Sender<Voice>,
}

impl VoiceMixer {
    pub fn new(sample_rate: u32, drop_tx: Sender<Voice>) -> Self {
        Self {
            voices: Vec::with_capacity(MAX_VOICES),
            chunk_gain: AutomationLane::with_capacity(GainLane::Chunks.initial_value(), MAX_BREAKPOINTS),
            master_gain: AutomationLane::with_capacity(GainLane::Master.initial_value(), MAX_BREAKPOINTS),
            sample_rate: sample_rate as f64,
            drop_tx,
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Apply a control event. Never grows storage past what `new` reserved.
    pub fn handle(&mut self, event: OutputEvent) {
        match event {
            OutputEvent::Start(voice) => {
                if self.voices.len() < MAX_VOICES {
                    self.voices.push(voice);
                } else {
                    let _ = self.drop_tx.try_send(voice);
                }
            }
            OutputEvent::Ramp { lane, value, end_time } => {
                let lane = self.lane_mut(lane);
                if lane.len() < MAX_BREAKPOINTS {
                    lane.ramp_to(value, end_time);
                }
            }
            OutputEvent::Cancel { lane, from_time } => {
                let lane = self.lane_mut(lane);
                if lane.len() < MAX_BREAKPOINTS {
                    lane.cancel_from(from_time);
                }
            }
        }
    }

    fn lane_mut(&mut self, lane: GainLane) -> &mut AutomationLane {
        match lane {
            GainLane::Chunks => &mut self.chunk_gain,
            GainLane::Master => &mut self.master_gain,
        }
    }

    /// Render `data` (interleaved, `channels` wide) starting at device frame
    /// `first_frame`.
    pub fn render(&mut self, data: &mut [f32], channels: usize, first_frame: u64) {
        data.fill(0.0);
        if channels == 0 {
            return;
        }
        let frames = data.len() / channels;

        for i in 0..frames {
            let frame = first_frame + i as u64;
            let mut left = 0.0;
            let mut right = 0.0;
            for voice in &self.voices {
                if frame < voice.start_frame || frame >= voice.end_frame() {
                    continue;
                }
                let idx = (frame - voice.start_frame) as usize * CHANNEL_COUNT;
                left += voice.samples[idx];
                right += voice.samples[idx + 1];
            }

            let time = frame as f64 / self.sample_rate;
            let gain = self.chunk_gain.value_at(time) * self.master_gain.value_at(time);
            let out = &mut data[i * channels..(i + 1) * channels];
            if channels == 1 {
                out[0] = (left + right) * 0.5 * gain;
            } else {
                out[0] = left * gain;
                out[1] = right * gain;
            }
        }

        let end_frame = first_frame + frames as u64;
        let mut i = 0;
        while i < self.voices.len() {
            if self.voices[i].end_frame() <= end_frame {
                let voice = self.voices.swap_remove(i);
                let _ = self.drop_tx.try_send(voice);
            } else {
                i += 1;
            }
        }

        let end_time = end_frame as f64 / self.sample_rate;
        self.chunk_gain.prune_before(end_time);
        self.master_gain.prune_before(end_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn voice(value: f32, frames: usize, start_frame: u64) -> Voice {
        Voice { samples: vec![value; frames * 2], start_frame }
    }

    #[test]
    fn test_voices_sum_from_start_frame() {
        let (tx, _rx) = unbounded();
        let mut mixer = VoiceMixer::new(100, tx);
        mixer.handle(OutputEvent::Ramp { lane: GainLane::Chunks, value: 1.0, end_time: 0.0 });
        mixer.handle(OutputEvent::Start(voice(0.25, 4, 2)));
        mixer.handle(OutputEvent::Start(voice(0.5, 2, 3)));

        let mut data = vec![0.0; 16];
        mixer.render(&mut data, 2, 0);
        let left: Vec<f32> = data.iter().step_by(2).copied().collect();
        assert_eq!(left, vec![0.0, 0.0, 0.25, 0.75, 0.75, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_finished_voices_are_handed_off() {
        let (tx, rx) = unbounded();
        let mut mixer = VoiceMixer::new(100, tx);
        mixer.handle(OutputEvent::Start(voice(1.0, 2, 0)));
        mixer.handle(OutputEvent::Start(voice(1.0, 20, 0)));

        let mut data = vec![0.0; 8];
        mixer.render(&mut data, 2, 0);
        assert_eq!(mixer.active_voices(), 1);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_master_gain_scales_output() {
        let (tx, _rx) = unbounded();
        let mut mixer = VoiceMixer::new(100, tx);
        mixer.handle(OutputEvent::Ramp { lane: GainLane::Chunks, value: 1.0, end_time: 0.0 });
        mixer.handle(OutputEvent::Cancel { lane: GainLane::Master, from_time: 0.0 });
        mixer.handle(OutputEvent::Ramp { lane: GainLane::Master, value: 0.5, end_time: 0.0 });
        mixer.handle(OutputEvent::Start(voice(1.0, 4, 0)));

        let mut data = vec![0.0; 4];
        mixer.render(&mut data, 1, 0);
        assert!(data.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_storage_is_capped() {
        let (tx, rx) = unbounded();
        let mut mixer = VoiceMixer::new(100, tx);
        for _ in 0..MAX_VOICES + 3 {
            mixer.handle(OutputEvent::Start(voice(0.0, 1, 1_000)));
        }
        assert_eq!(mixer.active_voices(), MAX_VOICES);
        assert_eq!(rx.try_iter().count(), 3);

        for i in 0..MAX_BREAKPOINTS * 2 {
            let end_time = 10.0 + i as f64;
            mixer.handle(OutputEvent::Ramp { lane: GainLane::Chunks, value: 1.0, end_time });
        }
        assert_eq!(mixer.chunk_gain.len(), MAX_BREAKPOINTS);

        // Rendering past the ramps prunes them and frees room again
        let mut data = vec![0.0; 2];
        mixer.render(&mut data, 2, 500_000);
        assert!(mixer.chunk_gain.len() < MAX_BREAKPOINTS);
    }
}
