use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

const CHUNK_SIZE: usize = 1024;

pub struct TapeResampler;

impl TapeResampler {
    /// Converts decoded audio from `from_rate` to `to_rate` using sinc
    /// interpolation (high quality, load time only).
    pub fn convert_rate(input: &[Vec<f32>], from_rate: u32, to_rate: u32) -> Result<Vec<Vec<f32>>, anyhow::Error> {
        if from_rate == to_rate {
            return Ok(input.to_vec());
        }
        if from_rate == 0 || to_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be positive"));
        }
        let ratio = to_rate as f64 / from_rate as f64;

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_SIZE, input.len().max(1))?;
        Self::run(resampler, input, ratio)
    }

    /// Feeds `input` through in fixed blocks, strips the resampler delay and
    /// trims the result to exactly `round(len * ratio)` frames.
    fn run<R: Resampler<f32>>(mut resampler: R, input: &[Vec<f32>], ratio: f64) -> Result<Vec<Vec<f32>>, anyhow::Error> {
        let input_len = input.first().map(Vec::len).unwrap_or(0);
        if input_len == 0 {
            return Ok(vec![Vec::new(); input.len()]);
        }

        let expected = (input_len as f64 * ratio).round() as usize;
        let delay = resampler.output_delay();
        let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay + CHUNK_SIZE); input.len()];

        let mut input_pos = 0;
        while input_pos < input_len {
            let end = (input_pos + CHUNK_SIZE).min(input_len);
            let block: Vec<Vec<f32>> = input
                .iter()
                .map(|channel| {
                    let mut chunk = channel[input_pos..end].to_vec();
                    chunk.resize(CHUNK_SIZE, 0.0);
                    chunk
                })
                .collect();

            let out_waves = resampler.process(&block, None)?;
            for (dst, src) in output.iter_mut().zip(out_waves.iter()) {
                dst.extend_from_slice(src);
            }
            input_pos += CHUNK_SIZE;
        }

        // Flush the tail still held back by the filter delay
        while output[0].len() < expected + delay {
            let out_waves = resampler.process_partial::<Vec<f32>>(None, None)?;
            if out_waves.first().map_or(true, |w| w.is_empty()) {
                break;
            }
            for (dst, src) in output.iter_mut().zip(out_waves.iter()) {
                dst.extend_from_slice(src);
            }
        }

        for channel in output.iter_mut() {
            channel.drain(..delay.min(channel.len()));
            channel.resize(expected, 0.0);
        }
        Ok(output)
    }
}

/// Source frames the read head trails the newest input by, so the cubic
/// kernel never needs samples from a chunk that has not arrived yet.
const READ_DELAY: f64 = 2.0;

/// Continuous varispeed read head over a stream of chunks.
///
/// Chunks are treated as one concatenated signal: the fractional read
/// position and the last few input frames carry over from chunk to chunk, so
/// neither the waveform nor the output frame count jumps at a boundary.
pub struct VarispeedReader {
    /// Read position relative to the start of the next chunk
    position: f64,
    /// Last three input frames, oldest first
    history: [[f32; 2]; 3],
    primed: bool,
}

impl Default for VarispeedReader {
    fn default() -> Self {
        Self::new()
    }
}

impl VarispeedReader {
    pub fn new() -> Self {
        Self {
            position: 0.0,
            history: [[0.0; 2]; 3],
            primed: false,
        }
    }

    /// Forget the stream; the next chunk starts a new one.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Read `input` advancing `step` input frames per output frame (the
    /// playback speed in input frames, > 1.0 squeezes). Returns as many
    /// frames as fall inside this chunk given where the previous one ended.
    pub fn read(&mut self, input: &[Vec<f32>; 2], step: f64) -> Result<[Vec<f32>; 2], anyhow::Error> {
        if step <= 0.0 || !step.is_finite() {
            return Err(anyhow::anyhow!("Step must be positive"));
        }
        let len = input[0].len().min(input[1].len());
        if len == 0 {
            return Ok([Vec::new(), Vec::new()]);
        }
        if !self.primed {
            // Hold the first frame so a fresh stream does not start with a step
            self.history = [[input[0][0], input[1][0]]; 3];
            self.primed = true;
        }

        let frame = |channel: usize, index: i64| -> f32 {
            if index < 0 {
                self.history[(3 + index) as usize][channel]
            } else {
                input[channel][index as usize]
            }
        };

        let estimate = ((len as f64 - self.position) / step).ceil().max(0.0) as usize;
        let mut output = [Vec::with_capacity(estimate), Vec::with_capacity(estimate)];
        let mut position = self.position;
        while position < len as f64 {
            let read = position - READ_DELAY;
            let base = read.floor();
            let t = (read - base) as f32;
            let index = base as i64;
            for (channel, out) in output.iter_mut().enumerate() {
                out.push(catmull_rom(
                    frame(channel, index - 1),
                    frame(channel, index),
                    frame(channel, index + 1),
                    frame(channel, index + 2),
                    t,
                ));
            }
            position += step;
        }
        self.position = position - len as f64;

        let mut history = [[0.0; 2]; 3];
        for (slot, back) in history.iter_mut().zip((1..=3).rev()) {
            let index = len as i64 - back;
            *slot = [frame(0, index), frame(1, index)];
        }
        self.history = history;
        Ok(output)
    }
}

/// Cubic Catmull-Rom interpolation between `s1` and `s2`.
#[inline]
fn catmull_rom(s0: f32, s1: f32, s2: f32, s3: f32, t: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;
    let c0 = -0.5 * t3 + t2 - 0.5 * t;
    let c1 = 1.5 * t3 - 2.5 * t2 + 1.0;
    let c2 = -1.5 * t3 + 2.0 * t2 + 0.5 * t;
    let c3 = 0.5 * t3 - 0.5 * t2;
    s0 * c0 + s1 * c1 + s2 * c2 + s3 * c3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(reader: &mut VarispeedReader, chunks: &[[Vec<f32>; 2]], step: f64) -> Vec<Vec<f32>> {
        chunks
            .iter()
            .map(|chunk| reader.read(chunk, step).unwrap()[0].clone())
            .collect()
    }

    #[test]
    fn test_constant_signal_has_no_edges() {
        for step in [0.25, 0.9, 1.0, 1.1, 2.0, 8.0] {
            let mut reader = VarispeedReader::new();
            let chunk = [vec![0.5; 2048], vec![0.5; 2048]];
            let out = read_all(&mut reader, &[chunk.clone(), chunk.clone(), chunk], step);
            for (i, part) in out.iter().enumerate() {
                assert!(!part.is_empty());
                let first = part[0];
                let last = part[part.len() - 1];
                assert!((first - 0.5).abs() < 1e-5, "step {} chunk {} starts at {}", step, i, first);
                assert!((last - 0.5).abs() < 1e-5, "step {} chunk {} ends at {}", step, i, last);
            }
        }
    }

    #[test]
    fn test_ramp_stays_smooth_across_chunks() {
        // A linear ramp is reproduced exactly by the cubic kernel, so every
        // output step must be identical, boundaries included
        let signal: Vec<f32> = (0..3000).map(|i| i as f32 * 0.001).collect();
        let chunks: Vec<[Vec<f32>; 2]> = signal
            .chunks(700)
            .map(|part| [part.to_vec(), part.to_vec()])
            .collect();
        let mut reader = VarispeedReader::new();
        let joined: Vec<f32> = read_all(&mut reader, &chunks, 0.75).concat();
        for pair in joined[8..].windows(2) {
            assert!((pair[1] - pair[0] - 0.00075).abs() < 1e-5, "step {}", pair[1] - pair[0]);
        }
    }

    #[test]
    fn test_frame_count_carries_fraction() {
        // 48 kHz material on a 44.1 kHz device: 2048 source frames are
        // 1881.6 device frames, so chunks alternate lengths but never drift
        let step = 48_000.0 / 44_100.0;
        let mut reader = VarispeedReader::new();
        let chunk = [vec![0.0; 2048], vec![0.0; 2048]];
        let lengths: Vec<usize> = (0..10).map(|_| reader.read(&chunk, step).unwrap()[0].len()).collect();
        assert!(lengths.iter().all(|&n| n == 1881 || n == 1882), "{:?}", lengths);
        let total: usize = lengths.iter().sum();
        assert!((total as i64 - 18_816).abs() <= 1, "total {}", total);
    }

    #[test]
    fn test_reset_starts_a_new_stream() {
        let mut reader = VarispeedReader::new();
        reader.read(&[vec![1.0; 100], vec![1.0; 100]], 0.3).unwrap();
        reader.reset();
        let out = reader.read(&[vec![-1.0; 10], vec![-1.0; 10]], 1.0).unwrap();
        assert_eq!(out[0], vec![-1.0; 10]);
    }

    #[test]
    fn test_unity_rate_is_copy() {
        let input = vec![vec![0.1, 0.2, 0.3], vec![0.3, 0.2, 0.1]];
        assert_eq!(TapeResampler::convert_rate(&input, 48_000, 48_000).unwrap(), input);
    }

    #[test]
    fn test_convert_rate_length() {
        let input = vec![vec![0.0; 44_100], vec![0.0; 44_100]];
        let out = TapeResampler::convert_rate(&input, 44_100, 48_000).unwrap();
        assert_eq!(out[0].len(), 48_000);
    }

    #[test]
    fn test_rejects_bad_step() {
        let input = [vec![0.0; 16], vec![0.0; 16]];
        let mut reader = VarispeedReader::new();
        assert!(reader.read(&input, 0.0).is_err());
        assert!(reader.read(&input, f64::NAN).is_err());
    }
}
