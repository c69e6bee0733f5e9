use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};

use super::{GainLane, GainLanes, OutputSubstrate};
use crate::chunk::ChunkBuffer;
use crate::mixer::{OutputEvent, Voice, VoiceMixer};
use crate::resampler::VarispeedReader;

/// Events that can be queued for the audio callback between two callbacks.
const EVENT_CAPACITY: usize = 4096;

enum StreamControl {
    Play(Sender<Result<(), String>>),
    Pause(Sender<Result<(), String>>),
    Shutdown,
}

/// Output substrate backed by the default cpal output device.
///
/// `cpal::Stream` is not `Send`, so a dedicated thread builds, owns and drops
/// it. The output clock counts frames rendered by the callback.
pub struct DeviceOutput {
    device_rate: u32,
    engine_rate: u32,
    frames: Arc<AtomicU64>,
    running: AtomicBool,
    producer: Mutex<HeapProd<OutputEvent>>,
    renderer: Mutex<VoiceRenderer>,
    lanes: Mutex<GainLanes>,
    control_tx: Sender<StreamControl>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceOutput {
    /// Open the default output device. Chunks arrive at `engine_rate` and are
    /// rendered to the device rate when started.
    pub fn open(engine_rate: u32) -> Result<Self, anyhow::Error> {
        let rb = HeapRb::<OutputEvent>::new(EVENT_CAPACITY);
        let (producer, consumer) = rb.split();
        let frames = Arc::new(AtomicU64::new(0));
        let (control_tx, control_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);

        let frames_for_stream = frames.clone();
        let thread = std::thread::Builder::new()
            .name("tape-device".into())
            .spawn(move || run_stream(consumer, frames_for_stream, control_rx, ready_tx))?;

        let device_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(anyhow::anyhow!(e));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(anyhow::anyhow!("audio device thread exited during startup"));
            }
        };
        log::info!("[Device] Output at {} Hz, engine at {} Hz", device_rate, engine_rate);

        Ok(Self {
            device_rate,
            engine_rate,
            frames,
            running: AtomicBool::new(false),
            producer: Mutex::new(producer),
            renderer: Mutex::new(VoiceRenderer::new(engine_rate, device_rate)),
            lanes: Mutex::new(GainLanes::new()),
            control_tx,
            thread: Mutex::new(Some(thread)),
        })
    }

    fn push(&self, event: OutputEvent) {
        if self.producer.lock().try_push(event).is_err() {
            log::warn!("[Device] Event queue full, dropping output event");
        }
    }

    fn control(&self, make: impl FnOnce(Sender<Result<(), String>>) -> StreamControl) -> Result<(), anyhow::Error> {
        let (tx, rx) = bounded(1);
        self.control_tx
            .send(make(tx))
            .map_err(|_| anyhow::anyhow!("audio device thread is gone"))?;
        rx.recv()
            .map_err(|_| anyhow::anyhow!("audio device thread is gone"))?
            .map_err(|e| anyhow::anyhow!(e))
    }
}

/// Turns engine-rate chunks into device-rate voices.
///
/// Chunks that start where the previous one ended continue the same read
/// head and are placed at the previous voice's end frame; anything else
/// starts a new stream at its own rounded start frame.
struct VoiceRenderer {
    engine_rate: f64,
    device_rate: f64,
    reader: VarispeedReader,
    /// Engine-clock end time and device end frame of the last voice
    tail: Option<(f64, u64)>,
}

impl VoiceRenderer {
    fn new(engine_rate: u32, device_rate: u32) -> Self {
        Self {
            engine_rate: engine_rate as f64,
            device_rate: device_rate as f64,
            reader: VarispeedReader::new(),
            tail: None,
        }
    }

    fn render(&mut self, buffer: &[Vec<f32>; 2], speed: f64, start_time: f64) -> Result<Voice, anyhow::Error> {
        // Start times are snapped to the engine sample grid
        let tolerance = 1.0 / self.engine_rate;
        let start_frame = match self.tail {
            Some((end_time, end_frame)) if (start_time - end_time).abs() <= tolerance => end_frame,
            _ => {
                self.reader.reset();
                (start_time * self.device_rate).round().max(0.0) as u64
            }
        };

        let step = self.engine_rate * speed / self.device_rate;
        let rendered = self.reader.read(buffer, step)?;
        let frames = rendered[0].len();
        let mut samples = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            samples.push(rendered[0][i]);
            samples.push(rendered[1][i]);
        }

        let duration = buffer[0].len() as f64 / (self.engine_rate * speed);
        let voice = Voice { samples, start_frame };
        self.tail = Some((start_time + duration, voice.end_frame()));
        Ok(voice)
    }
}

impl OutputSubstrate for DeviceOutput {
    fn sample_rate(&self) -> u32 {
        self.device_rate
    }

    fn current_time(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn start_buffer(&self, buffer: ChunkBuffer, rate: f64, start_time: f64) {
        let voice = match self.renderer.lock().render(&buffer, rate, start_time) {
            Ok(voice) => voice,
            Err(e) => {
                log::error!("[Device] Failed to render chunk at {:.3}s: {:#}", start_time, e);
                return;
            }
        };
        self.push(OutputEvent::Start(voice));
    }

    fn ramp_gain(&self, lane: GainLane, value: f32, end_time: f64) {
        let now = self.current_time();
        self.lanes.lock().ramp(lane, value, end_time, now);
        self.push(OutputEvent::Ramp { lane, value, end_time });
    }

    fn cancel_gain(&self, lane: GainLane, from_time: f64) {
        let now = self.current_time();
        self.lanes.lock().cancel(lane, from_time, now);
        self.push(OutputEvent::Cancel { lane, from_time });
    }

    fn gain_value(&self, lane: GainLane) -> f32 {
        let now = self.current_time();
        let mut lanes = self.lanes.lock();
        let lane = lanes.lane_mut(lane);
        lane.prune_before(now);
        lane.value_at(now)
    }

    fn resume(&self) -> Result<(), anyhow::Error> {
        self.control(StreamControl::Play)?;
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn suspend(&self) -> Result<(), anyhow::Error> {
        self.control(StreamControl::Pause)?;
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        let _ = self.control_tx.send(StreamControl::Shutdown);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

fn run_stream(
    mut consumer: ringbuf::HeapCons<OutputEvent>,
    frames: Arc<AtomicU64>,
    control_rx: Receiver<StreamControl>,
    ready_tx: Sender<Result<u32, String>>,
) {
    let (drop_tx, drop_rx) = unbounded::<Voice>();

    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready_tx.send(Err("No output device available".into()));
        return;
    };
    let config = match device.default_output_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };

    let sample_rate = config.sample_rate();
    let channels = config.channels() as usize;
    let sample_format = config.sample_format();
    if let cpal::SupportedBufferSize::Range { min, max } = config.buffer_size() {
        log::debug!("[Device] Device buffer range: {}-{}", min, max);
    }
    let stream_config: cpal::StreamConfig = config.into();
    log::debug!("[Device] Using config: {:?}", stream_config);

    let err_fn = |err: cpal::StreamError| {
        let s = err.to_string();
        // Under/overruns are routine when the host is busy
        if !s.contains("underrun") && !s.contains("overrun") {
            log::error!("[Device] Stream error: {}", s);
        }
    };

    let mut mixer = VoiceMixer::new(sample_rate, drop_tx);
    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                while let Some(event) = consumer.try_pop() {
                    mixer.handle(event);
                }
                let first = frames.load(Ordering::Acquire);
                mixer.render(data, channels, first);
                frames.fetch_add((data.len() / channels.max(1)) as u64, Ordering::Release);
            },
            err_fn,
            None,
        ),
        other => {
            let _ = ready_tx.send(Err(format!("Unsupported sample format {:?}", other)));
            return;
        }
    };
    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };
    // Stays silent until the engine is activated
    if let Err(e) = stream.pause() {
        log::debug!("[Device] Initial pause not supported: {}", e);
    }
    let _ = ready_tx.send(Ok(sample_rate));

    loop {
        select! {
            recv(control_rx) -> msg => match msg {
                Ok(StreamControl::Play(reply)) => {
                    let _ = reply.send(stream.play().map_err(|e| e.to_string()));
                }
                Ok(StreamControl::Pause(reply)) => {
                    let _ = reply.send(stream.pause().map_err(|e| e.to_string()));
                }
                Ok(StreamControl::Shutdown) | Err(_) => break,
            },
            // Voices finished by the callback are freed here
            recv(drop_rx) -> voice => drop(voice),
        }
    }
    log::debug!("[Device] Stream thread exiting");
}
