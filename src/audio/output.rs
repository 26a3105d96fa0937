//! Physical audio output bus
//!
//! The engine talks to the output through the `OutputBus` trait so the
//! playback hardware can be swapped (or mocked) by composition. The cpal
//! implementation owns its stream on a dedicated thread, because cpal
//! streams are not `Send`; reconfiguration tears the stream down and
//! rebuilds it at the new sample rate, which is the I2S rate-switch analog.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::constants::{FILE_CHANNELS, FILE_SAMPLE_RATE};
use crate::error::AudioError;

/// Abstraction over the physical output path
pub trait OutputBus: Send {
    /// Rebind the output at a new sample rate / channel count
    fn configure(&mut self, sample_rate: u32, channels: u16) -> Result<(), AudioError>;

    /// Queue interleaved samples for playback; never blocks, drops on overflow
    fn write(&mut self, samples: &[f32]);

    /// Apply an output gain in [0.0, 1.0] immediately
    fn set_gain(&mut self, gain: f32);

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;
}

enum OutputCmd {
    Configure { sample_rate: u32, channels: u16 },
    Shutdown,
}

struct Shared {
    queue: ArrayQueue<f32>,
    gain_bits: AtomicU32,
    dropped: AtomicUsize,
}

/// cpal-backed output bus
pub struct CpalOutput {
    shared: Arc<Shared>,
    cmd_tx: Sender<OutputCmd>,
    result_rx: Receiver<Result<(), AudioError>>,
    thread: Option<JoinHandle<()>>,
    sample_rate: u32,
    channels: u16,
}

impl CpalOutput {
    /// Open the output device and bind it at the file-playback rate.
    /// Failure here declines subsystem startup; it is the only fatal path.
    pub fn new(device_name: Option<String>, initial_gain: f32) -> Result<Self, AudioError> {
        let shared = Arc::new(Shared {
            queue: ArrayQueue::new(48_000),
            gain_bits: AtomicU32::new(initial_gain.clamp(0.0, 1.0).to_bits()),
            dropped: AtomicUsize::new(0),
        });

        let (cmd_tx, cmd_rx) = bounded::<OutputCmd>(4);
        let (result_tx, result_rx) = bounded::<Result<(), AudioError>>(4);

        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                output_thread(cmd_rx, result_tx, thread_shared, device_name);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut output = Self {
            shared,
            cmd_tx,
            result_rx,
            thread: Some(thread),
            sample_rate: 0,
            channels: 0,
        };

        output.configure(FILE_SAMPLE_RATE, FILE_CHANNELS)?;
        Ok(output)
    }

    pub fn dropped_samples(&self) -> usize {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl OutputBus for CpalOutput {
    fn configure(&mut self, sample_rate: u32, channels: u16) -> Result<(), AudioError> {
        if sample_rate == self.sample_rate && channels == self.channels {
            return Ok(());
        }

        // Stale samples at the old rate must not leak into the new stream
        while self.shared.queue.pop().is_some() {}

        self.cmd_tx
            .send(OutputCmd::Configure {
                sample_rate,
                channels,
            })
            .map_err(|_| AudioError::OutputUnavailable)?;

        self.result_rx
            .recv_timeout(Duration::from_secs(2))
            .map_err(|_| AudioError::OutputUnavailable)??;

        self.sample_rate = sample_rate;
        self.channels = channels;
        tracing::info!("Output bus bound at {} Hz, {} ch", sample_rate, channels);
        Ok(())
    }

    fn write(&mut self, samples: &[f32]) {
        for &sample in samples {
            if self.shared.queue.push(sample).is_err() {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn set_gain(&mut self, gain: f32) {
        self.shared
            .gain_bits
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(OutputCmd::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn output_thread(
    cmd_rx: Receiver<OutputCmd>,
    result_tx: Sender<Result<(), AudioError>>,
    shared: Arc<Shared>,
    device_name: Option<String>,
) {
    // The live stream must stay on this thread: cpal streams are not Send
    let mut _stream: Option<cpal::Stream> = None;

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            OutputCmd::Configure {
                sample_rate,
                channels,
            } => {
                _stream = None;
                match build_stream(&device_name, &shared, sample_rate, channels) {
                    Ok(stream) => {
                        _stream = Some(stream);
                        let _ = result_tx.send(Ok(()));
                    }
                    Err(e) => {
                        tracing::error!("Output stream rebuild failed: {}", e);
                        let _ = result_tx.send(Err(e));
                    }
                }
            }
            OutputCmd::Shutdown => break,
        }
    }
}

fn build_stream(
    device_name: &Option<String>,
    shared: &Arc<Shared>,
    sample_rate: u32,
    channels: u16,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();

    let device = match device_name {
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::CpalError(e.to_string()))?
            .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(name.clone()))?,
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("no default output".to_string()))?,
    };

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Default,
    };

    let callback_shared = shared.clone();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let gain = f32::from_bits(callback_shared.gain_bits.load(Ordering::Relaxed));
                for sample in data.iter_mut() {
                    *sample = callback_shared.queue.pop().unwrap_or(0.0) * gain;
                }
            },
            |err| tracing::warn!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    Ok(stream)
}
