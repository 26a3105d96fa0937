//! Audio engine
//!
//! Owns the output bus, the playback state machine and the active decoder.
//! Exactly one decoder exists at a time, held in a scope-bound slot that is
//! constructed on transition-in and dropped on transition-out; every mode
//! change passes through `Idle` so the output-bus rate state is torn down
//! cleanly.
//!
//! During a live stream the engine must emit a full-size output frame every
//! cycle: buffer underrun, malformed packet headers and decode failures all
//! substitute silence for that frame and keep the session alive.

use std::sync::Arc;
use std::time::Duration;

use opus::Channels;

use crate::audio::file::FileDecoder;
use crate::audio::jitter::JitterBuffer;
use crate::audio::output::OutputBus;
use crate::constants::{
    FILE_CHANNELS, FILE_SAMPLE_RATE, MAX_PACKET_SIZE, OPUS_FRAME_SAMPLES, POP_TIMEOUT_MS,
    STREAM_CHANNELS, STREAM_SAMPLE_RATE,
};
use crate::storage::Storage;

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    Idle,
    FilePlayback,
    LiveStream,
}

/// Outcome of one `advance()` tick, for the audio pump to act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Nothing to do
    Idle,
    /// A frame (possibly substituted silence) was emitted
    Playing,
    /// Stream mode, still waiting for pre-roll; silence emitted
    Buffering,
    /// File playback reached end of stream and the engine returned to Idle
    Finished,
    /// File playback aborted on a decoder error
    Failed,
}

enum ActiveDecoder {
    File(FileDecoder),
    Stream(opus::Decoder),
}

/// The audio session: mode, volume, decoder slot and output binding
pub struct AudioEngine {
    mode: PlaybackMode,
    decoder: Option<ActiveDecoder>,
    output: Box<dyn OutputBus>,
    jitter: Arc<JitterBuffer>,
    storage: Arc<dyn Storage>,
    volume: f32,
    /// Reused Opus decode buffer, one 20 ms frame
    pcm_buf: Vec<f32>,
    /// One frame of silence for substitution
    silence: Vec<f32>,
}

impl AudioEngine {
    pub fn new(
        mut output: Box<dyn OutputBus>,
        jitter: Arc<JitterBuffer>,
        storage: Arc<dyn Storage>,
        volume: f32,
    ) -> Self {
        let volume = volume.clamp(0.0, 1.0);
        output.set_gain(volume);

        Self {
            mode: PlaybackMode::Idle,
            decoder: None,
            output,
            jitter,
            storage,
            volume,
            pcm_buf: vec![0.0; OPUS_FRAME_SAMPLES],
            silence: vec![0.0; OPUS_FRAME_SAMPLES],
        }
    }

    /// Start playing a stored file. Any current session is stopped first.
    /// Returns false (logged) when the file is missing, unsupported or
    /// fails to open; never panics.
    pub fn play_file(&mut self, name: &str) -> bool {
        self.stop();

        let name = name.trim_start_matches('/');

        if !self.storage.exists(name) {
            tracing::warn!("File not found: {}", name);
            return false;
        }

        let extension = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        if extension != "mp3" && extension != "wav" {
            tracing::warn!("Unsupported file format: {} (use .wav or .mp3)", name);
            return false;
        }

        let file = match self.storage.open_read(name) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Cannot open {}: {}", name, e);
                return false;
            }
        };

        let decoder = match FileDecoder::open(file, &extension) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("Failed to start playback of {}: {}", name, e);
                return false;
            }
        };

        if let Err(e) = self
            .output
            .configure(decoder.sample_rate(), decoder.channels())
        {
            tracing::error!("Output bind failed for {}: {}", name, e);
            return false;
        }

        tracing::info!("Playing {}", name);
        self.decoder = Some(ActiveDecoder::File(decoder));
        self.mode = PlaybackMode::FilePlayback;
        true
    }

    /// Enter live-stream mode: bind the output at the stream rate and arm
    /// a fresh pre-roll. Idempotent when already streaming.
    pub fn start_stream(&mut self) -> bool {
        if self.mode == PlaybackMode::LiveStream {
            return true;
        }
        self.stop();

        let decoder = match opus::Decoder::new(STREAM_SAMPLE_RATE, Channels::Mono) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("Stream decoder init failed: {}", e);
                return false;
            }
        };

        if let Err(e) = self.output.configure(STREAM_SAMPLE_RATE, STREAM_CHANNELS) {
            tracing::error!("Output bind failed for streaming: {}", e);
            return false;
        }

        self.jitter.reset();
        self.decoder = Some(ActiveDecoder::Stream(decoder));
        self.mode = PlaybackMode::LiveStream;
        tracing::info!("Live stream session started");
        true
    }

    /// Return to `Idle`. Immediate and idempotent; streaming teardown
    /// restores the file-playback rate and emits one silence frame to
    /// avoid an audible pop.
    pub fn stop(&mut self) {
        if self.mode == PlaybackMode::Idle {
            return;
        }

        let was_stream = self.mode == PlaybackMode::LiveStream;
        self.decoder = None;
        self.mode = PlaybackMode::Idle;

        if was_stream {
            self.jitter.reset();
            if let Err(e) = self.output.configure(FILE_SAMPLE_RATE, FILE_CHANNELS) {
                tracing::warn!("Output restore failed: {}", e);
            }
            self.output.write(&self.silence);
            tracing::info!("Live stream session stopped");
        } else {
            tracing::info!("Playback stopped");
        }
    }

    /// Run one decode cycle. Called at a fixed short period by the audio
    /// pump; must never block beyond the bounded jitter pop.
    pub fn advance(&mut self) -> Advance {
        match self.mode {
            PlaybackMode::Idle => Advance::Idle,
            PlaybackMode::FilePlayback => self.advance_file(),
            PlaybackMode::LiveStream => self.advance_stream(),
        }
    }

    fn advance_file(&mut self) -> Advance {
        let Some(ActiveDecoder::File(decoder)) = self.decoder.as_mut() else {
            self.mode = PlaybackMode::Idle;
            return Advance::Idle;
        };

        match decoder.decode_next() {
            Ok(Some(samples)) => {
                self.output.write(&samples);
                Advance::Playing
            }
            Ok(None) => {
                tracing::info!("Playback finished");
                self.decoder = None;
                self.mode = PlaybackMode::Idle;
                Advance::Finished
            }
            Err(e) => {
                tracing::warn!("Playback aborted: {}", e);
                self.decoder = None;
                self.mode = PlaybackMode::Idle;
                Advance::Failed
            }
        }
    }

    fn advance_stream(&mut self) -> Advance {
        if !self.jitter.is_primed() {
            self.output.write(&self.silence);
            return Advance::Buffering;
        }

        let packet = self.jitter.pop(Duration::from_millis(POP_TIMEOUT_MS));

        let Some(ActiveDecoder::Stream(decoder)) = self.decoder.as_mut() else {
            self.mode = PlaybackMode::Idle;
            return Advance::Idle;
        };

        let Some(packet) = packet else {
            // Underrun after pre-roll: substitute silence, stay live
            self.output.write(&self.silence);
            return Advance::Playing;
        };

        // A malformed length must never become a buffer size
        if packet.is_empty() || packet.len() > MAX_PACKET_SIZE {
            tracing::warn!("Invalid stream packet length {}", packet.len());
            self.output.write(&self.silence);
            return Advance::Playing;
        }

        match decoder.decode_float(&packet.payload, &mut self.pcm_buf, false) {
            Ok(samples) => {
                let count = samples * STREAM_CHANNELS as usize;
                self.output.write(&self.pcm_buf[..count]);
            }
            Err(e) => {
                tracing::warn!("Stream decode failed: {}", e);
                self.output.write(&self.silence);
            }
        }
        Advance::Playing
    }

    /// Clamp to [0.0, 1.0] and apply immediately, in any mode
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.output.set_gain(self.volume);
        tracing::info!("Volume set to {:.2}", self.volume);
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// True iff a session is active and its decoder is still running
    pub fn playing(&self) -> bool {
        self.mode != PlaybackMode::Idle && self.decoder.is_some()
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    /// Comma-joined audio file listing from the store
    pub fn list_files(&self) -> String {
        self.storage.list_audio_files()
    }
}
