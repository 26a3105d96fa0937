//! Stored-file decoding via symphonia
//!
//! Wraps container probing (which skips ID3 and other metadata) and packet
//! decoding for the file-playback path. One `FileDecoder` lives for one
//! playback session; EOF is a normal termination, not an error.

use std::fs::File;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::CodecError;

/// Demuxer + decoder for one stored audio file
pub struct FileDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
}

impl FileDecoder {
    /// Probe `file` (using `extension` as a format hint) and open a decoder
    /// for its first audio track.
    pub fn open(file: File, extension: &str) -> Result<Self, CodecError> {
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if !extension.is_empty() {
            hint.with_extension(extension);
        }

        let format_opts = FormatOptions::default();
        let metadata_opts = MetadataOptions::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|e| CodecError::DecoderInit(format!("probe: {e}")))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(CodecError::NoAudioTrack)?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
        let channels = track.codec_params.channels.map_or(2, |c| c.count() as u16);

        tracing::debug!(
            "Audio track: id={}, sample_rate={}, channels={}",
            track_id,
            sample_rate,
            channels
        );

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Decode the next packet into interleaved f32 samples.
    /// `Ok(None)` marks end of stream. Corrupt frames are skipped.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>, CodecError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => {
                    return Err(CodecError::DecodingFailed(format!("read packet: {e}")));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => return Ok(Some(audio_buffer_to_f32(&decoded))),
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    tracing::warn!("Corrupt frame skipped: {e}");
                }
                Err(e) => {
                    return Err(CodecError::DecodingFailed(e.to_string()));
                }
            }
        }
    }
}

/// Convert a decoded buffer to interleaved f32 samples
fn audio_buffer_to_f32(buffer: &AudioBufferRef<'_>) -> Vec<f32> {
    match buffer {
        AudioBufferRef::F32(buf) => {
            let channels = buf.spec().channels.count();
            let frames = buf.frames();
            let mut output = Vec::with_capacity(frames * channels);
            for frame in 0..frames {
                for ch in 0..channels {
                    output.push(buf.chan(ch)[frame]);
                }
            }
            output
        }
        AudioBufferRef::F64(buf) => {
            let channels = buf.spec().channels.count();
            let frames = buf.frames();
            let mut output = Vec::with_capacity(frames * channels);
            for frame in 0..frames {
                for ch in 0..channels {
                    output.push(buf.chan(ch)[frame] as f32);
                }
            }
            output
        }
        AudioBufferRef::S16(buf) => {
            let channels = buf.spec().channels.count();
            let frames = buf.frames();
            let mut output = Vec::with_capacity(frames * channels);
            for frame in 0..frames {
                for ch in 0..channels {
                    output.push(f32::from(buf.chan(ch)[frame]) / 32_768.0);
                }
            }
            output
        }
        AudioBufferRef::S32(buf) => {
            let channels = buf.spec().channels.count();
            let frames = buf.frames();
            let mut output = Vec::with_capacity(frames * channels);
            for frame in 0..frames {
                for ch in 0..channels {
                    output.push(buf.chan(ch)[frame] as f32 / 2_147_483_648.0);
                }
            }
            output
        }
        other => {
            tracing::warn!(
                "Unsupported sample format ({} frames dropped)",
                other.frames()
            );
            Vec::new()
        }
    }
}
