//! WAV to multi-channel Opus pre-encoding.
//!
//! Animations carry a WAV sound file; before playback starts we turn it
//! into 17 mono channel streams of 20 ms Opus frames at 48 kHz:
//! channel 0 is a downmix of every source channel, channels 1..16 are
//! per-creature stems (or encoded silence when the file is not
//! multitrack). Encoding settings are pinned so the same source always
//! produces the same bytes, which is what makes the on-disk cache
//! trustworthy.

use std::path::Path;

use audiopus::coder::Encoder as OpusEncoder;
use audiopus::{Application, Bitrate, Channels, SampleRate};

use crate::error::{ServerError, ServerResult};
use crate::protocol_constants::{
    OPUS_BITRATE, OPUS_FRAME_SAMPLES, OPUS_SAMPLE_RATE, RTP_CHANNEL_COUNT,
};

/// Upper bound for one encoded Opus frame. Opus never exceeds this for
/// 20 ms mono at our bitrate.
const MAX_OPUS_FRAME_LEN: usize = 1500;

/// Pre-encoded audio for one sound file: 17 channels of equal-length
/// Opus frame sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudio {
    /// `channels[ch][k]` is the Opus packet for channel `ch` at frame
    /// index `k`.
    pub channels: Vec<Vec<Vec<u8>>>,
    pub frames_per_channel: usize,
}

impl EncodedAudio {
    /// The Opus packet for a channel at a frame index, if in range.
    pub fn frame(&self, channel: u8, index: usize) -> Option<&[u8]> {
        self.channels
            .get(channel as usize)
            .and_then(|frames| frames.get(index))
            .map(|f| f.as_slice())
    }
}

fn new_encoder() -> ServerResult<OpusEncoder> {
    let mut encoder = OpusEncoder::new(SampleRate::Hz48000, Channels::Mono, Application::Audio)
        .map_err(ServerError::internal)?;
    encoder
        .set_bitrate(Bitrate::BitsPerSec(OPUS_BITRATE))
        .map_err(ServerError::internal)?;
    Ok(encoder)
}

/// Encodes one channel of PCM into 20 ms Opus frames, zero-padding the
/// final partial frame.
fn encode_channel(samples: &[i16], frame_count: usize) -> ServerResult<Vec<Vec<u8>>> {
    let mut encoder = new_encoder()?;
    let mut frames = Vec::with_capacity(frame_count);
    let mut scratch = [0i16; OPUS_FRAME_SAMPLES];
    let mut out = vec![0u8; MAX_OPUS_FRAME_LEN];

    for k in 0..frame_count {
        let start = k * OPUS_FRAME_SAMPLES;
        let end = ((k + 1) * OPUS_FRAME_SAMPLES).min(samples.len());
        scratch.fill(0);
        if start < samples.len() {
            scratch[..end - start].copy_from_slice(&samples[start..end]);
        }
        let written = encoder
            .encode(&scratch, &mut out)
            .map_err(ServerError::internal)?;
        frames.push(out[..written].to_vec());
    }
    Ok(frames)
}

/// Reads a WAV file into per-channel i16 PCM.
fn read_wav(path: &Path) -> ServerResult<Vec<Vec<i16>>> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| ServerError::InvalidData(format!("{}: {}", path.display(), e)))?;
    let spec = reader.spec();

    if spec.sample_rate != OPUS_SAMPLE_RATE {
        return Err(ServerError::InvalidData(format!(
            "{}: sample rate {} Hz, RTP audio requires {}",
            path.display(),
            spec.sample_rate,
            OPUS_SAMPLE_RATE
        )));
    }
    if spec.channels == 0 {
        return Err(ServerError::InvalidData(format!(
            "{}: zero channels",
            path.display()
        )));
    }

    let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .collect::<Result<_, _>>()
            .map_err(|e| ServerError::InvalidData(e.to_string()))?,
        (hound::SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()
            .map_err(|e| ServerError::InvalidData(e.to_string()))?,
        (format, bits) => {
            return Err(ServerError::InvalidData(format!(
                "{}: unsupported sample format {:?}/{} bits",
                path.display(),
                format,
                bits
            )))
        }
    };

    let num_channels = spec.channels as usize;
    let mut channels = vec![Vec::with_capacity(interleaved.len() / num_channels); num_channels];
    for (i, sample) in interleaved.into_iter().enumerate() {
        channels[i % num_channels].push(sample);
    }
    Ok(channels)
}

/// Averages all source channels into the channel-0 downmix.
fn downmix(channels: &[Vec<i16>]) -> Vec<i16> {
    let len = channels.iter().map(Vec::len).max().unwrap_or(0);
    let n = channels.len() as i32;
    (0..len)
        .map(|i| {
            let sum: i32 = channels
                .iter()
                .map(|ch| *ch.get(i).unwrap_or(&0) as i32)
                .sum();
            (sum / n) as i16
        })
        .collect()
}

/// Decodes and encodes a WAV sound file into the 17-channel Opus frame
/// layout used by the RTP transport.
///
/// When `multitrack` is true, source channel `n` becomes stem channel
/// `n + 1` (up to 16 stems); otherwise every stem is encoded silence.
/// All 17 channels come back with identical frame counts.
pub fn encode_wav_file(path: &Path, multitrack: bool) -> ServerResult<EncodedAudio> {
    if !path.is_file() {
        return Err(ServerError::NotFound(format!(
            "sound file {}",
            path.display()
        )));
    }

    let source_channels = read_wav(path)?;
    let samples_per_channel = source_channels.iter().map(Vec::len).max().unwrap_or(0);
    let frame_count = samples_per_channel.div_ceil(OPUS_FRAME_SAMPLES);

    let mix = downmix(&source_channels);

    // One silent stream shared by every channel without a stem.
    let silence = encode_channel(&[], frame_count)?;

    let mut channels = Vec::with_capacity(RTP_CHANNEL_COUNT as usize);
    channels.push(encode_channel(&mix, frame_count)?);
    for stem in 1..RTP_CHANNEL_COUNT as usize {
        let encoded = if multitrack {
            match source_channels.get(stem - 1) {
                Some(samples) => encode_channel(samples, frame_count)?,
                None => silence.clone(),
            }
        } else {
            silence.clone()
        };
        channels.push(encoded);
    }

    log::debug!(
        "encoded {}: {} frames x {} channels ({} source channels, multitrack: {})",
        path.display(),
        frame_count,
        channels.len(),
        source_channels.len(),
        multitrack
    );

    Ok(EncodedAudio {
        channels,
        frames_per_channel: frame_count,
    })
}
