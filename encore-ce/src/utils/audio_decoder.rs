//! Audio Decoding Utilities
//!
//! **Purpose:** Decode an in-memory audio blob to a mono f32 `Recording` at
//! the analysis sample rate.
//!
//! The container type is sniffed from magic bytes before symphonia probes it,
//! so unsupported uploads fail fast with a precise message.

use std::io::Cursor;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::FromSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use thiserror::Error;

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::models::Recording;

/// Audio input errors. These are never retried.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Audio payload is empty")]
    Empty,

    #[error("Unsupported audio type: {0}")]
    UnsupportedType(String),

    #[error("Undecodable audio: {0}")]
    Corrupt(String),

    #[error("Resampling failed: {0}")]
    Resample(String),
}

/// Identify the payload from its magic bytes
///
/// Returns the file extension symphonia should be hinted with.
pub fn sniff_audio_type(bytes: &[u8]) -> Result<&'static str, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    match infer::get(bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Audio => Ok(kind.extension()),
        Some(kind) => Err(DecodeError::UnsupportedType(kind.mime_type().to_string())),
        None => Err(DecodeError::UnsupportedType("unknown".to_string())),
    }
}

/// Decode audio bytes to a mono recording at `target_rate`
///
/// **Algorithm:**
/// 1. Sniff the container from magic bytes
/// 2. Probe with symphonia and pick the first audio track
/// 3. Decode all packets, averaging channels to mono
/// 4. Resample to `target_rate` if the source rate differs
pub fn decode_audio_bytes(bytes: &[u8], target_rate: u32) -> Result<Recording, DecodeError> {
    let extension = sniff_audio_type(bytes)?;
    tracing::debug!(extension, size = bytes.len(), "Decoding audio payload");

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let mut hint = Hint::new();
    hint.with_extension(extension);

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::Corrupt(format!("probe failed: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::Corrupt("no audio track found".to_string()))?;
    let track_id = track.id;
    let source_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::Corrupt("sample rate unknown".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Corrupt(format!("no decoder for codec: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::Corrupt(format!("error reading packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => append_mono(&decoded, &mut samples),
            // A single bad frame is skipped, not fatal
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!(error = %e, "Skipping undecodable packet");
            }
            Err(e) => return Err(DecodeError::Corrupt(format!("decode failed: {}", e))),
        }
    }

    tracing::debug!(
        source_rate,
        target_rate,
        frames = samples.len(),
        "Audio decoding complete"
    );

    let samples = resample_mono(samples, source_rate, target_rate)?;
    Ok(Recording::new(samples, target_rate))
}

/// Resample a mono buffer with rubato
///
/// The whole buffer is processed as one chunk.
pub fn resample_mono(
    samples: Vec<f32>,
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, DecodeError> {
    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples);
    }
    if source_rate == 0 || target_rate == 0 {
        return Err(DecodeError::Resample("sample rate must be positive".to_string()));
    }

    let mut resampler = FastFixedIn::<f32>::new(
        target_rate as f64 / source_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        samples.len(),
        1,
    )
    .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let mut output = resampler
        .process(&[samples], None)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

    Ok(output.pop().unwrap_or_default())
}

fn append_mono(decoded: &AudioBufferRef, out: &mut Vec<f32>) {
    match decoded {
        AudioBufferRef::U8(buf) => mix_down(&**buf, out),
        AudioBufferRef::U16(buf) => mix_down(&**buf, out),
        AudioBufferRef::U24(buf) => mix_down(&**buf, out),
        AudioBufferRef::U32(buf) => mix_down(&**buf, out),
        AudioBufferRef::S8(buf) => mix_down(&**buf, out),
        AudioBufferRef::S16(buf) => mix_down(&**buf, out),
        AudioBufferRef::S24(buf) => mix_down(&**buf, out),
        AudioBufferRef::S32(buf) => mix_down(&**buf, out),
        AudioBufferRef::F32(buf) => mix_down(&**buf, out),
        AudioBufferRef::F64(buf) => mix_down(&**buf, out),
    }
}

/// Average all channels of each frame
fn mix_down<S: Sample>(buf: &AudioBuffer<S>, out: &mut Vec<f32>)
where
    f32: FromSample<S>,
{
    let channels = buf.spec().channels.count();
    if channels == 0 {
        return;
    }
    out.reserve(buf.frames());
    for frame in 0..buf.frames() {
        let sum: f32 = (0..channels)
            .map(|ch| f32::from_sample(buf.chan(ch)[frame]))
            .sum();
        out.push(sum / channels as f32);
    }
}
