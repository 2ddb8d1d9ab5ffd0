//! WAV renderer: offline preview of a preset's drone as 16-bit stereo PCM.

use crate::config::StudioConfig;
use crate::error::CoreError;
use crate::events::Command;
use crate::session::SessionSettings;
use crate::studio::Studio;
use crate::tables::TuningSystem;

const BLOCK_FRAMES: usize = 1024;

/// Render `seconds` of `preset_id` to a WAV file as bytes, fading in at
/// the start and out at the end.
pub fn render_preview_wav(
    preset_id: &str,
    tuning: TuningSystem,
    seconds: f64,
    sample_rate: u32,
) -> Result<Vec<u8>, CoreError> {
    if !(seconds.is_finite() && seconds > 0.0) {
        return Err(CoreError::InvalidConfig(format!("preview length {seconds} must be positive")));
    }
    let fade = (seconds / 4.0).min(1.0);
    let config = StudioConfig {
        sample_rate: sample_rate as f64,
        session: SessionSettings {
            fade_seconds: fade,
            ..SessionSettings::default()
        },
        ..StudioConfig::default()
    };
    let mut studio = Studio::new(config)?;
    studio.handle(Command::SelectPreset {
        id: preset_id.to_string(),
    })?;
    studio.handle(Command::SetTuning { tuning })?;
    studio.handle(Command::StartSession)?;

    let sr = sample_rate as f64;
    let total = (seconds * sr).round() as usize;
    let fade_out_at = total.saturating_sub((fade * sr).round() as usize);
    let mut pcm = Vec::with_capacity(total * 2);
    let mut rendered = 0;
    let mut stopping = false;
    while rendered < total {
        if !stopping && rendered >= fade_out_at {
            studio.handle(Command::StopSession)?;
            stopping = true;
        }
        let limit = if stopping { total } else { fade_out_at.max(rendered + 1) };
        let frames = BLOCK_FRAMES.min(limit - rendered);
        pcm.extend(studio.render_interleaved(frames).into_iter().map(to_i16));
        rendered += frames;
    }

    Ok(encode_wav(&pcm, sample_rate, 2))
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Encode interleaved i16 PCM samples to a WAV byte buffer.
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = channels * (bits_per_sample / 8);
    let data_size = (samples.len() * 2) as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits_per_sample.to_le_bytes());

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}
