//! PCM shaping and WAV encoding for transcription upload.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;

/// Interleaved multi-channel f32 samples to mono by averaging each frame.
#[must_use]
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Resample mono audio by block-averaging the source samples that map onto
/// each output sample. Deliberately simple: transcription services do not
/// need audiophile resampling, they need the negotiated rate.
#[must_use]
pub fn resample_block_average(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if samples.is_empty() || src_rate == dst_rate || src_rate == 0 || dst_rate == 0 {
        return samples.to_vec();
    }
    let out_len = ((samples.len() as u64 * u64::from(dst_rate)) / u64::from(src_rate)).max(1);
    let mut out = Vec::with_capacity(out_len as usize);
    for i in 0..out_len {
        let start = ((i * u64::from(src_rate)) / u64::from(dst_rate)) as usize;
        let end = (((i + 1) * u64::from(src_rate)) / u64::from(dst_rate)) as usize;
        let end = end.max(start + 1).min(samples.len());
        let start = start.min(samples.len() - 1);
        let block = &samples[start..end];
        out.push(block.iter().sum::<f32>() / block.len() as f32);
    }
    out
}

/// Encode mono f32 samples as a canonical little-endian 16-bit PCM WAV.
/// Mono input is replicated across the target channel count.
///
/// # Errors
///
/// Returns an error if WAV encoding fails (effectively only on OOM).
pub fn encode_wav_pcm16(mono: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: channels.max(1),
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer =
            WavWriter::new(&mut buffer, spec).context("failed to start WAV encoder")?;
        for &sample in mono {
            let amplitude = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            for _ in 0..spec.channels {
                writer
                    .write_sample(amplitude)
                    .context("failed to write WAV sample")?;
            }
        }
        writer.finalize().context("failed to finalize WAV data")?;
    }
    Ok(buffer.into_inner())
}

/// Raw little-endian 16-bit PCM frames for the streaming recognition socket.
#[must_use]
pub fn f32_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let amplitude = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        bytes.extend_from_slice(&amplitude.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_stereo_frames() {
        let stereo = [0.5, -0.5, 1.0, 0.0];
        assert_eq!(downmix_to_mono(&stereo, 2), vec![0.0, 0.5]);
    }

    #[test]
    fn downmix_passes_mono_through() {
        let mono = [0.1, 0.2];
        assert_eq!(downmix_to_mono(&mono, 1), mono.to_vec());
    }

    #[test]
    fn resample_halves_the_sample_count() {
        let samples = [1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0];
        let out = resample_block_average(&samples, 32_000, 16_000);
        assert_eq!(out, vec![1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn resample_is_identity_at_equal_rates() {
        let samples = [0.25, -0.25, 0.5];
        assert_eq!(
            resample_block_average(&samples, 16_000, 16_000),
            samples.to_vec()
        );
    }

    #[test]
    fn resample_upsamples_by_repetition() {
        let samples = [1.0, -1.0];
        let out = resample_block_average(&samples, 8_000, 16_000);
        assert_eq!(out, vec![1.0, 1.0, -1.0, -1.0]);
    }

    #[test]
    fn wav_header_declares_negotiated_format() {
        let wav = encode_wav_pcm16(&[0.0, 0.5, -0.5], 16_000, 1).unwrap();
        // RIFF/WAVE magic plus fmt fields at their canonical offsets.
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        let channels = u16::from_le_bytes([wav[22], wav[23]]);
        let sample_rate = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        let bits = u16::from_le_bytes([wav[34], wav[35]]);
        assert_eq!(channels, 1);
        assert_eq!(sample_rate, 16_000);
        assert_eq!(bits, 16);
        assert_eq!(wav.len(), 44 + 3 * 2);
    }

    #[test]
    fn wav_duplicates_mono_across_stereo_output() {
        let wav = encode_wav_pcm16(&[0.5], 16_000, 2).unwrap();
        assert_eq!(wav.len(), 44 + 2 * 2);
        let left = i16::from_le_bytes([wav[44], wav[45]]);
        let right = i16::from_le_bytes([wav[46], wav[47]]);
        assert_eq!(left, right);
    }

    #[test]
    fn pcm16_bytes_clamp_out_of_range_samples() {
        let bytes = f32_to_pcm16_bytes(&[2.0, -2.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -i16::MAX);
    }
}
