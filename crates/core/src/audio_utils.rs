use anyhow::Context;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Sample rate of the raw PCM16 stream returned by the speech endpoint.
pub const OPENAI_TTS_PCM16_SAMPLE_RATE: u32 = 24000;

/// Frames fed to the resampler per call.
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Creates a mono resampler converting between two sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Resamples a whole mono buffer, flushing the tail with a partial call.
pub fn resample(samples: &[f32], in_rate: u32, out_rate: u32) -> anyhow::Result<Vec<f32>> {
    if in_rate == out_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = create_resampler(in_rate as f64, out_rate as f64, RESAMPLE_CHUNK_FRAMES)
        .context("Failed to create resampler")?;

    let expected = samples.len() as u64 * out_rate as u64 / in_rate as u64;
    let mut out = Vec::with_capacity(expected as usize + RESAMPLE_CHUNK_FRAMES);
    let mut pos = 0;
    while samples.len() - pos >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let wave_in: [&[f32]; 1] = [&samples[pos..pos + needed]];
        let frames = resampler.process(&wave_in[..], None)?;
        out.extend_from_slice(&frames[0]);
        pos += needed;
    }
    if pos < samples.len() {
        let wave_in: [&[f32]; 1] = [&samples[pos..]];
        let frames = resampler.process_partial(Some(&wave_in[..]), None)?;
        out.extend_from_slice(&frames[0]);
    }
    Ok(out)
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Averages interleaved frames down to a single channel.
pub fn downmix_to_mono<T>(interleaved: &[T], channels: usize) -> Vec<i16>
where
    T: Copy + Into<f32>,
{
    if channels <= 1 {
        return interleaved
            .iter()
            .map(|&s| s.into().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|&s| s.into()).sum();
            (sum / channels as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect()
}

/// Wraps mono PCM16 samples in a canonical 44-byte RIFF/WAVE header.
pub fn encode_wav_i16(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let byte_rate = sample_rate * 2;
    let mut buffer = Vec::with_capacity(44 + data_len as usize);

    buffer.extend_from_slice(b"RIFF");
    buffer.extend_from_slice(&(36 + data_len).to_le_bytes());
    buffer.extend_from_slice(b"WAVE");

    buffer.extend_from_slice(b"fmt ");
    buffer.extend_from_slice(&16u32.to_le_bytes());
    buffer.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buffer.extend_from_slice(&1u16.to_le_bytes()); // mono
    buffer.extend_from_slice(&sample_rate.to_le_bytes());
    buffer.extend_from_slice(&byte_rate.to_le_bytes());
    buffer.extend_from_slice(&2u16.to_le_bytes()); // block align
    buffer.extend_from_slice(&16u16.to_le_bytes());

    buffer.extend_from_slice(b"data");
    buffer.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        buffer.extend_from_slice(&sample.to_le_bytes());
    }
    buffer
}

/// Decodes a little-endian PCM16 byte stream that arrives in arbitrary pieces.
///
/// HTTP bodies split wherever the transport likes, so a sample may straddle two
/// chunks. The dangling byte is held until the next call.
#[derive(Debug, Default)]
pub struct Pcm16Decoder {
    carry: Option<u8>,
}

impl Pcm16Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> Vec<i16> {
        let mut samples = Vec::with_capacity(bytes.len() / 2 + 1);
        let mut rest = bytes;
        if let Some(low) = self.carry.take() {
            match rest.split_first() {
                Some((&high, tail)) => {
                    samples.push(i16::from_le_bytes([low, high]));
                    rest = tail;
                }
                None => {
                    self.carry = Some(low);
                    return samples;
                }
            }
        }
        let mut pairs = rest.chunks_exact(2);
        samples.extend(pairs.by_ref().map(|c| i16::from_le_bytes([c[0], c[1]])));
        self.carry = pairs.remainder().first().copied();
        samples
    }

    /// True when a half sample is still waiting for its second byte.
    pub fn has_pending_byte(&self) -> bool {
        self.carry.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_create_resampler() {
        assert!(create_resampler(16000.0, 24000.0, 1024).is_ok());
        assert!(create_resampler(24000.0, 24000.0, 1024).is_ok());
        assert!(create_resampler(48000.0, 24000.0, 1024).is_ok());
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let input = vec![0.1f32, -0.2, 0.3];
        assert_eq!(resample(&input, 24000, 24000).unwrap(), input);
        assert!(resample(&[], 24000, 48000).unwrap().is_empty());
    }

    #[test]
    fn test_resample_scales_length() {
        let input = vec![0.0f32; 24000];
        let out = resample(&input, 24000, 48000).unwrap();
        // Output length is approximate because of the resampler's delay.
        let ratio = out.len() as f64 / input.len() as f64;
        assert!((1.9..=2.2).contains(&ratio), "unexpected ratio {ratio}");
    }

    #[test]
    fn test_convert_f32_to_i16() {
        let result = convert_f32_to_i16(&[1.0, -1.0, 0.0, 2.0, -2.0]);
        assert_eq!(result[0], i16::MAX);
        assert_eq!(result[1], -32767);
        assert_eq!(result[2], 0);
        assert_eq!(result[3], i16::MAX);
        assert_eq!(result[4], i16::MIN);
    }

    #[test]
    fn test_convert_i16_to_f32() {
        let result = convert_i16_to_f32(&[i16::MIN, 0, 16384]);
        assert_abs_diff_eq!(result[0], -1.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[1], 0.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[2], 0.5, epsilon = 0.0001);
    }

    #[test]
    fn test_downmix_to_mono() {
        let stereo: [i16; 6] = [100, 300, -50, -150, 7, 7];
        assert_eq!(downmix_to_mono(&stereo, 2), vec![200, -100, 7]);

        let mono: [i16; 3] = [1, 2, 3];
        assert_eq!(downmix_to_mono(&mono, 1), vec![1, 2, 3]);

        // A trailing partial frame is discarded.
        let ragged: [i16; 3] = [10, 20, 30];
        assert_eq!(downmix_to_mono(&ragged, 2), vec![15]);
    }

    #[test]
    fn test_encode_wav_header() {
        let wav = encode_wav_i16(&[1, -1, 256], 16000);
        assert_eq!(wav.len(), 44 + 6);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(wav[4..8].try_into().unwrap()), 36 + 6);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 1);
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 16000);
        assert_eq!(u32::from_le_bytes(wav[28..32].try_into().unwrap()), 32000);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 6);
        assert_eq!(&wav[44..46], &1i16.to_le_bytes());
        assert_eq!(&wav[48..50], &256i16.to_le_bytes());
    }

    #[test]
    fn test_pcm_decoder_carries_odd_bytes() {
        let samples: Vec<i16> = vec![1000, -2000, 3, i16::MIN, i16::MAX];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let mut decoder = Pcm16Decoder::new();
        let mut out = decoder.decode(&bytes[..3]);
        assert!(decoder.has_pending_byte());
        out.extend(decoder.decode(&bytes[3..4]));
        assert!(!decoder.has_pending_byte());
        out.extend(decoder.decode(&[]));
        out.extend(decoder.decode(&bytes[4..9]));
        assert!(decoder.has_pending_byte());
        out.extend(decoder.decode(&bytes[9..]));

        assert_eq!(out, samples);
        assert!(!decoder.has_pending_byte());
    }

    #[test]
    fn test_pcm_decoder_single_byte_chunks() {
        let samples: Vec<i16> = vec![-1, 42];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut decoder = Pcm16Decoder::new();
        let out: Vec<i16> = bytes.iter().flat_map(|b| decoder.decode(&[*b])).collect();
        assert_eq!(out, samples);
    }
}
