//! Sample format and rate conversion

use rubato::{FftFixedIn, Resampler};

use super::AudioChunk;
use crate::{Error, Result};

/// Sample rate of audio exchanged with the coaching service
pub const WIRE_SAMPLE_RATE: u32 = 24_000;

/// Input frames per resampler pass
const RESAMPLE_CHUNK: usize = 1024;

/// Sub-chunks per pass (latency vs. cost tradeoff)
const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Average interleaved channels down to mono
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = usize::from(channels);
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert f32 samples in [-1.0, 1.0] to little-endian PCM16 bytes
#[must_use]
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Decode little-endian PCM16 bytes to f32 samples
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

/// Convert f32 samples to mono PCM16 WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample_i16)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Incremental mono resampler for a live stream
///
/// Input that does not fill a whole resampler pass is carried over to the
/// next call, so arbitrary buffer sizes from the capture callback are fine.
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    inner: Option<FftFixedIn<f32>>,
    carry: Vec<f32>,
}

impl StreamResampler {
    /// Create a resampler from `from_rate` to `to_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the rates are zero or rubato rejects them
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(Error::Audio(format!(
                "invalid resample rates {from_rate} -> {to_rate}"
            )));
        }

        let inner = if from_rate == to_rate {
            None
        } else {
            let resampler = FftFixedIn::<f32>::new(
                from_rate as usize,
                to_rate as usize,
                RESAMPLE_CHUNK,
                RESAMPLE_SUB_CHUNKS,
                1,
            )
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;
            Some(resampler)
        };

        Ok(Self {
            from_rate,
            to_rate,
            inner,
            carry: Vec::new(),
        })
    }

    /// Source rate this resampler was built for
    #[must_use]
    pub const fn from_rate(&self) -> u32 {
        self.from_rate
    }

    /// Target rate
    #[must_use]
    pub const fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Feed mono samples, returning whatever output is ready
    ///
    /// # Errors
    ///
    /// Returns error if rubato fails to process a pass
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };

        self.carry.extend_from_slice(samples);
        let mut output = Vec::new();

        loop {
            let needed = resampler.input_frames_next();
            if self.carry.len() < needed {
                break;
            }
            let pass: Vec<f32> = self.carry.drain(..needed).collect();
            let result = resampler
                .process(&[pass], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            if let Some(channel) = result.into_iter().next() {
                output.extend(channel);
            }
        }

        Ok(output)
    }

    /// Drop any carried input
    pub fn reset(&mut self) {
        self.carry.clear();
        if let Some(resampler) = self.inner.as_mut() {
            resampler.reset();
        }
    }
}

/// Converts captured chunks to the wire format (mono PCM16 at 24 kHz)
pub struct WireEncoder {
    resampler: Option<StreamResampler>,
}

impl WireEncoder {
    /// Create an encoder; the resampler is built on the first chunk
    #[must_use]
    pub const fn new() -> Self {
        Self { resampler: None }
    }

    /// Encode one chunk
    ///
    /// May return an empty buffer while the resampler accumulates input.
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn encode(&mut self, chunk: &AudioChunk) -> Result<Vec<u8>> {
        let rate = chunk.sample_rate();
        let rebuild = self
            .resampler
            .as_ref()
            .is_none_or(|r| r.from_rate() != rate);
        if rebuild {
            tracing::debug!(from = rate, to = WIRE_SAMPLE_RATE, "wire resampler configured");
            self.resampler = Some(StreamResampler::new(rate, WIRE_SAMPLE_RATE)?);
        }

        let mono = chunk.to_mono();
        let resampled = match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&mono)?,
            None => mono,
        };
        Ok(f32_to_pcm16(&resampled))
    }
}

impl Default for WireEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_rms(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_rms(&loud) > 0.4);
    }

    #[test]
    fn downmix_averages_frames() {
        let stereo = [1.0, 0.0, 0.5, 0.5];
        assert_eq!(downmix(&stereo, 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&stereo, 1), stereo.to_vec());
    }

    #[test]
    fn pcm16_is_little_endian() {
        let bytes = f32_to_pcm16(&[1.0, -1.0, 0.0]);
        assert_eq!(bytes, vec![0xFF, 0x7F, 0x01, 0x80, 0x00, 0x00]);
        let back = pcm16_to_f32(&bytes);
        assert!((back[0] - 0.99997).abs() < 1e-4);
        assert!(back[2].abs() < f32::EPSILON);
    }

    #[test]
    fn odd_trailing_byte_ignored() {
        assert_eq!(pcm16_to_f32(&[0x00, 0x40, 0x12]).len(), 1);
    }

    #[test]
    fn passthrough_at_wire_rate() {
        let mut encoder = WireEncoder::new();
        let chunk = AudioChunk::new(vec![0.25; 480], WIRE_SAMPLE_RATE, 1);
        assert_eq!(encoder.encode(&chunk).unwrap().len(), 960);
    }

    #[test]
    fn downsamples_48k_stream() {
        let mut resampler = StreamResampler::new(48_000, 24_000).unwrap();
        let mut total = 0;
        for _ in 0..20 {
            total += resampler.process(&[0.1; 480]).unwrap().len();
        }
        // 9600 input frames at half rate, less whatever is still carried
        assert!(total > 4000 && total <= 4800, "got {total}");
    }

    #[test]
    fn wav_header_present() {
        let wav = samples_to_wav(&[0.0; 160], 16_000).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(wav.len(), 44 + 320);
    }
}
