//! Voice processing module
//!
//! Handles microphone capture, wake word gating, speech recognition and
//! playback of assistant audio. Hardware access sits behind the
//! [`AudioInput`] and [`AudioOutput`] traits so the pipeline runs against
//! fakes in tests.

mod capture;
mod convert;
mod gate;
mod pipeline;
mod playback;
mod stt;
mod wake_word;

use std::sync::Arc;
use std::time::Duration;

pub use capture::{AudioInput, BufferCallback, CpalMicrophone};
pub use convert::{
    StreamResampler, WIRE_SAMPLE_RATE, WireEncoder, calculate_rms, downmix, f32_to_pcm16,
    pcm16_to_f32, samples_to_wav,
};
pub use gate::{ActivationFlag, GateHandle, spawn_gate};
pub use pipeline::{AudioPipeline, CaptureWiring, PlaybackSink};
pub use playback::{AudioOutput, CpalSpeaker, PLAYBACK_SAMPLE_RATE, PlaybackQueue};
pub use stt::{
    HttpRecognizer, RECOGNIZER_SAMPLE_RATE, RecognitionSession, SpeechRecognizer, SpeechSegmenter,
    UnavailableRecognizer,
};
pub use wake_word::{ActivationReason, ActivationState, GateState, GateTransition, WakeWordGate};

/// A captured buffer of interleaved samples
///
/// Immutable once captured; cloning shares the sample storage.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioChunk {
    /// Wrap interleaved samples captured at `sample_rate` with `channels` channels
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels: channels.max(1),
        }
    }

    /// Interleaved samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Source sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Source channel count
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel)
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    /// Wall-clock length of the chunk
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        #[allow(clippy::cast_precision_loss)]
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }

    /// Mono mixdown of the chunk
    #[must_use]
    pub fn to_mono(&self) -> Vec<f32> {
        downmix(&self.samples, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_geometry() {
        let chunk = AudioChunk::new(vec![0.0; 960], 48_000, 2);
        assert_eq!(chunk.frames(), 480);
        assert_eq!(chunk.duration(), Duration::from_millis(10));
        assert_eq!(chunk.to_mono().len(), 480);
    }

    #[test]
    fn zero_channels_treated_as_mono() {
        let chunk = AudioChunk::new(vec![0.5; 10], 16_000, 0);
        assert_eq!(chunk.channels(), 1);
        assert_eq!(chunk.frames(), 10);
    }
}
