//! Speech-to-text (STT) processing
//!
//! The wake word gate only needs a stream of recognized phrases. A
//! [`SpeechRecognizer`] hands out bounded sessions: audio goes in through
//! one channel, text comes out of another, and the session ends on its own
//! when its time limit passes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;

use super::AudioChunk;
use super::convert::{StreamResampler, calculate_rms, samples_to_wav};
use crate::config::RecognizerConfig;
use crate::{Error, Result};

/// Rate the recognizer works at
pub const RECOGNIZER_SAMPLE_RATE: u32 = 16_000;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to form a segment (0.3 s at 16 kHz)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Silence that ends an utterance (0.5 s at 16 kHz)
const SILENCE_SAMPLES: usize = 8000;

/// Queued chunks per session before the gate starts dropping
const SESSION_AUDIO_CAPACITY: usize = 64;

/// One bounded recognition session
pub struct RecognitionSession {
    /// Captured audio in
    pub audio: mpsc::Sender<AudioChunk>,
    /// Recognized phrases out; closes when the session ends
    pub results: mpsc::Receiver<Result<String>>,
}

/// Continuous speech recognizer backing the wake word gate
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Whether recognition can run at all
    fn is_available(&self) -> bool;

    /// Open a new recognition session
    ///
    /// # Errors
    ///
    /// Returns `Error::Recognizer` if the session cannot be started
    async fn start_session(&self) -> Result<RecognitionSession>;
}

/// Recognizer used when none is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRecognizer;

#[async_trait]
impl SpeechRecognizer for UnavailableRecognizer {
    fn is_available(&self) -> bool {
        false
    }

    async fn start_session(&self) -> Result<RecognitionSession> {
        Err(Error::Recognizer("no speech recognizer configured".to_string()))
    }
}

/// Energy based utterance segmenter over 16 kHz mono audio
#[derive(Debug, Default)]
pub struct SpeechSegmenter {
    listening: bool,
    speech_buffer: Vec<f32>,
    speech_samples: usize,
    silence_counter: usize,
}

impl SpeechSegmenter {
    /// Create an idle segmenter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed samples; returns a finished utterance when one completes
    pub fn push(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_rms(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        if !self.listening {
            if is_speech {
                self.listening = true;
                self.speech_buffer.clear();
                self.speech_buffer.extend_from_slice(samples);
                self.speech_samples = samples.len();
                self.silence_counter = 0;
                tracing::trace!(energy, "speech detected, listening");
            }
            return None;
        }

        self.speech_buffer.extend_from_slice(samples);
        if is_speech {
            self.speech_samples += samples.len();
            self.silence_counter = 0;
        } else {
            self.silence_counter += samples.len();
        }

        if self.silence_counter > SILENCE_SAMPLES && self.speech_samples > MIN_SPEECH_SAMPLES {
            tracing::debug!(samples = self.speech_buffer.len(), "speech segment complete");
            let segment = std::mem::take(&mut self.speech_buffer);
            self.reset();
            return Some(segment);
        }

        // Too much silence without enough speech
        if self.silence_counter > SILENCE_SAMPLES * 2 {
            tracing::trace!("segment timeout, resetting");
            self.reset();
        }

        None
    }

    /// Whether speech is currently being accumulated
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.listening
    }

    /// Drop any partial utterance
    pub fn reset(&mut self) {
        self.listening = false;
        self.speech_buffer.clear();
        self.speech_samples = 0;
        self.silence_counter = 0;
    }
}

/// Response from an OpenAI compatible transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

struct WhisperEndpoint {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: SecretString,
}

impl WhisperEndpoint {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Recognizer(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Recognizer(format!(
                "transcription API error {status}: {body}"
            )));
        }

        let result: WhisperResponse = response.json().await?;
        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

/// Recognizer posting segmented utterances to a transcription endpoint
pub struct HttpRecognizer {
    endpoint: Option<Arc<WhisperEndpoint>>,
    session_limit: Duration,
}

impl HttpRecognizer {
    /// Build from configuration
    ///
    /// Without an API key the recognizer reports itself unavailable.
    #[must_use]
    pub fn new(config: &RecognizerConfig, session_limit: Duration) -> Self {
        let endpoint = config.api_key.as_ref().map(|key| {
            Arc::new(WhisperEndpoint {
                client: reqwest::Client::new(),
                url: config.url.clone(),
                model: config.model.clone(),
                api_key: SecretString::from(key.expose_secret().to_owned()),
            })
        });

        Self {
            endpoint,
            session_limit,
        }
    }
}

#[async_trait]
impl SpeechRecognizer for HttpRecognizer {
    fn is_available(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn start_session(&self) -> Result<RecognitionSession> {
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| Error::Recognizer("no transcription API key".to_string()))?;

        let (audio_tx, audio_rx) = mpsc::channel(SESSION_AUDIO_CAPACITY);
        let (results_tx, results_rx) = mpsc::channel(16);

        tokio::spawn(run_session(
            endpoint,
            audio_rx,
            results_tx,
            self.session_limit,
        ));

        Ok(RecognitionSession {
            audio: audio_tx,
            results: results_rx,
        })
    }
}

async fn run_session(
    endpoint: Arc<WhisperEndpoint>,
    mut audio_rx: mpsc::Receiver<AudioChunk>,
    results_tx: mpsc::Sender<Result<String>>,
    limit: Duration,
) {
    let expiry = tokio::time::sleep(limit);
    tokio::pin!(expiry);

    let mut resampler: Option<StreamResampler> = None;
    let mut segmenter = SpeechSegmenter::new();

    loop {
        let chunk = tokio::select! {
            () = &mut expiry => {
                tracing::debug!("recognition session reached its limit");
                break;
            }
            chunk = audio_rx.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };

        let rate = chunk.sample_rate();
        if resampler.as_ref().is_none_or(|r| r.from_rate() != rate) {
            match StreamResampler::new(rate, RECOGNIZER_SAMPLE_RATE) {
                Ok(r) => resampler = Some(r),
                Err(e) => {
                    let _ = results_tx.send(Err(e)).await;
                    break;
                }
            }
        }
        let Some(resampler) = resampler.as_mut() else {
            break;
        };

        let samples = match resampler.process(&chunk.to_mono()) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::debug!(error = %e, "dropping unresampled chunk");
                continue;
            }
        };

        if let Some(segment) = segmenter.push(&samples) {
            let wav = match samples_to_wav(&segment, RECOGNIZER_SAMPLE_RATE) {
                Ok(wav) => wav,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode speech segment");
                    continue;
                }
            };
            let endpoint = Arc::clone(&endpoint);
            let tx = results_tx.clone();
            tokio::spawn(async move {
                let result = endpoint.transcribe(wav).await;
                let _ = tx.send(result).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_needs_trailing_silence() {
        let mut segmenter = SpeechSegmenter::new();
        assert!(segmenter.push(&[0.5; 1600]).is_none());
        assert!(segmenter.is_listening());
        assert!(segmenter.push(&[0.5; 4000]).is_none());

        let mut segment = None;
        for _ in 0..10 {
            if let Some(s) = segmenter.push(&[0.0; 1600]) {
                segment = Some(s);
                break;
            }
        }
        let segment = segment.expect("segment should complete");
        assert!(segment.len() > MIN_SPEECH_SAMPLES);
        assert!(!segmenter.is_listening());
    }

    #[test]
    fn short_blip_times_out() {
        let mut segmenter = SpeechSegmenter::new();
        segmenter.push(&[0.5; 800]);
        for _ in 0..12 {
            assert!(segmenter.push(&[0.0; 1600]).is_none());
        }
        assert!(!segmenter.is_listening());
    }

    #[test]
    fn unavailable_without_key() {
        let recognizer = HttpRecognizer::new(&RecognizerConfig::default(), Duration::from_secs(55));
        assert!(!recognizer.is_available());
    }

    #[tokio::test]
    async fn unavailable_session_errors() {
        let err = UnavailableRecognizer.start_session().await.err();
        assert!(matches!(err, Some(Error::Recognizer(_))));
    }
}
