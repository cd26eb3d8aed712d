//! Bridges hardware audio to the gate, the uplink and the speaker

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use super::capture::AudioInput;
use super::convert::{WireEncoder, pcm16_to_f32};
use super::gate::GateHandle;
use super::playback::AudioOutput;
use super::AudioChunk;
use crate::Result;

/// Captured buffers waiting for wire encoding
const UPLINK_CAPACITY: usize = 64;

/// Consumers attached to a capture run
pub struct CaptureWiring {
    /// Activation gate; its flag decides what reaches `on_chunk`
    pub gate: GateHandle,
    /// Every captured buffer goes here
    pub wake_tx: mpsc::Sender<AudioChunk>,
    /// Receives wire-format audio (mono PCM16, 24 kHz) while active
    pub on_chunk: Box<dyn FnMut(Vec<u8>) + Send + 'static>,
}

/// Cloneable handle for code that only plays sounds
#[derive(Clone)]
pub struct PlaybackSink(Arc<dyn AudioOutput>);

impl PlaybackSink {
    #[must_use]
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self(output)
    }

    /// Queue PCM16 assistant audio
    pub fn enqueue_pcm16(&self, pcm: &[u8]) {
        let samples = pcm16_to_f32(pcm);
        if !samples.is_empty() {
            self.0.enqueue(samples);
        }
    }

    /// Mix an effect into the output
    pub fn play_effect(&self, samples: Vec<f32>) {
        self.0.play_effect(samples);
    }

    /// Flush queued assistant audio
    pub fn flush(&self) {
        self.0.flush();
    }
}

/// Owns the microphone tap and the always-attached output
pub struct AudioPipeline {
    input: Box<dyn AudioInput>,
    output: Arc<dyn AudioOutput>,
    uplink: Option<JoinHandle<()>>,
    gate: Option<GateHandle>,
}

impl AudioPipeline {
    /// Create a pipeline over the given devices
    #[must_use]
    pub fn new(input: Box<dyn AudioInput>, output: Arc<dyn AudioOutput>) -> Self {
        Self {
            input,
            output,
            uplink: None,
            gate: None,
        }
    }

    /// Attach the output node
    ///
    /// # Errors
    ///
    /// Returns `Error::AudioSession` if the output device cannot be opened
    pub fn start_output(&self) -> Result<()> {
        self.output.start()
    }

    /// Detach the output node
    pub fn stop_output(&self) {
        self.output.stop();
    }

    /// Begin continuous capture
    ///
    /// Must be called inside a Tokio runtime; the wire encoder runs as a task
    /// so the capture callback never blocks on conversion.
    ///
    /// # Errors
    ///
    /// Returns `Error::Permission` or `Error::AudioSession` from the input
    pub fn capture_start(&mut self, wiring: CaptureWiring) -> Result<()> {
        if self.is_capturing() {
            return Ok(());
        }

        let CaptureWiring {
            gate,
            wake_tx,
            mut on_chunk,
        } = wiring;

        let (uplink_tx, mut uplink_rx) = mpsc::channel::<AudioChunk>(UPLINK_CAPACITY);
        let uplink = tokio::spawn(async move {
            let mut encoder = WireEncoder::new();
            while let Some(chunk) = uplink_rx.recv().await {
                match encoder.encode(&chunk) {
                    Ok(bytes) if !bytes.is_empty() => on_chunk(bytes),
                    Ok(_) => {}
                    Err(e) => tracing::debug!(error = %e, "dropping unencodable buffer"),
                }
            }
        });

        let flag = gate.flag();
        let callback = move |chunk: AudioChunk| {
            let forward = flag.is_active().then(|| chunk.clone());
            if let Err(TrySendError::Full(_)) = wake_tx.try_send(chunk) {
                tracing::trace!("wake word consumer behind, buffer dropped");
            }
            if let Some(chunk) = forward
                && let Err(TrySendError::Full(_)) = uplink_tx.try_send(chunk)
            {
                tracing::debug!("uplink behind, buffer dropped");
            }
        };

        if let Err(e) = self.input.start(Box::new(callback)) {
            uplink.abort();
            return Err(e);
        }

        self.uplink = Some(uplink);
        self.gate = Some(gate);
        tracing::info!("audio capture started");
        Ok(())
    }

    /// Release the capture tap and close the gate; idempotent
    pub fn capture_stop(&mut self) {
        self.input.stop();
        if let Some(uplink) = self.uplink.take() {
            uplink.abort();
            tracing::info!("audio capture stopped");
        }
        if let Some(gate) = self.gate.take() {
            gate.deactivate();
        }
    }

    /// Whether capture is running
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.uplink.is_some()
    }

    /// Queue inbound PCM16 for playback behind anything already queued
    pub fn playback(&self, pcm: &[u8]) {
        let samples = pcm16_to_f32(pcm);
        if !samples.is_empty() {
            self.output.enqueue(samples);
        }
    }

    /// Flush all queued assistant audio (barge-in)
    pub fn stop_playback(&self) {
        self.output.flush();
        tracing::debug!("playback flushed");
    }

    /// Handle for effect playback
    #[must_use]
    pub fn sink(&self) -> PlaybackSink {
        PlaybackSink(Arc::clone(&self.output))
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.capture_stop();
    }
}
