//! Audio playback to speakers

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// Sample rate of the always-attached output node (matches the wire format)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Speaker sink
///
/// Two logical lanes feed one output: assistant voice, which can be flushed
/// on barge-in, and local effects (metronome clicks, timer alerts), which
/// cannot.
pub trait AudioOutput: Send + Sync {
    /// Attach the output node
    ///
    /// # Errors
    ///
    /// Returns `Error::AudioSession` if the output device cannot be opened
    fn start(&self) -> Result<()>;

    /// Queue mono samples at [`PLAYBACK_SAMPLE_RATE`] behind any queued voice
    fn enqueue(&self, samples: Vec<f32>);

    /// Drop all queued voice audio immediately
    fn flush(&self);

    /// Mix a short effect into the output
    fn play_effect(&self, samples: Vec<f32>);

    /// Detach the output node
    fn stop(&self);
}

#[derive(Default)]
struct Lanes {
    voice: VecDeque<f32>,
    effects: VecDeque<f32>,
}

/// Mixer shared between the producer side and the output callback
#[derive(Default)]
pub struct PlaybackQueue {
    lanes: Mutex<Lanes>,
}

impl PlaybackQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append voice samples
    pub fn push_voice(&self, samples: &[f32]) {
        if let Ok(mut lanes) = self.lanes.lock() {
            lanes.voice.extend(samples.iter().copied());
        }
    }

    /// Append effect samples
    ///
    /// Effects start immediately and overlay anything already playing.
    pub fn push_effect(&self, samples: &[f32]) {
        if let Ok(mut lanes) = self.lanes.lock() {
            let overlap = lanes.effects.len().min(samples.len());
            for (slot, sample) in lanes.effects.iter_mut().zip(samples) {
                *slot += sample;
            }
            lanes.effects.extend(samples[overlap..].iter().copied());
        }
    }

    /// Clear the voice lane
    pub fn flush_voice(&self) {
        if let Ok(mut lanes) = self.lanes.lock() {
            lanes.voice.clear();
        }
    }

    /// Clear both lanes
    pub fn clear(&self) {
        if let Ok(mut lanes) = self.lanes.lock() {
            lanes.voice.clear();
            lanes.effects.clear();
        }
    }

    /// Queued voice samples
    #[must_use]
    pub fn voice_len(&self) -> usize {
        self.lanes.lock().map(|l| l.voice.len()).unwrap_or_default()
    }

    /// Queued effect samples
    #[must_use]
    pub fn effects_len(&self) -> usize {
        self.lanes.lock().map(|l| l.effects.len()).unwrap_or_default()
    }

    /// Fill an interleaved output buffer, padding with silence
    pub fn fill(&self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let Ok(mut lanes) = self.lanes.lock() else {
            out.fill(0.0);
            return;
        };
        for frame in out.chunks_mut(channels) {
            let voice = lanes.voice.pop_front().unwrap_or(0.0);
            let effect = lanes.effects.pop_front().unwrap_or(0.0);
            let sample = (voice + effect).clamp(-1.0, 1.0);
            frame.fill(sample);
        }
    }
}

struct OutputThread {
    stop_tx: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Plays audio to the default output device
pub struct CpalSpeaker {
    queue: Arc<PlaybackQueue>,
    thread: Mutex<Option<OutputThread>>,
}

impl CpalSpeaker {
    /// Create a detached speaker
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Arc::new(PlaybackQueue::new()),
            thread: Mutex::new(None),
        }
    }

    /// Shared mixer backing this speaker
    #[must_use]
    pub fn queue(&self) -> Arc<PlaybackQueue> {
        Arc::clone(&self.queue)
    }
}

impl Default for CpalSpeaker {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for CpalSpeaker {
    fn start(&self) -> Result<()> {
        let mut slot = self
            .thread
            .lock()
            .map_err(|_| Error::AudioSession("speaker state poisoned".to_string()))?;
        if slot.is_some() {
            return Ok(());
        }

        let queue = Arc::clone(&self.queue);
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("coach-playback".to_string())
            .spawn(move || {
                let stream = match open_output_stream(queue) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio playback stopped");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *slot = Some(OutputThread { stop_tx, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::AudioSession("playback thread exited".to_string()))
            }
        }
    }

    fn enqueue(&self, samples: Vec<f32>) {
        self.queue.push_voice(&samples);
    }

    fn flush(&self) {
        self.queue.flush_voice();
    }

    fn play_effect(&self, samples: Vec<f32>) {
        self.queue.push_effect(&samples);
    }

    fn stop(&self) {
        let thread = self.thread.lock().ok().and_then(|mut slot| slot.take());
        if let Some(OutputThread { stop_tx, handle }) = thread {
            let _ = stop_tx.send(());
            let _ = handle.join();
        }
        self.queue.clear();
    }
}

fn open_output_stream(queue: Arc<PlaybackQueue>) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioSession("no output device available".to_string()))?;

    let rate = SampleRate(PLAYBACK_SAMPLE_RATE);
    let supports = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels
                && c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        })
    };

    // Mono preferred, stereo fallback
    let supported = supports(1)
        .or_else(|| supports(2))
        .ok_or_else(|| Error::AudioSession("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported.with_sample_rate(rate).config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = PLAYBACK_SAMPLE_RATE,
        channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                queue.fill(data, channels);
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::AudioSession(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::AudioSession(e.to_string()))?;
    Ok(stream)
}
