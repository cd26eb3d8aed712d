//! Audio capture from microphone

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};

use super::AudioChunk;
use crate::{Error, Result};

/// Callback receiving every captured buffer
///
/// Invoked on the hardware audio thread; must not block.
pub type BufferCallback = Box<dyn FnMut(AudioChunk) + Send + 'static>;

/// Microphone source
pub trait AudioInput: Send {
    /// Begin continuous capture, delivering each buffer to `on_buffer`
    ///
    /// # Errors
    ///
    /// Returns `Error::Permission` if microphone access was refused and
    /// `Error::AudioSession` if the device cannot be configured
    fn start(&mut self, on_buffer: BufferCallback) -> Result<()>;

    /// Release the capture tap; safe to call when not capturing
    fn stop(&mut self);
}

/// Captures audio from the default input device
///
/// The cpal stream is not `Send` on every platform, so it lives on a
/// dedicated thread for the duration of the capture.
#[derive(Default)]
pub struct CpalMicrophone {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalMicrophone {
    /// Create an idle microphone; the device is opened on `start`
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stop_tx: None,
            thread: None,
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }
}

impl AudioInput for CpalMicrophone {
    fn start(&mut self, on_buffer: BufferCallback) -> Result<()> {
        if self.is_capturing() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("coach-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(on_buffer) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Hold the stream until told to stop (or the sender is dropped)
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.thread = Some(thread);
                tracing::debug!("audio capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::AudioSession("capture thread exited".to_string()))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_input_stream(mut on_buffer: BufferCallback) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::AudioSession("no input device available".to_string()))?;

    let supported = device.default_input_config().map_err(|e| classify(&e))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        format = ?sample_format,
        "audio capture initialized"
    );

    let on_error = |err: cpal::StreamError| {
        tracing::error!(error = %err, "audio capture error");
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                on_buffer(AudioChunk::new(data.to_vec(), sample_rate, channels));
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples = data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                on_buffer(AudioChunk::new(samples, sample_rate, channels));
            },
            on_error,
            None,
        ),
        other => {
            return Err(Error::AudioSession(format!(
                "unsupported capture sample format {other:?}"
            )));
        }
    }
    .map_err(|e| classify(&e))?;

    stream.play().map_err(|e| classify(&e))?;
    Ok(stream)
}

/// Map a backend error to the permission/session taxonomy
fn classify(err: &dyn std::fmt::Display) -> Error {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        Error::Permission(format!("microphone: {message}"))
    } else {
        Error::AudioSession(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_permission_errors() {
        assert!(matches!(
            classify(&"Access denied by the system"),
            Error::Permission(_)
        ));
        assert!(matches!(
            classify(&"device busy"),
            Error::AudioSession(_)
        ));
    }

    #[test]
    fn stop_is_idempotent_when_idle() {
        let mut mic = CpalMicrophone::new();
        mic.stop();
        mic.stop();
        assert!(!mic.is_capturing());
    }
}
