//! Audible feedback for tools

use std::f32::consts::TAU;

use crate::voice::{PLAYBACK_SAMPLE_RATE, PlaybackSink};

/// Side effects produced by scheduled tools
pub trait EffectSink: Send + Sync {
    /// One metronome pulse; `beat` counts from zero per run
    fn metronome_click(&self, beat: u64);

    /// A countdown reached zero
    fn timer_alert(&self, label: &str);
}

/// Synthesized tones played through the effect lane of the speaker
pub struct ToneEffects {
    sink: PlaybackSink,
    click: Vec<f32>,
    alert: Vec<f32>,
}

impl ToneEffects {
    /// Precompute the click and alert tones
    #[must_use]
    pub fn new(sink: PlaybackSink) -> Self {
        let mut alert = tone(880.0, 0.15, 0.5);
        alert.extend(tone(660.0, 0.15, 0.5));
        alert.extend(alert.clone());
        Self {
            sink,
            click: click(),
            alert,
        }
    }
}

impl EffectSink for ToneEffects {
    fn metronome_click(&self, _beat: u64) {
        self.sink.play_effect(self.click.clone());
    }

    fn timer_alert(&self, label: &str) {
        tracing::debug!(label, "playing timer alert");
        self.sink.play_effect(self.alert.clone());
    }
}

/// Short decaying 1 kHz pulse
#[must_use]
pub fn click() -> Vec<f32> {
    #[allow(clippy::cast_precision_loss)]
    let rate = PLAYBACK_SAMPLE_RATE as f32;
    let len = PLAYBACK_SAMPLE_RATE as usize * 30 / 1000;
    (0..len)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f32 / rate;
            (TAU * 1000.0 * t).sin() * (-t * 150.0).exp() * 0.8
        })
        .collect()
}

/// Sine tone with a short fade at both ends
#[must_use]
pub fn tone(frequency: f32, seconds: f32, amplitude: f32) -> Vec<f32> {
    #[allow(clippy::cast_precision_loss)]
    let rate = PLAYBACK_SAMPLE_RATE as f32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let len = (rate * seconds.max(0.0)) as usize;
    let fade = (len / 20).max(1);
    (0..len)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f32 / rate;
            #[allow(clippy::cast_precision_loss)]
            let envelope = (i.min(len - 1 - i).min(fade) as f32) / fade as f32;
            (TAU * frequency * t).sin() * amplitude * envelope
        })
        .collect()
}
