//! Metronome
//!
//! Beats are scheduled against a fixed origin (`origin + n * period`) so
//! timer jitter on one beat never shifts the next.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use super::effects::EffectSink;

/// Snapshot of the metronome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetronomeState {
    pub bpm: u32,
    pub is_active: bool,
}

struct Run {
    bpm: u32,
    task: JoinHandle<()>,
}

/// Single periodic pulse
pub struct Metronome {
    effects: Arc<dyn EffectSink>,
    /// Generation allowed to click; bumped on every stop
    generation: Arc<Mutex<u64>>,
    run: Option<Run>,
}

impl Metronome {
    /// Create a stopped metronome
    #[must_use]
    pub fn new(effects: Arc<dyn EffectSink>) -> Self {
        Self {
            effects,
            generation: Arc::new(Mutex::new(0)),
            run: None,
        }
    }

    /// Start pulsing at `bpm`, replacing any running schedule
    ///
    /// The first pulse plays immediately.
    pub fn start(&mut self, bpm: u32) {
        self.stop();

        let bpm = bpm.max(1);
        let Ok(generation) = self.generation.lock().map(|g| *g) else {
            tracing::error!("metronome state poisoned");
            return;
        };

        let effects = Arc::clone(&self.effects);
        let current = Arc::clone(&self.generation);
        let beat_secs = 60.0 / f64::from(bpm);

        let task = tokio::spawn(async move {
            let origin = Instant::now();
            let mut beat: u64 = 0;
            loop {
                #[allow(clippy::cast_precision_loss)]
                let offset = Duration::from_secs_f64(beat as f64 * beat_secs);
                sleep_until(origin + offset).await;

                // Click under the lock so a concurrent stop cannot interleave
                let Ok(guard) = current.lock() else { return };
                if *guard != generation {
                    return;
                }
                effects.metronome_click(beat);
                drop(guard);

                beat += 1;
            }
        });

        tracing::info!(bpm, "metronome started");
        self.run = Some(Run { bpm, task });
    }

    /// Cancel the schedule; returns false if none was running
    ///
    /// No pulse fires after this returns.
    pub fn stop(&mut self) -> bool {
        let Some(run) = self.run.take() else {
            return false;
        };
        if let Ok(mut generation) = self.generation.lock() {
            *generation += 1;
        }
        run.task.abort();
        tracing::info!(bpm = run.bpm, "metronome stopped");
        true
    }

    /// Current snapshot
    #[must_use]
    pub fn state(&self) -> MetronomeState {
        self.run.as_ref().map_or_else(MetronomeState::default, |run| MetronomeState {
            bpm: run.bpm,
            is_active: true,
        })
    }
}

impl Drop for Metronome {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counter(AtomicU64);

    impl EffectSink for Counter {
        fn metronome_click(&self, _beat: u64) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn timer_alert(&self, _label: &str) {}
    }

    #[tokio::test(start_paused = true)]
    async fn first_pulse_is_immediate() {
        let counter = Arc::new(Counter::default());
        let mut metronome = Metronome::new(counter.clone());
        metronome.start(60);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_schedule() {
        let counter = Arc::new(Counter::default());
        let mut metronome = Metronome::new(counter.clone());
        metronome.start(60);
        tokio::time::sleep(Duration::from_millis(10)).await;
        metronome.start(120);
        assert_eq!(metronome.state(), MetronomeState { bpm: 120, is_active: true });

        // One pulse from the first run, then 120 bpm from the restart
        tokio::time::sleep(Duration::from_millis(2990)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1 + 6);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let counter = Arc::new(Counter::default());
        let mut metronome = Metronome::new(counter.clone());
        assert!(!metronome.stop());
        metronome.start(100);
        assert!(metronome.stop());
        assert!(!metronome.stop());
        assert!(!metronome.state().is_active);
    }
}
