//! Named countdown timers

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use super::ToolEvent;
use super::effects::EffectSink;

struct TimerSlot {
    generation: u64,
    seconds: u64,
    remaining: u64,
    handle: JoinHandle<()>,
}

type Slots = Arc<Mutex<HashMap<String, TimerSlot>>>;

/// Snapshot of one active timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEntry {
    pub label: String,
    pub seconds: u64,
    pub remaining: u64,
}

/// Countdown timers keyed by label
///
/// At most one timer per label. A timer's task only touches its own slot,
/// and only while the slot still carries the task's generation.
pub struct TimerBoard {
    slots: Slots,
    next_generation: u64,
    effects: Arc<dyn EffectSink>,
    events: broadcast::Sender<ToolEvent>,
}

impl TimerBoard {
    /// Create an empty board
    #[must_use]
    pub fn new(effects: Arc<dyn EffectSink>, events: broadcast::Sender<ToolEvent>) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: 0,
            effects,
            events,
        }
    }

    /// Start a countdown, replacing any timer with the same label
    pub fn start(&mut self, label: &str, seconds: u64) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let Some(mut slots) = lock(&self.slots) else {
            return;
        };
        if let Some(previous) = slots.remove(label) {
            previous.handle.abort();
            tracing::info!(label, "timer replaced");
        }

        let handle = tokio::spawn(countdown(
            Arc::clone(&self.slots),
            label.to_string(),
            generation,
            seconds,
            Arc::clone(&self.effects),
            self.events.clone(),
        ));

        slots.insert(
            label.to_string(),
            TimerSlot {
                generation,
                seconds,
                remaining: seconds,
                handle,
            },
        );
        tracing::info!(label, seconds, "timer started");
    }

    /// Cancel a timer; returns false if no timer had that label
    pub fn stop(&mut self, label: &str) -> bool {
        let removed = lock(&self.slots).and_then(|mut slots| slots.remove(label));
        match removed {
            Some(slot) => {
                slot.handle.abort();
                tracing::info!(label, "timer stopped");
                true
            }
            None => false,
        }
    }

    /// Cancel every timer, returning the labels that were active
    pub fn stop_all(&mut self) -> Vec<String> {
        let Some(mut slots) = lock(&self.slots) else {
            return Vec::new();
        };
        let mut labels = Vec::with_capacity(slots.len());
        for (label, slot) in slots.drain() {
            slot.handle.abort();
            labels.push(label);
        }
        labels.sort();
        labels
    }

    /// Seconds left on a timer
    #[must_use]
    pub fn remaining(&self, label: &str) -> Option<u64> {
        lock(&self.slots).and_then(|slots| slots.get(label).map(|s| s.remaining))
    }

    /// Active timers sorted by label
    #[must_use]
    pub fn entries(&self) -> Vec<TimerEntry> {
        let Some(slots) = lock(&self.slots) else {
            return Vec::new();
        };
        let mut entries: Vec<TimerEntry> = slots
            .iter()
            .map(|(label, slot)| TimerEntry {
                label: label.clone(),
                seconds: slot.seconds,
                remaining: slot.remaining,
            })
            .collect();
        entries.sort_by(|a, b| a.label.cmp(&b.label));
        entries
    }

    /// Number of active timers
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.slots).map_or(0, |slots| slots.len())
    }

    /// Whether no timer is active
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TimerBoard {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn lock(slots: &Slots) -> Option<MutexGuard<'_, HashMap<String, TimerSlot>>> {
    match slots.lock() {
        Ok(guard) => Some(guard),
        Err(_) => {
            tracing::error!("timer state poisoned");
            None
        }
    }
}

async fn countdown(
    slots: Slots,
    label: String,
    generation: u64,
    seconds: u64,
    effects: Arc<dyn EffectSink>,
    events: broadcast::Sender<ToolEvent>,
) {
    let origin = Instant::now();

    for elapsed in 1..=seconds {
        sleep_until(origin + Duration::from_secs(elapsed)).await;
        let remaining = seconds - elapsed;

        let Some(mut guard) = lock(&slots) else { return };
        let Some(slot) = guard
            .get_mut(&label)
            .filter(|slot| slot.generation == generation)
        else {
            return;
        };

        if remaining > 0 {
            slot.remaining = remaining;
            let _ = events.send(ToolEvent::TimerTick {
                label: label.clone(),
                remaining,
            });
            continue;
        }

        // Alert under the lock so stop/stop_all cannot race the expiry
        guard.remove(&label);
        tracing::info!(label = %label, "timer finished");
        effects.timer_alert(&label);
        let _ = events.send(ToolEvent::TimerFired {
            label: label.clone(),
        });
        return;
    }
}
