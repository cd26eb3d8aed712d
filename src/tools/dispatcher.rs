//! Executes tool commands

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use super::cards::{Card, CardDeck};
use super::command::ToolCommand;
use super::effects::EffectSink;
use super::metronome::{Metronome, MetronomeState};
use super::timer::{TimerBoard, TimerEntry};
use super::ToolEvent;

/// Channel capacity for tool events
const CHANNEL_CAPACITY: usize = 128;

/// Sole owner of the metronome, the timers and the card deck
pub struct ToolDispatcher {
    metronome: Metronome,
    timers: TimerBoard,
    cards: CardDeck,
    events: broadcast::Sender<ToolEvent>,
}

impl ToolDispatcher {
    /// Create an idle dispatcher playing effects through `effects`
    #[must_use]
    pub fn new(effects: Arc<dyn EffectSink>) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            metronome: Metronome::new(Arc::clone(&effects)),
            timers: TimerBoard::new(effects, events.clone()),
            cards: CardDeck::new(),
            events,
        }
    }

    /// Subscribe to tool events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ToolEvent> {
        self.events.subscribe()
    }

    /// Decode and execute a `tool` message
    ///
    /// Returns the executed command, or `None` if the tool is unknown.
    pub fn handle(&mut self, name: &str, params: &Value) -> Option<ToolCommand> {
        let command = ToolCommand::from_wire(name, params)?;
        self.execute(command.clone());
        Some(command)
    }

    /// Execute a command
    ///
    /// Must be called inside a Tokio runtime.
    pub fn execute(&mut self, command: ToolCommand) {
        tracing::debug!(tool = command.name(), "executing tool");
        match command {
            ToolCommand::StartMetronome { bpm } => {
                self.metronome.start(bpm);
                self.emit(ToolEvent::MetronomeStarted { bpm });
            }
            ToolCommand::StopMetronome => {
                if self.metronome.stop() {
                    self.emit(ToolEvent::MetronomeStopped);
                }
            }
            ToolCommand::StartTimer { label, seconds } => {
                self.timers.start(&label, seconds);
                self.emit(ToolEvent::TimerStarted { label, seconds });
            }
            ToolCommand::StopTimer { label } => {
                if self.timers.stop(&label) {
                    self.emit(ToolEvent::TimerStopped { label });
                }
            }
            ToolCommand::ShowCard { kind, title, items } => {
                let id = self.cards.push(kind, title, items);
                tracing::info!(card = id, kind = ?kind, "card shown");
                self.emit_cards();
            }
        }
    }

    /// Dismiss a card by id; returns false if no such card
    pub fn dismiss_card(&mut self, id: u64) -> bool {
        let dismissed = self.cards.dismiss(id);
        if dismissed {
            self.emit_cards();
        }
        dismissed
    }

    /// Cancel the metronome and every timer and clear all cards
    ///
    /// No tool side effect fires after this returns.
    pub fn stop_all(&mut self) {
        if self.metronome.stop() {
            self.emit(ToolEvent::MetronomeStopped);
        }
        for label in self.timers.stop_all() {
            self.emit(ToolEvent::TimerStopped { label });
        }
        if !self.cards.is_empty() {
            self.cards.clear();
            self.emit_cards();
        }
        tracing::debug!("all tools stopped");
    }

    /// Metronome snapshot
    #[must_use]
    pub fn metronome(&self) -> MetronomeState {
        self.metronome.state()
    }

    /// Active timers sorted by label
    #[must_use]
    pub fn timers(&self) -> Vec<TimerEntry> {
        self.timers.entries()
    }

    /// Seconds left on a timer
    #[must_use]
    pub fn timer_remaining(&self, label: &str) -> Option<u64> {
        self.timers.remaining(label)
    }

    /// Active cards in display order
    #[must_use]
    pub fn cards(&self) -> &[Card] {
        self.cards.cards()
    }

    fn emit(&self, event: ToolEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_cards(&self) {
        self.emit(ToolEvent::CardsChanged(self.cards.cards().to_vec()));
    }
}
