//! Locally executed tools
//!
//! The service drives a metronome, named countdown timers and on-screen
//! cards. [`ToolDispatcher`] owns all three and reports changes as
//! [`ToolEvent`]s.

mod cards;
mod command;
mod dispatcher;
mod effects;
mod metronome;
mod timer;

pub use cards::{Card, CardDeck};
pub use command::{
    BPM_RANGE, CardKind, DEFAULT_BPM, DEFAULT_TIMER_LABEL, DEFAULT_TIMER_SECONDS, ToolCommand,
};
pub use dispatcher::ToolDispatcher;
pub use effects::{EffectSink, ToneEffects, click, tone};
pub use metronome::{Metronome, MetronomeState};
pub use timer::{TimerBoard, TimerEntry};

/// Observable tool state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolEvent {
    MetronomeStarted { bpm: u32 },
    MetronomeStopped,
    TimerStarted { label: String, seconds: u64 },
    TimerTick { label: String, remaining: u64 },
    TimerFired { label: String },
    TimerStopped { label: String },
    /// Full card list after a change
    CardsChanged(Vec<Card>),
}
