//! First Aid Coach - hands-free emergency coaching client
//!
//! Streams microphone audio and camera frames to a realtime coaching service
//! and plays back its voice, while running the timing-critical tools it asks
//! for (a CPR metronome, countdown timers, on-screen cards) locally.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 SessionOrchestrator                  │
//! │  lifecycle │ scenario │ transcript │ recorder        │
//! └──────┬──────────────┬──────────────────┬─────────────┘
//!        │              │                  │
//! ┌──────▼───────┐ ┌────▼───────────┐ ┌────▼────────────┐
//! │ AudioPipeline│ │ ProtocolClient │ │ ToolDispatcher  │
//! │ capture/play │ │ ws duplex link │ │ metronome/timer │
//! └──────┬───────┘ └────────────────┘ └─────────────────┘
//!        │
//! ┌──────▼───────────────────────┐
//! │ Wake word gate + recognizer  │
//! └──────────────────────────────┘
//! ```
//!
//! Outbound audio only flows while the activation gate is open. The gate
//! opens on a wake phrase, a manual trigger, or an emergency scenario, and
//! closes after a period of silence.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod tools;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{
    Devices, ScenarioState, SessionEvent, SessionHandle, SessionOrchestrator, StreamingStatus,
};
