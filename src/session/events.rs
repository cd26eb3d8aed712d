//! Observable session events for presentation layers

use super::state::{ScenarioState, StreamingStatus};
use crate::protocol::{ConnectionState, Role};
use crate::tools::ToolEvent;
use crate::voice::ActivationState;

/// Something a front end may want to render
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(StreamingStatus),
    Connection(ConnectionState),
    Activation(ActivationState),
    Scenario(ScenarioState),
    /// Current text of a transcript line
    Transcript {
        role: Role,
        text: String,
        partial: bool,
    },
    /// Assistant finished its turn
    TranscriptDone,
    /// Assistant playback was cut off
    Interrupted,
    SceneObservation(String),
    Tool(ToolEvent),
    /// User-facing error message
    Error(String),
}
