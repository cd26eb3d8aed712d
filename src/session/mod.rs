//! Streaming session
//!
//! [`SessionOrchestrator`] wires the audio pipeline, the activation gate,
//! the realtime connection, the camera, the tools and the recorder into one
//! lifecycle: `Stopped -> Waiting -> Streaming -> Stopped`.

mod devices;
mod events;
mod orchestrator;
mod recorder;
mod state;
mod transcript;

pub use devices::{
    DeviceKind, FileFrameSource, FrameSource, GrantedPermissions, NoCamera, PermissionProvider,
    VideoFrame,
};
pub use events::SessionEvent;
pub use orchestrator::{Devices, SessionHandle, SessionOrchestrator};
pub use recorder::{FileRecorder, RecorderHandle, RecordingHandle, SessionRecorder};
pub use state::{Scenario, ScenarioState, Severity, StreamingStatus};
pub use transcript::{TranscriptEntry, TranscriptLog};
