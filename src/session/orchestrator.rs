//! Streaming session lifecycle
//!
//! One task owns every session component and processes commands, inbound
//! server events, activation changes and tool events strictly in order.
//! Front ends talk to it through a [`SessionHandle`].

use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::devices::{DeviceKind, FrameSource, GrantedPermissions, NoCamera, PermissionProvider};
use super::events::SessionEvent;
use super::recorder::{FileRecorder, RecorderHandle, RecordingHandle, SessionRecorder};
use super::state::{ScenarioState, StreamingStatus};
use super::transcript::TranscriptLog;
use crate::config::Config;
use crate::protocol::{ConnectionState, OutboundSender, ProtocolClient, Role, ServerEvent};
use crate::tools::{EffectSink, ToneEffects, ToolDispatcher, ToolEvent};
use crate::voice::{
    ActivationState, AudioInput, AudioOutput, AudioPipeline, CaptureWiring, CpalMicrophone,
    CpalSpeaker, GateHandle, HttpRecognizer, SpeechRecognizer, spawn_gate,
};
use crate::{Error, Result};

/// Capacity of the session event broadcast
const EVENT_CAPACITY: usize = 256;

/// Everything a session needs from the outside world
pub struct Devices {
    pub microphone: Box<dyn AudioInput>,
    pub speaker: Arc<dyn AudioOutput>,
    pub camera: Arc<dyn FrameSource>,
    pub permissions: Arc<dyn PermissionProvider>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub recorder: Box<dyn SessionRecorder>,
    /// Tool sounds; defaults to tones on the speaker
    pub effects: Option<Arc<dyn EffectSink>>,
}

impl Devices {
    /// Default audio devices, no camera, HTTP recognition and file recording
    #[must_use]
    pub fn system(config: &Config) -> Self {
        Self {
            microphone: Box::new(CpalMicrophone::new()),
            speaker: Arc::new(CpalSpeaker::new()),
            camera: Arc::new(NoCamera),
            permissions: Arc::new(GrantedPermissions),
            recognizer: Arc::new(HttpRecognizer::new(
                &config.recognizer,
                config.voice.recognizer_session_limit,
            )),
            recorder: Box::new(FileRecorder::new(&config.session.session_dir)),
            effects: None,
        }
    }
}

enum Command {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<Option<RecordingHandle>>),
    DismissCard(u64, oneshot::Sender<bool>),
    SetAlwaysActive(bool),
    TriggerActivation,
    Shutdown,
}

/// Handle to a running session actor
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<StreamingStatus>,
    scenario: watch::Receiver<ScenarioState>,
    activation: watch::Receiver<ActivationState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Start streaming
    ///
    /// # Errors
    ///
    /// Returns the first setup failure; everything acquired so far is
    /// released and the session is back to `Stopped`.
    pub async fn start(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start(reply))?;
        rx.await.map_err(|_| actor_gone())?
    }

    /// Stop streaming; a no-op when already stopped
    ///
    /// Returns the exported recording, if one was made.
    ///
    /// # Errors
    ///
    /// Returns error if the session actor has exited
    pub async fn stop(&self) -> Result<Option<RecordingHandle>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop(reply))?;
        rx.await.map_err(|_| actor_gone())
    }

    /// Dismiss an on-screen card
    ///
    /// # Errors
    ///
    /// Returns error if the session actor has exited
    pub async fn dismiss_card(&self, id: u64) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::DismissCard(id, reply))?;
        rx.await.map_err(|_| actor_gone())
    }

    /// Hold the activation gate open, or release the hold
    ///
    /// # Errors
    ///
    /// Returns error if the session actor has exited
    pub fn set_always_active(&self, on: bool) -> Result<()> {
        self.send(Command::SetAlwaysActive(on))
    }

    /// Open the activation gate as if the wake phrase was heard
    ///
    /// # Errors
    ///
    /// Returns error if the session actor has exited
    pub fn trigger_activation(&self) -> Result<()> {
        self.send(Command::TriggerActivation)
    }

    /// Stop the actor after tearing down any running session
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    #[must_use]
    pub fn status(&self) -> StreamingStatus {
        *self.status.borrow()
    }

    #[must_use]
    pub fn scenario(&self) -> ScenarioState {
        self.scenario.borrow().clone()
    }

    #[must_use]
    pub fn activation(&self) -> ActivationState {
        *self.activation.borrow()
    }

    /// Watch the streaming status
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<StreamingStatus> {
        self.status.clone()
    }

    /// Watch the scenario
    #[must_use]
    pub fn watch_scenario(&self) -> watch::Receiver<ScenarioState> {
        self.scenario.clone()
    }

    /// Watch the activation state
    #[must_use]
    pub fn watch_activation(&self) -> watch::Receiver<ActivationState> {
        self.activation.clone()
    }

    /// Subscribe to session events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| actor_gone())
    }
}

/// Run a device open or close that waits on its audio thread
///
/// On a multi-thread runtime the worker hands its other tasks off while this
/// blocks. A current-thread runtime cannot do that, so the call runs inline.
fn device_call<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn actor_gone() -> Error {
    Error::InvalidState("session actor has stopped".to_string())
}

/// Spawns the session actor
pub struct SessionOrchestrator;

impl SessionOrchestrator {
    /// Spawn a stopped session over `devices`
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the recorder thread cannot be started
    pub fn spawn(config: Config, devices: Devices) -> Result<SessionHandle> {
        let Devices {
            microphone,
            speaker,
            camera,
            permissions,
            recognizer,
            recorder,
            effects,
        } = devices;

        let pipeline = AudioPipeline::new(microphone, speaker);
        let effects: Arc<dyn EffectSink> =
            effects.unwrap_or_else(|| Arc::new(ToneEffects::new(pipeline.sink())));
        let tools = ToolDispatcher::new(effects);
        let tool_events = tools.subscribe();
        let client = ProtocolClient::new(config.session.keepalive_interval);
        let connection = client.subscribe();

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(StreamingStatus::Stopped);
        let (scenario, scenario_rx) = watch::channel(ScenarioState::default());
        let (activation, activation_rx) = watch::channel(ActivationState::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let actor = SessionActor {
            config,
            pipeline,
            camera,
            permissions,
            recognizer,
            recorder: RecorderHandle::spawn(recorder)?,
            recording: false,
            tools,
            client,
            gate: None,
            inbound: None,
            gate_state: None,
            frame_task: None,
            transcript: TranscriptLog::new(),
            user_override: false,
            emergency: false,
            status,
            scenario,
            activation,
            events: events.clone(),
        };
        tokio::spawn(actor.run(commands_rx, tool_events, connection));

        Ok(SessionHandle {
            commands: commands_tx,
            status: status_rx,
            scenario: scenario_rx,
            activation: activation_rx,
            events,
        })
    }
}

struct SessionActor {
    config: Config,
    pipeline: AudioPipeline,
    camera: Arc<dyn FrameSource>,
    permissions: Arc<dyn PermissionProvider>,
    recognizer: Arc<dyn SpeechRecognizer>,
    recorder: RecorderHandle,
    recording: bool,
    tools: ToolDispatcher,
    client: ProtocolClient,
    gate: Option<GateHandle>,
    inbound: Option<mpsc::Receiver<ServerEvent>>,
    gate_state: Option<watch::Receiver<ActivationState>>,
    frame_task: Option<JoinHandle<()>>,
    transcript: TranscriptLog,
    /// Hold requested through the handle
    user_override: bool,
    /// Hold forced by a moderate or critical scenario
    emergency: bool,
    status: watch::Sender<StreamingStatus>,
    scenario: watch::Sender<ScenarioState>,
    activation: watch::Sender<ActivationState>,
    events: broadcast::Sender<SessionEvent>,
}

async fn next_server_event(
    inbound: &mut Option<mpsc::Receiver<ServerEvent>>,
) -> Option<ServerEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_activation(
    gate_state: &mut Option<watch::Receiver<ActivationState>>,
) -> Option<ActivationState> {
    match gate_state {
        Some(rx) => {
            rx.changed().await.ok()?;
            Some(*rx.borrow_and_update())
        }
        None => std::future::pending().await,
    }
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut tool_events: broadcast::Receiver<ToolEvent>,
        mut connection: watch::Receiver<ConnectionState>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                event = next_server_event(&mut self.inbound) => match event {
                    Some(event) => self.handle_server_event(event).await,
                    None => self.inbound = None,
                },
                state = next_activation(&mut self.gate_state) => match state {
                    Some(state) => self.publish_activation(state),
                    None => self.gate_state = None,
                },
                event = tool_events.recv() => match event {
                    Ok(event) => self.emit(SessionEvent::Tool(event)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "tool events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Ok(()) = connection.changed() => {
                    let state = *connection.borrow_and_update();
                    self.emit(SessionEvent::Connection(state));
                }
            }
        }

        if *self.status.borrow() != StreamingStatus::Stopped {
            self.teardown().await;
            self.set_status(StreamingStatus::Stopped);
        }
        tracing::debug!("session actor stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let result = self.start().await;
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                let recording = self.stop().await;
                let _ = reply.send(recording);
            }
            Command::DismissCard(id, reply) => {
                let _ = reply.send(self.tools.dismiss_card(id));
            }
            Command::SetAlwaysActive(on) => {
                self.user_override = on;
                self.apply_override();
            }
            Command::TriggerActivation => match &self.gate {
                Some(gate) => gate.trigger(),
                None => tracing::debug!("not streaming, activation trigger ignored"),
            },
            Command::Shutdown => {}
        }
    }

    async fn start(&mut self) -> Result<()> {
        let current = *self.status.borrow();
        if current != StreamingStatus::Stopped {
            return Err(Error::InvalidState(format!("cannot start while {current}")));
        }

        tracing::info!(endpoint = %self.config.endpoint, "starting session");
        self.transcript = TranscriptLog::new();
        self.scenario.send_replace(ScenarioState::default());
        self.set_status(StreamingStatus::Waiting);

        match self.try_start().await {
            Ok(()) => {
                self.set_status(StreamingStatus::Streaming);
                tracing::info!("session streaming");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "session start failed");
                self.teardown().await;
                self.set_status(StreamingStatus::Stopped);
                self.emit(SessionEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn try_start(&mut self) -> Result<()> {
        if !self.permissions.request(DeviceKind::Microphone).await {
            return Err(Error::Permission("microphone access refused".to_string()));
        }
        if self.camera.needs_permission() && !self.permissions.request(DeviceKind::Camera).await {
            return Err(Error::Permission("camera access refused".to_string()));
        }

        device_call(|| self.pipeline.start_output())?;
        self.camera.open().await?;

        let inbound = self.client.connect(&self.config.endpoint).await?;
        self.inbound = Some(inbound);
        let outbound = self
            .client
            .sender()
            .ok_or_else(|| Error::Connection("connection closed during setup".to_string()))?;

        self.start_capture(outbound.clone())?;
        self.start_frame_sampler(outbound);

        match self.recorder.start().await {
            Ok(()) => self.recording = true,
            Err(e) => tracing::warn!(error = %e, "session recording unavailable"),
        }
        Ok(())
    }

    fn start_capture(&mut self, outbound: OutboundSender) -> Result<()> {
        let (gate, wake_tx) = spawn_gate(&self.config.voice, Arc::clone(&self.recognizer));
        self.gate_state = Some(gate.subscribe());
        self.gate = Some(gate.clone());
        self.apply_override();

        let recorder = self.recorder.clone();
        let on_chunk = move |pcm: Vec<u8>| {
            outbound.send_audio(&pcm);
            recorder.append_audio_data(pcm);
        };

        let wiring = CaptureWiring {
            gate,
            wake_tx,
            on_chunk: Box::new(on_chunk),
        };
        device_call(|| self.pipeline.capture_start(wiring))
    }

    fn start_frame_sampler(&mut self, outbound: OutboundSender) {
        let camera = Arc::clone(&self.camera);
        let recorder = self.recorder.clone();
        let period = self.config.session.frame_interval;

        self.frame_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Some(frame) = camera.latest_frame() {
                    tracing::trace!(bytes = frame.jpeg.len(), "frame sampled");
                    outbound.send_frame(&frame.jpeg);
                    recorder.append_video_frame(frame.jpeg);
                }
            }
        }));
    }

    async fn stop(&mut self) -> Option<RecordingHandle> {
        if *self.status.borrow() == StreamingStatus::Stopped {
            return None;
        }
        tracing::info!("stopping session");
        let recording = self.teardown().await;
        self.set_status(StreamingStatus::Stopped);
        recording
    }

    /// Release everything a session may hold; safe on partial setups
    async fn teardown(&mut self) -> Option<RecordingHandle> {
        if let Some(task) = self.frame_task.take() {
            task.abort();
        }
        device_call(|| {
            self.pipeline.capture_stop();
            self.pipeline.stop_output();
        });
        self.tools.stop_all();
        self.client.disconnect().await;
        self.inbound = None;
        self.camera.close().await;

        let recording = if std::mem::take(&mut self.recording) {
            match self.recorder.stop().await {
                Ok(handle) => {
                    tracing::info!(dir = %handle.directory.display(), "session exported");
                    Some(handle)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to export session");
                    None
                }
            }
        } else {
            None
        };

        if let Some(gate) = self.gate.take() {
            gate.shutdown();
        }
        self.gate_state = None;
        self.emergency = false;
        self.publish_activation(ActivationState::default());
        recording
    }

    async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Audio(pcm) => self.pipeline.playback(&pcm),
            ServerEvent::UserTranscript(text) => {
                self.recorder.log_user_transcript(&text);
                let entry = self.transcript.set_user(&text);
                let event = SessionEvent::Transcript {
                    role: Role::User,
                    text: entry.text.clone(),
                    partial: entry.is_partial,
                };
                self.emit(event);
            }
            ServerEvent::AssistantDelta(delta) => {
                self.recorder.log_agent_transcript(&delta, false);
                let entry = self.transcript.append_assistant(&delta);
                let event = SessionEvent::Transcript {
                    role: Role::Assistant,
                    text: entry.text.clone(),
                    partial: entry.is_partial,
                };
                self.emit(event);
            }
            ServerEvent::TranscriptDone => {
                self.recorder.log_agent_transcript("", true);
                self.transcript.complete();
                self.emit(SessionEvent::TranscriptDone);
            }
            ServerEvent::Interrupt => {
                tracing::debug!("assistant interrupted");
                self.pipeline.stop_playback();
                self.recorder.log_agent_transcript("", true);
                self.transcript.interrupt();
                self.emit(SessionEvent::Interrupted);
            }
            ServerEvent::Tool { name, params } => {
                self.recorder.log_tool_call(&name, &params);
                self.tools.handle(&name, &params);
            }
            ServerEvent::SceneObservation(text) => {
                tracing::debug!(observation = %text, "scene observation");
                self.recorder.log_scene_observation(&text);
                self.emit(SessionEvent::SceneObservation(text));
            }
            ServerEvent::Scenario(state) => self.apply_scenario(state),
            ServerEvent::Closed { error } => self.connection_lost(error).await,
        }
    }

    fn apply_scenario(&mut self, state: ScenarioState) {
        tracing::info!(
            scenario = %state.scenario,
            severity = %state.severity,
            body_region = %state.body_region,
            "scenario updated"
        );
        self.recorder.log_scenario_update(&state);
        if let Some(forced) = state.activation_override() {
            self.emergency = forced;
            self.apply_override();
        }
        self.scenario.send_replace(state.clone());
        self.emit(SessionEvent::Scenario(state));
    }

    async fn connection_lost(&mut self, error: Option<String>) {
        self.inbound = None;
        if *self.status.borrow() != StreamingStatus::Streaming {
            return;
        }
        let message = match error {
            Some(e) => format!("connection lost: {e}"),
            None => "connection lost".to_string(),
        };
        tracing::warn!(reason = %message, "stopping session");
        self.teardown().await;
        self.set_status(StreamingStatus::Stopped);
        self.emit(SessionEvent::Error(message));
    }

    fn apply_override(&self) {
        let on = self.config.voice.always_active || self.user_override || self.emergency;
        if let Some(gate) = &self.gate {
            gate.set_always_active(on);
        }
    }

    fn publish_activation(&self, state: ActivationState) {
        let changed = self.activation.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            self.emit(SessionEvent::Activation(state));
        }
    }

    fn set_status(&self, status: StreamingStatus) {
        self.status.send_replace(status);
        self.emit(SessionEvent::Status(status));
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
