//! Session recording
//!
//! The orchestrator talks to a [`SessionRecorder`] through a
//! [`RecorderHandle`], which runs the recorder on its own thread so file I/O
//! never stalls the live session. Recorder failures are logged and the
//! session carries on.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::state::{Scenario, ScenarioState};
use super::transcript::{TranscriptEntry, TranscriptLog};
use crate::protocol::Role;
use crate::voice::WIRE_SAMPLE_RATE;
use crate::{Error, Result};

const RULE_HEAVY: &str = "==================================================";
const RULE_LIGHT: &str = "--------------------------------------------------";

/// Files produced by a finished recording
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordingHandle {
    pub session_id: String,
    pub directory: PathBuf,
    pub log_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
    pub frame_count: u64,
}

/// Sink for everything worth keeping from a session
pub trait SessionRecorder: Send {
    /// Begin a new recording
    ///
    /// # Errors
    ///
    /// Returns `Error::Recorder` if storage cannot be prepared
    fn start_recording(&mut self) -> Result<()>;

    fn log_user_transcript(&mut self, text: &str);

    /// Assistant text arrives in deltas; `is_complete` freezes the line
    fn log_agent_transcript(&mut self, delta: &str, is_complete: bool);

    fn log_scene_observation(&mut self, text: &str);

    fn log_scenario_update(&mut self, scenario: &ScenarioState);

    fn log_tool_call(&mut self, name: &str, params: &Value);

    /// # Errors
    ///
    /// Returns error if the frame cannot be stored
    fn append_video_frame(&mut self, jpeg: &[u8]) -> Result<()>;

    /// Append wire-format audio (mono PCM16, 24 kHz)
    ///
    /// # Errors
    ///
    /// Returns error if the audio cannot be stored
    fn append_audio_data(&mut self, pcm: &[u8]) -> Result<()>;

    /// Finish the recording and export it
    ///
    /// # Errors
    ///
    /// Returns `Error::Recorder` if no recording is running or export fails
    fn stop_recording(&mut self) -> Result<RecordingHandle>;
}

#[derive(Debug, Clone, Serialize)]
struct Observation {
    timestamp: DateTime<Local>,
    observation: String,
}

#[derive(Debug, Clone, Serialize)]
struct ScenarioRecord {
    timestamp: DateTime<Local>,
    #[serde(flatten)]
    state: ScenarioState,
}

#[derive(Debug, Clone, Serialize)]
struct ToolCallRecord {
    timestamp: DateTime<Local>,
    tool: String,
    params: Value,
}

type WavFileWriter = hound::WavWriter<BufWriter<File>>;

struct Recording {
    id: Uuid,
    directory: PathBuf,
    started_at: DateTime<Local>,
    transcript: TranscriptLog,
    observations: Vec<Observation>,
    scenario_updates: Vec<ScenarioRecord>,
    tool_calls: Vec<ToolCallRecord>,
    scenario: ScenarioState,
    audio: Option<WavFileWriter>,
    audio_path: PathBuf,
    frame_count: u64,
}

#[derive(Serialize)]
struct SessionLog<'a> {
    session_id: String,
    start_time: DateTime<Local>,
    end_time: DateTime<Local>,
    duration_seconds: f64,
    current_scenario: &'a ScenarioState,
    transcript: &'a [TranscriptEntry],
    scene_observations: &'a [Observation],
    scenario_updates: &'a [ScenarioRecord],
    tool_calls: &'a [ToolCallRecord],
    frame_count: u64,
}

/// Writes each session to `<root>/<session id>/`
///
/// Produces `session_log.json`, `ems_report.txt`, `audio.wav` and numbered
/// JPEG frames under `frames/`.
pub struct FileRecorder {
    root: PathBuf,
    active: Option<Recording>,
}

impl FileRecorder {
    /// Record sessions under `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            active: None,
        }
    }

    /// Directory sessions are written to
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn active(&mut self) -> Option<&mut Recording> {
        if self.active.is_none() {
            tracing::debug!("not recording, entry dropped");
        }
        self.active.as_mut()
    }
}

impl SessionRecorder for FileRecorder {
    fn start_recording(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::Recorder("already recording".to_string()));
        }

        let id = Uuid::new_v4();
        let directory = self.root.join(id.to_string());
        fs::create_dir_all(directory.join("frames"))
            .map_err(|e| Error::Recorder(format!("{}: {e}", directory.display())))?;

        tracing::info!(session_id = %id, dir = %directory.display(), "recording started");

        self.active = Some(Recording {
            id,
            audio_path: directory.join("audio.wav"),
            directory,
            started_at: Local::now(),
            transcript: TranscriptLog::new(),
            observations: Vec::new(),
            scenario_updates: Vec::new(),
            tool_calls: Vec::new(),
            scenario: ScenarioState::default(),
            audio: None,
            frame_count: 0,
        });
        Ok(())
    }

    fn log_user_transcript(&mut self, text: &str) {
        if let Some(rec) = self.active() {
            rec.transcript.set_user(text);
        }
    }

    fn log_agent_transcript(&mut self, delta: &str, is_complete: bool) {
        if let Some(rec) = self.active() {
            if !delta.is_empty() {
                rec.transcript.append_assistant(delta);
            }
            if is_complete {
                rec.transcript.complete();
            }
        }
    }

    fn log_scene_observation(&mut self, text: &str) {
        if let Some(rec) = self.active() {
            rec.observations.push(Observation {
                timestamp: Local::now(),
                observation: text.to_string(),
            });
        }
    }

    fn log_scenario_update(&mut self, scenario: &ScenarioState) {
        if let Some(rec) = self.active() {
            rec.scenario = scenario.clone();
            rec.scenario_updates.push(ScenarioRecord {
                timestamp: Local::now(),
                state: scenario.clone(),
            });
        }
    }

    fn log_tool_call(&mut self, name: &str, params: &Value) {
        if let Some(rec) = self.active() {
            rec.tool_calls.push(ToolCallRecord {
                timestamp: Local::now(),
                tool: name.to_string(),
                params: params.clone(),
            });
        }
    }

    fn append_video_frame(&mut self, jpeg: &[u8]) -> Result<()> {
        let Some(rec) = self.active() else {
            return Ok(());
        };
        rec.frame_count += 1;
        let path = rec
            .directory
            .join("frames")
            .join(format!("frame_{:05}.jpg", rec.frame_count));
        fs::write(&path, jpeg)?;
        Ok(())
    }

    fn append_audio_data(&mut self, pcm: &[u8]) -> Result<()> {
        let Some(rec) = self.active() else {
            return Ok(());
        };
        if rec.audio.is_none() {
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate: WIRE_SAMPLE_RATE,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            rec.audio = Some(hound::WavWriter::create(&rec.audio_path, spec)?);
        }
        if let Some(writer) = rec.audio.as_mut() {
            for pair in pcm.chunks_exact(2) {
                writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
            }
        }
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<RecordingHandle> {
        let mut rec = self
            .active
            .take()
            .ok_or_else(|| Error::Recorder("not recording".to_string()))?;
        rec.transcript.complete();

        let audio_path = match rec.audio.take() {
            Some(writer) => {
                writer.finalize()?;
                Some(rec.audio_path.clone())
            }
            None => None,
        };

        let ended_at = Local::now();
        let log = SessionLog {
            session_id: rec.id.to_string(),
            start_time: rec.started_at,
            end_time: ended_at,
            duration_seconds: duration_secs(rec.started_at, ended_at),
            current_scenario: &rec.scenario,
            transcript: rec.transcript.entries(),
            scene_observations: &rec.observations,
            scenario_updates: &rec.scenario_updates,
            tool_calls: &rec.tool_calls,
            frame_count: rec.frame_count,
        };
        let log_path = rec.directory.join("session_log.json");
        fs::write(&log_path, serde_json::to_vec_pretty(&log)?)?;

        let report_path = rec.directory.join("ems_report.txt");
        fs::write(&report_path, render_report(&rec, ended_at))?;

        tracing::info!(
            session_id = %rec.id,
            frames = rec.frame_count,
            entries = rec.transcript.entries().len(),
            "recording saved"
        );

        Ok(RecordingHandle {
            session_id: rec.id.to_string(),
            directory: rec.directory,
            log_path: Some(log_path),
            report_path: Some(report_path),
            audio_path,
            frame_count: rec.frame_count,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn duration_secs(start: DateTime<Local>, end: DateTime<Local>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

/// Plain-text hand-off report for emergency responders
fn render_report(rec: &Recording, ended_at: DateTime<Local>) -> String {
    let mut lines: Vec<String> = vec![
        RULE_HEAVY.into(),
        "EMS READY REPORT - FIRST AID SESSION".into(),
        RULE_HEAVY.into(),
        String::new(),
        "SESSION INFORMATION".into(),
        RULE_LIGHT.into(),
        format!("Session ID: {}", rec.id),
        format!("Start Time: {}", rec.started_at.format("%Y-%m-%d %H:%M:%S")),
        format!("End Time: {}", ended_at.format("%Y-%m-%d %H:%M:%S")),
        format!(
            "Duration: {:.1} seconds",
            duration_secs(rec.started_at, ended_at)
        ),
        String::new(),
    ];

    if rec.scenario.scenario != Scenario::None {
        lines.extend([
            "SCENARIO DETAILS".into(),
            RULE_LIGHT.into(),
            format!("Type: {}", rec.scenario.scenario.as_str().to_uppercase()),
            format!("Severity: {}", rec.scenario.severity.as_str().to_uppercase()),
            format!("Body Region: {}", rec.scenario.body_region),
            format!("Summary: {}", rec.scenario.summary),
            String::new(),
        ]);
    }

    if !rec.observations.is_empty() {
        lines.extend(["SCENE OBSERVATIONS".into(), RULE_LIGHT.into()]);
        for (i, obs) in rec.observations.iter().enumerate() {
            lines.push(format!(
                "{}. [{}] {}",
                i + 1,
                obs.timestamp.format("%H:%M:%S"),
                obs.observation
            ));
        }
        lines.push(String::new());
    }

    lines.extend(["CONVERSATION TRANSCRIPT".into(), RULE_LIGHT.into()]);
    for entry in rec.transcript.entries() {
        let role = match entry.role {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        };
        lines.push(format!(
            "[{}] {role}: {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.text
        ));
        lines.push(String::new());
    }

    lines.extend([
        String::new(),
        "KEY INFORMATION SUMMARY".into(),
        RULE_LIGHT.into(),
    ]);
    for (heading, role) in [
        ("User Statements", Role::User),
        ("Assistant Instructions", Role::Assistant),
    ] {
        let texts: Vec<&str> = rec.transcript.texts(role).collect();
        if role == Role::Assistant {
            lines.push(String::new());
        }
        lines.push(format!("{heading} ({} total):", texts.len()));
        lines.extend(texts.iter().map(|t| format!("  • {t}")));
    }

    if !rec.tool_calls.is_empty() {
        lines.extend([String::new(), "TOOL CALLS".into(), RULE_LIGHT.into()]);
        for call in &rec.tool_calls {
            lines.push(format!(
                "[{}] {}: {}",
                call.timestamp.format("%H:%M:%S"),
                call.tool,
                call.params
            ));
        }
    }

    lines.extend([
        String::new(),
        RULE_HEAVY.into(),
        "END OF REPORT".into(),
        RULE_HEAVY.into(),
    ]);
    lines.join("\n")
}

enum RecorderCommand {
    Start(oneshot::Sender<Result<()>>),
    User(String),
    Agent { delta: String, complete: bool },
    Scene(String),
    Scenario(ScenarioState),
    Tool { name: String, params: Value },
    Frame(Vec<u8>),
    Audio(Vec<u8>),
    Stop(oneshot::Sender<Result<RecordingHandle>>),
}

/// Non-blocking front for a recorder running on its own thread
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::UnboundedSender<RecorderCommand>,
}

impl RecorderHandle {
    /// Move `recorder` onto a dedicated thread
    ///
    /// The thread exits once every handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned
    pub fn spawn(recorder: Box<dyn SessionRecorder>) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("coach-recorder".to_string())
            .spawn(move || run_recorder(recorder, rx))?;
        Ok(Self { tx })
    }

    /// Begin a recording
    ///
    /// # Errors
    ///
    /// Returns `Error::Recorder` if the recorder refuses or has stopped
    pub async fn start(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RecorderCommand::Start(reply));
        rx.await
            .map_err(|_| Error::Recorder("recorder thread stopped".to_string()))?
    }

    /// Finish and export the recording
    ///
    /// # Errors
    ///
    /// Returns `Error::Recorder` if nothing was recording or export failed
    pub async fn stop(&self) -> Result<RecordingHandle> {
        let (reply, rx) = oneshot::channel();
        self.send(RecorderCommand::Stop(reply));
        rx.await
            .map_err(|_| Error::Recorder("recorder thread stopped".to_string()))?
    }

    pub fn log_user_transcript(&self, text: &str) {
        self.send(RecorderCommand::User(text.to_string()));
    }

    pub fn log_agent_transcript(&self, delta: &str, is_complete: bool) {
        self.send(RecorderCommand::Agent {
            delta: delta.to_string(),
            complete: is_complete,
        });
    }

    pub fn log_scene_observation(&self, text: &str) {
        self.send(RecorderCommand::Scene(text.to_string()));
    }

    pub fn log_scenario_update(&self, scenario: &ScenarioState) {
        self.send(RecorderCommand::Scenario(scenario.clone()));
    }

    pub fn log_tool_call(&self, name: &str, params: &Value) {
        self.send(RecorderCommand::Tool {
            name: name.to_string(),
            params: params.clone(),
        });
    }

    pub fn append_video_frame(&self, jpeg: Vec<u8>) {
        self.send(RecorderCommand::Frame(jpeg));
    }

    pub fn append_audio_data(&self, pcm: Vec<u8>) {
        self.send(RecorderCommand::Audio(pcm));
    }

    fn send(&self, command: RecorderCommand) {
        if self.tx.send(command).is_err() {
            tracing::debug!("recorder stopped, entry dropped");
        }
    }
}

fn run_recorder(
    mut recorder: Box<dyn SessionRecorder>,
    mut rx: mpsc::UnboundedReceiver<RecorderCommand>,
) {
    // Warn once per recording for streamed data
    let mut frame_failed = false;
    let mut audio_failed = false;

    while let Some(command) = rx.blocking_recv() {
        match command {
            RecorderCommand::Start(reply) => {
                frame_failed = false;
                audio_failed = false;
                let _ = reply.send(recorder.start_recording());
            }
            RecorderCommand::User(text) => recorder.log_user_transcript(&text),
            RecorderCommand::Agent { delta, complete } => {
                recorder.log_agent_transcript(&delta, complete);
            }
            RecorderCommand::Scene(text) => recorder.log_scene_observation(&text),
            RecorderCommand::Scenario(state) => recorder.log_scenario_update(&state),
            RecorderCommand::Tool { name, params } => recorder.log_tool_call(&name, &params),
            RecorderCommand::Frame(jpeg) => {
                if let Err(e) = recorder.append_video_frame(&jpeg)
                    && !frame_failed
                {
                    frame_failed = true;
                    tracing::warn!(error = %e, "failed to record frame");
                }
            }
            RecorderCommand::Audio(pcm) => {
                if let Err(e) = recorder.append_audio_data(&pcm)
                    && !audio_failed
                {
                    audio_failed = true;
                    tracing::warn!(error = %e, "failed to record audio");
                }
            }
            RecorderCommand::Stop(reply) => {
                let _ = reply.send(recorder.stop_recording());
            }
        }
    }
    tracing::debug!("recorder thread stopped");
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn writes_log_report_and_media() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = FileRecorder::new(dir.path());
        recorder.start_recording().unwrap();

        recorder.log_user_transcript("my friend collapsed");
        recorder.log_agent_transcript("Check if ", false);
        recorder.log_agent_transcript("they are breathing.", false);
        recorder.log_agent_transcript("", true);
        recorder.log_scene_observation("Adult lying on the floor");
        recorder.log_scenario_update(&ScenarioState::from_wire("cpr", "critical", "Unresponsive adult", "chest"));
        recorder.log_tool_call("start_metronome", &json!({"bpm": 110}));
        recorder.append_video_frame(b"\xFF\xD8jpeg").unwrap();
        recorder.append_audio_data(&[0, 0, 1, 0]).unwrap();

        let handle = recorder.stop_recording().unwrap();
        assert_eq!(handle.frame_count, 1);
        assert!(handle.directory.join("frames/frame_00001.jpg").exists());
        assert!(handle.audio_path.unwrap().exists());

        let log: Value =
            serde_json::from_slice(&fs::read(handle.log_path.unwrap()).unwrap()).unwrap();
        assert_eq!(log["transcript"].as_array().unwrap().len(), 2);
        assert_eq!(log["transcript"][1]["text"], "Check if they are breathing.");
        assert_eq!(log["current_scenario"]["scenario"], "cpr");
        assert_eq!(log["tool_calls"][0]["tool"], "start_metronome");

        let report = fs::read_to_string(handle.report_path.unwrap()).unwrap();
        assert!(report.contains("Type: CPR"));
        assert!(report.contains("Severity: CRITICAL"));
        assert!(report.contains("1. ["));
        assert!(report.contains("USER: my friend collapsed"));
        assert!(report.contains("User Statements (1 total):"));
        assert!(report.contains("  • Check if they are breathing."));
        assert!(report.contains(r#"start_metronome: {"bpm":110}"#));
        assert!(report.ends_with("END OF REPORT\n=================================================="));
    }

    #[test]
    fn quiet_session_omits_scenario_section() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = FileRecorder::new(dir.path());
        recorder.start_recording().unwrap();
        let handle = recorder.stop_recording().unwrap();

        let report = fs::read_to_string(handle.report_path.unwrap()).unwrap();
        assert!(!report.contains("SCENARIO DETAILS"));
        assert!(!report.contains("TOOL CALLS"));
        assert!(handle.audio_path.is_none());
    }

    #[test]
    fn stop_without_start_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = FileRecorder::new(dir.path());
        assert!(matches!(recorder.stop_recording(), Err(Error::Recorder(_))));
        // Entries outside a recording are ignored
        recorder.log_user_transcript("ignored");
        assert!(recorder.append_audio_data(&[0, 0]).is_ok());
    }

    #[tokio::test]
    async fn handle_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let handle = RecorderHandle::spawn(Box::new(FileRecorder::new(dir.path()))).unwrap();
        handle.start().await.unwrap();
        handle.log_scene_observation("Smoke in the kitchen");
        let recording = handle.stop().await.unwrap();
        assert!(recording.directory.starts_with(dir.path()));
        assert!(handle.stop().await.is_err());
    }
}
