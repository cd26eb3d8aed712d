//! Activation actor and recognition loop
//!
//! Every write to the activation state goes through one task that owns the
//! [`WakeWordGate`]. Other components hold a [`GateHandle`] and send it
//! commands; the capture callback only reads the lock-free
//! [`ActivationFlag`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};

use super::AudioChunk;
use super::stt::SpeechRecognizer;
use super::wake_word::{ActivationState, GateTransition, WakeWordGate};
use crate::config::VoiceConfig;

/// Captured chunks buffered toward the recognizer
const WAKE_CHANNEL_CAPACITY: usize = 64;

/// Chunks kept while the recognizer restarts
const MAX_PENDING_CHUNKS: usize = 128;

/// Consecutive recognizer failures before failing open
///
/// Counts sessions that could not start and sessions that ended in an error
/// before producing any text.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Lock-free view of `ActivationState::active` for the audio thread
#[derive(Debug, Clone, Default)]
pub struct ActivationFlag(Arc<AtomicBool>);

impl ActivationFlag {
    /// Whether captured audio may be forwarded
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, active: bool) {
        self.0.store(active, Ordering::Release);
    }
}

#[derive(Debug)]
enum GateCommand {
    Speech(String),
    SetAlwaysActive(bool),
    Trigger,
    Deactivate,
    RecognizerUnavailable,
    Recognizing(bool),
    Shutdown,
}

/// Handle to the activation actor
#[derive(Debug, Clone)]
pub struct GateHandle {
    commands: mpsc::UnboundedSender<GateCommand>,
    state: watch::Receiver<ActivationState>,
    flag: ActivationFlag,
}

impl GateHandle {
    /// Feed recognized text
    pub fn speech(&self, text: impl Into<String>) {
        self.send(GateCommand::Speech(text.into()));
    }

    /// Set or clear the emergency override
    pub fn set_always_active(&self, on: bool) {
        self.send(GateCommand::SetAlwaysActive(on));
    }

    /// Open the gate without a wake phrase
    pub fn trigger(&self) {
        self.send(GateCommand::Trigger);
    }

    /// Close the gate and clear every override
    pub fn deactivate(&self) {
        self.send(GateCommand::Deactivate);
    }

    /// Report that recognition cannot run
    pub fn recognizer_unavailable(&self) {
        self.send(GateCommand::RecognizerUnavailable);
    }

    /// Report whether a recognition session is running
    pub fn set_recognizing(&self, running: bool) {
        self.send(GateCommand::Recognizing(running));
    }

    /// Stop the actor; the gate closes on the way out
    pub fn shutdown(&self) {
        self.send(GateCommand::Shutdown);
    }

    /// Latest published state
    #[must_use]
    pub fn state(&self) -> ActivationState {
        *self.state.borrow()
    }

    /// Watch activation changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ActivationState> {
        self.state.clone()
    }

    /// Flag read by the capture callback
    #[must_use]
    pub fn flag(&self) -> ActivationFlag {
        self.flag.clone()
    }

    /// Whether the actor has exited
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Resolves once the actor has exited
    pub async fn closed(&self) {
        self.commands.closed().await;
    }

    fn send(&self, command: GateCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!("activation gate already stopped");
        }
    }
}

/// Spawn the activation actor and its recognition loop
///
/// Returns the handle and the sender the capture callback feeds every
/// buffer into.
#[must_use]
pub fn spawn_gate(
    voice: &VoiceConfig,
    recognizer: Arc<dyn SpeechRecognizer>,
) -> (GateHandle, mpsc::Sender<AudioChunk>) {
    let gate = WakeWordGate::new(&voice.wake_phrases, voice.deactivation_delay);
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(gate.snapshot());
    let flag = ActivationFlag::default();

    let handle = GateHandle {
        commands: commands_tx,
        state: state_rx,
        flag: flag.clone(),
    };

    tokio::spawn(run_gate(gate, commands_rx, state_tx, flag));

    let (wake_tx, wake_rx) = mpsc::channel(WAKE_CHANNEL_CAPACITY);
    tokio::spawn(run_recognition(
        recognizer,
        handle.clone(),
        wake_rx,
        voice.recognizer_backoff,
    ));

    (handle, wake_tx)
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_gate(
    mut gate: WakeWordGate,
    mut commands: mpsc::UnboundedReceiver<GateCommand>,
    state_tx: watch::Sender<ActivationState>,
    flag: ActivationFlag,
) {
    let publish = |gate: &WakeWordGate| {
        let snapshot = gate.snapshot();
        flag.set(snapshot.active);
        state_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    };

    loop {
        let deadline = gate.deadline();
        let command = tokio::select! {
            command = commands.recv() => command,
            () = sleep_until_deadline(deadline) => {
                if gate.expire(Instant::now()) == GateTransition::Deactivated {
                    tracing::info!("activation expired");
                }
                publish(&gate);
                continue;
            }
        };

        let Some(command) = command else { break };
        let now = Instant::now();

        let transition = match command {
            GateCommand::Speech(text) => gate.on_speech(&text, now),
            GateCommand::SetAlwaysActive(on) => {
                tracing::info!(always_active = on, "activation override changed");
                gate.set_always_active(on, now)
            }
            GateCommand::Trigger => gate.trigger(now),
            GateCommand::Deactivate => gate.deactivate(),
            GateCommand::RecognizerUnavailable => {
                tracing::warn!("speech recognition unavailable, audio gate held open");
                gate.fail_open(now)
            }
            GateCommand::Recognizing(true) => {
                gate.arm();
                GateTransition::Unchanged
            }
            GateCommand::Recognizing(false) => {
                gate.disarm();
                GateTransition::Unchanged
            }
            GateCommand::Shutdown => break,
        };

        match transition {
            GateTransition::Activated(reason) => tracing::info!(?reason, "activation opened"),
            GateTransition::Deactivated => tracing::info!("activation closed"),
            GateTransition::Refreshed => tracing::trace!("activation refreshed"),
            GateTransition::Unchanged => {}
        }
        publish(&gate);
    }

    gate.deactivate();
    gate.disarm();
    publish(&gate);
    tracing::debug!("activation gate stopped");
}

enum SessionEnd {
    Expired,
    Failed,
    Stopped,
}

/// Buffer chunks for `backoff`; false if the loop should exit
async fn buffer_during_backoff(
    chunks: &mut mpsc::Receiver<AudioChunk>,
    pending: &mut VecDeque<AudioChunk>,
    backoff: Duration,
    gate: &GateHandle,
) -> bool {
    let deadline = Instant::now() + backoff;
    loop {
        tokio::select! {
            () = sleep_until(deadline) => return true,
            () = gate.closed() => return false,
            chunk = chunks.recv() => match chunk {
                Some(chunk) => {
                    if pending.len() >= MAX_PENDING_CHUNKS {
                        pending.pop_front();
                    }
                    pending.push_back(chunk);
                }
                None => return false,
            },
        }
    }
}

/// Keep a recognition session running for as long as audio flows
///
/// Sessions that expire or fail are restarted after `backoff`; audio captured
/// in the gap is replayed into the next session. Only a recognized result
/// resets the failure count, since some recognizers start fine and fail per
/// request.
async fn run_recognition(
    recognizer: Arc<dyn SpeechRecognizer>,
    gate: GateHandle,
    mut chunks: mpsc::Receiver<AudioChunk>,
    backoff: Duration,
) {
    if !recognizer.is_available() {
        gate.recognizer_unavailable();
        return;
    }

    let mut pending: VecDeque<AudioChunk> = VecDeque::new();
    let mut failures = 0u32;

    loop {
        let mut session = match recognizer.start_session().await {
            Ok(session) => session,
            Err(e) => {
                failures += 1;
                tracing::warn!(error = %e, failures, "failed to start recognition session");
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    gate.recognizer_unavailable();
                    return;
                }
                if !buffer_during_backoff(&mut chunks, &mut pending, backoff, &gate).await {
                    break;
                }
                continue;
            }
        };

        gate.set_recognizing(true);
        tracing::debug!(replayed = pending.len(), "recognition session started");
        while let Some(chunk) = pending.pop_front() {
            if session.audio.try_send(chunk).is_err() {
                pending.clear();
                break;
            }
        }

        let end = loop {
            tokio::select! {
                () = gate.closed() => break SessionEnd::Stopped,
                chunk = chunks.recv() => {
                    let Some(chunk) = chunk else { break SessionEnd::Stopped };
                    match session.audio.try_send(chunk) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::debug!("recognizer busy, dropping chunk");
                        }
                        Err(mpsc::error::TrySendError::Closed(chunk)) => {
                            pending.push_back(chunk);
                            break SessionEnd::Expired;
                        }
                    }
                }
                result = session.results.recv() => match result {
                    Some(Ok(text)) => {
                        failures = 0;
                        let text = text.trim();
                        if !text.is_empty() {
                            tracing::debug!(text, "speech recognized");
                            gate.speech(text);
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "recognition session failed");
                        break SessionEnd::Failed;
                    }
                    None => break SessionEnd::Expired,
                },
            }
        };
        drop(session);

        match end {
            SessionEnd::Stopped => break,
            SessionEnd::Expired => tracing::debug!("recognition session ended, restarting"),
            SessionEnd::Failed => {
                failures += 1;
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    gate.recognizer_unavailable();
                    return;
                }
                tracing::debug!(failures, "restarting recognition after failure");
            }
        }

        if !buffer_during_backoff(&mut chunks, &mut pending, backoff, &gate).await {
            break;
        }
    }

    gate.set_recognizing(false);
    tracing::debug!("recognition loop stopped");
}
