//! Shared test utilities: fake devices and a loopback service

#![allow(
    dead_code,
    clippy::cast_precision_loss,
    clippy::must_use_candidate,
    clippy::missing_panics_doc
)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::tungstenite::Message;

use first_aid_coach::session::{FrameSource, VideoFrame};
use first_aid_coach::tools::EffectSink;
use first_aid_coach::voice::{
    AudioChunk, AudioInput, AudioOutput, BufferCallback, RecognitionSession, SpeechRecognizer,
};
use first_aid_coach::{Error, Result};

/// Effect sink that counts what it was asked to play
#[derive(Default)]
pub struct RecordingEffects {
    clicks: AtomicU64,
    alerts: Mutex<Vec<String>>,
}

impl RecordingEffects {
    pub fn clicks(&self) -> u64 {
        self.clicks.load(Ordering::SeqCst)
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().unwrap().clone()
    }
}

impl EffectSink for RecordingEffects {
    fn metronome_click(&self, _beat: u64) {
        self.clicks.fetch_add(1, Ordering::SeqCst);
    }

    fn timer_alert(&self, label: &str) {
        self.alerts.lock().unwrap().push(label.to_string());
    }
}

/// Recognizer whose output the test scripts phrase by phrase
pub struct ScriptedRecognizer {
    phrases: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
    sessions: AtomicUsize,
    end_session: Arc<Notify>,
    /// Audio chunks received, per session
    heard: Arc<Mutex<Vec<usize>>>,
}

impl ScriptedRecognizer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recognizer = Self {
            phrases: Arc::new(tokio::sync::Mutex::new(rx)),
            sessions: AtomicUsize::new(0),
            end_session: Arc::new(Notify::new()),
            heard: Arc::default(),
        };
        (Arc::new(recognizer), tx)
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// End the running session as if it hit its time limit
    pub fn end_session(&self) {
        self.end_session.notify_one();
    }

    /// Chunks each session received, in session order
    pub fn heard(&self) -> Vec<usize> {
        self.heard.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    async fn start_session(&self) -> Result<RecognitionSession> {
        let index = self.sessions.fetch_add(1, Ordering::SeqCst);
        let (audio_tx, mut audio_rx) = mpsc::channel::<AudioChunk>(64);
        let (results_tx, results_rx) = mpsc::channel(8);
        let phrases = Arc::clone(&self.phrases);
        let end_session = Arc::clone(&self.end_session);
        let heard = Arc::clone(&self.heard);
        heard.lock().unwrap().push(0);

        tokio::spawn(async move {
            let mut phrases = phrases.lock().await;
            loop {
                tokio::select! {
                    () = end_session.notified() => break,
                    chunk = audio_rx.recv() => {
                        if chunk.is_none() {
                            break;
                        }
                        heard.lock().unwrap()[index] += 1;
                    }
                    phrase = phrases.recv() => match phrase {
                        Some(phrase) => {
                            if results_tx.send(Ok(phrase)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            while audio_rx.recv().await.is_some() {}
                            break;
                        }
                    },
                }
            }
        });

        Ok(RecognitionSession {
            audio: audio_tx,
            results: results_rx,
        })
    }
}

/// Recognizer whose sessions start but fail on the first request
#[derive(Default)]
pub struct RejectingRecognizer {
    pub sessions: AtomicUsize,
}

#[async_trait]
impl SpeechRecognizer for RejectingRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    async fn start_session(&self) -> Result<RecognitionSession> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        let (audio_tx, _) = mpsc::channel::<AudioChunk>(64);
        let (results_tx, results_rx) = mpsc::channel(1);
        let _ = results_tx.try_send(Err(Error::Recognizer("401 unauthorized".to_string())));
        Ok(RecognitionSession {
            audio: audio_tx,
            results: results_rx,
        })
    }
}

/// Recognizer that never manages to start
#[derive(Default)]
pub struct FailingRecognizer {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl SpeechRecognizer for FailingRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    async fn start_session(&self) -> Result<RecognitionSession> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::Recognizer("service unavailable".to_string()))
    }
}

/// Test side of a fake microphone
#[derive(Clone, Default)]
pub struct MicFeed(Arc<Mutex<Option<BufferCallback>>>);

impl MicFeed {
    /// Deliver a buffer as if the hardware captured it; false if not capturing
    pub fn push(&self, chunk: AudioChunk) -> bool {
        match self.0.lock().unwrap().as_mut() {
            Some(callback) => {
                callback(chunk);
                true
            }
            None => false,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.0.lock().unwrap().is_some()
    }
}

/// Microphone driven by a [`MicFeed`]
pub struct FakeMicrophone {
    feed: MicFeed,
    deny: bool,
}

impl FakeMicrophone {
    pub fn new() -> (Self, MicFeed) {
        let feed = MicFeed::default();
        (
            Self {
                feed: feed.clone(),
                deny: false,
            },
            feed,
        )
    }

    pub fn denied() -> Self {
        Self {
            feed: MicFeed::default(),
            deny: true,
        }
    }
}

impl AudioInput for FakeMicrophone {
    fn start(&mut self, on_buffer: BufferCallback) -> Result<()> {
        if self.deny {
            return Err(Error::Permission("microphone access refused".to_string()));
        }
        *self.feed.0.lock().unwrap() = Some(on_buffer);
        Ok(())
    }

    fn stop(&mut self) {
        self.feed.0.lock().unwrap().take();
    }
}

/// Speaker that keeps everything it is handed
#[derive(Default)]
pub struct FakeSpeaker {
    pub running: AtomicBool,
    pub voice: Mutex<Vec<f32>>,
    pub effects: AtomicUsize,
    pub flushes: AtomicUsize,
    /// How long `start` blocks, like a device that is slow to open
    pub start_delay: Duration,
}

impl AudioOutput for FakeSpeaker {
    fn start(&self) -> Result<()> {
        if !self.start_delay.is_zero() {
            std::thread::sleep(self.start_delay);
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn enqueue(&self, samples: Vec<f32>) {
        self.voice.lock().unwrap().extend(samples);
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.voice.lock().unwrap().clear();
    }

    fn play_effect(&self, _samples: Vec<f32>) {
        self.effects.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.voice.lock().unwrap().clear();
    }
}

/// Camera that always has the same frame ready
#[derive(Default)]
pub struct FakeCamera {
    pub open: AtomicBool,
}

pub const FAKE_JPEG: &[u8] = b"\xFF\xD8\xFF\xE0fake-jpeg\xFF\xD9";

#[async_trait]
impl FrameSource for FakeCamera {
    async fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        self.open.load(Ordering::SeqCst).then(|| VideoFrame {
            jpeg: FAKE_JPEG.to_vec(),
        })
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// 20 ms of a loud 24 kHz mono tone
pub fn loud_chunk() -> AudioChunk {
    let samples = (0..480)
        .map(|i| (i as f32 * 0.115).sin() * 0.5)
        .collect();
    AudioChunk::new(samples, 24_000, 1)
}

/// What the loopback service should do next
pub enum ServerAction {
    Send(String),
    Close,
}

/// Single-connection websocket service on a random local port
pub struct TestServer {
    pub url: String,
    pub received: mpsc::UnboundedReceiver<serde_json::Value>,
    pub actions: mpsc::UnboundedSender<ServerAction>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (actions, mut actions_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                return;
            };
            let (mut sink, mut source) = ws.split();
            loop {
                tokio::select! {
                    action = actions_rx.recv() => match action {
                        Some(ServerAction::Send(text)) => {
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(ServerAction::Close) | None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    message = source.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(value) = serde_json::from_str(&text) {
                                let _ = received_tx.send(value);
                            }
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    },
                }
            }
        });

        Self {
            url: format!("ws://{addr}/ws"),
            received,
            actions,
        }
    }

    pub fn send(&self, message: serde_json::Value) {
        let _ = self.actions.send(ServerAction::Send(message.to_string()));
    }

    pub fn close(&self) {
        let _ = self.actions.send(ServerAction::Close);
    }

    /// Next received message of the given `type`, skipping others
    pub async fn next_of_type(&mut self, kind: &str) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let value = self.received.recv().await.expect("server stopped");
                if value["type"] == kind {
                    return value;
                }
            }
        })
        .await
        .expect("timed out waiting for message")
    }
}

/// A port nothing listens on
pub async fn dead_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/ws")
}
