//! Activation gate and audio pipeline integration tests
//!
//! Runs against fake devices; no audio hardware required.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_test::{assert_pending, assert_ready};

use first_aid_coach::config::VoiceConfig;
use first_aid_coach::voice::{
    ActivationReason, AudioPipeline, CaptureWiring, UnavailableRecognizer, spawn_gate,
};

mod common;

use common::{
    FailingRecognizer, FakeMicrophone, FakeSpeaker, RejectingRecognizer, ScriptedRecognizer,
    loud_chunk,
};

fn voice_config() -> VoiceConfig {
    VoiceConfig {
        wake_phrases: vec!["hey coach".to_string(), "hey couch".to_string()],
        deactivation_delay: Duration::from_secs(15),
        ..VoiceConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_wake_phrase_opens_and_silence_closes() {
    let (recognizer, phrases) = ScriptedRecognizer::new();
    let (gate, _wake_tx) = spawn_gate(&voice_config(), recognizer);
    let mut state = gate.subscribe();

    phrases.send("Hey Couch, my dad collapsed".to_string()).unwrap();
    state.wait_for(|s| s.active).await.unwrap();
    assert_eq!(gate.state().reason, ActivationReason::WakeWord);
    assert!(gate.flag().is_active());

    // Speech while active pushes the deadline out
    tokio::time::sleep(Duration::from_secs(14)).await;
    assert!(gate.state().active);
    state.borrow_and_update();
    phrases.send("he is not breathing".to_string()).unwrap();
    state.changed().await.unwrap();

    tokio::time::sleep(Duration::from_secs(14)).await;
    assert!(gate.state().active);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!gate.state().active);
    assert!(!gate.flag().is_active());
    assert_eq!(gate.state().reason, ActivationReason::None);
}

#[tokio::test(start_paused = true)]
async fn test_speech_without_wake_phrase_is_ignored() {
    let (recognizer, phrases) = ScriptedRecognizer::new();
    let (gate, _wake_tx) = spawn_gate(&voice_config(), recognizer);

    phrases.send("what's for dinner".to_string()).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!gate.state().active);
}

#[tokio::test(start_paused = true)]
async fn test_override_holds_gate_until_cleared() {
    let (recognizer, _phrases) = ScriptedRecognizer::new();
    let (gate, _wake_tx) = spawn_gate(&voice_config(), recognizer);
    let mut state = gate.subscribe();

    gate.set_always_active(true);
    state.wait_for(|s| s.active).await.unwrap();
    assert_eq!(gate.state().reason, ActivationReason::EmergencyOverride);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(gate.state().active);

    // Clearing restarts the full delay
    gate.set_always_active(false);
    tokio::time::sleep(Duration::from_secs(14)).await;
    assert!(gate.state().active);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!gate.state().active);
}

#[tokio::test(start_paused = true)]
async fn test_manual_trigger_and_deactivate() {
    let (recognizer, _phrases) = ScriptedRecognizer::new();
    let (gate, _wake_tx) = spawn_gate(&voice_config(), recognizer);
    let mut state = gate.subscribe();

    gate.trigger();
    state.wait_for(|s| s.active).await.unwrap();
    assert_eq!(gate.state().reason, ActivationReason::Manual);

    gate.deactivate();
    state.wait_for(|s| !s.active).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_repeated_start_failures_fail_open() {
    let recognizer = Arc::new(FailingRecognizer::default());
    let (gate, _wake_tx) = spawn_gate(&voice_config(), recognizer.clone());
    let mut state = gate.subscribe();

    state.wait_for(|s| s.active).await.unwrap();
    assert_eq!(gate.state().reason, ActivationReason::RecognizerUnavailable);
    assert_eq!(recognizer.attempts.load(Ordering::SeqCst), 3);

    // Failed open never times out
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(gate.state().active);
}

#[tokio::test(start_paused = true)]
async fn test_failing_transcription_fails_open() {
    // Sessions start fine but every request is rejected, e.g. a revoked key
    let recognizer = Arc::new(RejectingRecognizer::default());
    let (gate, _wake_tx) = spawn_gate(&voice_config(), recognizer.clone());
    let mut state = gate.subscribe();

    state.wait_for(|s| s.active).await.unwrap();
    assert_eq!(gate.state().reason, ActivationReason::RecognizerUnavailable);
    assert_eq!(recognizer.sessions.load(Ordering::SeqCst), 3);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(gate.state().active);
    assert_eq!(recognizer.sessions.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_session_restart_keeps_activation_and_replays_audio() {
    let (recognizer, phrases) = ScriptedRecognizer::new();
    let (gate, wake_tx) = spawn_gate(&voice_config(), recognizer.clone());
    let mut state = gate.subscribe();

    phrases.send("hey coach, she is choking".to_string()).unwrap();
    state.wait_for(|s| s.active).await.unwrap();
    assert_eq!(recognizer.sessions(), 1);

    // Session hits its limit; audio arrives while the loop backs off
    recognizer.end_session();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recognizer.sessions(), 1);
    wake_tx.send(loud_chunk()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(recognizer.sessions(), 2);
    assert_eq!(recognizer.heard(), vec![0, 1]);
    assert!(gate.state().active);
    assert_eq!(gate.state().reason, ActivationReason::WakeWord);

    // The restarted session still drives the gate
    phrases.send("he is not breathing".to_string()).unwrap();
    tokio::time::sleep(Duration::from_millis(14_700)).await;
    assert!(gate.state().active);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!gate.state().active);
}

#[tokio::test(start_paused = true)]
async fn test_clearing_override_restores_reason() {
    let (recognizer, phrases) = ScriptedRecognizer::new();
    let (gate, _wake_tx) = spawn_gate(&voice_config(), recognizer);
    let mut state = gate.subscribe();

    phrases.send("hey coach".to_string()).unwrap();
    state.wait_for(|s| s.active).await.unwrap();
    gate.set_always_active(true);
    state
        .wait_for(|s| s.reason == ActivationReason::EmergencyOverride)
        .await
        .unwrap();

    gate.set_always_active(false);
    state
        .wait_for(|s| s.reason == ActivationReason::WakeWord)
        .await
        .unwrap();
    assert!(gate.state().active);
}

#[tokio::test]
async fn test_closed_resolves_after_shutdown() {
    let (gate, _wake_tx) = spawn_gate(&voice_config(), Arc::new(UnavailableRecognizer));
    let mut closed = tokio_test::task::spawn(gate.closed());
    assert_pending!(closed.poll());

    gate.shutdown();
    gate.clone().closed().await;
    assert_ready!(closed.poll());
    assert!(gate.is_closed());
}

#[tokio::test]
async fn test_pipeline_forwards_only_while_active() {
    let (recognizer, _phrases) = ScriptedRecognizer::new();
    let (gate, wake_tx) = spawn_gate(&voice_config(), recognizer);
    let (mic, feed) = FakeMicrophone::new();
    let speaker = Arc::new(FakeSpeaker::default());
    let mut pipeline = AudioPipeline::new(Box::new(mic), speaker.clone());

    let (uplink_tx, mut uplink) = mpsc::unbounded_channel::<Vec<u8>>();
    pipeline
        .capture_start(CaptureWiring {
            gate: gate.clone(),
            wake_tx,
            on_chunk: Box::new(move |pcm| {
                let _ = uplink_tx.send(pcm);
            }),
        })
        .unwrap();
    assert!(pipeline.is_capturing());

    // Gate closed: nothing leaves the device
    assert!(feed.push(loud_chunk()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(uplink.try_recv().is_err());

    gate.trigger();
    gate.subscribe().wait_for(|s| s.active).await.unwrap();
    assert!(feed.push(loud_chunk()));

    let pcm = tokio::time::timeout(Duration::from_secs(2), uplink.recv())
        .await
        .unwrap()
        .unwrap();
    // 480 samples at 24 kHz, two bytes each
    assert_eq!(pcm.len(), 960);

    pipeline.capture_stop();
    assert!(!feed.is_capturing());
    gate.subscribe().wait_for(|s| !s.active).await.unwrap();
}

#[tokio::test]
async fn test_playback_and_barge_in() {
    let (mic, _feed) = FakeMicrophone::new();
    let speaker = Arc::new(FakeSpeaker::default());
    let pipeline = AudioPipeline::new(Box::new(mic), speaker.clone());
    pipeline.start_output().unwrap();
    assert!(speaker.running.load(Ordering::SeqCst));

    pipeline.playback(&[0x00, 0x40, 0x00, 0xC0]);
    pipeline.playback(&[0x00, 0x20]);
    assert_eq!(*speaker.voice.lock().unwrap(), vec![0.5, -0.5, 0.25]);

    pipeline.stop_playback();
    assert!(speaker.voice.lock().unwrap().is_empty());
    assert_eq!(speaker.flushes.load(Ordering::SeqCst), 1);

    pipeline.sink().play_effect(vec![0.1; 10]);
    assert_eq!(speaker.effects.load(Ordering::SeqCst), 1);
}
