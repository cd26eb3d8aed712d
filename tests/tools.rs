//! Metronome, timer and dispatcher timing tests
//!
//! All tests run on paused time, so minutes of schedule finish instantly.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use first_aid_coach::tools::{Metronome, ToolCommand, ToolDispatcher, ToolEvent};

mod common;

use common::RecordingEffects;

#[tokio::test(start_paused = true)]
async fn test_metronome_beats_per_two_minutes() {
    for bpm in [40, 60, 100, 110, 120, 200] {
        let effects = Arc::new(RecordingEffects::default());
        let mut metronome = Metronome::new(effects.clone());

        metronome.start(bpm);
        tokio::time::sleep(Duration::from_millis(119_999)).await;
        metronome.stop();

        assert_eq!(effects.clicks(), u64::from(bpm) * 2, "bpm {bpm}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_click_after_stop() {
    let effects = Arc::new(RecordingEffects::default());
    let mut metronome = Metronome::new(effects.clone());

    metronome.start(110);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(metronome.stop());
    let clicks = effects.clicks();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(effects.clicks(), clicks);
    assert!(!metronome.state().is_active);
}

#[tokio::test(start_paused = true)]
async fn test_timer_restart_replaces_countdown() {
    let effects = Arc::new(RecordingEffects::default());
    let mut tools = ToolDispatcher::new(effects.clone());

    tools.handle("start_timer", &json!({"label": "cpr_cycle", "seconds": 120}));
    tokio::time::sleep(Duration::from_millis(60_500)).await;
    assert_eq!(tools.timer_remaining("cpr_cycle"), Some(60));

    // Same label: the old countdown is dropped, not run alongside
    tools.handle("start_timer", &json!({"label": "cpr_cycle", "seconds": 30}));
    assert_eq!(tools.timer_remaining("cpr_cycle"), Some(30));

    tokio::time::sleep(Duration::from_millis(30_500)).await;
    assert_eq!(effects.alerts(), vec!["cpr_cycle".to_string()]);
    assert!(tools.timers().is_empty());

    // The original deadline passes silently
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(effects.alerts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timer_events() {
    let effects = Arc::new(RecordingEffects::default());
    let mut tools = ToolDispatcher::new(effects);
    let mut events = tools.subscribe();

    tools.execute(ToolCommand::StartTimer {
        label: "pressure".to_string(),
        seconds: 2,
    });
    assert_eq!(
        events.recv().await.unwrap(),
        ToolEvent::TimerStarted {
            label: "pressure".to_string(),
            seconds: 2
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        ToolEvent::TimerTick {
            label: "pressure".to_string(),
            remaining: 1
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        ToolEvent::TimerFired {
            label: "pressure".to_string()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_all_silences_everything() {
    let effects = Arc::new(RecordingEffects::default());
    let mut tools = ToolDispatcher::new(effects.clone());

    tools.handle("start_metronome", &json!({"bpm": 100}));
    tools.handle("start_timer", &json!({"label": "a", "seconds": 5}));
    tools.handle("start_timer", &json!({"label": "b", "seconds": 10}));
    tools.handle(
        "show_ui",
        &json!({"card_type": "checklist", "title": "CPR", "items": ["Push hard", "Push fast"]}),
    );
    assert_eq!(tools.cards().len(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    tools.stop_all();
    let clicks = effects.clicks();

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(effects.clicks(), clicks);
    assert!(effects.alerts().is_empty());
    assert!(tools.timers().is_empty());
    assert!(tools.cards().is_empty());
    assert!(!tools.metronome().is_active);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_bpm_uses_default() {
    let effects = Arc::new(RecordingEffects::default());
    let mut tools = ToolDispatcher::new(effects);

    let command = tools.handle("start_metronome", &json!({"bpm": 5000}));
    assert_eq!(command, Some(ToolCommand::StartMetronome { bpm: 110 }));
    assert_eq!(tools.metronome().bpm, 110);
    tools.stop_all();
}

#[tokio::test(start_paused = true)]
async fn test_rescuer_switch_alert_while_metronome_runs() {
    let effects = Arc::new(RecordingEffects::default());
    let mut tools = ToolDispatcher::new(effects.clone());

    tools.handle("start_metronome", &json!({"bpm": 110}));
    tools.handle("start_timer", &json!({"label": "switch_rescuer", "seconds": 120}));

    tokio::time::sleep(Duration::from_millis(120_500)).await;
    assert_eq!(effects.alerts(), vec!["switch_rescuer".to_string()]);
    assert!(tools.timers().is_empty());
    assert!(tools.metronome().is_active);
    assert_eq!(tools.metronome().bpm, 110);

    // Still ticking after the alert
    let clicks = effects.clicks();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(effects.clicks() - clicks, 11);
    tools.stop_all();
}
