//! Wake word gate
//!
//! Decides whether captured audio may be forwarded to the coaching service.
//! The gate opens when recognized speech contains one of the configured wake
//! phrases, on an explicit trigger, or when an emergency override holds it
//! open. Once open it closes again after a period without speech.
//!
//! This type is a plain state machine driven with explicit timestamps; the
//! actor in `gate.rs` owns the only instance and supplies the clock.

use std::time::Duration;

use tokio::time::Instant;

/// Lifecycle of the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Not listening for the wake phrase
    Idle,
    /// Recognizer running, waiting for the wake phrase
    Armed,
    /// Audio is forwarded to the service
    Active,
}

/// Why the gate is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationReason {
    /// Gate is closed
    #[default]
    None,
    /// A wake phrase was recognized
    WakeWord,
    /// Held open during a moderate or critical scenario, or by configuration
    EmergencyOverride,
    /// Opened by an explicit trigger
    Manual,
    /// Speech recognition is unavailable, so the gate stays open
    RecognizerUnavailable,
}

/// Published activation snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivationState {
    /// Whether audio is forwarded
    pub active: bool,
    /// Why
    pub reason: ActivationReason,
    /// Last wake phrase, trigger or speech refresh
    pub last_activity: Option<Instant>,
}

/// Result of feeding an event to the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTransition {
    /// Closed to open
    Activated(ActivationReason),
    /// Already open, deactivation timer restarted
    Refreshed,
    /// Open to closed
    Deactivated,
    /// Nothing observable changed
    Unchanged,
}

/// Wake phrase activation state machine
#[derive(Debug)]
pub struct WakeWordGate {
    phrases: Vec<String>,
    deactivation_delay: Duration,
    state: GateState,
    reason: ActivationReason,
    /// What opened the gate before the override took over the reason
    held_reason: ActivationReason,
    last_activity: Option<Instant>,
    always_active: bool,
    failed_open: bool,
    recognizing: bool,
}

impl WakeWordGate {
    /// Create a closed gate matching any of `phrases`
    #[must_use]
    pub fn new(phrases: &[String], deactivation_delay: Duration) -> Self {
        let phrases: Vec<String> = phrases
            .iter()
            .map(|p| fold(p))
            .filter(|p| !p.is_empty())
            .collect();

        tracing::debug!(wake_phrases = ?phrases, "wake word gate initialized");

        Self {
            phrases,
            deactivation_delay,
            state: GateState::Idle,
            reason: ActivationReason::None,
            held_reason: ActivationReason::None,
            last_activity: None,
            always_active: false,
            failed_open: false,
            recognizing: false,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> GateState {
        self.state
    }

    /// Whether audio is forwarded
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == GateState::Active
    }

    /// Whether the emergency override is set
    #[must_use]
    pub const fn is_always_active(&self) -> bool {
        self.always_active
    }

    /// Snapshot for publication
    #[must_use]
    pub fn snapshot(&self) -> ActivationState {
        ActivationState {
            active: self.is_active(),
            reason: self.reason,
            last_activity: self.last_activity,
        }
    }

    /// The first configured phrase contained in `text`
    ///
    /// Case and punctuation are ignored on both sides, so "Hey, Coach!"
    /// matches the phrase "hey coach".
    #[must_use]
    pub fn matched_phrase(&self, text: &str) -> Option<&str> {
        let folded = fold(text);
        self.phrases
            .iter()
            .find(|p| folded.contains(p.as_str()))
            .map(String::as_str)
    }

    /// Recognizer session is running
    pub fn arm(&mut self) {
        self.recognizing = true;
        if self.state == GateState::Idle {
            self.state = GateState::Armed;
        }
    }

    /// Recognizer stopped for good
    pub fn disarm(&mut self) {
        self.recognizing = false;
        if self.state == GateState::Armed {
            self.state = GateState::Idle;
        }
    }

    /// Feed recognized text
    pub fn on_speech(&mut self, text: &str, now: Instant) -> GateTransition {
        if self.is_active() {
            self.last_activity = Some(now);
            return GateTransition::Refreshed;
        }

        match self.matched_phrase(text) {
            Some(phrase) => {
                tracing::info!(wake_phrase = phrase, transcript = text, "wake word detected");
                self.open(ActivationReason::WakeWord, now)
            }
            None => GateTransition::Unchanged,
        }
    }

    /// Open the gate without a wake phrase
    pub fn trigger(&mut self, now: Instant) -> GateTransition {
        if self.is_active() {
            self.last_activity = Some(now);
            return GateTransition::Refreshed;
        }
        self.open(ActivationReason::Manual, now)
    }

    /// Set or clear the emergency override
    ///
    /// While set the gate is open and never times out. Clearing it restarts
    /// the deactivation delay from `now`.
    pub fn set_always_active(&mut self, on: bool, now: Instant) -> GateTransition {
        if on == self.always_active {
            return GateTransition::Unchanged;
        }
        self.always_active = on;

        if on {
            if self.is_active() {
                self.held_reason = self.reason;
                self.reason = ActivationReason::EmergencyOverride;
                return GateTransition::Unchanged;
            }
            return self.open(ActivationReason::EmergencyOverride, now);
        }

        if self.is_active() {
            self.last_activity = Some(now);
            self.reason = if self.failed_open {
                ActivationReason::RecognizerUnavailable
            } else {
                match self.held_reason {
                    ActivationReason::None | ActivationReason::EmergencyOverride => {
                        ActivationReason::Manual
                    }
                    reason => reason,
                }
            };
        }
        GateTransition::Unchanged
    }

    /// Hold the gate open because recognition cannot run
    pub fn fail_open(&mut self, now: Instant) -> GateTransition {
        self.failed_open = true;
        self.recognizing = false;
        if self.is_active() {
            if !self.always_active {
                self.reason = ActivationReason::RecognizerUnavailable;
            }
            return GateTransition::Unchanged;
        }
        self.open(ActivationReason::RecognizerUnavailable, now)
    }

    /// When the gate will close if nothing else happens
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        if !self.is_active() || self.always_active || self.failed_open {
            return None;
        }
        self.last_activity.map(|t| t + self.deactivation_delay)
    }

    /// Close the gate if its deadline has passed
    pub fn expire(&mut self, now: Instant) -> GateTransition {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                tracing::debug!(
                    delay_secs = self.deactivation_delay.as_secs_f64(),
                    "gate deactivated after inactivity"
                );
                self.close()
            }
            _ => GateTransition::Unchanged,
        }
    }

    /// Close the gate and clear every override
    pub fn deactivate(&mut self) -> GateTransition {
        self.always_active = false;
        self.failed_open = false;
        if self.is_active() {
            self.close()
        } else {
            GateTransition::Unchanged
        }
    }

    fn open(&mut self, reason: ActivationReason, now: Instant) -> GateTransition {
        self.state = GateState::Active;
        self.reason = reason;
        self.held_reason = reason;
        self.last_activity = Some(now);
        GateTransition::Activated(reason)
    }

    fn close(&mut self) -> GateTransition {
        self.state = if self.recognizing {
            GateState::Armed
        } else {
            GateState::Idle
        };
        self.reason = ActivationReason::None;
        self.held_reason = ActivationReason::None;
        GateTransition::Deactivated
    }
}

/// Lowercase, punctuation to spaces, whitespace collapsed
fn fold(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_secs(15);

    fn gate() -> WakeWordGate {
        let phrases = vec!["hey coach".to_string(), "hey couch".to_string()];
        let mut gate = WakeWordGate::new(&phrases, DELAY);
        gate.arm();
        gate
    }

    #[test]
    fn test_wake_word_detection() {
        let mut gate = gate();
        let now = Instant::now();

        assert_eq!(gate.on_speech("hello world", now), GateTransition::Unchanged);
        assert_eq!(gate.state(), GateState::Armed);

        assert_eq!(
            gate.on_speech("Uh, HEY COUCH, help", now),
            GateTransition::Activated(ActivationReason::WakeWord)
        );
        assert_eq!(gate.state(), GateState::Active);
    }

    #[test]
    fn repeated_match_only_refreshes() {
        let mut gate = gate();
        let t0 = Instant::now();
        gate.on_speech("hey coach", t0);

        let t1 = t0 + Duration::from_secs(5);
        assert_eq!(gate.on_speech("hey coach again", t1), GateTransition::Refreshed);
        assert_eq!(gate.deadline(), Some(t1 + DELAY));
    }

    #[test]
    fn expires_back_to_armed() {
        let mut gate = gate();
        let t0 = Instant::now();
        gate.on_speech("hey coach", t0);

        assert_eq!(gate.expire(t0 + Duration::from_secs(14)), GateTransition::Unchanged);
        assert_eq!(gate.expire(t0 + DELAY), GateTransition::Deactivated);
        assert_eq!(gate.state(), GateState::Armed);
        assert_eq!(gate.snapshot().reason, ActivationReason::None);
    }

    #[test]
    fn override_suspends_and_resumes_timer() {
        let mut gate = gate();
        let t0 = Instant::now();

        assert_eq!(
            gate.set_always_active(true, t0),
            GateTransition::Activated(ActivationReason::EmergencyOverride)
        );
        assert_eq!(gate.deadline(), None);
        assert_eq!(gate.expire(t0 + Duration::from_secs(600)), GateTransition::Unchanged);

        let cleared = t0 + Duration::from_secs(60);
        gate.set_always_active(false, cleared);
        assert_eq!(gate.deadline(), Some(cleared + DELAY));
    }

    #[test]
    fn override_while_active_takes_reason() {
        let mut gate = gate();
        let t0 = Instant::now();
        gate.on_speech("hey coach", t0);
        gate.set_always_active(true, t0);
        assert_eq!(gate.snapshot().reason, ActivationReason::EmergencyOverride);
    }

    #[test]
    fn punctuation_and_case_are_ignored() {
        let gate = WakeWordGate::new(&["Hey, Coach".to_string()], DELAY);
        assert_eq!(gate.matched_phrase("uh... HEY coach!! he fell"), Some("hey coach"));
        assert_eq!(gate.matched_phrase("hey-coach"), Some("hey coach"));
        assert_eq!(gate.matched_phrase("heycoach"), None);
    }

    #[test]
    fn clearing_override_restores_opening_reason() {
        let mut gate = gate();
        let t0 = Instant::now();
        gate.on_speech("hey coach", t0);
        gate.set_always_active(true, t0);

        let cleared = t0 + Duration::from_secs(30);
        gate.set_always_active(false, cleared);
        assert!(gate.is_active());
        assert_eq!(gate.snapshot().reason, ActivationReason::WakeWord);
        assert_eq!(gate.deadline(), Some(cleared + DELAY));
    }

    #[test]
    fn clearing_override_it_opened_reports_manual() {
        let mut gate = gate();
        let t0 = Instant::now();
        gate.set_always_active(true, t0);
        gate.set_always_active(false, t0);
        assert_eq!(gate.snapshot().reason, ActivationReason::Manual);
    }

    #[test]
    fn fail_open_never_expires() {
        let mut gate = WakeWordGate::new(&["hey coach".to_string()], DELAY);
        let t0 = Instant::now();
        assert_eq!(
            gate.fail_open(t0),
            GateTransition::Activated(ActivationReason::RecognizerUnavailable)
        );
        assert_eq!(gate.expire(t0 + Duration::from_secs(3600)), GateTransition::Unchanged);

        assert_eq!(gate.deactivate(), GateTransition::Deactivated);
        assert_eq!(gate.state(), GateState::Idle);
    }
}
