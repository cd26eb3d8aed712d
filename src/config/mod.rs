//! Configuration management for the coaching client
//!
//! Values resolve in order: built-in defaults, the TOML config file, then
//! environment variables. The CLI applies its own flags on top.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use self::file::CoachConfigFile;
use crate::{Error, Result};

/// Default realtime endpoint
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8000/ws";

/// Wake phrase spellings accepted by default; includes common mishearings
pub const DEFAULT_WAKE_PHRASES: &[&str] = &[
    "hey coach",
    "hey couch",
    "hey koch",
    "hey cooch",
    "a coach",
];

/// Default gate deactivation delay
pub const DEFAULT_DEACTIVATION_DELAY: Duration = Duration::from_secs(15);

/// Default camera frame cadence
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_secs(3);

/// Default keepalive ping interval
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Default backoff before restarting the recognizer
pub const DEFAULT_RECOGNIZER_BACKOFF: Duration = Duration::from_millis(300);

/// Default maximum lifetime of a single recognition session
pub const DEFAULT_RECOGNIZER_SESSION_LIMIT: Duration = Duration::from_secs(55);

/// Default transcription endpoint
pub const DEFAULT_STT_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Default transcription model
pub const DEFAULT_STT_MODEL: &str = "whisper-1";

/// Coaching client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Realtime service endpoint
    pub endpoint: String,

    /// Wake word gate configuration
    pub voice: VoiceConfig,

    /// Streaming session configuration
    pub session: SessionConfig,

    /// Speech recognizer configuration
    pub recognizer: RecognizerConfig,
}

/// Wake word gate configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Accepted wake phrase spellings (lowercase)
    pub wake_phrases: Vec<String>,

    /// Inactivity delay before the gate closes
    pub deactivation_delay: Duration,

    /// Hold the gate open regardless of wake word
    pub always_active: bool,

    /// Backoff before restarting an expired or failed recognition session
    pub recognizer_backoff: Duration,

    /// Maximum lifetime of one recognition session
    pub recognizer_session_limit: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            wake_phrases: DEFAULT_WAKE_PHRASES.iter().map(ToString::to_string).collect(),
            deactivation_delay: DEFAULT_DEACTIVATION_DELAY,
            always_active: false,
            recognizer_backoff: DEFAULT_RECOGNIZER_BACKOFF,
            recognizer_session_limit: DEFAULT_RECOGNIZER_SESSION_LIMIT,
        }
    }
}

/// Streaming session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Camera frame upload cadence
    pub frame_interval: Duration,

    /// Keepalive ping interval
    pub keepalive_interval: Duration,

    /// Directory for exported session recordings
    pub session_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            session_dir: default_session_dir(),
        }
    }
}

/// Speech recognizer configuration
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    /// Transcription endpoint URL
    pub url: String,

    /// Transcription model
    pub model: String,

    /// API key; recognizer is unavailable without one
    pub api_key: Option<SecretString>,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STT_URL.to_string(),
            model: DEFAULT_STT_MODEL.to_string(),
            api_key: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            voice: VoiceConfig::default(),
            session: SessionConfig::default(),
            recognizer: RecognizerConfig::default(),
        }
    }
}

/// Return the data directory for session recordings
///
/// Uses `~/.local/share/omni/coach/sessions` on Linux
#[must_use]
pub fn default_session_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "omni", "omni").map_or_else(
        || PathBuf::from("session_logs"),
        |d| d.data_dir().join("coach").join("sessions"),
    )
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid (e.g. non-websocket endpoint)
    pub fn load() -> Result<Self> {
        let file = file::load_config_file();
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if the resolved configuration is invalid
    pub fn from_sources(
        file: CoachConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = Self::default();

        // Endpoint
        if let Some(endpoint) = env("COACH_ENDPOINT").or(file.endpoint) {
            config.endpoint = endpoint;
        }

        // Wake word gate
        if let Some(phrases) = env("COACH_WAKE_PHRASES")
            .map(|s| s.split(',').map(ToString::to_string).collect::<Vec<_>>())
            .or(file.voice.wake_phrases)
        {
            config.voice.wake_phrases = normalize_phrases(phrases);
        }

        if let Some(secs) = env_f64(&env, "COACH_DEACTIVATION_SECS")?.or(file.voice.deactivation_secs)
        {
            config.voice.deactivation_delay = positive_duration("deactivation delay", secs)?;
        }

        if let Some(always) = env("COACH_ALWAYS_ACTIVE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .or(file.voice.always_active)
        {
            config.voice.always_active = always;
        }

        if let Some(ms) = file.voice.recognizer_backoff_ms {
            config.voice.recognizer_backoff = Duration::from_millis(ms);
        }

        if let Some(secs) = file.voice.recognizer_session_secs {
            config.voice.recognizer_session_limit = Duration::from_secs(secs.max(1));
        }

        // Streaming cadence
        if let Some(secs) =
            env_f64(&env, "COACH_FRAME_INTERVAL_SECS")?.or(file.session.frame_interval_secs)
        {
            config.session.frame_interval = positive_duration("frame interval", secs)?;
        }

        if let Some(secs) = env("COACH_KEEPALIVE_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .or(file.session.keepalive_secs)
        {
            config.session.keepalive_interval = Duration::from_secs(secs.max(1));
        }

        if let Some(dir) = env("COACH_SESSION_DIR").or(file.session.session_dir) {
            config.session.session_dir = PathBuf::from(dir);
        }

        // Recognizer
        if let Some(url) = env("COACH_STT_URL").or(file.recognizer.url) {
            config.recognizer.url = url;
        }
        if let Some(model) = env("COACH_STT_MODEL").or(file.recognizer.model) {
            config.recognizer.model = model;
        }
        config.recognizer.api_key = env("OPENAI_API_KEY")
            .or(file.recognizer.api_key)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        config.validate()?;
        Ok(config)
    }

    /// Check that the endpoint is a websocket URL and the gate has phrases
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        validate_endpoint(&self.endpoint)?;

        if self.voice.wake_phrases.is_empty() {
            return Err(Error::Config("at least one wake phrase is required".to_string()));
        }

        Ok(())
    }
}

/// Validate that an endpoint parses and uses a websocket scheme
///
/// # Errors
///
/// Returns error if the URL is malformed or not `ws`/`wss`
pub fn validate_endpoint(endpoint: &str) -> Result<url::Url> {
    let url = url::Url::parse(endpoint)
        .map_err(|e| Error::Config(format!("invalid endpoint '{endpoint}': {e}")))?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(Error::Config(format!(
            "endpoint must use ws:// or wss://, got {other}://"
        ))),
    }
}

/// Lowercase, trim and drop empty wake phrases
fn normalize_phrases(phrases: Vec<String>) -> Vec<String> {
    phrases
        .into_iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

fn env_f64(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<f64>> {
    env(key)
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|e| Error::Config(format!("{key}: {e}")))
        })
        .transpose()
}

fn positive_duration(name: &str, secs: f64) -> Result<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Ok(Duration::from_secs_f64(secs))
    } else {
        Err(Error::Config(format!("{name} must be positive, got {secs}")))
    }
}
