//! TOML configuration file loading
//!
//! Supports `coach.toml` in the working directory, `COACH_CONFIG`, or
//! `~/.config/omni/coach/config.toml`. All fields are optional; the file is a
//! partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct CoachConfigFile {
    /// Realtime service endpoint (`ws://` or `wss://`)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Wake word and activation settings
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Streaming cadence settings
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Speech recognizer backend
    #[serde(default)]
    pub recognizer: RecognizerFileConfig,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Accepted wake phrase spellings
    pub wake_phrases: Option<Vec<String>>,

    /// Seconds of inactivity before the gate closes
    pub deactivation_secs: Option<f64>,

    /// Keep the gate open regardless of wake word
    pub always_active: Option<bool>,

    /// Backoff before restarting an expired recognition session
    pub recognizer_backoff_ms: Option<u64>,

    /// Maximum lifetime of one recognition session
    pub recognizer_session_secs: Option<u64>,
}

/// Streaming cadence configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Seconds between camera frame uploads
    pub frame_interval_secs: Option<f64>,

    /// Seconds between keepalive pings
    pub keepalive_secs: Option<u64>,

    /// Directory where session recordings are exported
    pub session_dir: Option<String>,
}

/// Speech recognizer configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognizerFileConfig {
    /// Transcription endpoint URL
    pub url: Option<String>,

    /// Transcription model name
    pub model: Option<String>,

    /// API key (prefer `OPENAI_API_KEY`)
    pub api_key: Option<String>,
}

/// Load the configuration file from the first location that exists
///
/// Missing or unparsable files fall back to defaults with a warning.
#[must_use]
pub fn load_config_file() -> CoachConfigFile {
    let Some(path) = config_file_path() else {
        return CoachConfigFile::default();
    };

    load_from_path(&path)
}

/// Load a configuration file from an explicit path
#[must_use]
pub fn load_from_path(path: &Path) -> CoachConfigFile {
    if !path.exists() {
        return CoachConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                CoachConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            CoachConfigFile::default()
        }
    }
}

/// Resolve the config file path: `COACH_CONFIG`, `./coach.toml`, then XDG
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("COACH_CONFIG") {
        return Some(PathBuf::from(path));
    }

    let local = PathBuf::from("coach.toml");
    if local.exists() {
        return Some(local);
    }

    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("coach")
            .join("config.toml")
    })
}
