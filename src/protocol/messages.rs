//! JSON message types exchanged with the coaching service

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Base64 PCM16, 24 kHz mono
    Audio { data: String },
    /// Base64 JPEG
    Frame { data: String },
}

impl ClientMessage {
    /// Wrap wire-format audio
    #[must_use]
    pub fn audio(pcm: &[u8]) -> Self {
        Self::Audio {
            data: STANDARD.encode(pcm),
        }
    }

    /// Wrap an encoded camera frame
    #[must_use]
    pub fn frame(jpeg: &[u8]) -> Self {
        Self::Frame {
            data: STANDARD.encode(jpeg),
        }
    }

    /// Serialize to the JSON text frame
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Speaker of a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Base64 PCM16 assistant audio
    Audio { data: String },
    /// User text is complete; assistant text arrives as deltas
    Transcript {
        role: Role,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
    },
    TranscriptDone,
    Interrupt,
    Tool {
        name: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    SceneUpdate {
        #[serde(default)]
        observation: String,
    },
    ScenarioUpdate {
        #[serde(default)]
        scenario: String,
        #[serde(default)]
        severity: String,
        #[serde(default)]
        summary: String,
        #[serde(default)]
        body_region: String,
    },
    /// Any `type` this client does not handle
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Parse one inbound text frame
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` for malformed JSON or a message missing
    /// required fields
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(e.to_string()))
    }
}

/// Decode a base64 payload
///
/// # Errors
///
/// Returns `Error::Protocol` if the payload is not valid base64
pub fn decode_payload(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data)
        .map_err(|e| Error::Protocol(format!("invalid base64 payload: {e}")))
}
